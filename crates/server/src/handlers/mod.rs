//! HTTP request handlers.

pub mod auth;
pub mod common;
pub mod quota;
pub mod uploads;
pub mod users;

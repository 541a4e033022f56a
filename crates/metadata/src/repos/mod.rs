//! Repository traits for metadata operations.

pub mod files;
pub mod quota;
pub mod sessions;
pub mod users;

pub use files::FileRepo;
pub use quota::QuotaRepo;
pub use sessions::SessionRepo;
pub use users::UserRepo;

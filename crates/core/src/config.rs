//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// When enabled, restrict the endpoint to authorized scraper IPs at
    /// the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Admin bootstrap configuration.
///
/// The admin token provides initial access to create users and manage
/// quotas. Only its SHA-256 hash is stored; if the hash changes between
/// restarts the previous admin token is revoked and a new one recorded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Description for the admin token.
    pub token_description: Option<String>,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
            token_description: Some("Test admin token".to_string()),
        }
    }

    /// Validate the token hash shape.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_hash.len() != 64
            || !self.token_hash.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err("admin.token_hash must be 64 hex characters (SHA-256)".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for promoted objects.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("storage.path must not be empty".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Upload session configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory for in-progress spool files.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    /// Default chunk size in bytes, used when the client does not pick one.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: u64,
    /// Minimum accepted chunk size in bytes.
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,
    /// Maximum accepted chunk size in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Maximum number of chunks per session. Moderators and admins are
    /// exempt.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u64,
    /// Maximum total upload size in bytes. Admins are exempt.
    #[serde(default = "default_max_total_size")]
    pub max_total_size: u64,
    /// Session lifetime in seconds; past this deadline a session reads
    /// as expired.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("./data/spool")
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_min_chunk_size() -> u64 {
    crate::MIN_CHUNK_SIZE
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_chunks() -> u64 {
    10_000
}

fn default_max_total_size() -> u64 {
    64 * 1024 * 1024 * 1024 // 64 GiB
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            spool_dir: default_spool_dir(),
            default_chunk_size: default_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            max_chunks: default_max_chunks(),
            max_total_size: default_max_total_size(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl UploadConfig {
    /// Get the session TTL as a Duration.
    pub fn session_ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_chunk_size == 0 {
            return Err("upload.min_chunk_size must be positive".to_string());
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(format!(
                "upload.min_chunk_size {} exceeds max_chunk_size {}",
                self.min_chunk_size, self.max_chunk_size
            ));
        }
        if !(self.min_chunk_size..=self.max_chunk_size).contains(&self.default_chunk_size) {
            return Err(format!(
                "upload.default_chunk_size {} outside [{}, {}]",
                self.default_chunk_size, self.min_chunk_size, self.max_chunk_size
            ));
        }
        if self.max_chunks == 0 {
            return Err("upload.max_chunks must be positive".to_string());
        }
        Ok(())
    }
}

/// Quota configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Capacity granted to new accounts, in bytes.
    #[serde(default = "default_base_grant")]
    pub base_grant_bytes: u64,
    /// Hard ceiling dynamic top-ups may never exceed, in bytes.
    #[serde(default = "default_cap")]
    pub cap_bytes: u64,
    /// Capacity added per dynamic top-up, in bytes.
    #[serde(default = "default_topup_step")]
    pub topup_step_bytes: u64,
    /// Top up when remaining headroom falls below this fraction of size.
    #[serde(default = "default_topup_headroom_fraction")]
    pub topup_headroom_fraction: f64,
    /// A completed upload within this window marks the account active
    /// enough for a top-up.
    #[serde(default = "default_topup_recent_window_secs")]
    pub topup_recent_window_secs: u64,
    /// Shrink over-base accounts after this many days without session
    /// activity.
    #[serde(default = "default_reduce_after_days")]
    pub reduce_after_days: u64,
    /// Capacity removed per dynamic reduction, in bytes.
    #[serde(default = "default_reduce_step")]
    pub reduce_step_bytes: u64,
    /// Interval between reduction sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_base_grant() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_cap() -> u64 {
    100 * 1024 * 1024 * 1024 // 100 GiB
}

fn default_topup_step() -> u64 {
    5 * 1024 * 1024 * 1024 // 5 GiB
}

fn default_topup_headroom_fraction() -> f64 {
    0.1
}

fn default_topup_recent_window_secs() -> u64 {
    7 * 86400
}

fn default_reduce_after_days() -> u64 {
    30
}

fn default_reduce_step() -> u64 {
    5 * 1024 * 1024 * 1024 // 5 GiB
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            base_grant_bytes: default_base_grant(),
            cap_bytes: default_cap(),
            topup_step_bytes: default_topup_step(),
            topup_headroom_fraction: default_topup_headroom_fraction(),
            topup_recent_window_secs: default_topup_recent_window_secs(),
            reduce_after_days: default_reduce_after_days(),
            reduce_step_bytes: default_reduce_step(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl QuotaConfig {
    /// Validate quota configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_grant_bytes > self.cap_bytes {
            return Err(format!(
                "quota.base_grant_bytes {} exceeds cap_bytes {}",
                self.base_grant_bytes, self.cap_bytes
            ));
        }
        if !(0.0..=1.0).contains(&self.topup_headroom_fraction) {
            return Err(format!(
                "quota.topup_headroom_fraction {} outside [0.0, 1.0]",
                self.topup_headroom_fraction
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err("quota.sweep_interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Vetting (archive inspection, malware scan, promotion) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VettingConfig {
    /// Run the archive inspector on completed uploads (default: true).
    #[serde(default = "default_true")]
    pub inspect_enabled: bool,
    /// Path to the 7-Zip binary.
    #[serde(default = "default_sevenzip_path")]
    pub sevenzip_path: PathBuf,
    /// Run the malware scanner on completed uploads (default: true).
    #[serde(default = "default_true")]
    pub scan_enabled: bool,
    /// Path to the clamscan binary.
    #[serde(default = "default_clamscan_path")]
    pub clamscan_path: PathBuf,
    /// Attempts per background job before giving up.
    #[serde(default = "default_job_attempts")]
    pub job_attempts: u32,
    /// Base delay between job retries, in milliseconds.
    #[serde(default = "default_job_backoff_base_ms")]
    pub job_backoff_base_ms: u64,
    /// Ceiling for the retry delay, in milliseconds.
    #[serde(default = "default_job_backoff_max_ms")]
    pub job_backoff_max_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_sevenzip_path() -> PathBuf {
    PathBuf::from("7z")
}

fn default_clamscan_path() -> PathBuf {
    PathBuf::from("clamscan")
}

fn default_job_attempts() -> u32 {
    5
}

fn default_job_backoff_base_ms() -> u64 {
    500
}

fn default_job_backoff_max_ms() -> u64 {
    60_000
}

impl Default for VettingConfig {
    fn default() -> Self {
        Self {
            inspect_enabled: default_true(),
            sevenzip_path: default_sevenzip_path(),
            scan_enabled: default_true(),
            clamscan_path: default_clamscan_path(),
            job_attempts: default_job_attempts(),
            job_backoff_base_ms: default_job_backoff_base_ms(),
            job_backoff_max_ms: default_job_backoff_max_ms(),
        }
    }
}

impl VettingConfig {
    /// Validate vetting configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.job_attempts == 0 {
            return Err("vetting.job_attempts must be at least 1".to_string());
        }
        if self.job_backoff_base_ms > self.job_backoff_max_ms {
            return Err(format!(
                "vetting.job_backoff_base_ms {} exceeds job_backoff_max_ms {}",
                self.job_backoff_base_ms, self.job_backoff_max_ms
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admin bootstrap configuration (required).
    pub admin: AdminConfig,
    /// Upload session configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Quota configuration.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Vetting configuration.
    #[serde(default)]
    pub vetting: VettingConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// tiny chunk bounds, and a dummy admin token. Subprocess vetting is
    /// disabled so tests never shell out.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
            upload: UploadConfig {
                min_chunk_size: 1,
                default_chunk_size: 64,
                max_chunk_size: crate::MAX_CHUNK_SIZE,
                max_chunks: 64,
                max_total_size: 1024 * 1024,
                ..UploadConfig::default()
            },
            quota: QuotaConfig {
                base_grant_bytes: 4096,
                cap_bytes: 16384,
                topup_step_bytes: 2048,
                reduce_step_bytes: 2048,
                ..QuotaConfig::default()
            },
            vetting: VettingConfig {
                inspect_enabled: false,
                scan_enabled: false,
                ..VettingConfig::default()
            },
        }
    }

    /// Validate all sections, failing fast on the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.admin.validate()?;
        self.storage.validate()?;
        self.upload.validate()?;
        self.quota.validate()?;
        self.vetting.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
            upload: UploadConfig::default(),
            quota: QuotaConfig::default(),
            vetting: VettingConfig::default(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testing_config_validates() {
        assert!(AppConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_upload_config_rejects_inverted_bounds() {
        let config = UploadConfig {
            min_chunk_size: 1024,
            max_chunk_size: 512,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_config_rejects_default_outside_bounds() {
        let config = UploadConfig {
            min_chunk_size: 1024,
            max_chunk_size: 2048,
            default_chunk_size: 4096,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quota_config_rejects_base_above_cap() {
        let config = QuotaConfig {
            base_grant_bytes: 100,
            cap_bytes: 50,
            ..QuotaConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_admin_config_rejects_short_hash() {
        let config = AdminConfig {
            token_hash: "abc123".to_string(),
            token_description: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_default_is_filesystem() {
        match StorageConfig::default() {
            StorageConfig::Filesystem { path } => {
                assert_eq!(path, PathBuf::from("./data/storage"));
            }
        }
    }
}

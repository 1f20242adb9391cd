//! Configuration management for Chunkyard

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default chunk size: 25MB
pub const DEFAULT_CHUNK_SIZE: usize = 25 * 1024 * 1024;

/// Maximum upload size: 100MB
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub retry: RetryConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub progress_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Public storage directory
    pub dir: PathBuf,
    /// Name of the staging directory created inside `dir`
    pub staging_dir_name: String,
}

impl StorageConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.dir.join(&self.staging_dir_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub mode: TransferMode,
    pub chunk_size: usize,
    pub max_upload_size: u64,
    /// Delete the stored artifact once a download has fully completed
    pub download_once: bool,
}

/// How uploads are kept once chunked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// The chunk set is the stored artifact; downloads concatenate on the fly
    Chunked,
    /// Chunks are merged into a single file right after upload
    Merged,
}

impl TransferMode {
    pub fn default_download_once(self) -> bool {
        matches!(self, TransferMode::Merged)
    }
}

impl std::str::FromStr for TransferMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chunked" => Ok(TransferMode::Chunked),
            "merged" => Ok(TransferMode::Merged),
            other => Err(ConfigError::Invalid {
                key: "TRANSFER_MODE",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Zero disables the periodic task; the startup sweep still runs
    pub interval: Duration,
    pub staging_ttl: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("CHUNK_SIZE must be greater than zero")]
    ZeroChunkSize,
}

impl Default for Config {
    fn default() -> Self {
        let mode = TransferMode::Chunked;
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                progress_port: 8080,
            },
            storage: StorageConfig {
                dir: PathBuf::from("./uploads"),
                staging_dir_name: ".staging".to_string(),
            },
            transfer: TransferConfig {
                mode,
                chunk_size: DEFAULT_CHUNK_SIZE,
                max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
                download_once: mode.default_download_once(),
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(50),
            },
            sweep: SweepConfig {
                interval: Duration::from_secs(15 * 60),
                staging_ttl: Duration::from_secs(24 * 60 * 60),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let mode = match env::var("TRANSFER_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.transfer.mode,
        };

        let chunk_size: usize = parse_var("CHUNK_SIZE", defaults.transfer.chunk_size)?;
        if chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
                progress_port: parse_var("PROGRESS_PORT", defaults.server.progress_port)?,
            },
            storage: StorageConfig {
                dir: env::var("STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.dir),
                staging_dir_name: env::var("STAGING_DIR_NAME")
                    .unwrap_or(defaults.storage.staging_dir_name),
            },
            transfer: TransferConfig {
                mode,
                chunk_size,
                max_upload_size: parse_var("MAX_UPLOAD_SIZE", defaults.transfer.max_upload_size)?,
                download_once: parse_var("DOWNLOAD_ONCE", mode.default_download_once())?,
            },
            retry: RetryConfig {
                max_attempts: parse_var("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_delay: Duration::from_millis(parse_var("RETRY_BASE_DELAY_MS", 50u64)?),
            },
            sweep: SweepConfig {
                interval: Duration::from_secs(parse_var("SWEEP_INTERVAL_SECS", 15 * 60u64)?),
                staging_ttl: Duration::from_secs(parse_var("STAGING_TTL_SECS", 24 * 60 * 60u64)?),
            },
        })
    }
}

/// Read an env var, keeping `default` when it is unset
fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_mode_parse() {
        assert_eq!("chunked".parse::<TransferMode>().unwrap(), TransferMode::Chunked);
        assert_eq!(" Merged ".parse::<TransferMode>().unwrap(), TransferMode::Merged);
        assert!(matches!(
            "striped".parse::<TransferMode>(),
            Err(ConfigError::Invalid { key: "TRANSFER_MODE", .. })
        ));
    }

    #[test]
    fn test_download_once_follows_mode() {
        assert!(!TransferMode::Chunked.default_download_once());
        assert!(TransferMode::Merged.default_download_once());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.transfer.chunk_size, 25 * 1024 * 1024);
        assert_eq!(config.transfer.max_upload_size, 100 * 1024 * 1024);
        assert_eq!(config.storage.staging_dir(), PathBuf::from("./uploads/.staging"));
    }
}

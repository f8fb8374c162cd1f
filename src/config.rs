//! Configuration for the s3gate server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Longest lifetime a presigned URL may be given (7 days).
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Largest single object S3 accepts in one PUT (5 GiB).
pub const MAX_OBJECT_SIZE_CAP: u64 = 5 * 1024 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Region used in credential scopes and presigned URLs
    #[serde(default = "default_region")]
    pub region: String,

    /// Maximum object size in bytes, per PUT or per part
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Default presigned URL lifetime, humantime syntax (`15m`, `1h`, `2days`)
    #[serde(default = "default_presign_expiry")]
    pub presign_default_expiry: String,

    /// Upper bound on in-flight deletions during a batch delete
    #[serde(default = "default_batch_delete_concurrency")]
    pub batch_delete_concurrency: usize,

    /// Buckets a single tenant may own
    #[serde(default = "default_max_buckets_per_tenant")]
    pub max_buckets_per_tenant: usize,

    /// Let unsigned requests through as anonymous callers.
    /// They still need a public grant to do anything.
    #[serde(default = "default_allow_anonymous")]
    pub allow_anonymous: bool,

    /// Log level filter string. Overridden by RUST_LOG.
    /// Default: "s3gate=debug,tower_http=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Access keys known to the built-in identity directory
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

/// One `[[credentials]]` entry
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub user_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("tenant_id", &self.tenant_id)
            .field("active", &self.active)
            .finish()
    }
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_object_size() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_presign_expiry() -> String {
    "15m".to_string()
}

fn default_batch_delete_concurrency() -> usize {
    32
}

fn default_max_buckets_per_tenant() -> usize {
    100
}

fn default_allow_anonymous() -> bool {
    true
}

fn default_active() -> bool {
    true
}

fn default_log_level() -> String {
    "s3gate=debug,tower_http=debug".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            region: default_region(),
            max_object_size: default_max_object_size(),
            presign_default_expiry: default_presign_expiry(),
            batch_delete_concurrency: default_batch_delete_concurrency(),
            max_buckets_per_tenant: default_max_buckets_per_tenant(),
            allow_anonymous: default_allow_anonymous(),
            log_level: default_log_level(),
            credentials: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("S3GATE_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Ok(region) = std::env::var("S3GATE_REGION") {
            config.region = region;
        }

        if let Ok(size) = std::env::var("S3GATE_MAX_OBJECT_SIZE") {
            if let Ok(parsed) = size.parse() {
                config.max_object_size = parsed;
            }
        }

        if let Ok(expiry) = std::env::var("S3GATE_PRESIGN_DEFAULT_EXPIRY") {
            config.presign_default_expiry = expiry;
        }

        // A single credential can be supplied through the environment
        if let (Ok(access_key_id), Ok(secret_access_key)) = (
            std::env::var("S3GATE_ACCESS_KEY_ID"),
            std::env::var("S3GATE_SECRET_ACCESS_KEY"),
        ) {
            config.credentials.push(CredentialConfig {
                user_id: access_key_id.clone(),
                access_key_id,
                secret_access_key,
                tenant_id: std::env::var("S3GATE_TENANT_ID").ok(),
                active: true,
            });
        }

        if let Ok(level) = std::env::var("S3GATE_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Resolve configuration: explicit path, `S3GATE_CONFIG`, default
    /// locations, then the environment.
    ///
    /// An explicitly named file that fails to load is an error; default
    /// locations are skipped silently.
    pub fn load(explicit: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var("S3GATE_CONFIG") {
            return Self::from_file(&path);
        }

        for path in &["s3gate.toml", "/etc/s3gate/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return Ok(config);
                }
            }
        }

        Ok(Self::from_env())
    }

    /// Parsed default presigned URL lifetime.
    pub fn presign_expiry(&self) -> Result<Duration, ConfigError> {
        let expiry = humantime::parse_duration(&self.presign_default_expiry).map_err(|e| {
            ConfigError::Invalid(format!(
                "presign_default_expiry '{}': {}",
                self.presign_default_expiry, e
            ))
        })?;
        if expiry.is_zero() || expiry > MAX_PRESIGN_EXPIRY {
            return Err(ConfigError::Invalid(format!(
                "presign_default_expiry must be between 1s and {}",
                humantime::format_duration(MAX_PRESIGN_EXPIRY)
            )));
        }
        Ok(expiry)
    }

    /// Check cross-field constraints once, at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.presign_expiry()?;

        if self.max_object_size == 0 || self.max_object_size > MAX_OBJECT_SIZE_CAP {
            return Err(ConfigError::Invalid(format!(
                "max_object_size must be between 1 and {} bytes",
                MAX_OBJECT_SIZE_CAP
            )));
        }

        if self.batch_delete_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "batch_delete_concurrency must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for cred in &self.credentials {
            if cred.access_key_id.is_empty() || cred.secret_access_key.is_empty() {
                return Err(ConfigError::Invalid(
                    "credentials need a non-empty access_key_id and secret_access_key".to_string(),
                ));
            }
            if !seen.insert(cred.access_key_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate access_key_id '{}'",
                    cred.access_key_id
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.presign_expiry().unwrap(), Duration::from_secs(900));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parse_credentials() {
        let toml = r#"
            listen_addr = "127.0.0.1:8080"
            region = "eu-west-1"
            presign_default_expiry = "1h"

            [[credentials]]
            access_key_id = "AKIDACME"
            secret_access_key = "acme-secret"
            user_id = "alice"
            tenant_id = "acme"

            [[credentials]]
            access_key_id = "AKIDOLD"
            secret_access_key = "old-secret"
            user_id = "bob"
            active = false
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.presign_expiry().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[0].tenant_id.as_deref(), Some("acme"));
        assert!(config.credentials[0].active);
        assert!(!config.credentials[1].active);
        assert!(config.credentials[1].tenant_id.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presign_expiry_bounds() {
        let config = Config {
            presign_default_expiry: "8days".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            presign_default_expiry: "soon".to_string(),
            ..Config::default()
        };
        assert!(config.presign_expiry().is_err());
    }

    #[test]
    fn test_duplicate_access_keys_rejected() {
        let cred = CredentialConfig {
            access_key_id: "AK".to_string(),
            secret_access_key: "s".to_string(),
            user_id: "u".to_string(),
            tenant_id: None,
            active: true,
        };
        let config = Config {
            credentials: vec![cred.clone(), cred],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cred = CredentialConfig {
            access_key_id: "AK".to_string(),
            secret_access_key: "super-secret".to_string(),
            user_id: "u".to_string(),
            tenant_id: None,
            active: true,
        };
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}

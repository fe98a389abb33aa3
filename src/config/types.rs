//! Configuration type definitions.
//!
//! All sections implement serde with `#[serde(default)]` so a partial config
//! file overlays the defaults, and every default is runnable for local
//! development (embedded storage excepted; it must be chosen explicitly).

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub kv: KvConfig,
    pub bus: BusConfig,
    pub xmpp: XmppConfig,
    pub encryption: EncryptionConfig,
    pub grpc: GrpcConfig,
    pub governance: GovernanceSettings,
    pub logging: LoggingConfig,
}

/// Which backend family the process runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// PostgreSQL + Redis + JetStream.
    Postgres,
    /// Everything in-process. Single-node development and tests.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "aiox".to_string(),
            password: String::new(),
            dbname: "aiox".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub url: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
        }
    }
}

/// Component identity. `domain` is the user-facing domain; agents live under
/// `agents.<domain>`. The secret and address are consumed by whichever
/// process hosts the component wire link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XmppConfig {
    pub domain: String,
    pub component_addr: String,
    pub component_secret: String,
}

impl Default for XmppConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            component_addr: "127.0.0.1:5347".to_string(),
            component_secret: String::new(),
        }
    }
}

/// System-prompt encryption at rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// 64 hex chars (AES-256 key). Required.
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub listen_addr: String,
    /// Shared key for worker auth. Empty disables the check.
    pub worker_api_key: String,
    /// Reaper threshold in seconds; zero or negative falls back to 120.
    pub task_timeout_sec: i64,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:50051".to_string(),
            worker_api_key: String::new(),
            task_timeout_sec: 120,
        }
    }
}

/// Platform-wide quota ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceSettings {
    pub max_tokens_per_day: i64,
    /// Also caps the per-minute request window.
    pub max_tokens_per_minute: i64,
    pub max_requests_per_day: i64,
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            max_tokens_per_day: 100_000,
            max_tokens_per_minute: 60,
            max_requests_per_day: 1_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact single-line text.
    Compact,
    /// JSON lines for log aggregators.
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.storage.backend, StorageBackend::Postgres);
        assert_eq!(cfg.database.port, 5432);
        assert_eq!(cfg.grpc.task_timeout_sec, 120);
        assert_eq!(cfg.governance.max_tokens_per_minute, 60);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_partial_file_overlays_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"storage": {"backend": "memory"}, "grpc": {"task_timeout_sec": 30}}"#,
        )
        .unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.grpc.task_timeout_sec, 30);
        assert_eq!(cfg.database.host, "localhost");
    }

    #[test]
    fn test_roundtrip() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kv.url, cfg.kv.url);
        assert_eq!(back.bus.url, cfg.bus.url);
    }
}

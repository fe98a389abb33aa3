//! Configuration loading.
//!
//! JSON file plus `AIOX_*` environment overrides. A missing file is fine:
//! defaults apply and the environment still wins.

mod types;
mod validate;

pub use types::{
    BusConfig, Config, DatabaseConfig, EncryptionConfig, GovernanceSettings, GrpcConfig,
    KvConfig, LogFormat, LoggingConfig, StorageBackend, StorageConfig, XmppConfig,
};

use std::path::Path;

use crate::error::Result;

impl Config {
    /// Load from a JSON file (when it exists) and apply environment
    /// overrides on top.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load using only defaults and environment overrides.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AIOX_STORAGE_BACKEND") {
            match val.to_ascii_lowercase().as_str() {
                "postgres" => self.storage.backend = StorageBackend::Postgres,
                "memory" => self.storage.backend = StorageBackend::Memory,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("AIOX_DATABASE_HOST") {
            self.database.host = val;
        }
        if let Ok(val) = std::env::var("AIOX_DATABASE_PORT") {
            if let Ok(port) = val.parse() {
                self.database.port = port;
            }
        }
        if let Ok(val) = std::env::var("AIOX_DATABASE_USER") {
            self.database.user = val;
        }
        if let Ok(val) = std::env::var("AIOX_DATABASE_PASSWORD") {
            self.database.password = val;
        }
        if let Ok(val) = std::env::var("AIOX_DATABASE_NAME") {
            self.database.dbname = val;
        }
        if let Ok(val) = std::env::var("AIOX_KV_URL") {
            self.kv.url = val;
        }
        if let Ok(val) = std::env::var("AIOX_BUS_URL") {
            self.bus.url = val;
        }
        if let Ok(val) = std::env::var("AIOX_XMPP_DOMAIN") {
            self.xmpp.domain = val;
        }
        if let Ok(val) = std::env::var("AIOX_XMPP_COMPONENT_ADDR") {
            self.xmpp.component_addr = val;
        }
        if let Ok(val) = std::env::var("AIOX_XMPP_COMPONENT_SECRET") {
            self.xmpp.component_secret = val;
        }
        if let Ok(val) = std::env::var("AIOX_ENCRYPTION_KEY") {
            self.encryption.key = val;
        }
        if let Ok(val) = std::env::var("AIOX_GRPC_LISTEN_ADDR") {
            self.grpc.listen_addr = val;
        }
        if let Ok(val) = std::env::var("AIOX_GRPC_WORKER_API_KEY") {
            self.grpc.worker_api_key = val;
        }
        if let Ok(val) = std::env::var("AIOX_GRPC_TASK_TIMEOUT_SEC") {
            if let Ok(timeout) = val.parse() {
                self.grpc.task_timeout_sec = timeout;
            }
        }
        if let Ok(val) = std::env::var("AIOX_LOG_LEVEL") {
            self.logging.level = val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = Config::load_from_path(Path::new("/nonexistent/aiox.json")).unwrap();
        assert_eq!(cfg.database.port, 5432);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"xmpp": {"domain": "chat.example.org"}, "grpc": {"worker_api_key": "k"}}"#,
        )
        .unwrap();
        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.xmpp.domain, "chat.example.org");
        assert_eq!(cfg.grpc.worker_api_key, "k");
        assert_eq!(cfg.database.host, "localhost");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{broken").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }
}

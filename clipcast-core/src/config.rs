use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("tls", &self.tls)
            .field("database", &"<redacted>")
            .field("storage", &self.storage)
            .field("catalog", &self.catalog)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Global cap on concurrently open client connections.
    pub open_connections_limit: usize,
    /// Per-read deadline while waiting for a request header, in ms.
    /// Zero disables the deadline.
    pub request_read_timeout_ms: u64,
    /// Per-read deadline while reading body bytes (and per-write deadline
    /// for responses), in ms. Zero disables the deadline.
    pub body_read_timeout_ms: u64,
    /// Bound on waiting for in-flight connections during shutdown, in ms.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7070,
            open_connections_limit: 256,
            request_read_timeout_ms: 30_000,
            body_read_timeout_ms: 30_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Offer TLS upgrades at all. When false every connection is cleartext.
    pub enabled: bool,
    /// Close connections whose secure upgrade fails instead of falling
    /// back to cleartext.
    pub secure_connection_required: bool,
    /// Deadline for one handshake, in ms. Zero waits indefinitely.
    pub handshake_timeout_ms: u64,
    /// Ready-socket slots for background handshaking. Zero performs the
    /// handshake synchronously inside accept.
    pub handshake_slots: usize,
    /// Bound on concurrently running handshake tasks.
    pub handshake_executor_threads: usize,
    pub cert_path: String,
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secure_connection_required: false,
            handshake_timeout_ms: 5_000,
            handshake_slots: 16,
            handshake_executor_threads: 4,
            cert_path: String::new(),
            key_path: String::new(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    /// Retries for catalog reads that hit a serialization failure.
    pub transaction_retry_attempts: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("transaction_retry_attempts", &self.transaction_retry_attempts)
            .finish()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://clipcast@localhost/clipcast".to_string(),
            max_connections: 16,
            min_connections: 1,
            connect_timeout_seconds: 10,
            transaction_retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `file` or `memory`.
    pub backend: String,
    /// Base directory of the file backend.
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            root: "./clips".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// TTL of the brief listing cache, in seconds. Zero keeps the snapshot
    /// until an explicit invalidation.
    pub brief_cache_ttl_seconds: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            brief_cache_ttl_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` (production) or `pretty` (development).
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, config::FileFormat::Yaml));
            }
        }

        // Override with environment variables (CLIPCAST_SERVER_PORT, ...)
        builder = builder.add_source(
            Environment::with_prefix("CLIPCAST")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Validate configuration (fail fast on misconfigurations).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be between 1 and 65535, got 0".to_string());
        }
        if self.server.open_connections_limit == 0 {
            errors.push("server.open_connections_limit must be greater than zero".to_string());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push(format!(
                "database.min_connections ({}) must not exceed database.max_connections ({})",
                self.database.min_connections, self.database.max_connections
            ));
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be greater than zero".to_string());
        }
        if crate::storage::StorageBackend::from_str(&self.storage.backend).is_none() {
            errors.push(format!(
                "storage.backend must be \"file\" or \"memory\", got {:?}",
                self.storage.backend
            ));
        }
        if self.tls.enabled {
            if self.tls.cert_path.is_empty() {
                errors.push("tls.cert_path is required when tls.enabled".to_string());
            }
            if self.tls.key_path.is_empty() {
                errors.push("tls.key_path is required when tls.enabled".to_string());
            }
            if self.tls.handshake_executor_threads == 0 {
                errors.push("tls.handshake_executor_threads must be at least 1".to_string());
            }
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

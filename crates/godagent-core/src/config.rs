//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`GODAGENT_*`)
//! 2. User config (`~/.config/godagent/config.toml`)
//! 3. Compiled-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GodagentError, GodagentResult};

/// Canonical embedding dimension. Legacy vectors of [`LEGACY_DIMENSIONS`] are
/// upgraded transparently by [`crate::compat`].
pub const CANONICAL_DIMENSIONS: usize = 1536;

/// Legacy embedding dimension accepted only through the compat layer.
pub const LEGACY_DIMENSIONS: usize = 768;

/// Top-level configuration for the godagent daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base storage directory, defaults to `~/.agentdb`.
    #[serde(default = "Config::default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Unix socket path the daemon binds.
    #[serde(default = "Config::default_socket_path")]
    pub socket_path: PathBuf,

    /// PID file path.
    #[serde(default = "Config::default_pid_path")]
    pub pid_path: PathBuf,

    /// Vector index configuration.
    #[serde(default)]
    pub vector: VectorConfig,

    /// Daemon server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Context composition configuration.
    #[serde(default)]
    pub context: ContextConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Canonical vector dimension.
    #[serde(default = "VectorConfig::default_dimensions")]
    pub dimensions: usize,

    /// Vector count threshold above which the HNSW backend is used.
    #[serde(default = "VectorConfig::default_hnsw_threshold")]
    pub hnsw_threshold: usize,

    /// HNSW `M` parameter (links per node).
    #[serde(default = "VectorConfig::default_m")]
    pub hnsw_m: usize,

    /// HNSW `efConstruction` parameter.
    #[serde(default = "VectorConfig::default_ef_construction")]
    pub ef_construction: usize,

    /// HNSW `efSearch` parameter.
    #[serde(default = "VectorConfig::default_ef_search")]
    pub ef_search: usize,

    /// Normalization tolerance epsilon.
    #[serde(default = "VectorConfig::default_epsilon")]
    pub epsilon: f64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimensions: Self::default_dimensions(),
            hnsw_threshold: Self::default_hnsw_threshold(),
            hnsw_m: Self::default_m(),
            ef_construction: Self::default_ef_construction(),
            ef_search: Self::default_ef_search(),
            epsilon: Self::default_epsilon(),
        }
    }
}

impl VectorConfig {
    fn default_dimensions() -> usize {
        CANONICAL_DIMENSIONS
    }
    fn default_hnsw_threshold() -> usize {
        1000
    }
    fn default_m() -> usize {
        16
    }
    fn default_ef_construction() -> usize {
        200
    }
    fn default_ef_search() -> usize {
        50
    }
    fn default_epsilon() -> f64 {
        1e-6
    }
}

/// Daemon server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Maximum concurrently connected clients.
    #[serde(default = "ServerConfig::default_max_clients")]
    pub max_clients: usize,

    /// Per-client idle timeout in seconds.
    #[serde(default = "ServerConfig::default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Maximum time to wait for in-flight requests during graceful shutdown.
    #[serde(default = "ServerConfig::default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,

    /// Hard per-message size cap in bytes.
    #[serde(default = "ServerConfig::default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: Self::default_max_clients(),
            idle_timeout_secs: Self::default_idle_timeout_secs(),
            shutdown_drain_secs: Self::default_shutdown_drain_secs(),
            max_message_bytes: Self::default_max_message_bytes(),
        }
    }
}

impl ServerConfig {
    fn default_max_clients() -> usize {
        10
    }
    fn default_idle_timeout_secs() -> u64 {
        30
    }
    fn default_shutdown_drain_secs() -> u64 {
        5
    }
    fn default_max_message_bytes() -> usize {
        10 * 1024 * 1024 // 10 MiB
    }
}

/// Context composition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum tokens reserved for the pinned tier.
    #[serde(default = "ContextConfig::default_max_pinned_tokens")]
    pub max_pinned_tokens: u32,

    /// Number of DESC (prior-solution) hits pulled into tier 2.
    #[serde(default = "ContextConfig::default_desc_hits")]
    pub desc_hits: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_pinned_tokens: Self::default_max_pinned_tokens(),
            desc_hits: Self::default_desc_hits(),
        }
    }
}

impl ContextConfig {
    fn default_max_pinned_tokens() -> u32 {
        2000
    }
    fn default_desc_hits() -> usize {
        2
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to output logs as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

impl Config {
    fn default_storage_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agentdb")
    }

    fn default_socket_path() -> PathBuf {
        PathBuf::from("/tmp/godagent-db.sock")
    }

    fn default_pid_path() -> PathBuf {
        PathBuf::from("/tmp/godagent-daemon.pid")
    }

    /// Load configuration from compiled-in defaults, then overlay the user
    /// config file, then environment overrides.
    pub fn load() -> GodagentResult<Self> {
        let mut config = Self::defaults();

        if let Some(user_config_dir) = dirs::config_dir() {
            let user_config_path = user_config_dir.join("godagent").join("config.toml");
            if user_config_path.exists() {
                config.merge_from_file(&user_config_path)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Compiled-in default configuration.
    pub fn defaults() -> Self {
        Self {
            storage_dir: Self::default_storage_dir(),
            socket_path: Self::default_socket_path(),
            pid_path: Self::default_pid_path(),
            vector: VectorConfig::default(),
            server: ServerConfig::default(),
            context: ContextConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Path to the vector index file.
    pub fn vector_path(&self) -> PathBuf {
        self.storage_dir.join("vectors.bin")
    }

    /// Directory holding per-database graph JSON files.
    pub fn graphs_dir(&self) -> PathBuf {
        self.storage_dir.join("graphs")
    }

    /// Directory holding session files.
    pub fn sessions_dir(&self) -> PathBuf {
        self.storage_dir.join(".phd-sessions")
    }

    /// Path to the feedback retry queue file.
    pub fn feedback_queue_path(&self) -> PathBuf {
        self.storage_dir.join("feedback-queue.json")
    }

    /// Path to the feedback terminal-failure log.
    pub fn feedback_failures_path(&self) -> PathBuf {
        self.storage_dir.join("feedback-failures.log")
    }

    /// Merge values from a TOML config file (non-destructive overlay).
    fn merge_from_file(&mut self, path: &Path) -> GodagentResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content).map_err(|e| GodagentError::Config {
            details: format!("invalid TOML in {}: {e}", path.display()),
        })?;

        if let Some(v) = overlay.get("storage_dir").and_then(toml::Value::as_str) {
            self.storage_dir = PathBuf::from(v);
        }
        if let Some(v) = overlay.get("socket_path").and_then(toml::Value::as_str) {
            self.socket_path = PathBuf::from(v);
        }
        if let Some(vector) = overlay.get("vector") {
            if let Ok(parsed) = vector.clone().try_into::<VectorConfig>() {
                self.vector = parsed;
            }
        }
        if let Some(server) = overlay.get("server") {
            if let Ok(parsed) = server.clone().try_into::<ServerConfig>() {
                self.server = parsed;
            }
        }
        if let Some(context) = overlay.get("context") {
            if let Ok(parsed) = context.clone().try_into::<ContextConfig>() {
                self.context = parsed;
            }
        }
        if let Some(logging) = overlay.get("logging") {
            if let Ok(parsed) = logging.clone().try_into::<LoggingConfig>() {
                self.logging = parsed;
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (`GODAGENT_*` prefix).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GODAGENT_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("GODAGENT_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GODAGENT_SOCKET_PATH") {
            self.socket_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GODAGENT_MAX_CLIENTS") {
            if let Ok(n) = v.parse() {
                self.server.max_clients = n;
            }
        }
        if let Ok(v) = std::env::var("GODAGENT_IDLE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.server.idle_timeout_secs = n;
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::balancer::ModelGroup;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "server.host") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub model_groups: Vec<ModelGroup>,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Master switch: when false, chat routes accept requests without a key.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bearer credential for `/admin/*`. Unset closes the admin API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackgroundConfig {
    /// Period of the key-cache refresh and spend flush.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_spend_queue_capacity")]
    pub spend_queue_capacity: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            spend_queue_capacity: default_spend_queue_capacity(),
        }
    }
}

impl BackgroundConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Whole-request timeout for backend calls. Unset waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("janus.db")
}
const fn default_true() -> bool {
    true
}
const fn default_refresh_interval() -> u64 {
    60
}
const fn default_spend_queue_capacity() -> usize {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `JANUS_` takes precedence over the
    /// file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Reject configurations that would misroute requests.
    pub fn validate(&self) -> anyhow::Result<()> {
        for group in &self.model_groups {
            if group.name.trim().is_empty() {
                anyhow::bail!("Model group with empty name");
            }
            for backend in &group.models {
                if !(backend.base_url.starts_with("http://")
                    || backend.base_url.starts_with("https://"))
                {
                    anyhow::bail!(
                        "Backend '{}' in group '{}' has invalid base_url '{}'",
                        backend.name,
                        group.name,
                        backend.base_url
                    );
                }
            }
            if group.cost_per_input_token < 0.0 || group.cost_per_output_token < 0.0 {
                anyhow::bail!("Model group '{}' has a negative token price", group.name);
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every scalar setting has a corresponding `JANUS_*` env var. When set,
    /// the env var value replaces the file/default value and the setting key
    /// is recorded in `env_overrides`.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }

        // -- Server --
        env_str!("server.host", "JANUS_SERVER_HOST", self.server.host);
        env_parse!("server.port", "JANUS_SERVER_PORT", self.server.port);
        if let Ok(val) = std::env::var("JANUS_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("server.cors_origins", "JANUS_SERVER_CORS_ORIGINS");
        }

        // -- Database --
        env_path!("database.path", "JANUS_DATABASE_PATH", self.database.path);

        // -- Auth --
        env_bool!("auth.enabled", "JANUS_AUTH_ENABLED", self.auth.enabled);
        env_opt_str!("auth.admin_key", "JANUS_ADMIN_KEY", self.auth.admin_key);

        // -- Background --
        env_parse!(
            "background.refresh_interval_secs",
            "JANUS_REFRESH_INTERVAL_SECS",
            self.background.refresh_interval_secs
        );
        env_parse!(
            "background.spend_queue_capacity",
            "JANUS_SPEND_QUEUE_CAPACITY",
            self.background.spend_queue_capacity
        );

        // -- Upstream --
        if let Ok(val) = std::env::var("JANUS_UPSTREAM_TIMEOUT_SECS") {
            if val.is_empty() {
                self.upstream.timeout_secs = None;
                ov.record("upstream.timeout_secs", "JANUS_UPSTREAM_TIMEOUT_SECS");
            } else if let Ok(secs) = val.parse() {
                self.upstream.timeout_secs = Some(secs);
                ov.record("upstream.timeout_secs", "JANUS_UPSTREAM_TIMEOUT_SECS");
            }
        }

        // -- Logging --
        env_str!("logging.level", "JANUS_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "JANUS_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

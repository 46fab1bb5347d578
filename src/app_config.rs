//! Application configuration from file and environment variables
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables (prefixed with POLLSTER_, nested keys split by `__`,
//!    e.g. POLLSTER_RATE_LIMIT__VOTE_MAX)
//! 2. Config file (config.toml)
//! 3. Default values
//!
//! The database URL may also come from DATABASE_URL (see `database_url`).

use config::{Config, ConfigError, Environment, File};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;

/// Global application configuration
pub static APP_CONFIG: Lazy<RwLock<AppConfig>> = Lazy::new(|| {
    RwLock::new(AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config file, using defaults: {}", e);
        AppConfig::default()
    }))
});

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Deadline applied to every engine call made by a request handler
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (should be in env var DATABASE_URL or POLLSTER_DATABASE__URL)
    pub url: String,
}

/// Identity configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentityConfig {
    /// Header carrying the authenticated user id, set by a trusted auth gateway.
    /// Empty disables header-based identity.
    pub trusted_header: String,
}

/// Poll content limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum options per poll
    pub max_options: usize,
    pub max_title_length: usize,
    pub max_description_length: usize,
    pub max_option_length: usize,
    /// Polls per page when the client gives no size
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_options: 10,
            max_title_length: 200,
            max_description_length: 1000,
            max_option_length: 100,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

/// Rate guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub poll_creation_max: u32,
    pub poll_creation_window_seconds: u64,
    pub poll_update_max: u32,
    pub poll_update_window_seconds: u64,
    pub vote_max: u32,
    pub vote_window_seconds: u64,
    pub max_polls_owned: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            poll_creation_max: 5,
            poll_creation_window_seconds: 3600,
            poll_update_max: 10,
            poll_update_window_seconds: 3600,
            vote_max: 50,
            vote_window_seconds: 86400,
            max_polls_owned: 50,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub identity: IdentityConfig,
    pub limits: LimitsConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        use config::FileFormat;

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("POLLSTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reload configuration from file
    pub fn reload() -> Result<(), ConfigError> {
        Self::reload_from_path("config.toml")
    }

    /// Replace the global configuration with one loaded from `path`
    pub fn reload_from_path(path: &str) -> Result<(), ConfigError> {
        let new_config = Self::load_from_path(path)?;
        if let Ok(mut config) = APP_CONFIG.write() {
            *config = new_config;
            log::info!("Configuration reloaded");
        }
        Ok(())
    }

    /// Database URL from config, falling back to DATABASE_URL
    pub fn database_url(&self) -> Option<String> {
        if !self.database.url.is_empty() {
            return Some(self.database.url.clone());
        }
        std::env::var("DATABASE_URL").ok()
    }
}

/// Initialize application configuration
///
/// Triggers the lazy load and logs the result. Call early in startup.
pub fn init() {
    let config = get_config();
    log::info!(
        "Configuration loaded: bind = {}, max_options = {}",
        config.server.bind,
        config.limits.max_options
    );
}

/// Get the current application configuration
pub fn get_config() -> AppConfig {
    APP_CONFIG.read().map(|c| c.clone()).unwrap_or_default()
}

/// Get server configuration
pub fn server() -> ServerConfig {
    get_config().server
}

/// Get identity configuration
pub fn identity() -> IdentityConfig {
    get_config().identity
}

/// Get limits configuration
pub fn limits() -> LimitsConfig {
    get_config().limits
}

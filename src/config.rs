use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  /// Restaurant used by `menu` and `cart add` when none is given
  pub default_restaurant: Option<String>,
  /// Address sent with `checkout` when none is given
  pub delivery_address: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub live: LiveConfig,
  #[serde(default)]
  pub cart: CartConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the REST API, e.g. https://api.example.com/api
  pub url: String,
  /// WebSocket endpoint for order tracking (derived from `url` if not set)
  pub ws_url: Option<String>,
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
  15_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds before a cached resource is considered stale
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  /// Separate freshness window for menus (they change more often during service)
  pub menu_stale_time_secs: Option<u64>,
}

fn default_stale_time_secs() -> u64 {
  60
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
      menu_stale_time_secs: None,
    }
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_time_secs)
  }

  pub fn menu_stale_time(&self) -> Duration {
    Duration::from_secs(self.menu_stale_time_secs.unwrap_or(self.stale_time_secs))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
  #[serde(default)]
  pub reconnect: ReconnectConfig,
  /// How often `track` refetches orders while the push channel is down
  #[serde(default = "default_poll_interval_secs")]
  pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
  15
}

impl Default for LiveConfig {
  fn default() -> Self {
    Self {
      reconnect: ReconnectConfig::default(),
      poll_interval_secs: default_poll_interval_secs(),
    }
  }
}

impl LiveConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs)
  }
}

/// Backoff schedule for the order-tracking channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
  #[serde(default = "default_initial_ms")]
  pub initial_ms: u64,
  #[serde(default = "default_max_ms")]
  pub max_ms: u64,
  #[serde(default = "default_multiplier")]
  pub multiplier: f64,
  #[serde(default = "default_jitter_ms")]
  pub jitter_ms: u64,
  /// Give up after this many consecutive failed attempts (unlimited if unset)
  pub max_attempts: Option<u32>,
}

fn default_initial_ms() -> u64 {
  500
}

fn default_max_ms() -> u64 {
  30_000
}

fn default_multiplier() -> f64 {
  2.0
}

fn default_jitter_ms() -> u64 {
  250
}

impl Default for ReconnectConfig {
  fn default() -> Self {
    Self {
      initial_ms: default_initial_ms(),
      max_ms: default_max_ms(),
      multiplier: default_multiplier(),
      jitter_ms: default_jitter_ms(),
      max_attempts: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartConfig {
  /// Where the cart database lives (default: $XDG_DATA_HOME/courier/cart.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter directive, overridden by COURIER_LOG
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Directory for daily-rolling log files; logs go to stderr if unset
  pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./courier.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/courier/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/courier/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("courier.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("courier").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    Url::parse(&self.backend.url)
      .map_err(|e| eyre!("backend.url is not a valid URL ({}): {}", self.backend.url, e))?;

    let reconnect = &self.live.reconnect;
    if reconnect.initial_ms == 0 {
      return Err(eyre!("live.reconnect.initial_ms must be > 0"));
    }
    if reconnect.max_ms < reconnect.initial_ms {
      return Err(eyre!("live.reconnect.max_ms must be >= initial_ms"));
    }
    if reconnect.multiplier < 1.0 {
      return Err(eyre!("live.reconnect.multiplier must be >= 1.0"));
    }
    if self.live.poll_interval_secs == 0 {
      return Err(eyre!("live.poll_interval_secs must be > 0"));
    }
    Ok(())
  }

  /// WebSocket endpoint for order tracking.
  ///
  /// Falls back to `<backend origin>/ws` with the scheme switched to ws/wss.
  pub fn ws_url(&self) -> Result<Url> {
    if let Some(explicit) = &self.backend.ws_url {
      return Url::parse(explicit).map_err(|e| eyre!("Invalid backend.ws_url: {}", e));
    }

    let mut url = Url::parse(&self.backend.url)?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url
      .set_scheme(scheme)
      .map_err(|_| eyre!("Cannot derive a WebSocket URL from {}", self.backend.url))?;
    url.set_path("/ws");
    url.set_query(None);
    Ok(url)
  }

  /// Get the backend bearer token from the environment, if any.
  ///
  /// Checks COURIER_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("COURIER_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

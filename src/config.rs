use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  /// Custom title for header (defaults to the remote host if not set)
  pub title: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub preload: PreloadConfig,
  /// Resource keys re-fetched after a global refresh.
  #[serde(default = "default_refresh_keys")]
  pub refresh_keys: Vec<String>,
  /// Where the SQLite database and logs live.
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  pub url: String,
  /// Per-request timeout; a slower answer counts as a network failure.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_probe_path")]
  pub probe_path: String,
  #[serde(default = "default_audit_path")]
  pub audit_path: String,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8000/api".to_string(),
      timeout_secs: default_timeout_secs(),
      probe_path: default_probe_path(),
      audit_path: default_audit_path(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_stale_after_hours")]
  pub stale_after_hours: i64,
  /// Bump to orphan every entry written by an older layout.
  #[serde(default = "default_schema_version")]
  pub schema_version: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_hours: default_stale_after_hours(),
      schema_version: default_schema_version(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
  /// Path prefixes that are always queued, even when reachable.
  #[serde(default)]
  pub queued_paths: Vec<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval_secs(),
      queued_paths: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreloadConfig {
  #[serde(default = "default_concurrency")]
  pub concurrency: usize,
  /// How many items of a fetched listing get their detail preloaded.
  #[serde(default = "default_detail_limit")]
  pub detail_limit: usize,
  /// Listing views warmed whenever a sibling view of the same kind is
  /// fetched, so switching views works offline.
  #[serde(default = "default_preload_keys")]
  pub keys: Vec<String>,
}

impl Default for PreloadConfig {
  fn default() -> Self {
    Self {
      concurrency: default_concurrency(),
      detail_limit: default_detail_limit(),
      keys: default_preload_keys(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_probe_path() -> String {
  "/".to_string()
}

fn default_audit_path() -> String {
  "/audit_logs".to_string()
}

fn default_stale_after_hours() -> i64 {
  24
}

fn default_schema_version() -> u32 {
  2
}

fn default_probe_interval_secs() -> u64 {
  10
}

fn default_concurrency() -> usize {
  4
}

fn default_detail_limit() -> usize {
  10
}

fn default_preload_keys() -> Vec<String> {
  ["planning", "in_progress", "completed"]
    .iter()
    .map(|mode| format!("visit?mode={}", mode))
    .collect()
}

fn default_refresh_keys() -> Vec<String> {
  vec!["customer".to_string()]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
  /// 4. ~/.config/fieldsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/fieldsync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    url::Url::parse(&config.remote.url)
      .map_err(|e| eyre!("remote.url '{}' is not a valid URL: {}", config.remote.url, e))?;
    Ok(config)
  }

  /// Data directory, falling back to the platform data dir.
  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => dirs::data_dir()
        .map(|dir| dir.join("fieldsync"))
        .ok_or_else(|| eyre!("Could not determine a data directory; set data_dir in the config")),
    }
  }

  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::hours(self.cache.stale_after_hours)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.remote.timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.sync.probe_interval_secs.max(1))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks FIELDSYNC_TOKEN first, then FIELDSYNC_API_TOKEN as fallback.
  /// Running without a token is allowed; the server decides.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FIELDSYNC_TOKEN")
      .or_else(|_| std::env::var("FIELDSYNC_API_TOKEN"))
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub shell: ShellConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// PocketBase base url, e.g. http://127.0.0.1:8090
  pub url: String,
  /// Auth collection holding the user accounts
  #[serde(default = "default_users_collection")]
  pub users_collection: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_users_collection() -> String {
  "users".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long a fetched snapshot is served without refetching
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
  /// Automatic retries of a failed fetch
  #[serde(default = "default_query_retries")]
  pub query_retries: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      query_retries: default_query_retries(),
    }
  }
}

fn default_stale_secs() -> u64 {
  300
}

fn default_query_retries() -> u32 {
  1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
  /// Seconds between background refreshes in the shell
  #[serde(default = "default_poll_secs")]
  pub poll_secs: u64,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      poll_secs: default_poll_secs(),
    }
  }
}

fn default_poll_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  #[serde(default = "default_log_level")]
  pub level: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./duet.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/duet/config.yaml
  ///
  /// `DUET_BACKEND_URL` overrides `backend.url`, and is enough on its own
  /// when no file exists.
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

    let url_override = std::env::var("DUET_BACKEND_URL").ok();
    let config = match (path, url_override.clone()) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(url)) => Self::for_url(url),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/duet/config.yaml\n\
                 or set DUET_BACKEND_URL."
        ))
      }
    };

    Ok(config.with_backend_url(url_override))
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("duet.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("duet").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn for_url(url: String) -> Self {
    Self {
      backend: BackendConfig {
        url,
        users_collection: default_users_collection(),
        timeout_secs: default_timeout_secs(),
      },
      cache: CacheConfig::default(),
      shell: ShellConfig::default(),
      log: LogConfig::default(),
    }
  }

  fn with_backend_url(mut self, url: Option<String>) -> Self {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
      self.backend.url = url;
    }
    self
  }

  pub fn cache_settings(&self) -> CacheSettings {
    CacheSettings {
      stale_time: chrono::Duration::seconds(self.cache.stale_secs as i64),
      retries: self.cache.query_retries,
    }
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.shell.poll_secs.max(1))
  }

  /// Get the account password from the environment, for non-interactive login.
  pub fn get_password() -> Option<String> {
    std::env::var("DUET_PASSWORD").ok().filter(|p| !p.is_empty())
  }
}

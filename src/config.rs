use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api;
use crate::feed;

const DEFAULT_ENV_PREFIX: &str = "QUILL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    api::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("quill/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> Duration {
    api::DEFAULT_TIMEOUT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    feed::DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
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
    "warn".to_string()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("config: read file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("config: parse file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.server.base_url.is_empty() {
        base.server.base_url = other.server.base_url;
    }
    if !other.server.user_agent.is_empty() {
        base.server.user_agent = other.server.user_agent;
    }
    if other.server.timeout != Duration::ZERO {
        base.server.timeout = other.server.timeout;
    }

    if other.feed.page_size != 0 {
        base.feed.page_size = other.feed.page_size;
    }

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    if !other.log.level.is_empty() {
        base.log.level = other.log.level;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "server.base_url" => cfg.server.base_url = value,
        "server.user_agent" => cfg.server.user_agent = value,
        "server.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.server.timeout = duration;
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.feed.page_size = parsed;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "log.level" => cfg.log.level = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("quill").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn load_defaults_without_a_file() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("QUILL_TEST_DEFAULTS".to_string()),
        })
        .unwrap();
        assert_eq!(cfg.server.base_url, api::DEFAULT_BASE_URL);
        assert_eq!(cfg.server.timeout, api::DEFAULT_TIMEOUT);
        assert_eq!(cfg.feed.page_size, feed::DEFAULT_PAGE_SIZE);
        assert_eq!(cfg.log.level, "warn");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "server:\n  base_url: \"http://10.0.0.2:9000/\"\n  timeout: 5s\nfeed:\n  page_size: 50\n",
        )
        .unwrap();

        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("QUILL_TEST_FILE".to_string()),
        })
        .unwrap();
        assert_eq!(cfg.server.base_url, "http://10.0.0.2:9000/");
        assert_eq!(cfg.server.timeout, Duration::from_secs(5));
        assert_eq!(cfg.feed.page_size, 50);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.log.level, "warn");
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "feed:\n  page_size: 50\n").unwrap();

        env::set_var("QUILL_TEST_ENV_FEED__PAGE_SIZE", "5");
        env::set_var("QUILL_TEST_ENV_SERVER__TIMEOUT", "30s");
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("QUILL_TEST_ENV".to_string()),
        })
        .unwrap();
        env::remove_var("QUILL_TEST_ENV_FEED__PAGE_SIZE");
        env::remove_var("QUILL_TEST_ENV_SERVER__TIMEOUT");

        assert_eq!(cfg.feed.page_size, 5);
        assert_eq!(cfg.server.timeout, Duration::from_secs(30));
    }

    #[test]
    fn unparseable_env_values_are_ignored() {
        let mut cfg = Config::default();
        apply_env_value(&mut cfg, "feed.page_size", "lots".to_string());
        apply_env_value(&mut cfg, "server.timeout", "soon".to_string());
        assert_eq!(cfg.feed.page_size, feed::DEFAULT_PAGE_SIZE);
        assert_eq!(cfg.server.timeout, api::DEFAULT_TIMEOUT);
    }
}

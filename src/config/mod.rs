// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_DIR, DEFAULT_MAX_OBJECT_SIZE_BYTES, DEFAULT_REFERER,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SAVE_DELAY, DEFAULT_USER_AGENT,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Delay between the first unsaved change and the index write
    #[serde(default = "default_save_delay_ms")]
    pub save_delay_ms: u64,
    /// Responses with larger bodies are returned but not cached
    #[serde(default = "default_max_object_size_bytes")]
    pub max_object_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            save_delay_ms: default_save_delay_ms(),
            max_object_size_bytes: default_max_object_size_bytes(),
        }
    }
}

impl CacheConfig {
    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_delay_ms)
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_save_delay_ms() -> u64 {
    DEFAULT_SAVE_DELAY.as_millis() as u64
}

fn default_max_object_size_bytes() -> u64 {
    DEFAULT_MAX_OBJECT_SIZE_BYTES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_referer")]
    pub referer: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            referer: default_referer(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_referer() -> String {
    DEFAULT_REFERER.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Config {
    /// Config rooted at `dir` with every other value defaulted
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache: CacheConfig {
                dir: dir.into(),
                ..CacheConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // First, check that all referenced environment variables exist
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.cache.dir.as_os_str().is_empty() {
            return Err("cache.dir cannot be empty".to_string());
        }
        if self.cache.max_object_size_bytes == 0 {
            return Err("cache.max_object_size_bytes must be greater than 0".to_string());
        }
        if self.http.timeout_secs == 0 {
            return Err("http.timeout_secs must be greater than 0".to_string());
        }
        if self.http.user_agent.trim().is_empty() {
            return Err("http.user_agent cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml_with_env("{}").unwrap();
        assert_eq!(config.cache.dir, PathBuf::from(DEFAULT_CACHE_DIR));
        assert_eq!(config.cache.save_delay(), Duration::from_secs(5));
        assert_eq!(config.cache.max_object_size_bytes, 512 * 1024 * 1024);
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_can_override_fields() {
        let yaml = r#"
cache:
  dir: /var/cache/images
  save_delay_ms: 250
http:
  referer: https://maps.example/
  timeout_secs: 5
"#;
        let config = Config::from_yaml_with_env(yaml).unwrap();
        assert_eq!(config.cache.dir, PathBuf::from("/var/cache/images"));
        assert_eq!(config.cache.save_delay(), Duration::from_millis(250));
        assert_eq!(config.http.referer, "https://maps.example/");
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_substitutes_environment_variables() {
        std::env::set_var("IMGCACHE_TEST_CACHE_DIR", "/tmp/from-env");
        let config =
            Config::from_yaml_with_env("cache:\n  dir: ${IMGCACHE_TEST_CACHE_DIR}\n").unwrap();
        assert_eq!(config.cache.dir, PathBuf::from("/tmp/from-env"));
    }

    #[test]
    fn test_missing_environment_variable_is_error() {
        let err = Config::from_yaml_with_env("cache:\n  dir: ${IMGCACHE_TEST_UNSET_VAR}\n")
            .unwrap_err();
        assert!(err.contains("IMGCACHE_TEST_UNSET_VAR"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.cache.max_object_size_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.http.timeout_secs = 0;
        assert!(config.validate().is_err());

        let config = Config::with_cache_dir("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let err = Config::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(err.starts_with("Failed to read config file"));
    }
}

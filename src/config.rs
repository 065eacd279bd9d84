//! Configuration for the lexicard command line tool.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use lexicard_dispatch::{
    client::DEFAULT_USER_AGENT, ClientConfig, DispatchConfig, ThrottleConfig,
    DEFAULT_DICTIONARY_BASE_URL, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "lexicard.toml";
const ENV_PREFIX: &str = "LEXICARD_";

/// Tool configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `LEXICARD_` (highest priority)
/// 2. Configuration file (`lexicard.toml` in the working directory)
/// 3. Built-in defaults (lowest priority)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    // Dispatch
    /// Maximum number of requests in flight.
    ///
    /// Environment variable: `LEXICARD_MAX_CONCURRENT`
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retries granted to every unit after its first attempt.
    ///
    /// Environment variable: `LEXICARD_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound between drain re-checks in milliseconds.
    ///
    /// Environment variable: `LEXICARD_DRAIN_RECHECK_MS`
    #[serde(default = "default_drain_recheck_ms")]
    pub drain_recheck_ms: u64,
    /// Throttle delay for the first distress signal in milliseconds.
    ///
    /// Environment variable: `LEXICARD_THROTTLE_BASE_MS`
    #[serde(default = "default_throttle_base_ms")]
    pub throttle_base_ms: u64,
    /// Throttle delay cap in milliseconds.
    ///
    /// Environment variable: `LEXICARD_THROTTLE_MAX_MS`
    #[serde(default = "default_throttle_max_ms")]
    pub throttle_max_ms: u64,
    /// Seconds `shutdown` waits for in-flight requests.
    ///
    /// Environment variable: `LEXICARD_SHUTDOWN_TIMEOUT_SECS`
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    // Client
    /// Connect timeout in seconds.
    ///
    /// Environment variable: `LEXICARD_CONNECT_TIMEOUT_SECS`
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// User agent sent with every request.
    ///
    /// Environment variable: `LEXICARD_USER_AGENT`
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Base URL for dictionary pages.
    ///
    /// Environment variable: `LEXICARD_DICTIONARY_BASE_URL`
    #[serde(default = "default_dictionary_base_url")]
    pub dictionary_base_url: String,

    // Files
    /// Input file of words for `fetch`.
    #[serde(default = "default_words_file")]
    pub words_file: PathBuf,
    /// Input file of audio URLs for `download`.
    #[serde(default = "default_urls_file")]
    pub urls_file: PathBuf,
    /// Directory receiving fetched dictionary pages.
    #[serde(default = "default_pages_dir")]
    pub pages_dir: PathBuf,
    /// Directory receiving downloaded audio.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    /// File listing URLs that could not be fetched.
    #[serde(default = "default_failed_log")]
    pub failed_log: PathBuf,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `LEXICARD_LOG`
    #[serde(default = "default_log")]
    pub log: String,
}

impl AppConfig {
    /// Loads configuration from defaults, `lexicard.toml`, and `LEXICARD_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Same as [`AppConfig::load`] with an explicit configuration file.
    pub fn load_from(config_file: impl Into<PathBuf>) -> Result<Self> {
        let config_file = config_file.into();
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .with_context(|| {
                format!("failed to load configuration from {}", config_file.display())
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Dispatcher settings derived from this configuration.
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_concurrent: self.max_concurrent,
            drain_recheck_interval: Duration::from_millis(self.drain_recheck_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            throttle: ThrottleConfig {
                base_delay: Duration::from_millis(self.throttle_base_ms),
                max_delay: Duration::from_millis(self.throttle_max_ms),
            },
            client: ClientConfig {
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                user_agent: self.user_agent.clone(),
                ..ClientConfig::default()
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be greater than 0");
        }

        if self.drain_recheck_ms == 0 {
            anyhow::bail!("drain_recheck_ms must be greater than 0");
        }

        if self.throttle_base_ms > self.throttle_max_ms {
            anyhow::bail!("throttle_base_ms cannot exceed throttle_max_ms");
        }

        if !self.dictionary_base_url.starts_with("http://")
            && !self.dictionary_base_url.starts_with("https://")
        {
            anyhow::bail!("dictionary_base_url must be an http(s) URL");
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            drain_recheck_ms: default_drain_recheck_ms(),
            throttle_base_ms: default_throttle_base_ms(),
            throttle_max_ms: default_throttle_max_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            dictionary_base_url: default_dictionary_base_url(),
            words_file: default_words_file(),
            urls_file: default_urls_file(),
            pages_dir: default_pages_dir(),
            media_dir: default_media_dir(),
            failed_log: default_failed_log(),
            log: default_log(),
        }
    }
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_drain_recheck_ms() -> u64 {
    2000
}

fn default_throttle_base_ms() -> u64 {
    200
}

fn default_throttle_max_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_dictionary_base_url() -> String {
    DEFAULT_DICTIONARY_BASE_URL.to_string()
}

fn default_words_file() -> PathBuf {
    PathBuf::from("words.txt")
}

fn default_urls_file() -> PathBuf {
    PathBuf::from("urls.txt")
}

fn default_pages_dir() -> PathBuf {
    PathBuf::from("pages")
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("collection.media")
}

fn default_failed_log() -> PathBuf {
    PathBuf::from("failed_request.txt")
}

fn default_log() -> String {
    "info,lexicard=debug".to_string()
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_without_file_or_environment() {
        Jail::expect_with(|_jail| {
            let config = AppConfig::load().map_err(|e| e.to_string())?;

            assert_eq!(config, AppConfig::default());
            assert_eq!(config.max_concurrent, 10);
            assert_eq!(config.max_retries, 5);
            assert_eq!(config.media_dir, PathBuf::from("collection.media"));
            assert_eq!(config.failed_log, PathBuf::from("failed_request.txt"));
            Ok(())
        });
    }

    #[test]
    fn file_overrides_defaults_and_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "lexicard.toml",
                r#"
                    max_concurrent = 4
                    max_retries = 2
                    media_dir = "audio"
                "#,
            )?;
            jail.set_env("LEXICARD_MAX_CONCURRENT", "7");

            let config = AppConfig::load().map_err(|e| e.to_string())?;

            assert_eq!(config.max_concurrent, 7);
            assert_eq!(config.max_retries, 2);
            assert_eq!(config.media_dir, PathBuf::from("audio"));
            assert_eq!(config.pages_dir, PathBuf::from("pages"));
            Ok(())
        });
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("LEXICARD_MAX_CONCURRENT", "0");

            let error = AppConfig::load().expect_err("zero capacity must be rejected");
            assert!(error.to_string().contains("max_concurrent"));
            Ok(())
        });
    }

    #[test]
    fn inverted_throttle_bounds_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("LEXICARD_THROTTLE_BASE_MS", "9000");

            assert!(AppConfig::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn dispatch_config_carries_every_setting() {
        let config = AppConfig {
            max_concurrent: 3,
            drain_recheck_ms: 250,
            throttle_base_ms: 100,
            throttle_max_ms: 1000,
            connect_timeout_secs: 4,
            user_agent: "lexicard-test".to_string(),
            ..AppConfig::default()
        };

        let dispatch = config.to_dispatch_config();

        assert_eq!(dispatch.max_concurrent, 3);
        assert_eq!(dispatch.drain_recheck_interval, Duration::from_millis(250));
        assert_eq!(dispatch.throttle.base_delay, Duration::from_millis(100));
        assert_eq!(dispatch.throttle.max_delay, Duration::from_secs(1));
        assert_eq!(dispatch.client.connect_timeout, Duration::from_secs(4));
        assert_eq!(dispatch.client.user_agent, "lexicard-test");
        assert_eq!(dispatch.client.max_redirects, 10);
    }
}

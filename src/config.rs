//! Configuration file parser for `feedmill.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde but logged as a warning, since they are
//! usually typos. A few settings can be overridden from the environment.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::PipelineSettings;
use crate::util::HostPolicy;

/// Overrides `cron_secret` from the config file.
pub const CRON_SECRET_ENV: &str = "CRON_SECRET";
/// Overrides `database_path` from the config file.
pub const DATABASE_ENV: &str = "FEEDMILL_DATABASE";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// `cron_secret` is masked by the custom `Debug` impl so it never ends up in
/// logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file backing the feed registry and article store.
    pub database_path: String,

    /// Address the HTTP trigger endpoints listen on.
    pub bind_addr: String,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// `User-Agent` sent with every feed request.
    pub user_agent: String,

    /// Per-request timeout for feed fetches.
    pub fetch_timeout_secs: u64,

    /// Maximum article summary length in characters (ellipsis included).
    pub summary_max_length: usize,

    /// Number of feeds processed concurrently in a batch run.
    pub max_concurrent_feeds: usize,

    /// Wall-clock budget for one trigger invocation. 0 = unbounded.
    pub run_timeout_secs: u64,

    /// Interval of the built-in scheduler in minutes. 0 = disabled.
    pub poll_interval_minutes: u64,

    /// Allow feeds on loopback/private hosts.
    pub allow_private_hosts: bool,

    /// Shared secret expected as `Authorization: Bearer <secret>` on the cron
    /// trigger. `CRON_SECRET` takes precedence.
    pub cron_secret: Option<String>,

    /// Feeds synced into the registry at startup (upserted by URL).
    pub feeds: Vec<FeedConfig>,
}

/// A feed declared in the config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    pub category_id: Option<i64>,
    pub owner_id: Option<i64>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub auto_fetch: bool,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_minutes: i64,
}

fn default_true() -> bool {
    true
}

fn default_fetch_interval() -> i64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedmill.db".to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
            user_agent: concat!("feedmill/", env!("CARGO_PKG_VERSION")).to_string(),
            fetch_timeout_secs: 30,
            summary_max_length: 200,
            max_concurrent_feeds: 4,
            run_timeout_secs: 300,
            poll_interval_minutes: 0,
            allow_private_hosts: false,
            cron_secret: None,
            feeds: Vec::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("user_agent", &self.user_agent)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("summary_max_length", &self.summary_max_length)
            .field("max_concurrent_feeds", &self.max_concurrent_feeds)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .field("poll_interval_minutes", &self.poll_interval_minutes)
            .field("allow_private_hosts", &self.allow_private_hosts)
            .field(
                "cron_secret",
                &self.cron_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("feeds", &self.feeds)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 12] = [
        "database_path",
        "bind_addr",
        "log_level",
        "user_agent",
        "fetch_timeout_secs",
        "summary_max_length",
        "max_concurrent_feeds",
        "run_timeout_secs",
        "poll_interval_minutes",
        "allow_private_hosts",
        "cron_secret",
        "feeds",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text. Blank text yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// Apply `CRON_SECRET` / `FEEDMILL_DATABASE` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(
            std::env::var(CRON_SECRET_ENV).ok(),
            std::env::var(DATABASE_ENV).ok(),
        );
        self
    }

    fn apply_overrides(&mut self, cron_secret: Option<String>, database: Option<String>) {
        if let Some(secret) = cron_secret.filter(|s| !s.trim().is_empty()) {
            self.cron_secret = Some(secret);
        }
        if let Some(path) = database.filter(|s| !s.trim().is_empty()) {
            self.database_path = path;
        }
    }

    /// The cron secret, if one is configured and non-blank.
    pub fn cron_secret(&self) -> Option<SecretString> {
        self.cron_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.to_string()))
    }

    pub fn host_policy(&self) -> HostPolicy {
        if self.allow_private_hosts {
            HostPolicy::AllowPrivate
        } else {
            HostPolicy::PublicOnly
        }
    }

    /// Pipeline knobs derived from this config. Zero values fall back to the defaults.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let defaults = PipelineSettings::default();
        PipelineSettings {
            user_agent: self.user_agent.clone(),
            fetch_timeout: if self.fetch_timeout_secs == 0 {
                defaults.fetch_timeout
            } else {
                Duration::from_secs(self.fetch_timeout_secs)
            },
            summary_max_length: if self.summary_max_length == 0 {
                defaults.summary_max_length
            } else {
                self.summary_max_length
            },
            max_concurrent_feeds: if self.max_concurrent_feeds == 0 {
                defaults.max_concurrent_feeds
            } else {
                self.max_concurrent_feeds
            },
            host_policy: self.host_policy(),
        }
    }

    /// Deadline budget for a single trigger invocation.
    pub fn run_budget(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }

    /// Scheduler period, if the built-in scheduler is enabled. Saturates
    /// instead of overflowing for absurdly large values.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_minutes > 0)
            .then(|| Duration::from_secs(self.poll_interval_minutes.saturating_mul(60)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("feedmill_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feedmill.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, "feedmill.db");
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.summary_max_length, 200);
        assert_eq!(config.max_concurrent_feeds, 4);
        assert_eq!(config.poll_interval_minutes, 0);
        assert_eq!(config.run_timeout_secs, 300);
        assert!(!config.allow_private_hosts);
        assert!(config.cron_secret.is_none());
        assert!(config.feeds.is_empty());
        assert!(config.user_agent.starts_with("feedmill/"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedmill_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.database_path, "feedmill.db");
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.summary_max_length, 200);
        cleanup(&path);
    }

    #[test]
    fn test_full_config_with_feeds() {
        let path = write_config(
            "full",
            r#"
database_path = "/var/lib/feedmill/feeds.db"
bind_addr = "0.0.0.0:9000"
summary_max_length = 150
max_concurrent_feeds = 8
poll_interval_minutes = 15
allow_private_hosts = true
cron_secret = "s3cret"

[[feeds]]
name = "Example News"
url = "https://example.com/rss"
category_id = 3
owner_id = 1
fetch_interval_minutes = 30

[[feeds]]
name = "Paused"
url = "https://paused.example.com/rss"
active = false
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_path, "/var/lib/feedmill/feeds.db");
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.summary_max_length, 150);
        assert_eq!(config.poll_interval_minutes, 15);
        assert_eq!(config.host_policy(), HostPolicy::AllowPrivate);
        assert_eq!(config.feeds.len(), 2);

        let first = &config.feeds[0];
        assert_eq!(first.category_id, Some(3));
        assert_eq!(first.fetch_interval_minutes, 30);
        assert!(first.active && first.auto_fetch);

        let second = &config.feeds[1];
        assert!(!second.active);
        assert!(second.auto_fetch);
        assert_eq!(second.category_id, None);
        assert_eq!(second.fetch_interval_minutes, 60);

        assert_eq!(
            config.cron_secret().map(|s| s.expose_secret().to_string()),
            Some("s3cret".to_string())
        );
        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml_str("theme = \"dark\"\nsummary_max_length = 99\n").unwrap();
        assert_eq!(config.summary_max_length, 99);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::from_toml_str("summary_max_length = \"long\"\n").is_err());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        cleanup(&path);
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let mut config = Config::from_toml_str("cron_secret = \"from-file\"\n").unwrap();
        config.apply_overrides(Some("from-env".into()), Some("/tmp/override.db".into()));
        assert_eq!(config.cron_secret.as_deref(), Some("from-env"));
        assert_eq!(config.database_path, "/tmp/override.db");
    }

    #[test]
    fn test_blank_overrides_ignored() {
        let mut config = Config::from_toml_str("cron_secret = \"from-file\"\n").unwrap();
        config.apply_overrides(Some("  ".into()), None);
        assert_eq!(config.cron_secret.as_deref(), Some("from-file"));
        assert_eq!(config.database_path, "feedmill.db");
    }

    #[test]
    fn test_blank_secret_is_no_secret() {
        let config = Config::from_toml_str("cron_secret = \"   \"\n").unwrap();
        assert!(config.cron_secret().is_none());
    }

    #[test]
    fn test_pipeline_settings_fall_back_on_zero() {
        let config = Config::from_toml_str(
            "fetch_timeout_secs = 0\nsummary_max_length = 0\nmax_concurrent_feeds = 0\n",
        )
        .unwrap();
        let settings = config.pipeline_settings();
        assert_eq!(settings.fetch_timeout, Duration::from_secs(30));
        assert_eq!(settings.summary_max_length, 200);
        assert_eq!(settings.max_concurrent_feeds, 4);
    }

    #[test]
    fn test_run_budget_and_poll_interval() {
        let config = Config::default();
        assert_eq!(config.run_budget(), Some(Duration::from_secs(300)));
        assert_eq!(config.poll_interval(), None);

        let config =
            Config::from_toml_str("run_timeout_secs = 0\npoll_interval_minutes = 5\n").unwrap();
        assert_eq!(config.run_budget(), None);
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_huge_poll_interval_saturates() {
        let toml = format!("poll_interval_minutes = {}\n", i64::MAX);
        let config = Config::from_toml_str(&toml).unwrap();
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(u64::MAX)));

        let config = Config {
            poll_interval_minutes: u64::MAX,
            ..Config::default()
        };
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_debug_masks_cron_secret() {
        let mut config = Config::default();
        config.cron_secret = Some("super-secret-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}

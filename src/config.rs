// File: ./src/config.rs
// Handles configuration loading, saving, and defaults.
use crate::context::AppContext;
use crate::storage::LocalStorage;
use anyhow::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;

fn default_poll_interval() -> u64 {
    600
}
fn default_lookahead_days() -> u32 {
    7
}
fn default_notify_lead() -> u32 {
    30
}
fn default_request_timeout() -> u64 {
    10
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_backoff() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Display name of the calendar to poll. The first calendar is used when unset.
    #[serde(default)]
    pub calendar_name: Option<String>,
    /// Collection URL; when set, discovery is skipped.
    #[serde(default)]
    pub calendar_url: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u32,
    #[serde(default = "default_notify_lead")]
    pub notify_lead_mins: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Recipient of operator alerts (e.g. a balance ran out).
    #[serde(default)]
    pub operator: Option<String>,

    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            calendar_name: None,
            calendar_url: None,
            // Match the serde defaults
            poll_interval_secs: 600,
            lookahead_days: 7,
            notify_lead_mins: 30,
            request_timeout_secs: 10,
            webhook_url: None,
            operator: None,
            retry_max_attempts: 5,
            retry_backoff_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load the configuration from disk using an explicit context.
    /// Returns a contextualized error if reading or parsing fails.
    pub fn load(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_config_file_path()?;

        // Explicitly detect missing file so callers can print setup instructions.
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found"));
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() && self.calendar_url.is_none() {
            anyhow::bail!("Config is missing the CalDAV 'url'");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("'poll_interval_secs' must be greater than zero");
        }
        if self.lookahead_days == 0 {
            anyhow::bail!("'lookahead_days' must be greater than zero");
        }
        Ok(())
    }

    /// Helper to detect whether an anyhow::Error indicates that the config file was missing.
    pub fn is_missing_config_error(err: &Error) -> bool {
        if err.to_string().contains("Config file not found") {
            return true;
        }

        // Walk the error chain and look for an underlying IO NotFound.
        for cause in err.chain() {
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>()
                && io_err.kind() == std::io::ErrorKind::NotFound
            {
                return true;
            }
        }

        false
    }

    /// Save configuration using an explicit context.
    pub fn save(&self, ctx: &dyn AppContext) -> Result<()> {
        let path = ctx.get_config_file_path()?;
        LocalStorage::with_lock(&path, || {
            let toml_str = toml::to_string_pretty(self)?;
            LocalStorage::atomic_write(&path, toml_str)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lookahead(&self) -> Duration {
        Duration::days(self.lookahead_days as i64)
    }

    pub fn notify_lead(&self) -> Duration {
        Duration::minutes(self.notify_lead_mins as i64)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            url = "https://caldav.example.com/"
            username = "teacher"
            password = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.poll_interval_secs, 600);
        assert_eq!(cfg.lookahead(), Duration::days(7));
        assert_eq!(cfg.notify_lead(), Duration::minutes(30));
        assert_eq!(cfg.log_level(), log::LevelFilter::Info);
        assert!(cfg.webhook_url.is_none());
    }

    #[test]
    fn test_missing_config_is_detected() {
        let ctx = TestContext::new();
        let err = Config::load(&ctx).unwrap_err();
        assert!(Config::is_missing_config_error(&err));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let ctx = TestContext::new();
        let cfg = Config {
            url: "https://caldav.example.com/".to_string(),
            username: "teacher".to_string(),
            password: "secret".to_string(),
            calendar_name: Some("Lessons".to_string()),
            poll_interval_secs: 120,
            ..Config::default()
        };
        cfg.save(&ctx).unwrap();

        let loaded = Config::load(&ctx).unwrap();
        assert_eq!(loaded.calendar_name.as_deref(), Some("Lessons"));
        assert_eq!(loaded.poll_interval_secs, 120);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let ctx = TestContext::new();
        let path = ctx.get_config_file_path().unwrap();
        std::fs::write(
            &path,
            "url = \"https://x/\"\nusername = \"u\"\npassword = \"p\"\npoll_interval_secs = 0\n",
        )
        .unwrap();
        let err = Config::load(&ctx).unwrap_err();
        assert!(!Config::is_missing_config_error(&err));
    }
}

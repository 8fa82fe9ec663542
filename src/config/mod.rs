//! Configuration module for the document list sync service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::coalescer::DEFAULT_WINDOW;
use crate::errors::SyncError;
use crate::refresh::DEFAULT_DEBOUNCE;
use crate::stream::BackoffPolicy;

pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Largest page size the document service accepts.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Timing knobs of one list session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncTuning {
    /// How long the coalescer buffers changes before one cache write
    pub coalesce_window: Duration,
    /// Delay between a refresh request and the page-1 fetch
    pub refresh_debounce: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            coalesce_window: DEFAULT_WINDOW,
            refresh_debounce: DEFAULT_DEBOUNCE,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the document service
    pub api_url: String,
    /// Sent as `x-api-key` when present
    pub api_key: Option<String>,
    /// Workspace whose list is kept in sync
    pub workspace_id: String,
    /// Default page size when no saved settings exist
    pub page_size: u32,
    /// Address of the inspection API
    pub bind_addr: SocketAddr,
    /// Path to the SQLite settings database
    pub settings_db: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub tuning: SyncTuning,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let api_url = var("DOCSYNC_API_URL", "http://127.0.0.1:8080")
            .trim_end_matches('/')
            .to_string();
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "DOCSYNC_API_URL must be an http(s) URL, got {}",
                api_url
            )));
        }

        let api_key = lookup("DOCSYNC_API_KEY").filter(|k| !k.trim().is_empty());

        let workspace_id = var("DOCSYNC_WORKSPACE", "default");
        if workspace_id.trim().is_empty() {
            return Err(SyncError::Config("DOCSYNC_WORKSPACE must not be empty".into()));
        }

        let page_size: u32 = parse(&lookup, "DOCSYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(SyncError::Config(format!(
                "DOCSYNC_PAGE_SIZE must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let bind_addr: SocketAddr =
            parse(&lookup, "DOCSYNC_BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8090)))?;

        let settings_db = var("DOCSYNC_SETTINGS_DB", "./data/settings.sqlite").into();
        let log_level = var("DOCSYNC_LOG_LEVEL", "info");

        let defaults = SyncTuning::default();
        let backoff_base = parse_millis(&lookup, "DOCSYNC_BACKOFF_BASE_MS", defaults.backoff.base)?;
        let backoff_max = parse_millis(&lookup, "DOCSYNC_BACKOFF_MAX_MS", defaults.backoff.max)?;
        if backoff_base.is_zero() || backoff_max < backoff_base {
            return Err(SyncError::Config(
                "backoff base must be positive and not above the backoff max".into(),
            ));
        }

        let tuning = SyncTuning {
            coalesce_window: parse_millis(&lookup, "DOCSYNC_COALESCE_MS", defaults.coalesce_window)?,
            refresh_debounce: parse_millis(
                &lookup,
                "DOCSYNC_REFRESH_DEBOUNCE_MS",
                defaults.refresh_debounce,
            )?,
            backoff: BackoffPolicy {
                base: backoff_base,
                max: backoff_max,
                ..defaults.backoff
            },
        };

        Ok(Self {
            api_url,
            api_key,
            workspace_id,
            page_size,
            bind_addr,
            settings_db,
            log_level,
            tuning,
        })
    }
}

fn parse<F, T>(lookup: &F, name: &str, default: T) -> Result<T, SyncError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SyncError::Config(format!("invalid {}: {:?}", name, raw))),
    }
}

fn parse_millis<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, name, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, SyncError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.api_url, "http://127.0.0.1:8080");
        assert!(config.api_key.is_none());
        assert_eq!(config.workspace_id, "default");
        assert_eq!(config.page_size, 25);
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8090");
        assert_eq!(config.settings_db, PathBuf::from("./data/settings.sqlite"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.tuning, SyncTuning::default());
        assert_eq!(config.tuning.coalesce_window, Duration::from_millis(200));
        assert_eq!(config.tuning.refresh_debounce, Duration::from_millis(500));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DOCSYNC_API_URL", "https://docs.example.com/"),
            ("DOCSYNC_API_KEY", "secret"),
            ("DOCSYNC_WORKSPACE", "ws-42"),
            ("DOCSYNC_PAGE_SIZE", "50"),
            ("DOCSYNC_COALESCE_MS", "100"),
            ("DOCSYNC_BACKOFF_BASE_MS", "250"),
            ("DOCSYNC_BACKOFF_MAX_MS", "4000"),
        ])
        .unwrap();

        assert_eq!(config.api_url, "https://docs.example.com");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.workspace_id, "ws-42");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.tuning.coalesce_window, Duration::from_millis(100));
        assert_eq!(config.tuning.backoff.base, Duration::from_millis(250));
        assert_eq!(config.tuning.backoff.max, Duration::from_millis(4000));
        assert_eq!(config.tuning.backoff.max_exponent, 5);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for vars in [
            vec![("DOCSYNC_PAGE_SIZE", "0")],
            vec![("DOCSYNC_PAGE_SIZE", "many")],
            vec![("DOCSYNC_BIND_ADDR", "nowhere")],
            vec![("DOCSYNC_API_URL", "ftp://docs")],
            vec![("DOCSYNC_BACKOFF_BASE_MS", "5000"), ("DOCSYNC_BACKOFF_MAX_MS", "1000")],
        ] {
            let err = config_from(&vars).unwrap_err();
            assert!(matches!(err, SyncError::Config(_)), "{:?} -> {:?}", vars, err);
        }
    }

    #[test]
    fn test_blank_api_key_is_none() {
        let config = config_from(&[("DOCSYNC_API_KEY", "  ")]).unwrap();
        assert!(config.api_key.is_none());
    }
}

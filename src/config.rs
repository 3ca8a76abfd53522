use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";
const DEFAULT_SETTLE_MS: u64 = 1000;

/// Runtime configuration loaded from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub db_path: PathBuf,
    pub webdriver_url: String,
    pub settle_delay: Duration,
    pub http_timeout: Option<Duration>,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settle_ms = match std::env::var("HIREPILOT_SETTLE_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .context("HIREPILOT_SETTLE_MS must be a number of milliseconds")?,
            Err(_) => DEFAULT_SETTLE_MS,
        };

        let http_timeout = match std::env::var("HIREPILOT_HTTP_TIMEOUT_SECS") {
            Ok(raw) => Some(Duration::from_secs(
                raw.parse::<u64>()
                    .context("HIREPILOT_HTTP_TIMEOUT_SECS must be a number of seconds")?,
            )),
            Err(_) => None,
        };

        let db_path = match std::env::var("HIREPILOT_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_db_path(),
        };

        Ok(Config {
            api_url: std::env::var("HIREPILOT_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            db_path,
            webdriver_url: std::env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| DEFAULT_WEBDRIVER_URL.to_string()),
            settle_delay: Duration::from_millis(settle_ms),
            http_timeout,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn default_db_path() -> PathBuf {
    // XDG data directory, falling back to the working directory
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "hirepilot") {
        proj_dirs.data_dir().join("hirepilot.db")
    } else {
        PathBuf::from("hirepilot.db")
    }
}

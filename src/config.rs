use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://api.sejm.gov.pl/sejm";

/// Runtime settings: defaults, then `sejm_crawler.toml`, then `SEJM_*` env vars.
/// CLI flags are applied on top by `main`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub output_dir: PathBuf,
    pub members_dir: PathBuf,
    pub date_concurrency: usize,
    pub statement_concurrency: usize,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Config::builder()
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("output_dir", "output/speeches")?
            .set_default("members_dir", "output/mp_clubs")?
            .set_default("date_concurrency", 5_i64)?
            .set_default("statement_concurrency", 10_i64)?
            .set_default("max_retries", 0_i64)?
            .set_default("retry_backoff_ms", 2000_i64)?
            .add_source(File::with_name("sejm_crawler").required(false))
            .add_source(Environment::with_prefix("SEJM"))
            .build()
            .context("Failed to build settings")?
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: PathBuf::from("output/speeches"),
            members_dir: PathBuf::from("output/mp_clubs"),
            date_concurrency: 5,
            statement_concurrency: 10,
            request_timeout_secs: None,
            max_retries: 0,
            retry_backoff_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_requests_lossy() {
        let s = Settings::default();
        assert_eq!(s.max_retries, 0);
        assert!(s.request_timeout().is_none());
        assert_eq!(s.date_concurrency * s.statement_concurrency, 50);
    }
}

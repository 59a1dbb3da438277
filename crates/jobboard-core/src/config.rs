//! 設定

use std::collections::HashMap;
use std::ffi::OsString;
use std::time::Duration;

use thiserror::Error;

pub const WORKER_TTL_VAR: &str = "JOB_BOARD_WORKER_TTL_SECS";
pub const DEFAULT_CAPACITY_VAR: &str = "JOB_BOARD_DEFAULT_CAPACITY";
pub const RECONCILE_INTERVAL_VAR: &str = "JOB_BOARD_RECONCILE_INTERVAL_MS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: String, value: String },
}

/// Endpoints a worker reports to, per site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrls {
    pub job_state_url: String,
    pub log_parts_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobBoardConfig {
    /// Lease TTL written on every register/claim. A worker that stops
    /// claiming is reclaimed by the first sweep after this elapses.
    pub worker_ttl: Duration,
    /// Capacity used when a worker registers without one.
    pub default_capacity: u32,
    /// Interval for `ReconcileLoop`.
    pub reconcile_interval: Duration,
    pub site_urls: HashMap<String, SiteUrls>,
}

impl Default for JobBoardConfig {
    fn default() -> Self {
        Self {
            worker_ttl: Duration::from_secs(60),
            default_capacity: 1,
            reconcile_interval: Duration::from_secs(10),
            site_urls: HashMap::new(),
        }
    }
}

impl JobBoardConfig {
    pub fn with_worker_ttl(mut self, ttl: Duration) -> Self {
        self.worker_ttl = ttl;
        self
    }

    pub fn with_default_capacity(mut self, capacity: u32) -> Self {
        self.default_capacity = capacity;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn with_site_urls(
        mut self,
        site: impl Into<String>,
        job_state_url: impl Into<String>,
        log_parts_url: impl Into<String>,
    ) -> Self {
        self.site_urls.insert(
            site.into(),
            SiteUrls {
                job_state_url: job_state_url.into(),
                log_parts_url: log_parts_url.into(),
            },
        );
        self
    }

    pub fn site_urls(&self, site: &str) -> Option<&SiteUrls> {
        self.site_urls.get(site)
    }

    /// Read configuration from the process environment.
    ///
    /// Variables whose name or value is not UTF-8 are skipped.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(utf8_vars(std::env::vars_os()))
    }

    /// Build configuration from `(name, value)` pairs.
    ///
    /// Recognised:
    /// - `JOB_BOARD_WORKER_TTL_SECS`, `JOB_BOARD_DEFAULT_CAPACITY`,
    ///   `JOB_BOARD_RECONCILE_INTERVAL_MS`
    /// - `JOB_STATE_<SITE>_URL` / `LOG_PARTS_<SITE>_URL`; a site is only
    ///   configured when both are present. `<SITE>` is lowercased.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::default();
        let mut job_state: HashMap<String, String> = HashMap::new();
        let mut log_parts: HashMap<String, String> = HashMap::new();

        for (name, value) in vars {
            let name: String = name.into();
            let value: String = value.into();
            match name.as_str() {
                WORKER_TTL_VAR => {
                    config.worker_ttl = Duration::from_secs(parse_positive(&name, &value)?);
                }
                DEFAULT_CAPACITY_VAR => {
                    let capacity = parse_positive(&name, &value)?;
                    config.default_capacity =
                        u32::try_from(capacity).map_err(|_| invalid(&name, &value))?;
                }
                RECONCILE_INTERVAL_VAR => {
                    config.reconcile_interval =
                        Duration::from_millis(parse_positive(&name, &value)?);
                }
                _ => {
                    if let Some(site) = site_var(&name, "JOB_STATE_") {
                        job_state.insert(site, value);
                    } else if let Some(site) = site_var(&name, "LOG_PARTS_") {
                        log_parts.insert(site, value);
                    }
                }
            }
        }

        for (site, job_state_url) in job_state {
            if let Some(log_parts_url) = log_parts.remove(&site) {
                config.site_urls.insert(
                    site,
                    SiteUrls {
                        job_state_url,
                        log_parts_url,
                    },
                );
            }
        }

        Ok(config)
    }
}

fn utf8_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
}

fn site_var(name: &str, prefix: &str) -> Option<String> {
    name.strip_prefix(prefix)?
        .strip_suffix("_URL")
        .filter(|site| !site.is_empty())
        .map(str::to_lowercase)
}

fn parse_positive(var: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(var, value)),
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidNumber {
        var: var.to_string(),
        value: value.to_string(),
    }
}

use anyhow::{anyhow, Context};
use std::path::PathBuf;

pub const DEFAULT_ACCESS_TTL_SECS: i64 = 2 * 60 * 60;
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Start-up settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub jwt_secret: Option<String>,
    pub jwt_refresh_secret: Option<String>,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            jwt_secret: None,
            jwt_refresh_secret: None,
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut cfg = Self {
            workspace: non_empty("SMARTQ_WORKSPACE").map(PathBuf::from),
            jwt_secret: non_empty("SMARTQ_JWT_SECRET"),
            jwt_refresh_secret: non_empty("SMARTQ_JWT_REFRESH_SECRET"),
            ..Self::default()
        };
        if let Some(v) = non_empty("SMARTQ_ACCESS_TTL_SECS") {
            cfg.access_ttl_secs = parse_ttl("SMARTQ_ACCESS_TTL_SECS", &v)?;
        }
        if let Some(v) = non_empty("SMARTQ_REFRESH_TTL_SECS") {
            cfg.refresh_ttl_secs = parse_ttl("SMARTQ_REFRESH_TTL_SECS", &v)?;
        }
        if let Some(v) = non_empty("SMARTQ_LOG") {
            cfg.log_filter = v;
        }
        Ok(cfg)
    }
}

fn parse_ttl(key: &str, raw: &str) -> anyhow::Result<i64> {
    let secs: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be an integer number of seconds"))?;
    if secs <= 0 {
        return Err(anyhow!("{key} must be positive, got {secs}"));
    }
    Ok(secs)
}

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::time::Duration;

use crate::model::WeekStart;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub week_start: WeekStart,
    pub page_limit: u32,
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: "info".to_string(),
            week_start: WeekStart::Sunday,
            page_limit: DEFAULT_PAGE_LIMIT,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        if let Some(v) = lookup("SCHOOLD_WORKSPACE").filter(|v| !v.trim().is_empty()) {
            cfg.workspace = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SCHOOLD_LOG").filter(|v| !v.trim().is_empty()) {
            cfg.log_filter = v;
        }
        if let Some(v) = lookup("SCHOOLD_WEEK_START") {
            cfg.week_start = match v.trim().to_ascii_lowercase().as_str() {
                "sunday" => WeekStart::Sunday,
                "monday" => WeekStart::Monday,
                other => bail!("SCHOOLD_WEEK_START must be sunday or monday, got {other:?}"),
            };
        }
        if let Some(v) = lookup("SCHOOLD_PAGE_LIMIT") {
            let n: u32 = v
                .trim()
                .parse()
                .with_context(|| format!("SCHOOLD_PAGE_LIMIT is not a number: {v:?}"))?;
            if n == 0 {
                bail!("SCHOOLD_PAGE_LIMIT must be at least 1");
            }
            cfg.page_limit = n;
        }
        if let Some(v) = lookup("SCHOOLD_BUSY_TIMEOUT_MS") {
            let ms: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("SCHOOLD_BUSY_TIMEOUT_MS is not a number: {v:?}"))?;
            cfg.busy_timeout = Duration::from_millis(ms);
        }

        Ok(cfg)
    }
}

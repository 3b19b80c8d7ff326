use crate::core::model::{FundKind, Market};
use anyhow::{Context, Result, bail};
use chrono::{FixedOffset, NaiveDate, NaiveTime};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HoldingConfig {
    pub symbol: String,
    pub weight: f64,
    pub market: Option<Market>,
    pub as_of: NaiveDate,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FundConfig {
    pub code: String,
    pub name: String,
    /// Inferred from the name when omitted.
    pub kind: Option<FundKind>,
    #[serde(default)]
    pub holdings: Vec<HoldingConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub window_start: String,
    pub window_end: String,
    pub utc_offset_hours: i32,
    pub interval_minutes: u64,
    pub tick_deadline_secs: Option<u64>,
    pub holidays: Vec<NaiveDate>,
    pub nav_sync_after: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            window_start: "09:35".to_string(),
            window_end: "15:05".to_string(),
            utc_offset_hours: 8,
            interval_minutes: 5,
            tick_deadline_secs: None,
            holidays: Vec::new(),
            nav_sync_after: "16:00".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn tick_deadline(&self) -> Duration {
        self.tick_deadline_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.interval())
    }

    pub fn start_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.window_start)
    }

    pub fn end_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.window_end)
    }

    pub fn nav_sync_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.nav_sync_after)
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .with_context(|| format!("Invalid UTC offset: {}h", self.utc_offset_hours))
    }
}

fn parse_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("Invalid time of day '{value}', expected HH:MM"))
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct QuotesConfig {
    pub cache_ttl_secs: u64,
    pub request_timeout_ms: u64,
    pub workers: usize,
    pub batch_size: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub rate_limit_cooldown_secs: u64,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        QuotesConfig {
            cache_ttl_secs: 300,
            request_timeout_ms: 3000,
            workers: 4,
            batch_size: 8,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            rate_limit_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Sina,
    Yahoo,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            kind: ProviderKind::Sina,
            base_url: "https://hq.sinajs.cn".to_string(),
        },
        ProviderConfig {
            kind: ProviderKind::Yahoo,
            base_url: "https://query1.finance.yahoo.com".to_string(),
        },
    ]
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NavProviderConfig {
    pub base_url: String,
}

impl Default for NavProviderConfig {
    fn default() -> Self {
        NavProviderConfig {
            base_url: "https://fund.eastmoney.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ValuationConfig {
    pub completeness_threshold: f64,
    pub min_weight: f64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        ValuationConfig {
            completeness_threshold: 0.6,
            min_weight: 0.0001,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub risk_free_rate: f64,
    pub window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            risk_free_rate: 0.02,
            window: 250,
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub funds: Vec<FundConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub quotes: QuotesConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub nav_provider: NavProviderConfig,
    #[serde(default)]
    pub valuation: ValuationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("live", "fundval", "fundval")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("live", "fundval", "fundval")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let schedule = &self.schedule;
        if !(1..=60).contains(&schedule.interval_minutes) {
            bail!(
                "schedule.interval_minutes must be between 1 and 60, got {}",
                schedule.interval_minutes
            );
        }
        if schedule.end_time()? <= schedule.start_time()? {
            bail!(
                "schedule.window_end ({}) must be after window_start ({})",
                schedule.window_end,
                schedule.window_start
            );
        }
        schedule.nav_sync_time()?;
        schedule.offset()?;

        if self.providers.is_empty() {
            bail!("At least one quote provider must be configured");
        }
        if self.quotes.workers == 0 || self.quotes.batch_size == 0 {
            bail!("quotes.workers and quotes.batch_size must be positive");
        }
        if self.quotes.backoff_max_ms < self.quotes.backoff_base_ms {
            bail!("quotes.backoff_max_ms must not be below quotes.backoff_base_ms");
        }

        let threshold = self.valuation.completeness_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("valuation.completeness_threshold must be within [0, 1], got {threshold}");
        }
        if !(0.0..1.0).contains(&self.valuation.min_weight) {
            bail!("valuation.min_weight must be within [0, 1)");
        }
        if self.metrics.window < 2 {
            bail!("metrics.window must cover at least 2 observations");
        }
        Ok(())
    }
}

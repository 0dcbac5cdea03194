//! Engine configuration

use crate::retry::RetryPolicy;
use anyhow::{ensure, Context, Result};
use comp_model::accrual::AccrualParams;
use comp_model::level::BonusParams;
use comp_model::limits::InvestmentLimits;
use comp_model::rank::RankCriteria;
use comp_model::rewards::RewardTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Users processed concurrently
    pub concurrency: usize,

    /// Delay before the first replay of a deferred bonus walk, doubled per failure
    pub deferred_backoff_secs: u64,

    /// Replays before a deferred walk is dropped and left to an operator
    pub deferred_max_attempts: u32,

    /// Per-user transaction retries
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            deferred_backoff_secs: 60,
            deferred_max_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler tick in seconds
    pub poll_interval_secs: u64,

    /// Ledger snapshot file (`~` is expanded)
    pub snapshot_path: String,

    pub batch: BatchConfig,

    pub investment: InvestmentLimits,

    pub accrual: AccrualParams,

    pub bonus: BonusParams,

    pub rank: RankCriteria,

    pub rewards: RewardTable,
}

impl Config {
    /// Load configuration from the TOML file named by `TMC_ENGINE_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TMC_ENGINE_CONFIG")
            .unwrap_or_else(|_| "engine-config.toml".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .context(format!("Failed to read config file: {}", config_path))?;

        let config: Config = toml::from_str(&config_str)
            .context("Failed to parse config TOML")?;

        config.validate()?;
        Ok(config)
    }

    /// Production defaults
    pub fn default_params() -> Self {
        Self {
            poll_interval_secs: 60,
            snapshot_path: "~/.tmc-engine/ledger.bin".to_string(),
            batch: BatchConfig::default(),
            investment: InvestmentLimits::default(),
            accrual: AccrualParams::default(),
            bonus: BonusParams::default(),
            rank: RankCriteria::default(),
            rewards: RewardTable::default(),
        }
    }

    /// Write default config to file
    pub fn write_default(path: &str) -> Result<()> {
        let config = Self::default_params();
        let toml_str = toml::to_string_pretty(&config)
            .context("Failed to serialize config")?;

        std::fs::write(path, toml_str)
            .context(format!("Failed to write config to {}", path))?;

        log::info!("Created default config at {}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        ensure!(self.batch.concurrency > 0, "batch.concurrency must be positive");
        ensure!(self.batch.retry.max_attempts > 0, "batch.retry.max_attempts must be positive");
        ensure!(
            self.investment.min_usd <= self.investment.max_usd,
            "investment.min_usd exceeds investment.max_usd"
        );
        ensure!(
            self.rewards.month_secs > 0,
            "rewards.month_secs must be positive"
        );
        ensure!(
            self.rank
                .plus_windows
                .iter()
                .all(|w| w.start_day < w.end_day),
            "rank.plus_windows must have start_day < end_day"
        );
        self.bonus
            .level
            .validate()
            .context("Invalid level ROI schedule")?;
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.snapshot_path).into_owned())
    }
}

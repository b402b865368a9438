use std::time::Duration;

use serde::Deserialize;

use crate::settlement::scheduler::{SettlementFrequency, SettlementScheduleConfig};
use crate::settlement::writer::{WriteMode, WriterConfig};
use crate::gateway::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_address: String,

    /// "daily" or "interval"
    pub settlement_frequency: String,
    pub settlement_execution_hour: u32,
    pub settlement_interval_secs: u64,
    pub settlement_lock_name: String,
    /// "postgres" (cluster-wide) or "memory" (single instance)
    pub settlement_lock_backend: String,
    pub settlement_lock_lease_secs: u64,
    pub settlement_utc_offset_hours: i32,
    pub settlement_notify_timeout_ms: u64,

    /// "bulk" or "parallel"
    pub settlement_write_mode: String,
    pub settlement_write_workers: usize,
    pub settlement_upsert: bool,
    pub settlement_alert_webhook_url: Option<String>,

    pub portone_base_url: String,
    pub portone_imp_key: String,
    pub portone_imp_secret: String,
    pub portone_max_attempts: u32,
    pub portone_backoff_ms: u64,
    pub portone_timeout_secs: u64,
}

impl Config {
    /// Defaults overlaid with environment variables (`DATABASE_URL`, `SETTLEMENT_LOCK_NAME`, ...)
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/settlement")?
            .set_default("database_max_connections", 20)?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("settlement_frequency", "daily")?
            .set_default("settlement_execution_hour", 2)?
            .set_default("settlement_interval_secs", 60)?
            .set_default("settlement_lock_name", "ScheduledTask_run")?
            .set_default("settlement_lock_backend", "postgres")?
            .set_default("settlement_lock_lease_secs", 600)?
            .set_default("settlement_utc_offset_hours", 0)?
            .set_default("settlement_notify_timeout_ms", 5_000)?
            .set_default("settlement_write_mode", "bulk")?
            .set_default("settlement_write_workers", 4)?
            .set_default("settlement_upsert", true)?
            .set_default("portone_base_url", "https://api.iamport.kr")?
            .set_default("portone_imp_key", "")?
            .set_default("portone_imp_secret", "")?
            .set_default("portone_max_attempts", 2)?
            .set_default("portone_backoff_ms", 1_000)?
            .set_default("portone_timeout_secs", 10)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn schedule_config(&self) -> Result<SettlementScheduleConfig, config::ConfigError> {
        let frequency = match self.settlement_frequency.to_ascii_lowercase().as_str() {
            "daily" => {
                if self.settlement_execution_hour > 23 {
                    return Err(config::ConfigError::Message(format!(
                        "SETTLEMENT_EXECUTION_HOUR must be 0-23, got {}",
                        self.settlement_execution_hour
                    )));
                }
                SettlementFrequency::Daily {
                    execution_hour: self.settlement_execution_hour,
                }
            }
            "interval" => SettlementFrequency::Interval {
                every: Duration::from_secs(self.settlement_interval_secs.max(1)),
            },
            other => {
                return Err(config::ConfigError::Message(format!(
                    "Unknown SETTLEMENT_FREQUENCY: {}",
                    other
                )))
            }
        };

        Ok(SettlementScheduleConfig {
            frequency,
            lock_name: self.settlement_lock_name.clone(),
            lock_lease: Duration::from_secs(self.settlement_lock_lease_secs),
            utc_offset_hours: self.settlement_utc_offset_hours,
            notify_timeout: Duration::from_millis(self.settlement_notify_timeout_ms),
        })
    }

    pub fn writer_config(&self) -> Result<WriterConfig, config::ConfigError> {
        let mode = match self.settlement_write_mode.to_ascii_lowercase().as_str() {
            "bulk" => WriteMode::Bulk,
            "parallel" => WriteMode::Parallel {
                workers: self.settlement_write_workers.max(1),
            },
            other => {
                return Err(config::ConfigError::Message(format!(
                    "Unknown SETTLEMENT_WRITE_MODE: {}",
                    other
                )))
            }
        };
        Ok(WriterConfig { mode })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.portone_max_attempts.max(1),
            backoff: Duration::from_millis(self.portone_backoff_ms),
            jitter: Duration::ZERO,
        }
    }
}

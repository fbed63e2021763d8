// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use config::Config;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TIME_ZONE: &str = "Europe/London";

/// Service settings consumed by the extraction engine. Loaded from an
/// optional `powerpos.toml` layered under `POWERPOS_*` environment
/// variables, then validated before anything is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    pub output_directory: PathBuf,
    pub audit_directory: PathBuf,
    pub dlq_directory: PathBuf,
    #[serde(default = "default_time_zone_id")]
    pub time_zone_id: String,
    /// Optional fixed extraction instant, mostly for replaying a known run.
    #[serde(default)]
    pub run_time: Option<DateTime<Utc>>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_time_zone_id() -> String {
    DEFAULT_TIME_ZONE.to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    10
}

impl ServiceSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("powerpos").required(false))
            .add_source(config::Environment::with_prefix("POWERPOS"))
            .build()?;
        let parsed: ServiceSettings = settings.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_minutes == 0 {
            return Err(ConfigError::NonPositive {
                field: "interval_minutes",
            });
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::NonPositive {
                field: "retry_attempts",
            });
        }
        if self.retry_delay_seconds == 0 {
            return Err(ConfigError::NonPositive {
                field: "retry_delay_seconds",
            });
        }
        for (field, path) in [
            ("output_directory", &self.output_directory),
            ("audit_directory", &self.audit_directory),
            ("dlq_directory", &self.dlq_directory),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyPath { field });
            }
        }
        self.zone()?;
        Ok(())
    }

    pub fn zone(&self) -> Result<Tz, ConfigError> {
        self.time_zone_id
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownZone {
                zone: self.time_zone_id.clone(),
            })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration load failed: {0}")]
    Load(#[from] config::ConfigError),
    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },
    #[error("{field} must not be empty")]
    EmptyPath { field: &'static str },
    #[error("unknown time zone '{zone}'")]
    UnknownZone { zone: String },
}

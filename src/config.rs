use std::path::PathBuf;

use chrono::{FixedOffset, Offset, Utc};

use crate::engine::WorkingHours;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Engine-level knobs, passed to every `Scheduler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub working_hours: WorkingHours,
    /// Fixed offset used to turn calendar dates into instants.
    pub utc_offset: FixedOffset,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            working_hours: WorkingHours::default(),
            utc_offset: Utc.fix(),
        }
    }
}

/// Process configuration, read once at startup from `SLOTD_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("SLOTD_DATA_DIR").unwrap_or_else(|| "./data".into());

        let compact_threshold = match lookup("SLOTD_COMPACT_THRESHOLD") {
            Some(v) => v.parse().map_err(|_| invalid("SLOTD_COMPACT_THRESHOLD", &v, "expected an integer"))?,
            None => 1000,
        };

        let metrics_port = match lookup("SLOTD_METRICS_PORT") {
            Some(v) => Some(v.parse().map_err(|_| invalid("SLOTD_METRICS_PORT", &v, "expected a port number"))?),
            None => None,
        };

        let defaults = WorkingHours::default();
        let start_minute = match lookup("SLOTD_WORKDAY_START") {
            Some(v) => parse_clock_time(&v).ok_or_else(|| invalid("SLOTD_WORKDAY_START", &v, "expected HH:MM"))?,
            None => defaults.start_minute,
        };
        let end_minute = match lookup("SLOTD_WORKDAY_END") {
            Some(v) => parse_clock_time(&v).ok_or_else(|| invalid("SLOTD_WORKDAY_END", &v, "expected HH:MM"))?,
            None => defaults.end_minute,
        };
        let working_hours = WorkingHours::new(start_minute, end_minute).map_err(|_| {
            invalid(
                "SLOTD_WORKDAY_END",
                &format!("{end_minute}"),
                "workday must end after it starts",
            )
        })?;

        let utc_offset = match lookup("SLOTD_UTC_OFFSET_MINUTES") {
            Some(v) => {
                let minutes: i32 = v
                    .parse()
                    .map_err(|_| invalid("SLOTD_UTC_OFFSET_MINUTES", &v, "expected an integer"))?;
                minutes
                    .checked_mul(60)
                    .and_then(FixedOffset::east_opt)
                    .ok_or_else(|| invalid("SLOTD_UTC_OFFSET_MINUTES", &v, "offset out of range"))?
            }
            None => SchedulerConfig::default().utc_offset,
        };

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            compact_threshold,
            metrics_port,
            scheduler: SchedulerConfig {
                working_hours,
                utc_offset,
            },
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    }
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted.
fn parse_clock_time(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return None;
    }
    Some(h * 60 + m)
}

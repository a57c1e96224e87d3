use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, Weekday};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: String,
    pub return_comment_min_len: usize,
    pub reject_comment_min_len: usize,
    pub extension_reason_min_len: usize,
    pub weekend: Vec<Weekday>,
    /// Organisation offset from UTC, used to find "today".
    pub utc_offset_minutes: i32,
    pub policy_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "leave.db".to_string(),
            return_comment_min_len: 5,
            reject_comment_min_len: 1,
            extension_reason_min_len: 10,
            weekend: vec![Weekday::Sat, Weekday::Sun],
            utc_offset_minutes: 0,
            policy_version: "2024.1".to_string(),
        }
    }
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key} has an invalid value {raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_weekend(raw: &str) -> Result<Vec<Weekday>> {
    raw.split(',')
        .map(str::trim)
        .filter(|day| !day.is_empty())
        .map(|day| {
            day.parse::<Weekday>()
                .map_err(|_| anyhow!("unknown weekday {day:?} in LEAVE_WEEKEND"))
        })
        .collect()
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Reads the process environment without touching `.env`.
    pub fn from_env_only() -> Result<Self> {
        let defaults = Self::default();

        let weekend = match env::var("LEAVE_WEEKEND") {
            Ok(raw) => parse_weekend(&raw)?,
            Err(_) => defaults.weekend,
        };

        let config = Self {
            db_path: env::var("LEAVE_DB_PATH").unwrap_or(defaults.db_path),
            return_comment_min_len: parsed(
                "LEAVE_RETURN_COMMENT_MIN",
                defaults.return_comment_min_len,
            )?,
            reject_comment_min_len: parsed(
                "LEAVE_REJECT_COMMENT_MIN",
                defaults.reject_comment_min_len,
            )?,
            extension_reason_min_len: parsed(
                "LEAVE_EXTENSION_REASON_MIN",
                defaults.extension_reason_min_len,
            )?,
            weekend,
            utc_offset_minutes: parsed("LEAVE_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes)?,
            policy_version: env::var("LEAVE_POLICY_VERSION").unwrap_or(defaults.policy_version),
        };

        config.utc_offset().context("LEAVE_UTC_OFFSET_MINUTES")?;
        Ok(config)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                anyhow!(
                    "utc offset of {} minutes is out of range",
                    self.utc_offset_minutes
                )
            })
    }
}

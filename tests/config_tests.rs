use anyhow::Context;
use chrono::{FixedOffset, Weekday};
use leave_approval::{
    LeaveService,
    calendar::StaticHolidays,
    config::EngineConfig,
    directory::StaticDirectory,
    types::{Identity, LeaveType, Role},
};
use std::env;
use std::sync::Arc;

const KEYS: [&str; 7] = [
    "LEAVE_DB_PATH",
    "LEAVE_RETURN_COMMENT_MIN",
    "LEAVE_REJECT_COMMENT_MIN",
    "LEAVE_EXTENSION_REASON_MIN",
    "LEAVE_WEEKEND",
    "LEAVE_UTC_OFFSET_MINUTES",
    "LEAVE_POLICY_VERSION",
];

// One test owns the process environment for this binary.
#[test]
fn config_is_read_from_leave_variables() -> anyhow::Result<()> {
    let original: Vec<_> = KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("from-env.db");

    unsafe {
        for key in KEYS {
            env::remove_var(key);
        }
    }
    let defaults = EngineConfig::from_env_only()?;
    assert_eq!(defaults.db_path, "leave.db");
    assert_eq!(defaults.return_comment_min_len, 5);
    assert_eq!(defaults.weekend, vec![Weekday::Sat, Weekday::Sun]);

    unsafe {
        env::set_var("LEAVE_DB_PATH", &db_path);
        env::set_var("LEAVE_RETURN_COMMENT_MIN", "8");
        env::set_var("LEAVE_REJECT_COMMENT_MIN", "3");
        env::set_var("LEAVE_EXTENSION_REASON_MIN", "20");
        env::set_var("LEAVE_WEEKEND", "Fri, Sat");
        env::set_var("LEAVE_UTC_OFFSET_MINUTES", "330");
        env::set_var("LEAVE_POLICY_VERSION", "2025.2");
    }
    let config = EngineConfig::from_env_only()?;
    assert_eq!(config.db_path, db_path.to_string_lossy());
    assert_eq!(config.return_comment_min_len, 8);
    assert_eq!(config.reject_comment_min_len, 3);
    assert_eq!(config.extension_reason_min_len, 20);
    assert_eq!(config.weekend, vec![Weekday::Fri, Weekday::Sat]);
    assert_eq!(config.utc_offset()?, FixedOffset::east_opt(330 * 60).context("offset")?);
    assert_eq!(config.policy_version, "2025.2");

    // dotenv never overrides variables that are already set
    let loaded = EngineConfig::from_env()?;
    assert_eq!(loaded.return_comment_min_len, 8);

    // the service opens its database from the configured path
    let directory = StaticDirectory::new()
        .with_user(Identity::new("emp", Role::Employee, "eng"))
        .with_user(Identity::new("head", Role::DeptHead, "eng"));
    let service = LeaveService::open(
        config,
        Arc::new(directory),
        Arc::new(StaticHolidays::default()),
    )
    .context("opening service from config")?;
    let row = service
        .ledger()
        .provision("emp", LeaveType::Casual, 2025, 0, 5)?;
    assert_eq!(row.available(), 5);
    drop(service);
    assert!(db_path.exists());

    unsafe {
        env::set_var("LEAVE_RETURN_COMMENT_MIN", "five");
    }
    assert!(EngineConfig::from_env_only().is_err());

    unsafe {
        env::set_var("LEAVE_RETURN_COMMENT_MIN", "8");
        env::set_var("LEAVE_WEEKEND", "Funday");
    }
    assert!(EngineConfig::from_env_only().is_err());

    unsafe {
        env::set_var("LEAVE_WEEKEND", "Sat");
        env::set_var("LEAVE_UTC_OFFSET_MINUTES", "100000");
    }
    assert!(EngineConfig::from_env_only().is_err());

    unsafe {
        for (key, value) in original {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }

    Ok(())
}

/*!
 * Tests for application configuration
 */

use anyhow::Result;
use storelingo::app_config::{Config, LogLevel};

use crate::common;

#[test]
fn test_loadOrCreate_withPartialFile_shouldKeepDefaultsForTheRest() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = common::create_test_file(
        dir.path(),
        "conf.json",
        r#"{
            "api": { "model": "gpt-4o", "max_retries": 5 },
            "translation": { "brand_terms": ["Trailhaven"], "validator": { "cjk_min_count": 40 } },
            "queue": { "concurrency": 4 },
            "log_level": "debug"
        }"#,
    )?;

    let config = Config::load_or_create(&path)?;

    assert_eq!(config.api.model, "gpt-4o");
    assert_eq!(config.api.max_retries, 5);
    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.translation.brand_terms, vec!["Trailhaven".to_string()]);
    assert_eq!(config.translation.validator.cjk_min_count, 40);
    assert_eq!(config.translation.validator.trivial_length, 15);
    assert_eq!(config.translation.cache_max_entries, 10_000);
    assert_eq!(config.queue.concurrency, 4);
    assert_eq!(config.queue.max_attempts, 3);
    assert_eq!(config.log_level, LogLevel::Debug);
    config.validate()?;
    Ok(())
}

#[test]
fn test_loadOrCreate_withMissingFile_shouldCreateReloadableDefaults() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("conf.json");

    let created = Config::load_or_create(&path)?;
    assert!(path.exists());
    let reloaded = Config::load_or_create(&path)?;

    assert_eq!(created.api.endpoint, reloaded.api.endpoint);
    assert_eq!(created.queue.lease_secs, reloaded.queue.lease_secs);
    assert_eq!(reloaded.translation.long_text_threshold, 1500);
    Ok(())
}

#[test]
fn test_validate_withBrokenValues_shouldFail() {
    let mut config = Config::default();
    config.translation.source_language = "zz".into();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.queue.concurrency = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.rate_limit.requests_per_minute = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.translation.borderline_ratio = 1.5;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.translation.cache_max_entries = 0;
    assert!(config.validate().is_err());
    config.translation.cache_enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn test_loadOrCreate_withInvalidJson_shouldReportThePath() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = common::create_test_file(dir.path(), "conf.json", "{ not json")?;

    let error = Config::load_or_create(&path).unwrap_err();
    assert!(format!("{:#}", error).contains("conf.json"));
    Ok(())
}

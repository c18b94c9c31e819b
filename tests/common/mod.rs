/*!
 * Common test utilities for the storelingo test suite
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use storelingo::app_config::Config;
use storelingo::providers::mock::MockProvider;
use storelingo::queue::{Job, QueueSupervisor};
use storelingo::stores::InMemoryStore;
use storelingo::translation::{RateLimiter, TranslationCache};
use storelingo::translation_service::{TranslationService, build_orchestrator};

pub mod translators;

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    std::fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Configuration with short timings so queue tests finish quickly
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.api.max_retries = 1;
    config.api.backoff_base_ms = 10;
    config.rate_limit.requests_per_minute = 10_000;
    config.rate_limit.min_interval_ms = 0;
    config.translation.cache_enabled = false;
    config.queue.use_durable_backend = false;
    config.queue.poll_interval_ms = 10;
    config.queue.job_backoff_ms = 10;
    config.queue.max_attempts = 2;
    config.queue.batch_stagger_ms = 0;
    config.queue.busy_timeout_ms = 100;
    config.queue.health_check_interval_secs = 3600;
    config
}

/// Same as `fast_config`, on a SQLite file inside `dir`
pub fn durable_config(dir: &Path) -> Config {
    let mut config = fast_config();
    config.queue.use_durable_backend = true;
    config.queue.database_path = Some(dir.join("queue.db"));
    config
}

/// Service over `config`, the mock provider and an in-memory store
pub async fn start_service(config: &Config, provider: MockProvider, store: Arc<InMemoryStore>) -> TranslationService {
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let cache = TranslationCache::from_config(&config.translation);
    let supervisor = QueueSupervisor::from_config(&config.queue, limiter, cache)
        .await
        .expect("supervisor should start");
    let runtime = supervisor.runtime();
    let orchestrator = build_orchestrator(config, Arc::new(provider), runtime.limiter(), runtime.cache().clone());
    TranslationService::new(supervisor, orchestrator, store.clone(), store, config.queue.batch_stagger())
}

/// Poll until the job is completed or failed
pub async fn wait_for_job(service: &TranslationService, job_id: &str) -> Job {
    for _ in 0..500 {
        if let Some(job) = service.get_job_status(job_id).await.expect("job lookup") {
            if job.is_finished() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish in time", job_id);
}

/// Route log output through the test harness; repeated calls are fine
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/*!
 * Durable queue behaviour on a real SQLite file: persistence, failover to the
 * in-process queue when the file is locked, and explicit reinitialization
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use storelingo::database::Repository;
use storelingo::providers::mock::MockProvider;
use storelingo::queue::JobState;
use storelingo::resource::{Resource, ResourceType};
use storelingo::stores::InMemoryStore;
use storelingo::translation_service::TranslationJobPayload;

use crate::common::{self, translators};

/// Hold the write lock of the queue file until the returned connection is dropped
fn lock_database(path: &Path) -> Connection {
    let locker = Connection::open(path).expect("open queue file");
    locker.busy_timeout(Duration::from_secs(5)).expect("busy timeout");
    locker.execute_batch("BEGIN EXCLUSIVE;").expect("exclusive lock");
    locker
}

fn store_with_product(id: &str) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let mut resource = Resource::new(id, "shop-1", ResourceType::Product);
    resource.title = Some("Waterproof hammock".into());
    store.insert(resource);
    store
}

#[tokio::test]
async fn test_lockedDurableQueue_shouldFailOverAndProcessNewJobs() {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let config = common::durable_config(dir.path());
    let store = store_with_product("p1");
    let service = common::start_service(&config, MockProvider::mapping(translators::to_french), store.clone()).await;
    service.start_processors(1).await.unwrap();
    assert_eq!(service.supervisor().active_backend(), "sqlite");
    assert!(!service.supervisor().is_failed_over());

    let locker = lock_database(config.queue.database_path.as_deref().unwrap());

    let job = service
        .enqueue_translation_job(TranslationJobPayload::new("p1", "shop-1", "shop-1.example", "fr"))
        .await
        .expect("enqueue should survive the outage");
    let job = common::wait_for_job(&service, &job.id).await;

    assert_eq!(job.state, JobState::Completed);
    assert!(service.supervisor().is_failed_over());
    assert_eq!(service.supervisor().active_backend(), "memory");
    assert!(store.translation("p1", "fr").is_some());
    let stats = service.get_queue_stats().await.unwrap();
    assert!(stats.failed_over);

    drop(locker);
    service.shutdown().await;
}

#[tokio::test]
async fn test_durableQueue_shouldKeepJobsAcrossRestart() {
    let dir = common::create_temp_dir().unwrap();
    let config = common::durable_config(dir.path());
    let store = store_with_product("p1");

    let producer = common::start_service(&config, MockProvider::echo(), store.clone()).await;
    let job = producer
        .enqueue_translation_job(TranslationJobPayload::new("p1", "shop-1", "shop-1.example", "fr"))
        .await
        .unwrap();
    producer.shutdown().await;

    let worker = common::start_service(&config, MockProvider::mapping(translators::to_french), store.clone()).await;
    assert_eq!(worker.get_queue_stats().await.unwrap().waiting, 1);
    worker.start_processors(1).await.unwrap();
    let job = common::wait_for_job(&worker, &job.id).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    assert!(store.translation("p1", "fr").is_some());
    worker.shutdown().await;
}

#[tokio::test]
async fn test_reinitialize_afterOutage_shouldMoveWaitingJobsBackToSqlite() {
    let dir = common::create_temp_dir().unwrap();
    let config = common::durable_config(dir.path());
    let path = config.queue.database_path.clone().unwrap();
    let service = common::start_service(&config, MockProvider::echo(), store_with_product("p1")).await;

    let locker = lock_database(&path);
    let job = service
        .enqueue_translation_job(TranslationJobPayload::new("p1", "shop-1", "shop-1.example", "fr"))
        .await
        .unwrap();
    assert!(service.supervisor().is_failed_over());
    locker.execute_batch("ROLLBACK;").unwrap();
    drop(locker);

    let migrated = service.supervisor().reinitialize().await.unwrap();

    assert_eq!(migrated, 1);
    assert_eq!(service.supervisor().active_backend(), "sqlite");
    assert!(!service.supervisor().is_failed_over());
    let repo = Repository::open(&path, Duration::from_secs(1)).unwrap();
    let stored = repo.get_job(&job.id).await.unwrap().expect("job migrated with its id");
    assert_eq!(stored.state, JobState::Waiting);
    assert_eq!(stored.kind, "translate_resource");
    service.shutdown().await;
}

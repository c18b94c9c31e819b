/*!
 * Translation jobs through the service, queue and in-memory stores
 */

use std::sync::Arc;
use std::time::Duration;

use storelingo::errors::QueueError;
use storelingo::providers::mock::MockProvider;
use storelingo::queue::JobState;
use storelingo::resource::{FieldName, Resource, ResourceStatus, ResourceType};
use storelingo::stores::InMemoryStore;
use storelingo::translation_service::{BatchTranslationPayload, TranslationJobPayload};

use crate::common::{self, translators};

fn product(id: &str, shop: &str, title: &str) -> Resource {
    let mut resource = Resource::new(id, shop, ResourceType::Product);
    resource.title = Some(title.to_string());
    resource
}

#[tokio::test]
async fn test_hammockTitle_toChinese_shouldBeAcceptedAndStored() {
    common::init_logging();
    let store = Arc::new(InMemoryStore::new());
    store.insert(product("p1", "shop-1", "Waterproof Hammock Tarp"));
    let service = common::start_service(
        &common::fast_config(),
        MockProvider::mapping(translators::hammock_title_zh),
        store.clone(),
    )
    .await;
    service.start_processors(1).await.unwrap();

    let job = service
        .enqueue_translation_job(TranslationJobPayload::new("p1", "shop-1", "shop-1.example", "zh-CN"))
        .await
        .unwrap();
    let job = common::wait_for_job(&service, &job.id).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 100);
    let saved = store.translation("p1", "zh-CN").expect("translation saved");
    assert_eq!(saved.text(FieldName::Title), Some("防水Hammock天幕"));
    assert_eq!(store.status("p1"), Some(ResourceStatus::Completed));
    service.shutdown().await;
}

#[tokio::test]
async fn test_batchOfThree_shouldYieldThreeAdmissionsAndTranslations() {
    let mut config = common::fast_config();
    config.queue.batch_stagger_ms = 30;
    let store = Arc::new(InMemoryStore::new());
    for id in ["r1", "r2", "r3"] {
        store.insert(product(id, "shop-1", "Waterproof hammock"));
    }
    let service = common::start_service(&config, MockProvider::mapping(translators::to_french), store.clone()).await;
    service.start_processors(2).await.unwrap();

    let batch = service
        .enqueue_batch_translation_job(BatchTranslationPayload {
            resource_ids: vec!["r1".into(), "r2".into(), "r3".into()],
            shop_id: "shop-1".into(),
            shop_domain: "shop-1.example".into(),
            language: "fr".into(),
        })
        .await
        .unwrap();

    assert_eq!(batch.admissions.len(), 3);
    assert_eq!(batch.accepted(), 3);
    let ids: Vec<_> = batch.admissions.iter().map(|a| a.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2", "r3"]);

    let mut run_times = Vec::new();
    for admission in &batch.admissions {
        let job = common::wait_for_job(&service, admission.job_id.as_deref().unwrap()).await;
        assert_eq!(job.state, JobState::Completed);
        run_times.push(job.run_at);
    }
    assert!(run_times.windows(2).all(|w| w[0] < w[1]), "staggered run times: {:?}", run_times);
    assert_eq!(store.translation_count(), 3);
    service.shutdown().await;
}

#[tokio::test]
async fn test_missingResource_shouldFailTerminallyWithoutRetry() {
    let store = Arc::new(InMemoryStore::new());
    let service = common::start_service(&common::fast_config(), MockProvider::echo(), store.clone()).await;
    service.start_processors(1).await.unwrap();

    let job = service
        .enqueue_translation_job(TranslationJobPayload::new("ghost", "shop-1", "shop-1.example", "fr"))
        .await
        .unwrap();
    let job = common::wait_for_job(&service, &job.id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.failed_reason.unwrap_or_default().contains("not found"));
    service.shutdown().await;
}

#[tokio::test]
async fn test_crossShopResource_shouldFailTerminallyAndStayUntouched() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(product("p1", "shop-a", "Waterproof hammock"));
    let mock = MockProvider::mapping(translators::to_french);
    let service = common::start_service(&common::fast_config(), mock.clone(), store.clone()).await;
    service.start_processors(1).await.unwrap();

    let job = service
        .enqueue_translation_job(TranslationJobPayload::new("p1", "shop-b", "shop-b.example", "fr"))
        .await
        .unwrap();
    let job = common::wait_for_job(&service, &job.id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(store.status("p1"), Some(ResourceStatus::Pending));
    assert_eq!(store.translation_count(), 0);
    assert_eq!(mock.call_count(), 0);
    service.shutdown().await;
}

#[tokio::test]
async fn test_partialTranslation_shouldSaveAndMarkPartial() {
    let store = Arc::new(InMemoryStore::new());
    let mut resource = product("p1", "shop-1", "Waterproof hammock");
    resource.summary = Some("Broken summary that the provider never manages to translate.".into());
    store.insert(resource);
    let mock = MockProvider::mapping(|text| {
        if text.contains("Broken") {
            String::new()
        } else {
            translators::to_french(text)
        }
    });
    let service = common::start_service(&common::fast_config(), mock, store.clone()).await;
    service.start_processors(1).await.unwrap();

    let job = service
        .enqueue_translation_job(TranslationJobPayload::new("p1", "shop-1", "shop-1.example", "fr"))
        .await
        .unwrap();
    let job = common::wait_for_job(&service, &job.id).await;

    assert_eq!(job.state, JobState::Completed);
    let summary = job.return_value.expect("job summary");
    assert_eq!(summary["status"], "partial");
    assert_eq!(summary["failed"], 1);
    assert_eq!(store.status("p1"), Some(ResourceStatus::Partial));
    let saved = store.translation("p1", "fr").unwrap();
    assert_eq!(saved.text(FieldName::Title), Some("Imperméable hamac"));
    assert_eq!(
        saved.text(FieldName::Summary),
        Some("Broken summary that the provider never manages to translate.")
    );
}

#[tokio::test]
async fn test_everyFieldFailing_shouldRetryThenRevertStatusToPending() {
    let store = Arc::new(InMemoryStore::new());
    let mut resource = Resource::new("p1", "shop-1", ResourceType::Page);
    resource.summary = Some("Broken summary that the provider never manages to translate.".into());
    store.insert(resource);
    let service = common::start_service(
        &common::fast_config(),
        MockProvider::mapping(|_| String::new()),
        store.clone(),
    )
    .await;
    service.start_processors(1).await.unwrap();

    let job = service
        .enqueue_translation_job(TranslationJobPayload::new("p1", "shop-1", "shop-1.example", "fr"))
        .await
        .unwrap();
    let job = common::wait_for_job(&service, &job.id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(store.status("p1"), Some(ResourceStatus::Pending));
    assert_eq!(store.translation_count(), 0);
}

#[tokio::test]
async fn test_admission_withBlankField_shouldBeRejectedBeforeEnqueue() {
    let store = Arc::new(InMemoryStore::new());
    let service = common::start_service(&common::fast_config(), MockProvider::echo(), store).await;

    let error = service
        .enqueue_translation_job(TranslationJobPayload::new("p1", "", "shop.example", "fr"))
        .await
        .unwrap_err();
    assert!(matches!(error, QueueError::InvalidPayload(_)));
    assert_eq!(service.get_queue_stats().await.unwrap().waiting, 0);
}

#[tokio::test]
async fn test_deferredBatchJob_shouldFanOutIntoSingleJobs() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(product("r1", "shop-1", "Waterproof hammock"));
    store.insert(product("r2", "shop-1", "Waterproof hammock"));
    let service = common::start_service(&common::fast_config(), MockProvider::mapping(translators::to_french), store.clone()).await;
    service.start_processors(1).await.unwrap();

    let batch_job = service
        .enqueue_batch_job(BatchTranslationPayload {
            resource_ids: vec!["r1".into(), "r2".into()],
            shop_id: "shop-1".into(),
            shop_domain: "shop-1.example".into(),
            language: "fr".into(),
        })
        .await
        .unwrap();
    let batch_job = common::wait_for_job(&service, &batch_job.id).await;
    assert_eq!(batch_job.state, JobState::Completed);

    let mut stats = service.get_queue_stats().await.unwrap();
    for _ in 0..300 {
        if stats.completed == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        stats = service.get_queue_stats().await.unwrap();
    }
    assert_eq!(stats.completed, 3);
    assert_eq!(store.translation_count(), 2);
    service.shutdown().await;
}

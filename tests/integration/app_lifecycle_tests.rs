/*!
 * Integration tests for the command-line controller
 */

use std::sync::Arc;

use anyhow::Result;
use storelingo::app_controller::{Controller, Enqueued};
use storelingo::database::Repository;
use storelingo::providers::mock::MockProvider;
use storelingo::resource::{FieldName, Resource, ResourceStatus, ResourceType};

use crate::common::{self, translators};

fn controller(dir: &std::path::Path) -> Controller {
    let config = common::durable_config(dir);
    Controller::with_provider(config, Arc::new(MockProvider::mapping(translators::to_french)))
}

#[tokio::test]
async fn test_importThenDeferredEnqueue_shouldLeaveOneBatchJobWaiting() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let controller = controller(dir.path());
    let mut first = Resource::new("r1", "shop-1", ResourceType::Product);
    first.title = Some("Waterproof hammock".into());
    let second = Resource::new("r2", "shop-1", ResourceType::Page);
    let file = common::create_test_file(dir.path(), "resources.json", &serde_json::to_string(&vec![first, second])?)?;

    assert_eq!(controller.import_resources(&file).await?, 2);
    let enqueued = controller
        .enqueue(vec!["r1".into(), "r2".into()], "shop-1", "shop-1.example", "fr", true)
        .await?;

    let Enqueued::Deferred(job) = enqueued else {
        panic!("expected a deferred batch job");
    };
    assert_eq!(job.kind, "batch_translate");
    assert_eq!(controller.stats().await?.waiting, 1);

    let repo = Repository::open(dir.path().join("queue.db"), std::time::Duration::from_secs(1))?;
    let stored = repo.find_resource("r1").await?.expect("imported resource");
    assert_eq!(stored.status, ResourceStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn test_translateFile_shouldNotTouchTheQueue() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let controller = controller(dir.path());
    let mut resource = Resource::new("p1", "shop-1", ResourceType::Product);
    resource.title = Some("Waterproof hammock".into());
    let file = common::create_test_file(dir.path(), "p1.json", &serde_json::to_string(&resource)?)?;

    let result = controller.translate_file(&file, "fr").await?;

    assert_eq!(result.text(FieldName::Title), Some("Imperméable hamac"));
    assert!(!dir.path().join("queue.db").exists());
    Ok(())
}

#[tokio::test]
async fn test_clientCommands_withoutDurableQueue_shouldRefuse() {
    let dir = common::create_temp_dir().unwrap();
    let mut config = common::durable_config(dir.path());
    config.queue.use_durable_backend = false;
    let controller = Controller::with_provider(config, Arc::new(MockProvider::echo()));

    assert!(controller.stats().await.is_err());
    assert!(controller.job_status("missing").await.is_err());
}

/*!
 * Application controller: wires configuration, provider, queue and stores
 * together for the command line.
 */

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::Config;
use crate::database::{DatabaseConnection, Repository};
use crate::providers::Provider;
use crate::providers::openai::OpenAI;
use crate::queue::{Job, QueueStats, QueueSupervisor};
use crate::resource::{Resource, TranslationResult};
use crate::translation::{RateLimiter, TranslationCache};
use crate::translation_service::{
    BatchAdmission, BatchTranslationPayload, TranslationJobPayload, TranslationService, build_orchestrator,
};

/// How often a running worker logs queue statistics
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// What `enqueue` admitted
#[derive(Debug)]
pub enum Enqueued {
    Single(Job),
    Batch(BatchAdmission),
    Deferred(Job),
}

/// Main application controller
pub struct Controller {
    config: Config,
    provider: Arc<dyn Provider>,
}

impl Controller {
    /// Controller talking to the configured chat-completion endpoint
    pub fn with_config(config: Config) -> Result<Self> {
        let timeout = config.api.timeout().max(config.api.long_text_timeout());
        let provider = Arc::new(OpenAI::new(config.api.resolved_api_key(), config.api.endpoint.clone(), timeout));
        Ok(Self::with_provider(config, provider))
    }

    /// Controller over any provider (tests use the mock)
    pub fn with_provider(config: Config, provider: Arc<dyn Provider>) -> Self {
        Self { config, provider }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn database_path(&self) -> Result<PathBuf> {
        match &self.config.queue.database_path {
            Some(path) => Ok(path.clone()),
            None => DatabaseConnection::default_database_path(),
        }
    }

    fn open_repository(&self) -> Result<Repository> {
        let path = self.database_path()?;
        let repo = Repository::open(&path, self.config.queue.busy_timeout())
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        match repo.connection().stats() {
            Ok(stats) => debug!("Database {}: {}", path.display(), stats),
            Err(e) => warn!("Could not read database stats: {}", e),
        }
        Ok(repo)
    }

    /// Service backed by the SQLite stores and a supervised queue
    pub async fn start_service(&self) -> Result<TranslationService> {
        let repo = Arc::new(self.open_repository()?);
        let limiter = Arc::new(RateLimiter::from_config(&self.config.rate_limit));
        let cache = TranslationCache::from_config(&self.config.translation);
        let supervisor = QueueSupervisor::from_config(&self.config.queue, limiter, cache).await?;

        let runtime = supervisor.runtime();
        let orchestrator = build_orchestrator(
            &self.config,
            self.provider.clone(),
            runtime.limiter(),
            runtime.cache().clone(),
        );
        Ok(TranslationService::new(
            supervisor,
            orchestrator,
            repo.clone(),
            repo,
            self.config.queue.batch_stagger(),
        ))
    }

    /// Service for commands that only talk to the shared queue; an in-process
    /// queue would lose everything when the command exits
    async fn start_client_service(&self) -> Result<TranslationService> {
        let service = self.start_service().await?;
        if service.supervisor().is_failed_over() || !self.config.queue.use_durable_backend {
            service.shutdown().await;
            return Err(anyhow!("The durable job queue is not available"));
        }
        Ok(service)
    }

    /// Translate a resource snapshot read from a JSON file, without the queue
    pub async fn translate_file(&self, path: &Path, language: &str) -> Result<TranslationResult> {
        let resource = read_resource(path)?;
        let limiter = Arc::new(RateLimiter::from_config(&self.config.rate_limit));
        let cache = TranslationCache::from_config(&self.config.translation);
        let orchestrator = build_orchestrator(&self.config, self.provider.clone(), limiter, cache);

        info!("Translating {} ({}) into {}", resource.id, resource.resource_type.as_str(), language);
        let result = orchestrator.translate_resource(&resource, language).await;
        if !result.failed_fields().is_empty() {
            warn!("{} field(s) kept their original text", result.failed_fields().len());
        }
        Ok(result)
    }

    /// Store resource snapshots (one object or an array) so workers can find them
    pub async fn import_resources(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let resources: Vec<Resource> = match serde_json::from_str::<Vec<Resource>>(&content) {
            Ok(many) => many,
            Err(_) => vec![serde_json::from_str::<Resource>(&content)
                .with_context(|| format!("Failed to parse resources in {}", path.display()))?],
        };

        let repo = self.open_repository()?;
        for resource in &resources {
            repo.upsert_resource(resource).await?;
        }
        info!("Imported {} resource(s)", resources.len());
        Ok(resources.len())
    }

    /// Run processors until Ctrl-C
    pub async fn run_worker(&self) -> Result<()> {
        let service = self.start_service().await?;
        service.start_processors(self.config.queue.concurrency).await?;
        info!(
            "Worker running on the {} queue with {} worker(s) per job kind; press Ctrl-C to stop",
            service.supervisor().active_backend(),
            self.config.queue.concurrency
        );

        let mut stats_tick = tokio::time::interval(STATS_LOG_INTERVAL);
        stats_tick.tick().await;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    break;
                }
                _ = stats_tick.tick() => match service.get_queue_stats().await {
                    Ok(stats) => info!("Queue: {}", stats),
                    Err(e) => warn!("Could not read queue stats: {}", e),
                },
            }
        }

        info!(
            "Shutting down worker (translation cache: {})",
            service.supervisor().runtime().cache().stats()
        );
        service.shutdown().await;
        Ok(())
    }

    /// Admit one job per resource (or a single deferred batch job)
    pub async fn enqueue(
        &self,
        resource_ids: Vec<String>,
        shop_id: &str,
        shop_domain: &str,
        language: &str,
        deferred: bool,
    ) -> Result<Enqueued> {
        let service = self.start_client_service().await?;
        let outcome = if resource_ids.len() == 1 && !deferred {
            let payload = TranslationJobPayload::new(resource_ids[0].clone(), shop_id, shop_domain, language);
            service.enqueue_translation_job(payload).await.map(Enqueued::Single)
        } else {
            let payload = BatchTranslationPayload {
                resource_ids,
                shop_id: shop_id.to_string(),
                shop_domain: shop_domain.to_string(),
                language: language.to_string(),
            };
            if deferred {
                service.enqueue_batch_job(payload).await.map(Enqueued::Deferred)
            } else {
                service.enqueue_batch_translation_job(payload).await.map(Enqueued::Batch)
            }
        };
        service.shutdown().await;
        Ok(outcome?)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let service = self.start_client_service().await?;
        let stats = service.get_queue_stats().await;
        service.shutdown().await;
        Ok(stats?)
    }

    pub async fn job_status(&self, job_id: &str) -> Result<Option<Job>> {
        let service = self.start_client_service().await?;
        let job = service.get_job_status(job_id).await;
        service.shutdown().await;
        Ok(job?)
    }
}

/// Read one resource snapshot from a JSON file
pub fn read_resource(path: &Path) -> Result<Resource> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resource file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse resource file: {}", path.display()))
}

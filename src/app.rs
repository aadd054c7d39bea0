// Application context
//
// Shared services built once at startup and handed to the queue worker and the HTTP
// handlers. Nothing in here is a global; every consumer gets it passed in.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::audio::AudioTools;
use crate::benchmark::BenchmarkConfig;
use crate::config::AppConfig;
use crate::delivery::MemorySink;
use crate::metrics::{create_metrics_exporter, Metrics};
use crate::orchestrator::TranscriptionOrchestrator;
use crate::providers::ProviderRegistry;
use crate::queue_manager::QueueManager;
use crate::refinement::{LlmRefiner, RefinementFailure, TextRefiner};
use crate::router::TranscriptionRouter;
use crate::strategies::{build_strategy, StrategyError};

#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub registry: Arc<ProviderRegistry>,
    pub router: Arc<TranscriptionRouter>,
    pub refiner: Option<Arc<dyn TextRefiner>>,
    pub queue: QueueManager,
    /// Chats as the bot would show them
    pub sink: Arc<MemorySink>,
    pub audio: AudioTools,
    pub metrics: Metrics,
}

impl AppContext {
    /// Wire every service from the configuration. Providers are created but not initialized.
    pub async fn build(config: AppConfig) -> Result<Self, StrategyError> {
        let metrics = Metrics::new(create_metrics_exporter(&config.metrics.exporter_type));
        let audio = AudioTools::new(&config.audio);
        let registry = Arc::new(ProviderRegistry::from_config(&config, &audio));
        let strategy = build_strategy(&config.routing)?;
        info!(
            "Routing strategy '{}' over providers {:?}",
            strategy.name(),
            registry.names()
        );

        let benchmark = BenchmarkConfig::from_routing(&config.routing).await;
        let router = Arc::new(
            TranscriptionRouter::new(Arc::clone(&registry), strategy, metrics.clone()).with_benchmark(benchmark),
        );

        let refiner: Option<Arc<dyn TextRefiner>> = match LlmRefiner::new(config.llm.clone()) {
            Ok(refiner) => Some(Arc::new(refiner)),
            Err(RefinementFailure::Disabled) => {
                info!("LLM refinement disabled, drafts are delivered as is");
                None
            }
            Err(e) => {
                warn!("LLM refinement unavailable: {}", e);
                None
            }
        };

        let queue = QueueManager::new(config.queue.clone(), metrics.clone());

        Ok(Self {
            config,
            registry,
            router,
            refiner,
            queue,
            sink: Arc::new(MemorySink::new()),
            audio,
            metrics,
        })
    }

    pub fn orchestrator(&self) -> TranscriptionOrchestrator {
        let orchestrator = TranscriptionOrchestrator::new(Arc::clone(&self.router), self.sink.clone(), self.metrics.clone())
            .with_message_limit(self.config.handler.message_limit);
        match &self.refiner {
            Some(refiner) => orchestrator.with_refiner(Arc::clone(refiner)),
            None => orchestrator,
        }
    }

    /// Initialize providers and start the queue worker plus the cleanup tasks for results
    /// and chats, both on the result TTL
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let failures = self.registry.initialize_all().await;
        if failures.len() == self.registry.names().len() {
            warn!("No transcription provider could be initialized; every request will fail until one is");
        }
        vec![
            self.queue.start_worker(Arc::new(self.orchestrator())),
            self.queue.start_cleanup_task(),
            self.sink.start_eviction_task(
                Duration::from_secs(self.config.queue.cleanup_interval_secs.max(1)),
                Duration::from_secs(self.config.queue.result_ttl_secs),
            ),
        ]
    }

    pub async fn shutdown(&self) {
        self.queue.close().await;
        self.registry.shutdown_all().await;
    }
}

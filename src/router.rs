// Transcription router
//
// Turns a routing decision into provider calls: resolves the selected provider in the
// registry, runs it, tries one fallback when the strategy allows it, and fans out to
// every target when benchmarking.

use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::benchmark::{BenchmarkConfig, BenchmarkReport};
use crate::metrics::Metrics;
use crate::models::{TranscriptionContext, TranscriptionResult};
use crate::providers::{ProviderError, ProviderRegistry};
use crate::strategies::{ProviderSelection, RoutingStrategy};

/// Failure of one routed transcription
#[derive(Error, Debug, Clone)]
pub enum RouterError {
    #[error("Provider '{provider}' failed: {source}")]
    Failed {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("Provider '{provider}' failed ({source}); fallback '{fallback}' failed too: {fallback_error}")]
    FallbackFailed {
        provider: String,
        #[source]
        source: ProviderError,
        fallback: String,
        fallback_error: ProviderError,
    },

    #[error("All {targets} benchmark targets failed, last error: {last_error}")]
    BenchmarkFailed {
        targets: usize,
        last_error: ProviderError,
    },
}

impl RouterError {
    /// Message safe to show to the end user
    pub fn user_message(&self) -> String {
        match self {
            RouterError::Failed { source, .. } => source.user_message(),
            RouterError::FallbackFailed {
                source,
                fallback_error,
                ..
            } => {
                // Input problems explain the failure better than the backup's own error
                if source.is_limit_error() || matches!(source, ProviderError::UnsupportedFormat(_)) {
                    source.user_message()
                } else {
                    fallback_error.user_message()
                }
            }
            RouterError::BenchmarkFailed { last_error, .. } => last_error.user_message(),
        }
    }
}

pub struct TranscriptionRouter {
    registry: Arc<ProviderRegistry>,
    strategy: Arc<dyn RoutingStrategy>,
    metrics: Metrics,
    benchmark: BenchmarkConfig,
}

impl TranscriptionRouter {
    pub fn new(registry: Arc<ProviderRegistry>, strategy: Arc<dyn RoutingStrategy>, metrics: Metrics) -> Self {
        Self {
            registry,
            strategy,
            metrics,
            benchmark: BenchmarkConfig::default(),
        }
    }

    pub fn with_benchmark(mut self, benchmark: BenchmarkConfig) -> Self {
        self.benchmark = benchmark;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Route one transcription. At most one fallback attempt is made per request.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        context: &TranscriptionContext,
    ) -> Result<TranscriptionResult, RouterError> {
        let targets = self.strategy.fan_out_targets(context);
        if !targets.is_empty() {
            return self.run_benchmark(audio_path, context, targets).await;
        }

        let selection = self.strategy.select_provider(context);
        let requires_refinement = self.strategy.requires_post_processing(context);
        info!(
            "Routing {:.1}s audio to {} (strategy: {}, refine: {})",
            context.duration_seconds,
            selection,
            self.strategy.name(),
            requires_refinement
        );

        let primary_error = match self.invoke(&selection, audio_path, context).await {
            Ok(result) => return Ok(result.with_routing(&selection.provider, requires_refinement)),
            Err(e) => e,
        };

        let Some(fallback) = self.fallback_for(&selection.provider, &primary_error, context).await else {
            return Err(RouterError::Failed {
                provider: selection.provider,
                source: primary_error,
            });
        };

        warn!(
            "Provider '{}' failed ({}), falling back to '{}'",
            selection.provider, primary_error, fallback
        );
        self.metrics.record_fallback(&selection.provider, &fallback).await;

        let fallback_selection = ProviderSelection::new(fallback.as_str());
        match self.invoke(&fallback_selection, audio_path, context).await {
            Ok(result) => Ok(result.with_routing(&fallback, requires_refinement)),
            Err(fallback_error) => Err(RouterError::FallbackFailed {
                provider: selection.provider,
                source: primary_error,
                fallback,
                fallback_error,
            }),
        }
    }

    /// Fallback provider for this failure, if the strategy allows one and it is usable
    async fn fallback_for(
        &self,
        failed: &str,
        error: &ProviderError,
        context: &TranscriptionContext,
    ) -> Option<String> {
        if !self.strategy.supports_fallback() || !error.warrants_fallback() {
            return None;
        }
        let name = self.strategy.get_fallback(failed).filter(|name| name != failed)?;
        let Some(provider) = self.registry.get_ready(&name).await else {
            warn!("Fallback provider '{}' is not available", name);
            return None;
        };
        if error.is_limit_error() && !provider.limits().accepts(context.duration_seconds, None) {
            info!("Fallback '{}' has the same limits, not retrying", name);
            return None;
        }
        Some(name)
    }

    async fn invoke(
        &self,
        selection: &ProviderSelection,
        audio_path: &Path,
        context: &TranscriptionContext,
    ) -> Result<TranscriptionResult, ProviderError> {
        let provider = self
            .registry
            .get_ready(&selection.provider)
            .await
            .ok_or_else(|| ProviderError::NotInitialized(selection.provider.clone()))?;

        let started = Instant::now();
        let result = provider
            .transcribe(audio_path, context, selection.model.as_deref())
            .await;
        let elapsed = started.elapsed().as_secs_f64();
        let model = selection
            .model
            .as_deref()
            .unwrap_or_else(|| provider.default_model());

        match &result {
            Ok(r) => {
                self.metrics
                    .record_transcription(&selection.provider, &r.model_name, "success", elapsed, context.duration_seconds)
                    .await
            }
            Err(_) => {
                self.metrics
                    .record_transcription(&selection.provider, model, "error", elapsed, context.duration_seconds)
                    .await
            }
        }
        result
    }

    /// Run every target in turn, report, and hand back the first success
    async fn run_benchmark(
        &self,
        audio_path: &Path,
        context: &TranscriptionContext,
        targets: Vec<ProviderSelection>,
    ) -> Result<TranscriptionResult, RouterError> {
        info!("Benchmarking {} targets on {:.1}s audio", targets.len(), context.duration_seconds);

        let mut runs = Vec::with_capacity(targets.len());
        for target in targets {
            let result = self.invoke(&target, audio_path, context).await;
            if let Err(e) = &result {
                warn!("Benchmark target {} failed: {}", target, e);
            }
            runs.push((target, result));
        }

        let report = BenchmarkReport::build(
            context.duration_seconds,
            &runs,
            self.benchmark.reference_text.as_deref(),
        );
        info!("\n{}", report.render_table());
        if let Some(dir) = &self.benchmark.report_dir {
            if let Err(e) = report.write_to(dir).await {
                warn!("Cannot write benchmark report to {}: {}", dir.display(), e);
            }
        }

        let total = runs.len();
        let mut last_error = ProviderError::Unknown("no benchmark targets".into());
        for (target, run) in runs {
            match run {
                Ok(result) => return Ok(result.with_routing(&target.provider, false)),
                Err(e) => last_error = e,
            }
        }
        Err(RouterError::BenchmarkFailed {
            targets: total,
            last_error,
        })
    }
}

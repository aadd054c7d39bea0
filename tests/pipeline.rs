// End-to-end pipeline tests: queue, hybrid routing, chunked draft, refinement and
// staged chat delivery, with fake engines standing in for ffmpeg and the providers.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transcription_router::chunking::{
    plan_chunks, ChunkMode, ChunkSpan, ChunkTranscriber, ChunkedTranscription, SegmentExtractor,
};
use transcription_router::config::QueueConfig;
use transcription_router::delivery::{MemorySink, DRAFT_HEADER};
use transcription_router::metrics::Metrics;
use transcription_router::models::{TranscriptionContext, TranscriptionRequest, TranscriptionResult};
use transcription_router::orchestrator::TranscriptionOrchestrator;
use transcription_router::providers::{ProviderError, ProviderRegistry, TranscriptionProvider};
use transcription_router::queue_manager::{QueueError, QueueManager};
use transcription_router::refinement::{RefinementFailure, TextRefiner};
use transcription_router::router::TranscriptionRouter;
use transcription_router::strategies::{HybridStrategy, ProviderSelection};

/// Writes the span index into the chunk file
struct IndexExtractor;

#[async_trait]
impl SegmentExtractor for IndexExtractor {
    async fn extract(&self, _source: &Path, span: &ChunkSpan, dest: &Path) -> Result<(), ProviderError> {
        tokio::fs::write(dest, span.index.to_string())
            .await
            .map_err(|e| ProviderError::Unknown(e.to_string()))
    }
}

/// Returns "chunk<index>" and records the prompts it was given
#[derive(Default)]
struct IndexTranscriber {
    prompts: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl ChunkTranscriber for IndexTranscriber {
    async fn transcribe_chunk(&self, chunk_path: &Path, prompt: Option<&str>) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.map(str::to_string));
        let index = tokio::fs::read_to_string(chunk_path)
            .await
            .map_err(|e| ProviderError::Unknown(e.to_string()))?;
        Ok(format!("chunk{}", index))
    }
}

/// Draft engine that always chunks at 1200s with 2s overlap, three chunks in flight
struct ChunkingDraftProvider {
    transcriber: IndexTranscriber,
    calls: AtomicUsize,
}

#[async_trait]
impl TranscriptionProvider for ChunkingDraftProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn default_model(&self) -> &str {
        "small"
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        context: &TranscriptionContext,
        model: Option<&str>,
    ) -> Result<TranscriptionResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let spans = plan_chunks(context.duration_seconds, 1200.0, 2.0);
        let outcome = ChunkedTranscription::new(&IndexExtractor, &self.transcriber)
            .run(audio_path, &spans, ChunkMode::Parallel { max_concurrent: 3 })
            .await?;
        Ok(TranscriptionResult::new(
            outcome.text,
            None,
            1.0,
            context.duration_seconds,
            "local",
            model.unwrap_or("small"),
        ))
    }

    async fn shutdown(&self) {}

    async fn is_initialized(&self) -> bool {
        true
    }
}

/// Quality engine that must never see long audio
struct QualityProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl TranscriptionProvider for QualityProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        "gpt-4o-transcribe"
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn transcribe(
        &self,
        _audio_path: &Path,
        context: &TranscriptionContext,
        _model: Option<&str>,
    ) -> Result<TranscriptionResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TranscriptionResult::new(
            "short and clean",
            Some("en".to_string()),
            0.5,
            context.duration_seconds,
            "openai",
            "gpt-4o-transcribe",
        ))
    }

    async fn shutdown(&self) {}

    async fn is_initialized(&self) -> bool {
        true
    }
}

struct PolishingRefiner;

#[async_trait]
impl TextRefiner for PolishingRefiner {
    async fn refine(&self, draft: &str) -> Result<String, RefinementFailure> {
        Ok(format!("Polished: {}.", draft))
    }
}

struct TimingOutRefiner;

#[async_trait]
impl TextRefiner for TimingOutRefiner {
    async fn refine(&self, _draft: &str) -> Result<String, RefinementFailure> {
        Err(RefinementFailure::Timeout(60))
    }
}

struct Pipeline {
    queue: QueueManager,
    sink: Arc<MemorySink>,
    draft: Arc<ChunkingDraftProvider>,
    quality: Arc<QualityProvider>,
}

fn queue_config() -> QueueConfig {
    QueueConfig {
        max_queue_size: 10,
        max_concurrent: 1,
        estimate_rtf: 0.3,
        max_audio_duration: 10_800.0,
        result_ttl_secs: 3600,
        cleanup_interval_secs: 300,
    }
}

fn pipeline(refiner: Option<Arc<dyn TextRefiner>>) -> Pipeline {
    let draft = Arc::new(ChunkingDraftProvider {
        transcriber: IndexTranscriber::default(),
        calls: AtomicUsize::new(0),
    });
    let quality = Arc::new(QualityProvider {
        calls: AtomicUsize::new(0),
    });

    let mut registry = ProviderRegistry::new();
    registry.register(draft.clone());
    registry.register(quality.clone());

    let strategy = Arc::new(HybridStrategy::new(
        20.0,
        ProviderSelection::with_model("openai", "gpt-4o-transcribe"),
        ProviderSelection::with_model("local", "small"),
        true,
        None,
    ));
    let router = Arc::new(TranscriptionRouter::new(Arc::new(registry), strategy, Metrics::disabled()));

    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = TranscriptionOrchestrator::new(router, sink.clone(), Metrics::disabled());
    if let Some(refiner) = refiner {
        orchestrator = orchestrator.with_refiner(refiner);
    }

    let queue = QueueManager::new(queue_config(), Metrics::disabled());
    queue.start_worker(Arc::new(orchestrator));

    Pipeline {
        queue,
        sink,
        draft,
        quality,
    }
}

fn request(duration: f64) -> TranscriptionRequest {
    TranscriptionRequest::new("chat-42", PathBuf::from("voice.ogg"), TranscriptionContext::new(duration))
}

#[tokio::test]
async fn test_long_recording_is_chunked_drafted_and_refined() {
    let pipeline = pipeline(Some(Arc::new(PolishingRefiner)));
    let request = request(1800.0);
    let id = request.id.clone();

    assert_eq!(pipeline.queue.enqueue(request).await.unwrap(), 1);
    let processed = pipeline.queue.wait_for(&id, Duration::from_secs(10)).await.unwrap();

    assert_eq!(processed.result.text, "chunk0 chunk1");
    assert_eq!(processed.result.provider_used, "local");
    assert!(processed.result.requires_refinement);
    assert!(processed.refined);
    assert_eq!(processed.final_text, "Polished: chunk0 chunk1.");

    assert_eq!(pipeline.draft.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.quality.calls.load(Ordering::SeqCst), 0);

    // Parallel chunks carry no context
    let prompts = pipeline.draft.transcriber.prompts.lock().unwrap().clone();
    assert_eq!(prompts, vec![None, None]);

    let messages = pipeline.sink.messages("chat-42");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "Polished: chunk0 chunk1.");
}

#[tokio::test]
async fn test_refinement_timeout_keeps_the_draft() {
    let pipeline = pipeline(Some(Arc::new(TimingOutRefiner)));
    let request = request(1800.0);
    let id = request.id.clone();

    pipeline.queue.enqueue(request).await.unwrap();
    let processed = pipeline.queue.wait_for(&id, Duration::from_secs(10)).await.unwrap();

    assert!(!processed.refined);
    assert_eq!(processed.final_text, "chunk0 chunk1");

    let messages = pipeline.sink.messages("chat-42");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "chunk0 chunk1");
    assert!(!messages[0].text.contains(DRAFT_HEADER));
}

#[tokio::test]
async fn test_short_recording_takes_the_quality_path() {
    let pipeline = pipeline(Some(Arc::new(PolishingRefiner)));
    let request = request(12.0);
    let id = request.id.clone();

    pipeline.queue.enqueue(request).await.unwrap();
    let processed = pipeline.queue.wait_for(&id, Duration::from_secs(10)).await.unwrap();

    assert_eq!(processed.final_text, "short and clean");
    assert!(!processed.result.requires_refinement);
    assert!(!processed.refined);
    assert_eq!(pipeline.draft.calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.quality.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recording_over_the_ceiling_is_refused_at_admission() {
    let pipeline = pipeline(None);
    let error = pipeline.queue.enqueue(request(20_000.0)).await.unwrap_err();
    assert!(matches!(error, QueueError::DurationExceeded { .. }));
    assert_eq!(pipeline.queue.get_queue_depth().await, 0);
}

#[tokio::test]
async fn test_finished_jobs_leave_nothing_behind_after_cleanup() {
    let pipeline = pipeline(None);
    for n in 0..30 {
        let request = TranscriptionRequest::new(
            format!("chat-{}", n),
            PathBuf::from("voice.ogg"),
            TranscriptionContext::new(12.0),
        );
        let id = request.id.clone();
        pipeline.queue.enqueue(request).await.unwrap();
        pipeline.queue.wait_for(&id, Duration::from_secs(10)).await.unwrap();
    }
    assert_eq!(pipeline.sink.chat_count(), 30);

    pipeline.queue.cleanup_expired(Duration::ZERO).await;
    assert_eq!(pipeline.sink.evict_idle(Duration::ZERO), 30);
    assert_eq!(pipeline.sink.message_count(), 0);
}

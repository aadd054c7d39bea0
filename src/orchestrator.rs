// Per-request processing pipeline
//
// What the queue worker runs for every dequeued request: route the audio, then either
// deliver the text directly or show it as a draft, refine it and replace the draft.

use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;

use crate::delivery::{MessageSink, StagedDelivery, DEFAULT_MESSAGE_LIMIT};
use crate::metrics::Metrics;
use crate::models::{ProcessedTranscription, TranscriptionRequest};
use crate::queue_manager::{JobFailure, JobOutcome, JobProcessor};
use crate::refinement::{refine_transcription, TextRefiner};
use crate::router::TranscriptionRouter;

/// Delivered instead of an empty transcript
pub const NO_SPEECH_TEXT: &str = "No speech was recognized in this recording.";

pub struct TranscriptionOrchestrator {
    router: Arc<TranscriptionRouter>,
    refiner: Option<Arc<dyn TextRefiner>>,
    sink: Arc<dyn MessageSink>,
    metrics: Metrics,
    message_limit: usize,
}

impl TranscriptionOrchestrator {
    pub fn new(router: Arc<TranscriptionRouter>, sink: Arc<dyn MessageSink>, metrics: Metrics) -> Self {
        Self {
            router,
            refiner: None,
            sink,
            metrics,
            message_limit: DEFAULT_MESSAGE_LIMIT,
        }
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn TextRefiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.message_limit = limit;
        self
    }
}

#[async_trait]
impl JobProcessor for TranscriptionOrchestrator {
    async fn process(&self, request: TranscriptionRequest) -> JobOutcome {
        let mut delivery = StagedDelivery::new(self.sink.clone(), &request.chat_id, request.status_message_id)
            .with_limit(self.message_limit);

        let result = match self.router.transcribe(&request.audio_path, &request.context).await {
            Ok(result) => result,
            Err(e) => {
                error!("Request {} failed: {}", request.id, e);
                let failure = JobFailure::from(e);
                if let Err(delivery_error) = delivery.fail(&failure.user_message).await {
                    warn!("Could not report failure of {}: {}", request.id, delivery_error);
                }
                return Err(failure);
            }
        };

        if let Some(partial) = &result.error {
            warn!("Request {} finished with a partial transcript: {}", request.id, partial);
        }

        let draft = if result.text.trim().is_empty() {
            NO_SPEECH_TEXT.to_string()
        } else {
            result.text.clone()
        };

        let refiner = match &self.refiner {
            Some(refiner) if result.requires_refinement && !result.text.trim().is_empty() => Some(refiner),
            _ => None,
        };

        let (final_text, refined) = match refiner {
            Some(refiner) => {
                delivery.show_draft(&draft).await.map_err(|e| JobFailure::internal(e.to_string()))?;
                let outcome = refine_transcription(refiner.as_ref(), &draft).await;
                let label = if outcome.refined { "refined" } else { "fallback_to_draft" };
                self.metrics
                    .record_refinement(label, outcome.duration.as_secs_f64())
                    .await;
                delivery
                    .finalize_refined(&outcome.text)
                    .await
                    .map_err(|e| JobFailure::internal(e.to_string()))?;
                (outcome.text, outcome.refined)
            }
            None => {
                if result.requires_refinement {
                    info!("Request {} asked for refinement but no refiner is configured", request.id);
                }
                delivery.deliver(&draft).await.map_err(|e| JobFailure::internal(e.to_string()))?;
                (draft, false)
            }
        };

        info!(
            "Request {} done: {} via {}/{} ({:.1}s audio, rtf {:.2}, refined: {})",
            request.id,
            final_text.chars().count(),
            result.provider_used,
            result.model_name,
            result.audio_duration,
            result.realtime_factor,
            refined
        );

        Ok(ProcessedTranscription {
            request_id: request.id,
            result,
            final_text,
            refined,
        })
    }
}

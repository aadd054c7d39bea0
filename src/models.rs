// Transcription router data models
//
// This module contains the value types that flow through the queue, the router and the
// providers, plus the request and response types used by the HTTP front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::delivery::MessageId;
use crate::queue_manager::JobStatus;

/// Request priority. Carried through the pipeline and logged, processing stays FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" | "" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Per-request metadata, created once when the request is accepted and only read afterwards.
///
/// `duration_seconds` is always the decoded duration of the audio stream, never the
/// duration declared by the container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionContext {
    /// True decoded audio duration in seconds
    pub duration_seconds: f64,
    /// Language hint (ISO 639-1), None lets the provider detect it
    pub language: Option<String>,
    /// Request priority
    pub priority: Priority,
    /// Provider the caller would like to use, honored by strategies that allow it
    pub provider_preference: Option<String>,
}

impl TranscriptionContext {
    pub fn new(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            language: None,
            priority: Priority::Normal,
            provider_preference: None,
        }
    }

    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_provider_preference<S: Into<String>>(mut self, provider: S) -> Self {
        self.provider_preference = Some(provider.into());
        self
    }
}

/// Queue-visible unit of work
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// Unique identifier for the request
    pub id: String,
    /// Identifier of the user who sent the media
    pub user_id: String,
    /// Conversation the staged messages are posted to
    pub chat_id: String,
    /// Path to the audio file
    pub audio_path: PathBuf,
    /// Folder owning the audio file, removed once the request is done
    pub job_folder: Option<PathBuf>,
    /// Immutable routing context
    pub context: TranscriptionContext,
    /// "Processing..." message already shown to the user, reused for the first part
    pub status_message_id: Option<MessageId>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Usage record id in the (external) persistence layer
    pub usage_record_id: Option<i64>,
}

impl TranscriptionRequest {
    pub fn new<U: Into<String>>(user_id: U, audio_path: PathBuf, context: TranscriptionContext) -> Self {
        let user_id = user_id.into();
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: user_id.clone(),
            user_id,
            audio_path,
            job_folder: None,
            context,
            status_message_id: None,
            created_at: Utc::now(),
            usage_record_id: None,
        }
    }

    /// Estimated processing time in seconds for a given realtime factor
    pub fn estimated_processing_seconds(&self, realtime_factor: f64) -> f64 {
        self.context.duration_seconds.max(0.0) * realtime_factor.max(0.0)
    }
}

/// Output of a provider. Built once and never mutated; routing metadata is attached by
/// consuming the value and returning a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: Option<String>,
    /// Wall-clock processing time in seconds
    pub processing_time: f64,
    /// Audio duration in seconds
    pub audio_duration: f64,
    /// processing_time / audio_duration
    pub realtime_factor: f64,
    pub provider_used: String,
    pub model_name: String,
    /// Non-fatal problem encountered while producing the text (e.g. failed chunks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by the router when the routing decision asks for LLM post-processing
    #[serde(default)]
    pub requires_refinement: bool,
}

impl TranscriptionResult {
    pub fn new<T, P, M>(
        text: T,
        language: Option<String>,
        processing_time: f64,
        audio_duration: f64,
        provider: P,
        model: M,
    ) -> Self
    where
        T: Into<String>,
        P: Into<String>,
        M: Into<String>,
    {
        let realtime_factor = if audio_duration > 0.0 {
            processing_time / audio_duration
        } else {
            0.0
        };
        Self {
            text: text.into(),
            language,
            processing_time,
            audio_duration,
            realtime_factor,
            provider_used: provider.into(),
            model_name: model.into(),
            error: None,
            requires_refinement: false,
        }
    }

    pub fn with_error<S: Into<String>>(mut self, error: S) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach the routing decision that produced this result. The model stays the one the
    /// provider actually used (it may have switched models for long audio).
    pub fn with_routing(mut self, provider: &str, requires_refinement: bool) -> Self {
        self.provider_used = provider.to_string();
        self.requires_refinement = requires_refinement;
        self
    }
}

/// What the queue worker hands back for a successfully processed request
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedTranscription {
    pub request_id: String,
    pub result: TranscriptionResult,
    /// Text delivered to the user (refined text, or the draft when refinement was skipped or failed)
    pub final_text: String,
    /// Whether `final_text` came out of a successful LLM pass
    pub refined: bool,
}

/// Response for an accepted transcription request
#[derive(Serialize)]
pub struct TranscriptionResponse {
    /// Job ID assigned to the transcription request
    pub job_id: String,
    /// URL to check the status of the transcription
    pub status_url: String,
    /// 1-based position in the queue at submission time
    pub queue_position: usize,
    /// Estimated seconds before processing starts
    pub estimated_wait_seconds: f64,
}

/// Error response for API
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Optional status information
    pub status: Option<String>,
}

/// Success response for API
#[derive(Serialize)]
pub struct SuccessResponse {
    /// Success flag
    pub success: bool,
    /// Message describing the successful operation
    pub message: String,
}

/// Status response for job status requests
#[derive(Serialize)]
pub struct StatusResponse {
    /// Current job status
    #[serde(flatten)]
    pub status: JobStatus,
    /// Position in the queue (1-based), if job is queued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    /// Estimated seconds before processing starts, if job is queued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_seconds: Option<f64>,
}

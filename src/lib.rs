// Transcription router library
//
// Routes voice recordings to local or remote speech-to-text providers through a pluggable
// strategy, refines long drafts with an LLM and delivers the text in chat-sized messages.
// A queue-based architecture serializes the work behind an HTTP front end.

pub mod app;
pub mod audio;
pub mod benchmark;
pub mod chunking;
pub mod config;
pub mod config_loader;
pub mod config_validator;
pub mod delivery;
pub mod error;
pub mod file_utils;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod queue_manager;
pub mod refinement;
pub mod router;
pub mod strategies;

// Re-export common types for easier access
pub use app::AppContext;
pub use config::AppConfig;
pub use error::HandlerError;
pub use metrics::Metrics;
pub use models::{TranscriptionContext, TranscriptionRequest, TranscriptionResult};
pub use orchestrator::TranscriptionOrchestrator;
pub use providers::{ProviderError, TranscriptionProvider};
pub use queue_manager::{JobProcessor, QueueManager};
pub use router::TranscriptionRouter;
pub use strategies::RoutingStrategy;

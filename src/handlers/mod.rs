// HTTP handlers for the transcription router
//
// The interface between HTTP requests and the transcription queue.

pub mod form;
pub mod routes;

// Re-export handlers for easier access
pub use self::routes::{
    api_status, cancel_transcription, chat_messages, configure, metrics_endpoint, transcribe, transcription_result,
    transcription_status,
};

// Transcription providers
//
// A provider is one transcription engine (the local whisper.cpp model, the OpenAI API).
// Providers are created once at startup, initialized by the registry and shared by every
// routing decision afterwards.

pub mod local;
pub mod openai;

use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::audio::AudioTools;
use crate::config::AppConfig;
use crate::models::{TranscriptionContext, TranscriptionResult};

pub use local::LocalWhisperProvider;
pub use openai::OpenAiProvider;

/// Errors raised by a provider while transcribing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Unsupported or corrupt audio: {0}")]
    UnsupportedFormat(String),

    #[error("Audio file exceeds the {limit} byte upload limit")]
    SizeExceeded { size: Option<u64>, limit: u64 },

    #[error("Audio of {duration:.0}s exceeds the {limit:.0}s limit and neither chunking nor model switching is enabled")]
    AudioTooLong { duration: f64, limit: f64 },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider '{0}' is not initialized")]
    NotInitialized(String),

    #[error("{0}")]
    Unknown(String),
}

impl ProviderError {
    /// Retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Network(_))
    }

    /// The error comes from a size or duration ceiling
    pub fn is_limit_error(&self) -> bool {
        matches!(
            self,
            ProviderError::SizeExceeded { .. }
                | ProviderError::AudioTooLong { .. }
        )
    }

    /// Another provider could plausibly succeed where this one failed.
    /// Corrupt input fails the same way everywhere.
    pub fn warrants_fallback(&self) -> bool {
        !matches!(self, ProviderError::UnsupportedFormat(_))
    }

    /// Message safe to show to the end user
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::UnsupportedFormat(_) => {
                "This audio format is not supported or the file is damaged. Please send a voice message or a common audio file (mp3, ogg, wav, m4a).".to_string()
            }
            ProviderError::SizeExceeded { limit, .. } => format!(
                "The file is too large for the transcription service (limit: {} MB). Please send a smaller file.",
                limit / (1024 * 1024)
            ),
            ProviderError::AudioTooLong { limit, .. } => format!(
                "The recording is too long to transcribe with the current settings (limit: {} min). Please send a shorter recording.",
                (limit / 60.0).floor()
            ),
            ProviderError::Authentication(_) => {
                "The transcription service is misconfigured. Please contact the administrator.".to_string()
            }
            ProviderError::Timeout(_) => {
                "The transcription service did not respond in time. Please try again later.".to_string()
            }
            ProviderError::Network(_) => {
                "The transcription service is temporarily unavailable. Please try again in a few minutes.".to_string()
            }
            ProviderError::NotInitialized(_) => {
                "No transcription engine is available right now. Please try again later.".to_string()
            }
            ProviderError::Unknown(_) => "Transcription failed unexpectedly. Please try again later.".to_string(),
        }
    }
}

/// Effective ceilings of a provider once its own chunking and model switching are taken into account
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProviderLimits {
    pub max_duration_seconds: Option<f64>,
    pub max_file_size: Option<u64>,
}

impl ProviderLimits {
    pub fn accepts(&self, duration_seconds: f64, file_size: Option<u64>) -> bool {
        let duration_ok = self
            .max_duration_seconds
            .map_or(true, |limit| duration_seconds <= limit);
        let size_ok = match (self.max_file_size, file_size) {
            (Some(limit), Some(size)) => size <= limit,
            _ => true,
        };
        duration_ok && size_ok
    }
}

/// One transcription engine
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Stable identifier used by routing ("local", "openai")
    fn name(&self) -> &str;

    /// Model used when the routing decision does not name one
    fn default_model(&self) -> &str;

    fn limits(&self) -> ProviderLimits {
        ProviderLimits::default()
    }

    /// Load models, build clients. Called once by the registry.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Transcribe one audio file. `model` overrides the default model for this call only.
    async fn transcribe(
        &self,
        audio_path: &Path,
        context: &TranscriptionContext,
        model: Option<&str>,
    ) -> Result<TranscriptionResult, ProviderError>;

    async fn shutdown(&self);

    async fn is_initialized(&self) -> bool;
}

/// Providers by name
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn TranscriptionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the providers enabled in the configuration
    pub fn from_config(config: &AppConfig, audio: &AudioTools) -> Self {
        let mut registry = Self::new();
        for name in &config.routing.providers {
            match name.as_str() {
                "local" => registry.register(Arc::new(LocalWhisperProvider::new(
                    config.local.clone(),
                    audio.clone(),
                ))),
                "openai" => registry.register(Arc::new(OpenAiProvider::new(
                    config.openai.clone(),
                    config.chunking.clone(),
                    audio.clone(),
                ))),
                other => warn!("Ignoring unknown transcription provider '{}'", other),
            }
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn TranscriptionProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TranscriptionProvider>> {
        self.providers.get(name).cloned()
    }

    /// Registered and initialized provider
    pub async fn get_ready(&self, name: &str) -> Option<Arc<dyn TranscriptionProvider>> {
        let provider = self.get(name)?;
        if provider.is_initialized().await {
            Some(provider)
        } else {
            None
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Initialize every provider. A provider that fails stays registered but not ready,
    /// so routing treats it as unavailable. Returns the failures.
    pub async fn initialize_all(&self) -> Vec<(String, ProviderError)> {
        let mut failures = Vec::new();
        for name in self.names() {
            let Some(provider) = self.get(&name) else {
                continue;
            };
            match provider.initialize().await {
                Ok(()) => info!("Provider '{}' initialized (model: {})", name, provider.default_model()),
                Err(e) => {
                    warn!("Provider '{}' failed to initialize: {}", name, e);
                    failures.push((name, e));
                }
            }
        }
        failures
    }

    pub async fn shutdown_all(&self) {
        for provider in self.providers.values() {
            provider.shutdown().await;
            info!("Provider '{}' shut down", provider.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::RwLock;

    struct StubProvider {
        name: &'static str,
        fail_init: bool,
        ready: RwLock<bool>,
    }

    #[async_trait]
    impl TranscriptionProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn default_model(&self) -> &str {
            "stub"
        }

        async fn initialize(&self) -> Result<(), ProviderError> {
            if self.fail_init {
                return Err(ProviderError::Authentication("no key".into()));
            }
            *self.ready.write().await = true;
            Ok(())
        }

        async fn transcribe(
            &self,
            _audio_path: &Path,
            context: &TranscriptionContext,
            _model: Option<&str>,
        ) -> Result<TranscriptionResult, ProviderError> {
            Ok(TranscriptionResult::new("ok", None, 0.1, context.duration_seconds, self.name, "stub"))
        }

        async fn shutdown(&self) {
            *self.ready.write().await = false;
        }

        async fn is_initialized(&self) -> bool {
            *self.ready.read().await
        }
    }

    #[tokio::test]
    async fn test_registry_only_returns_ready_providers() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider { name: "local", fail_init: false, ready: RwLock::new(false) }));
        registry.register(Arc::new(StubProvider { name: "openai", fail_init: true, ready: RwLock::new(false) }));

        assert!(registry.get_ready("local").await.is_none());

        let failures = registry.initialize_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "openai");

        assert!(registry.get_ready("local").await.is_some());
        assert!(registry.get_ready("openai").await.is_none());
        assert!(registry.get("openai").is_some());

        registry.shutdown_all().await;
        assert!(registry.get_ready("local").await.is_none());
    }

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::Timeout(30).is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(!ProviderError::Authentication("bad key".into()).is_transient());

        assert!(!ProviderError::UnsupportedFormat("moov atom not found".into()).warrants_fallback());
        assert!(ProviderError::Unknown("boom".into()).warrants_fallback());
        assert!(ProviderError::AudioTooLong { duration: 3000.0, limit: 1400.0 }.is_limit_error());
    }

    #[test]
    fn test_user_message_hides_internals() {
        let error = ProviderError::Authentication("sk-abc123 rejected".into());
        assert!(!error.user_message().contains("sk-abc123"));

        let error = ProviderError::AudioTooLong { duration: 3000.0, limit: 1400.0 };
        assert!(error.user_message().contains("23 min"));
    }

    #[test]
    fn test_limits_accept() {
        let limits = ProviderLimits { max_duration_seconds: Some(1400.0), max_file_size: Some(100) };
        assert!(limits.accepts(1400.0, Some(100)));
        assert!(!limits.accepts(1400.5, None));
        assert!(!limits.accepts(10.0, Some(101)));
        assert!(ProviderLimits::default().accepts(1e9, Some(u64::MAX)));
    }
}

// OpenAI transcription provider
//
// Sends audio to the `/audio/transcriptions` endpoint. The API caps uploads at 25 MiB and
// the gpt-4o transcribe models at roughly 1400 seconds of audio; longer or larger files
// are chunked, sent to a model without the duration cap, or rejected, depending on the
// chunking configuration.

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{ProviderError, ProviderLimits, TranscriptionProvider};
use crate::audio::AudioTools;
use crate::chunking::{plan_chunks, ChunkMode, ChunkTranscriber, ChunkedTranscription};
use crate::config::{ChunkingConfig, OpenAiConfig};
use crate::models::{TranscriptionContext, TranscriptionResult};

/// Duration ceiling of the gpt-4o transcribe family, in seconds
pub const GPT4O_DURATION_LIMIT: f64 = 1400.0;

/// Duration ceiling of `model`, None when the API imposes none
pub fn model_duration_limit(model: &str) -> Option<f64> {
    if model.starts_with("gpt-4o") {
        Some(GPT4O_DURATION_LIMIT)
    } else {
        None
    }
}

/// How a request is sent given its duration, size and the chunking settings
#[derive(Debug, Clone, PartialEq)]
pub enum LongAudioPlan {
    /// Send the file as is
    Direct,
    /// Send the file to a model without a duration ceiling
    SwitchModel { to: String },
    /// Split into chunks sent one request each
    Chunk,
    /// Too long, and neither chunking nor switching is allowed
    RejectDuration { limit: f64 },
    /// Too large for one upload, and chunking is disabled
    RejectSize { size: u64, limit: u64 },
}

/// Decide how to send `duration` seconds / `size` bytes of audio to `model`.
/// Chunking takes precedence over switching models.
pub fn plan_long_audio(
    duration: f64,
    size: u64,
    model: &str,
    max_file_size: u64,
    chunking: &ChunkingConfig,
) -> LongAudioPlan {
    let too_large = size > max_file_size;
    let duration_limit = model_duration_limit(model).filter(|limit| duration > *limit);

    match (duration_limit, too_large) {
        (None, false) => LongAudioPlan::Direct,
        _ if chunking.enabled => LongAudioPlan::Chunk,
        (_, true) => LongAudioPlan::RejectSize {
            size,
            limit: max_file_size,
        },
        (Some(limit), false) => {
            let switch_ok = model_duration_limit(&chunking.switch_model).map_or(true, |l| duration <= l);
            if chunking.auto_switch_model && switch_ok {
                LongAudioPlan::SwitchModel {
                    to: chunking.switch_model.clone(),
                }
            } else {
                LongAudioPlan::RejectDuration { limit }
            }
        }
    }
}

/// Map an API error status to a provider error
pub fn classify_status(status: u16, body: &str) -> ProviderError {
    let lowered = body.to_lowercase();
    let snippet: String = body.chars().take(300).collect();
    match status {
        401 | 403 => ProviderError::Authentication(format!("HTTP {}", status)),
        413 => ProviderError::SizeExceeded {
            size: None,
            limit: crate::config::defaults::MAX_FILE_SIZE,
        },
        408 | 429 | 500..=599 => ProviderError::Network(format!("HTTP {}: {}", status, snippet)),
        400 if lowered.contains("format") || lowered.contains("could not be decoded") => {
            ProviderError::UnsupportedFormat(snippet)
        }
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, snippet)),
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") | Some("oga") | Some("opus") => "audio/ogg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("webm") => "audio/webm",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

#[derive(Deserialize)]
struct TranscriptionBody {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

pub struct OpenAiProvider {
    config: OpenAiConfig,
    chunking: ChunkingConfig,
    audio: AudioTools,
    client: RwLock<Option<Client>>,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig, chunking: ChunkingConfig, audio: AudioTools) -> Self {
        Self {
            config,
            chunking,
            audio,
            client: RwLock::new(None),
        }
    }

    async fn client(&self) -> Result<Client, ProviderError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| ProviderError::NotInitialized("openai".into()))
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.config.base_url.trim_end_matches('/'))
    }

    fn chunk_mode(&self) -> ChunkMode {
        if self.chunking.parallel {
            ChunkMode::Parallel {
                max_concurrent: self.chunking.max_parallel,
            }
        } else {
            ChunkMode::Sequential {
                context_chars: self.chunking.context_chars,
            }
        }
    }

    async fn request(&self, call: &ApiCall<'_>, path: &Path, prompt: Option<&str>) -> Result<TranscriptionBody, ProviderError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ProviderError::Unknown(format!("cannot read {:?}: {}", path, e)))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))
            .map_err(|e| ProviderError::Unknown(format!("mime: {}", e)))?;

        let mut form = multipart::Form::new()
            .text("model", call.model.to_string())
            .text("response_format", "json")
            .part("file", part);
        if let Some(language) = call.language {
            form = form.text("language", language.to_string());
        }
        if let Some(prompt) = prompt {
            form = form.text("prompt", prompt.to_string());
        }

        debug!("Sending {:?} to {} (model {})", path, self.endpoint(), call.model);
        let response = call
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        response
            .json::<TranscriptionBody>()
            .await
            .map_err(|e| ProviderError::Unknown(format!("invalid response body: {}", e)))
    }

    fn classify_transport(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.config.timeout_secs)
        } else if error.is_connect() || error.is_request() {
            ProviderError::Network(error.to_string())
        } else {
            ProviderError::Unknown(error.to_string())
        }
    }
}

/// One API call configuration, shared by every chunk of a request
struct ApiCall<'a> {
    provider: &'a OpenAiProvider,
    client: &'a Client,
    model: &'a str,
    language: Option<&'a str>,
}

#[async_trait]
impl<'a> ChunkTranscriber for ApiCall<'a> {
    async fn transcribe_chunk(&self, chunk_path: &Path, prompt: Option<&str>) -> Result<String, ProviderError> {
        let body = self.provider.request(self, chunk_path, prompt).await?;
        Ok(body.text.trim().to_string())
    }
}

#[async_trait]
impl TranscriptionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    fn limits(&self) -> ProviderLimits {
        if self.chunking.enabled {
            return ProviderLimits::default();
        }
        let duration = if self.chunking.auto_switch_model {
            model_duration_limit(&self.chunking.switch_model)
        } else {
            model_duration_limit(&self.config.model)
        };
        ProviderLimits {
            max_duration_seconds: duration,
            max_file_size: Some(self.config.max_file_size),
        }
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::Authentication("OPENAI_API_KEY is not set".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Unknown(format!("cannot build HTTP client: {}", e)))?;
        *self.client.write().await = Some(client);
        info!(
            "OpenAI provider ready (model {}, chunking {}, auto switch {})",
            self.config.model, self.chunking.enabled, self.chunking.auto_switch_model
        );
        Ok(())
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        context: &TranscriptionContext,
        model: Option<&str>,
    ) -> Result<TranscriptionResult, ProviderError> {
        let client = self.client().await?;
        let requested_model = model.unwrap_or(&self.config.model);
        let size = tokio::fs::metadata(audio_path)
            .await
            .map_err(|e| ProviderError::Unknown(format!("cannot stat {:?}: {}", audio_path, e)))?
            .len();
        let started = Instant::now();
        let duration = context.duration_seconds;

        let plan = plan_long_audio(duration, size, requested_model, self.config.max_file_size, &self.chunking);
        // The switched model lives only in this call; the configured default is untouched
        let model_used = match &plan {
            LongAudioPlan::SwitchModel { to } => to.as_str(),
            _ => requested_model,
        };
        let call = ApiCall {
            provider: self,
            client: &client,
            model: model_used,
            language: context.language.as_deref(),
        };

        let (text, language, chunk_error) = match plan {
            LongAudioPlan::Direct => {
                let body = self.request(&call, audio_path, None).await?;
                (body.text.trim().to_string(), body.language, None)
            }
            LongAudioPlan::SwitchModel { ref to } => {
                info!(
                    "{:.0}s audio exceeds the {} limit, switching to {} for this request",
                    duration, requested_model, to
                );
                let body = self.request(&call, audio_path, None).await?;
                (body.text.trim().to_string(), body.language, None)
            }
            LongAudioPlan::Chunk => {
                let spans = plan_chunks(duration, self.chunking.chunk_size, self.chunking.overlap);
                let outcome = ChunkedTranscription::new(&self.audio, &call)
                    .run(audio_path, &spans, self.chunk_mode())
                    .await?;
                let chunk_error = (!outcome.failed_chunks.is_empty()).then(|| {
                    format!("{} of {} chunks failed", outcome.failed_chunks.len(), outcome.chunks)
                });
                (outcome.text, None, chunk_error)
            }
            LongAudioPlan::RejectDuration { limit } => {
                warn!("Rejecting {:.0}s audio for {} (limit {:.0}s)", duration, requested_model, limit);
                return Err(ProviderError::AudioTooLong { duration, limit });
            }
            LongAudioPlan::RejectSize { size, limit } => {
                return Err(ProviderError::SizeExceeded {
                    size: Some(size),
                    limit,
                });
            }
        };

        let language = language.or_else(|| context.language.clone());
        let result = TranscriptionResult::new(
            text,
            language,
            started.elapsed().as_secs_f64(),
            duration,
            "openai",
            model_used,
        );
        Ok(match chunk_error {
            Some(error) => result.with_error(error),
            None => result,
        })
    }

    async fn shutdown(&self) {
        self.client.write().await.take();
    }

    async fn is_initialized(&self) -> bool {
        self.client.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioConfig;

    fn chunking(enabled: bool, auto_switch: bool) -> ChunkingConfig {
        ChunkingConfig {
            enabled,
            chunk_size: 1200.0,
            overlap: 2.0,
            parallel: true,
            max_parallel: 3,
            context_chars: 200,
            auto_switch_model: auto_switch,
            switch_model: "whisper-1".into(),
        }
    }

    const LIMIT: u64 = 25 * 1024 * 1024;

    #[test]
    fn test_plan_long_audio() {
        let model = "gpt-4o-transcribe";
        assert_eq!(plan_long_audio(1400.0, 1000, model, LIMIT, &chunking(false, false)), LongAudioPlan::Direct);
        assert_eq!(plan_long_audio(1800.0, 1000, model, LIMIT, &chunking(true, true)), LongAudioPlan::Chunk);
        assert_eq!(
            plan_long_audio(1800.0, 1000, model, LIMIT, &chunking(false, true)),
            LongAudioPlan::SwitchModel { to: "whisper-1".into() }
        );
        assert_eq!(
            plan_long_audio(1800.0, 1000, model, LIMIT, &chunking(false, false)),
            LongAudioPlan::RejectDuration { limit: 1400.0 }
        );
        // whisper-1 has no duration ceiling
        assert_eq!(plan_long_audio(7200.0, 1000, "whisper-1", LIMIT, &chunking(false, false)), LongAudioPlan::Direct);
    }

    #[test]
    fn test_plan_oversized_upload() {
        assert_eq!(plan_long_audio(60.0, LIMIT + 1, "whisper-1", LIMIT, &chunking(true, false)), LongAudioPlan::Chunk);
        assert_eq!(
            plan_long_audio(60.0, LIMIT + 1, "whisper-1", LIMIT, &chunking(false, true)),
            LongAudioPlan::RejectSize { size: LIMIT + 1, limit: LIMIT }
        );
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(401, ""), ProviderError::Authentication(_)));
        assert!(matches!(classify_status(429, "slow down"), ProviderError::Network(_)));
        assert!(classify_status(503, "").is_transient());
        assert!(matches!(classify_status(413, ""), ProviderError::SizeExceeded { .. }));
        assert!(matches!(
            classify_status(400, "Invalid file format. Supported formats: ..."),
            ProviderError::UnsupportedFormat(_)
        ));
        assert!(matches!(classify_status(404, "no such model"), ProviderError::Unknown(_)));
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a.OGG")), "audio/ogg");
        assert_eq!(mime_for(Path::new("chunk_0001.mp3")), "audio/mpeg");
        assert_eq!(mime_for(Path::new("blob")), "application/octet-stream");
    }

    fn provider(api_key: &str, chunking_config: ChunkingConfig) -> OpenAiProvider {
        let audio = AudioTools::new(&AudioConfig {
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            subprocess_timeout_secs: 10,
        });
        OpenAiProvider::new(
            OpenAiConfig {
                api_key: api_key.into(),
                base_url: "http://127.0.0.1:9/v1/".into(),
                model: "gpt-4o-transcribe".into(),
                timeout_secs: 2,
                max_file_size: LIMIT,
            },
            chunking_config,
            audio,
        )
    }

    #[tokio::test]
    async fn test_initialize_requires_key() {
        let missing = provider("", chunking(false, false));
        assert!(matches!(missing.initialize().await, Err(ProviderError::Authentication(_))));
        assert!(!missing.is_initialized().await);

        let ready = provider("sk-test", chunking(false, false));
        ready.initialize().await.unwrap();
        assert!(ready.is_initialized().await);
        assert_eq!(ready.endpoint(), "http://127.0.0.1:9/v1/audio/transcriptions");
        ready.shutdown().await;
        assert!(!ready.is_initialized().await);
    }

    #[tokio::test]
    async fn test_too_long_audio_is_rejected_without_a_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.ogg");
        std::fs::write(&path, vec![0u8; 128]).unwrap();

        let openai = provider("sk-test", chunking(false, false));
        openai.initialize().await.unwrap();
        let error = openai
            .transcribe(&path, &TranscriptionContext::new(1800.0), None)
            .await
            .unwrap_err();
        assert_eq!(error, ProviderError::AudioTooLong { duration: 1800.0, limit: 1400.0 });
    }

    #[test]
    fn test_limits_reflect_configuration() {
        assert_eq!(provider("k", chunking(true, false)).limits(), ProviderLimits::default());
        assert_eq!(provider("k", chunking(false, true)).limits().max_duration_seconds, None);
        assert_eq!(
            provider("k", chunking(false, false)).limits().max_duration_seconds,
            Some(GPT4O_DURATION_LIMIT)
        );
    }
}

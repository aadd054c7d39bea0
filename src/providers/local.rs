// Local whisper.cpp provider
//
// Runs a GGML Whisper model on this machine. By default the whisper.cpp command line tool
// is driven as a subprocess; with the `local-whisper` feature the model is loaded
// in-process through whisper-rs. Input is always converted to 16 kHz mono WAV first.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};
#[cfg(not(feature = "local-whisper"))]
use {std::io, std::process::Stdio, std::time::Duration, tokio::process::Command};

use super::{ProviderError, TranscriptionProvider};
use crate::audio::AudioTools;
use crate::config::LocalConfig;
use crate::models::{TranscriptionContext, TranscriptionResult};

#[cfg(feature = "local-whisper")]
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Join the text lines whisper-cli prints with `-nt`, dropping blank lines
pub fn parse_cli_output(stdout: &str) -> String {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct LocalWhisperProvider {
    config: LocalConfig,
    audio: AudioTools,
    /// Bounds concurrent inferences to `config.workers`
    workers: Arc<Semaphore>,
    ready: RwLock<bool>,
    #[cfg(feature = "local-whisper")]
    context: RwLock<Option<Arc<WhisperContext>>>,
}

impl LocalWhisperProvider {
    pub fn new(config: LocalConfig, audio: AudioTools) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            config,
            audio,
            workers,
            ready: RwLock::new(false),
            #[cfg(feature = "local-whisper")]
            context: RwLock::new(None),
        }
    }

    #[cfg(not(feature = "local-whisper"))]
    async fn load_model(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    #[cfg(feature = "local-whisper")]
    async fn load_model(&self) -> Result<(), ProviderError> {
        let model_path = self.config.model_path.clone();
        let context = tokio::task::spawn_blocking(move || {
            WhisperContext::new_with_params(&model_path.to_string_lossy(), WhisperContextParameters::default())
                .map_err(|e| ProviderError::NotInitialized(format!("cannot load {}: {}", model_path.display(), e)))
        })
        .await
        .map_err(|e| ProviderError::Unknown(format!("model loading task failed: {}", e)))??;
        *self.context.write().await = Some(Arc::new(context));
        Ok(())
    }

    #[cfg(not(feature = "local-whisper"))]
    async fn infer(&self, wav: &Path, language: Option<&str>) -> Result<String, ProviderError> {
        let mut command = Command::new(&self.config.command);
        command
            .arg("-m")
            .arg(&self.config.model_path)
            .arg("-f")
            .arg(wav)
            .arg("-t")
            .arg(self.config.threads.to_string())
            .arg("-l")
            .arg(language.unwrap_or("auto"))
            .args(["-nt", "-np"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ProviderError::NotInitialized(format!("{} not found in PATH", self.config.command))
            }
            _ => ProviderError::Unknown(format!("failed to start {}: {}", self.config.command, e)),
        })?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ProviderError::Unknown(format!("{} failed: {}", self.config.command, e))),
            Err(_) => {
                warn!("{} exceeded {}s and was killed", self.config.command, self.config.timeout_secs);
                return Err(ProviderError::Timeout(self.config.timeout_secs));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(ProviderError::Unknown(format!("whisper.cpp exited with {}: {}", output.status, tail)));
        }
        Ok(parse_cli_output(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(feature = "local-whisper")]
    async fn infer(&self, wav: &Path, language: Option<&str>) -> Result<String, ProviderError> {
        let context = self
            .context
            .read()
            .await
            .clone()
            .ok_or_else(|| ProviderError::NotInitialized("local".into()))?;
        let samples = read_wav_samples(wav)?;
        let language = language.map(str::to_string);
        let threads = self.config.threads as i32;

        tokio::task::spawn_blocking(move || {
            let mut state = context
                .create_state()
                .map_err(|e| ProviderError::Unknown(format!("cannot create whisper state: {}", e)))?;
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_n_threads(threads);
            params.set_language(Some(language.as_deref().unwrap_or("auto")));
            params.set_translate(false);
            params.set_print_progress(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            state
                .full(params, &samples)
                .map_err(|e| ProviderError::Unknown(format!("whisper inference failed: {}", e)))?;

            let mut text = String::new();
            for i in 0..state.full_n_segments() {
                if let Some(segment) = state.get_segment(i) {
                    if let Ok(segment_text) = segment.to_str() {
                        text.push_str(segment_text);
                    }
                }
            }
            Ok(text.trim().to_string())
        })
        .await
        .map_err(|e| ProviderError::Unknown(format!("inference task failed: {}", e)))?
    }
}

/// 16 kHz mono WAV as f32 samples
#[cfg(feature = "local-whisper")]
fn read_wav_samples(path: &Path) -> Result<Vec<f32>, ProviderError> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| ProviderError::UnsupportedFormat(format!("cannot open {}: {}", path.display(), e)))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader.into_samples::<i32>().map(|s| s.unwrap_or(0) as f32 / max).collect()
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().map(|s| s.unwrap_or(0.0)).collect(),
    };
    Ok(samples)
}

#[async_trait]
impl TranscriptionProvider for LocalWhisperProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn default_model(&self) -> &str {
        &self.config.model_name
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        if !self.config.model_path.is_file() {
            return Err(ProviderError::NotInitialized(format!(
                "model file {} does not exist",
                self.config.model_path.display()
            )));
        }
        self.load_model().await?;
        *self.ready.write().await = true;
        info!(
            "Local whisper ready (model {}, {} threads, {} workers)",
            self.config.model_name, self.config.threads, self.config.workers
        );
        Ok(())
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        context: &TranscriptionContext,
        model: Option<&str>,
    ) -> Result<TranscriptionResult, ProviderError> {
        if !self.is_initialized().await {
            return Err(ProviderError::NotInitialized("local".into()));
        }
        if let Some(requested) = model.filter(|m| *m != self.config.model_name) {
            warn!(
                "Local provider has only model '{}' loaded, ignoring request for '{}'",
                self.config.model_name, requested
            );
        }

        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| ProviderError::NotInitialized("local".into()))?;
        let started = Instant::now();

        let workdir = tempfile::Builder::new()
            .prefix("local-whisper-")
            .tempdir()
            .map_err(|e| ProviderError::Unknown(format!("cannot create work folder: {}", e)))?;
        let wav = workdir.path().join("input.wav");
        self.audio.convert_to_wav(audio_path, &wav).await?;

        let text = self.infer(&wav, context.language.as_deref()).await?;
        let processing_time = started.elapsed().as_secs_f64();
        debug!(
            "Local transcription of {:?}: {} chars in {:.1}s",
            audio_path,
            text.len(),
            processing_time
        );

        Ok(TranscriptionResult::new(
            text,
            context.language.clone(),
            processing_time,
            context.duration_seconds,
            "local",
            self.config.model_name.as_str(),
        ))
    }

    async fn shutdown(&self) {
        *self.ready.write().await = false;
        #[cfg(feature = "local-whisper")]
        self.context.write().await.take();
    }

    async fn is_initialized(&self) -> bool {
        *self.ready.read().await
    }
}

// Transcription router configuration
//
// This module contains the configuration structures and defaults of the service.
// Values come from the environment (after config_loader has merged the TOML file into it)
// and fall back to the constants in `defaults`.

use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::strategies::ProviderSelection;

/// Default values for configuration
pub mod defaults {
    // HTTP server
    pub const SERVER_HOST: &str = "127.0.0.1";
    pub const SERVER_PORT: u16 = 8181;

    // Queue
    pub const MAX_QUEUE_SIZE: usize = 50;
    pub const MAX_CONCURRENT: usize = 1;
    pub const ESTIMATE_RTF: f64 = 0.3;
    pub const MAX_AUDIO_DURATION_SECONDS: f64 = 10_800.0;
    pub const RESULT_TTL_SECONDS: u64 = 3600;
    pub const CLEANUP_INTERVAL_SECONDS: u64 = 300;

    // Routing
    pub const PROVIDERS: &str = "local";
    pub const STRATEGY: &str = "single";
    pub const PRIMARY_PROVIDER: &str = "local";
    pub const HYBRID_SHORT_THRESHOLD: f64 = 20.0;
    pub const HYBRID_QUALITY: &str = "openai:gpt-4o-transcribe";
    pub const HYBRID_DRAFT: &str = "local:small";
    pub const REFINE_LONG_AUDIO: bool = true;

    // Chunking
    pub const ENABLE_CHUNKING: bool = false;
    pub const CHUNK_SIZE_SECONDS: f64 = 1200.0;
    pub const CHUNK_OVERLAP_SECONDS: f64 = 2.0;
    pub const ENABLE_PARALLEL_CHUNKS: bool = true;
    pub const MAX_PARALLEL_CHUNKS: usize = 3;
    pub const CHUNK_CONTEXT_CHARS: usize = 200;
    pub const AUTO_SWITCH_MODEL: bool = true;
    pub const SWITCH_MODEL: &str = "whisper-1";

    // OpenAI
    pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
    pub const OPENAI_MODEL: &str = "whisper-1";
    pub const API_TIMEOUT_SECONDS: u64 = 300;
    pub const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

    // Local whisper.cpp
    pub const LOCAL_WHISPER_CMD: &str = "whisper-cli";
    pub const LOCAL_MODEL_PATH: &str = "models/ggml-base.bin";
    pub const LOCAL_MODEL_NAME: &str = "base";

    // Audio tooling
    pub const FFMPEG_PATH: &str = "ffmpeg";
    pub const FFPROBE_PATH: &str = "ffprobe";
    pub const SUBPROCESS_TIMEOUT_SECONDS: u64 = 600;

    // LLM refinement
    pub const LLM_REFINEMENT_ENABLED: bool = false;
    pub const LLM_BASE_URL: &str = "https://api.deepseek.com/v1";
    pub const LLM_MODEL: &str = "deepseek-chat";
    pub const LLM_TEMPERATURE: f32 = 0.3;
    pub const LLM_MAX_TOKENS: u32 = 8000;
    pub const LLM_MAX_INPUT_CHARS: usize = 12_000;
    pub const LLM_TIMEOUT_SECONDS: u64 = 60;

    // HTTP handlers
    pub const TEMP_DIR: &str = "/tmp/transcription_router";
    pub const UPLOAD_LIMIT_BYTES: u64 = 200 * 1024 * 1024;
    pub const SYNC_REQUEST_TIMEOUT_SECONDS: u64 = 1800;
    pub const DEFAULT_SYNC_MODE: bool = false;
    pub const MESSAGE_LIMIT: usize = 4096;

    // Metrics
    pub const METRICS_BACKEND: &str = "prometheus";
}

/// Environment variable names
pub mod keys {
    pub const SERVER_HOST: &str = "SERVER_HOST";
    pub const SERVER_PORT: &str = "SERVER_PORT";

    pub const MAX_QUEUE_SIZE: &str = "MAX_QUEUE_SIZE";
    pub const MAX_CONCURRENT: &str = "MAX_CONCURRENT";
    pub const ESTIMATE_RTF: &str = "ESTIMATE_RTF";
    pub const MAX_AUDIO_DURATION_SECONDS: &str = "MAX_AUDIO_DURATION_SECONDS";
    pub const RESULT_TTL_SECONDS: &str = "RESULT_TTL_SECONDS";
    pub const CLEANUP_INTERVAL_SECONDS: &str = "CLEANUP_INTERVAL_SECONDS";

    pub const TRANSCRIPTION_PROVIDERS: &str = "TRANSCRIPTION_PROVIDERS";
    pub const TRANSCRIPTION_STRATEGY: &str = "TRANSCRIPTION_STRATEGY";
    pub const PRIMARY_PROVIDER: &str = "PRIMARY_PROVIDER";
    pub const PRIMARY_MODEL: &str = "PRIMARY_MODEL";
    pub const FALLBACK_PROVIDER: &str = "FALLBACK_PROVIDER";
    pub const HYBRID_SHORT_THRESHOLD: &str = "HYBRID_SHORT_THRESHOLD";
    pub const HYBRID_QUALITY: &str = "HYBRID_QUALITY";
    pub const HYBRID_DRAFT: &str = "HYBRID_DRAFT";
    pub const REFINE_LONG_AUDIO: &str = "REFINE_LONG_AUDIO";
    pub const BENCHMARK_TARGETS: &str = "BENCHMARK_TARGETS";
    pub const BENCHMARK_REPORT_DIR: &str = "BENCHMARK_REPORT_DIR";
    pub const BENCHMARK_REFERENCE_FILE: &str = "BENCHMARK_REFERENCE_FILE";

    pub const ENABLE_CHUNKING: &str = "ENABLE_CHUNKING";
    pub const CHUNK_SIZE_SECONDS: &str = "CHUNK_SIZE_SECONDS";
    pub const CHUNK_OVERLAP_SECONDS: &str = "CHUNK_OVERLAP_SECONDS";
    pub const ENABLE_PARALLEL_CHUNKS: &str = "ENABLE_PARALLEL_CHUNKS";
    pub const MAX_PARALLEL_CHUNKS: &str = "MAX_PARALLEL_CHUNKS";
    pub const CHUNK_CONTEXT_CHARS: &str = "CHUNK_CONTEXT_CHARS";
    pub const AUTO_SWITCH_MODEL: &str = "AUTO_SWITCH_MODEL";
    pub const SWITCH_MODEL: &str = "SWITCH_MODEL";

    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
    pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
    pub const API_TIMEOUT_SECONDS: &str = "API_TIMEOUT_SECONDS";
    pub const MAX_FILE_SIZE: &str = "MAX_FILE_SIZE";

    pub const LOCAL_WHISPER_CMD: &str = "LOCAL_WHISPER_CMD";
    pub const LOCAL_MODEL_PATH: &str = "LOCAL_MODEL_PATH";
    pub const LOCAL_MODEL_NAME: &str = "LOCAL_MODEL_NAME";
    pub const LOCAL_THREADS: &str = "LOCAL_THREADS";
    pub const LOCAL_WORKERS: &str = "LOCAL_WORKERS";

    pub const FFMPEG_PATH: &str = "FFMPEG_PATH";
    pub const FFPROBE_PATH: &str = "FFPROBE_PATH";
    pub const SUBPROCESS_TIMEOUT_SECONDS: &str = "SUBPROCESS_TIMEOUT_SECONDS";

    pub const LLM_REFINEMENT_ENABLED: &str = "LLM_REFINEMENT_ENABLED";
    pub const LLM_API_KEY: &str = "LLM_API_KEY";
    pub const LLM_BASE_URL: &str = "LLM_BASE_URL";
    pub const LLM_MODEL: &str = "LLM_MODEL";
    pub const LLM_TEMPERATURE: &str = "LLM_TEMPERATURE";
    pub const LLM_MAX_TOKENS: &str = "LLM_MAX_TOKENS";
    pub const LLM_MAX_INPUT_CHARS: &str = "LLM_MAX_INPUT_CHARS";
    pub const LLM_TIMEOUT_SECONDS: &str = "LLM_TIMEOUT_SECONDS";

    pub const TEMP_DIR: &str = "TRANSCRIPTION_TMP_FILES";
    pub const UPLOAD_LIMIT_BYTES: &str = "UPLOAD_LIMIT_BYTES";
    pub const SYNC_REQUEST_TIMEOUT_SECONDS: &str = "SYNC_REQUEST_TIMEOUT_SECONDS";
    pub const DEFAULT_SYNC_MODE: &str = "DEFAULT_SYNC_MODE";
    pub const MESSAGE_LIMIT: &str = "MESSAGE_LIMIT";

    pub const METRICS_BACKEND: &str = "METRICS_BACKEND";
}

/// HTTP server binding
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Admission and worker settings of the queue
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Pending requests allowed before admission is refused
    pub max_queue_size: usize,
    /// Requests processed at the same time
    pub max_concurrent: usize,
    /// Realtime factor used for wait estimates (processing seconds per audio second)
    pub estimate_rtf: f64,
    /// Requests longer than this are refused at enqueue time
    pub max_audio_duration: f64,
    /// How long finished results are kept for polling
    pub result_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

/// Strategy selection and its parameters
#[derive(Clone, Debug)]
pub struct RoutingConfig {
    /// Providers to construct ("local", "openai")
    pub providers: Vec<String>,
    /// single | fallback | hybrid | benchmark | structure
    pub strategy: String,
    pub primary: ProviderSelection,
    pub fallback_provider: Option<String>,
    /// Hybrid/structure duration split in seconds (inclusive on the short side)
    pub short_threshold: f64,
    pub quality: ProviderSelection,
    pub draft: ProviderSelection,
    pub refine_long_audio: bool,
    pub benchmark_targets: Vec<ProviderSelection>,
    pub benchmark_report_dir: Option<PathBuf>,
    pub benchmark_reference_file: Option<PathBuf>,
}

/// Long-audio handling for providers with ceilings
#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    pub enabled: bool,
    pub chunk_size: f64,
    pub overlap: f64,
    pub parallel: bool,
    pub max_parallel: usize,
    pub context_chars: usize,
    pub auto_switch_model: bool,
    /// Model without a duration ceiling used when switching
    pub switch_model: String,
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_file_size: u64,
}

#[derive(Clone, Debug)]
pub struct LocalConfig {
    pub command: String,
    pub model_path: PathBuf,
    pub model_name: String,
    /// Threads per inference
    pub threads: usize,
    /// Inferences allowed at once
    pub workers: usize,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AudioConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub subprocess_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_input_chars: usize,
    pub timeout_secs: u64,
}

/// Configuration for the HTTP handlers
#[derive(Clone, Debug)]
pub struct HandlerConfig {
    /// Directory to store uploaded files
    pub temp_dir: String,
    /// Largest accepted upload in bytes
    pub upload_limit: u64,
    /// Timeout in seconds for synchronous transcription requests
    pub sync_request_timeout: u64,
    /// Default processing mode (true = synchronous, false = asynchronous)
    pub default_sync_mode: bool,
    /// Maximum length of one outgoing chat message in characters
    pub message_limit: usize,
}

impl HandlerConfig {
    /// Ensures the temporary directory exists
    pub fn ensure_temp_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_dir)
    }
}

/// Configuration for metrics collection and export
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Type of metrics exporter ("prometheus", "none")
    pub exporter_type: String,
}

/// Complete service configuration
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub routing: RoutingConfig,
    pub chunking: ChunkingConfig,
    pub openai: OpenAiConfig,
    pub local: LocalConfig,
    pub audio: AudioConfig,
    pub llm: LlmConfig,
    pub handler: HandlerConfig,
    pub metrics: MetricsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AppConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Missing or unparsable values use the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let selection = |key: &str, default: &str| {
            get(key)
                .and_then(|v| parse_or_warn::<ProviderSelection>(key, &v))
                .unwrap_or_else(|| ProviderSelection::parse_or_default(default))
        };

        let providers = parse_list(&string(keys::TRANSCRIPTION_PROVIDERS, defaults::PROVIDERS));
        let primary_provider = string(keys::PRIMARY_PROVIDER, defaults::PRIMARY_PROVIDER);
        let physical = num_cpus::get_physical().max(1);

        Self {
            server: ServerConfig {
                host: string(keys::SERVER_HOST, defaults::SERVER_HOST),
                port: parsed(&get, keys::SERVER_PORT, defaults::SERVER_PORT),
            },
            queue: QueueConfig {
                max_queue_size: parsed(&get, keys::MAX_QUEUE_SIZE, defaults::MAX_QUEUE_SIZE),
                max_concurrent: parsed(&get, keys::MAX_CONCURRENT, defaults::MAX_CONCURRENT).max(1),
                estimate_rtf: parsed(&get, keys::ESTIMATE_RTF, defaults::ESTIMATE_RTF),
                max_audio_duration: parsed(
                    &get,
                    keys::MAX_AUDIO_DURATION_SECONDS,
                    defaults::MAX_AUDIO_DURATION_SECONDS,
                ),
                result_ttl_secs: parsed(&get, keys::RESULT_TTL_SECONDS, defaults::RESULT_TTL_SECONDS),
                cleanup_interval_secs: parsed(
                    &get,
                    keys::CLEANUP_INTERVAL_SECONDS,
                    defaults::CLEANUP_INTERVAL_SECONDS,
                )
                .max(1),
            },
            routing: RoutingConfig {
                providers,
                strategy: string(keys::TRANSCRIPTION_STRATEGY, defaults::STRATEGY).to_lowercase(),
                primary: ProviderSelection {
                    provider: primary_provider,
                    model: get(keys::PRIMARY_MODEL),
                },
                fallback_provider: get(keys::FALLBACK_PROVIDER),
                short_threshold: parsed(&get, keys::HYBRID_SHORT_THRESHOLD, defaults::HYBRID_SHORT_THRESHOLD),
                quality: selection(keys::HYBRID_QUALITY, defaults::HYBRID_QUALITY),
                draft: selection(keys::HYBRID_DRAFT, defaults::HYBRID_DRAFT),
                refine_long_audio: boolean(&get, keys::REFINE_LONG_AUDIO, defaults::REFINE_LONG_AUDIO),
                benchmark_targets: get(keys::BENCHMARK_TARGETS)
                    .map(|v| {
                        parse_list(&v)
                            .iter()
                            .filter_map(|item| parse_or_warn::<ProviderSelection>(keys::BENCHMARK_TARGETS, item))
                            .collect()
                    })
                    .unwrap_or_default(),
                benchmark_report_dir: get(keys::BENCHMARK_REPORT_DIR).map(PathBuf::from),
                benchmark_reference_file: get(keys::BENCHMARK_REFERENCE_FILE).map(PathBuf::from),
            },
            chunking: ChunkingConfig {
                enabled: boolean(&get, keys::ENABLE_CHUNKING, defaults::ENABLE_CHUNKING),
                chunk_size: parsed(&get, keys::CHUNK_SIZE_SECONDS, defaults::CHUNK_SIZE_SECONDS),
                overlap: parsed(&get, keys::CHUNK_OVERLAP_SECONDS, defaults::CHUNK_OVERLAP_SECONDS),
                parallel: boolean(&get, keys::ENABLE_PARALLEL_CHUNKS, defaults::ENABLE_PARALLEL_CHUNKS),
                max_parallel: parsed(&get, keys::MAX_PARALLEL_CHUNKS, defaults::MAX_PARALLEL_CHUNKS).max(1),
                context_chars: parsed(&get, keys::CHUNK_CONTEXT_CHARS, defaults::CHUNK_CONTEXT_CHARS),
                auto_switch_model: boolean(&get, keys::AUTO_SWITCH_MODEL, defaults::AUTO_SWITCH_MODEL),
                switch_model: string(keys::SWITCH_MODEL, defaults::SWITCH_MODEL),
            },
            openai: OpenAiConfig {
                api_key: get(keys::OPENAI_API_KEY).unwrap_or_default(),
                base_url: string(keys::OPENAI_BASE_URL, defaults::OPENAI_BASE_URL),
                model: string(keys::OPENAI_MODEL, defaults::OPENAI_MODEL),
                timeout_secs: parsed(&get, keys::API_TIMEOUT_SECONDS, defaults::API_TIMEOUT_SECONDS),
                max_file_size: parsed(&get, keys::MAX_FILE_SIZE, defaults::MAX_FILE_SIZE),
            },
            local: LocalConfig {
                command: string(keys::LOCAL_WHISPER_CMD, defaults::LOCAL_WHISPER_CMD),
                model_path: PathBuf::from(string(keys::LOCAL_MODEL_PATH, defaults::LOCAL_MODEL_PATH)),
                model_name: string(keys::LOCAL_MODEL_NAME, defaults::LOCAL_MODEL_NAME),
                threads: parsed(&get, keys::LOCAL_THREADS, physical).max(1),
                workers: parsed(&get, keys::LOCAL_WORKERS, (physical / 2).max(1)).max(1),
                timeout_secs: parsed(
                    &get,
                    keys::SUBPROCESS_TIMEOUT_SECONDS,
                    defaults::SUBPROCESS_TIMEOUT_SECONDS,
                ),
            },
            audio: AudioConfig {
                ffmpeg_path: string(keys::FFMPEG_PATH, defaults::FFMPEG_PATH),
                ffprobe_path: string(keys::FFPROBE_PATH, defaults::FFPROBE_PATH),
                subprocess_timeout_secs: parsed(
                    &get,
                    keys::SUBPROCESS_TIMEOUT_SECONDS,
                    defaults::SUBPROCESS_TIMEOUT_SECONDS,
                ),
            },
            llm: LlmConfig {
                enabled: boolean(&get, keys::LLM_REFINEMENT_ENABLED, defaults::LLM_REFINEMENT_ENABLED),
                api_key: get(keys::LLM_API_KEY).unwrap_or_default(),
                base_url: string(keys::LLM_BASE_URL, defaults::LLM_BASE_URL),
                model: string(keys::LLM_MODEL, defaults::LLM_MODEL),
                temperature: parsed(&get, keys::LLM_TEMPERATURE, defaults::LLM_TEMPERATURE),
                max_tokens: parsed(&get, keys::LLM_MAX_TOKENS, defaults::LLM_MAX_TOKENS),
                max_input_chars: parsed(&get, keys::LLM_MAX_INPUT_CHARS, defaults::LLM_MAX_INPUT_CHARS),
                timeout_secs: parsed(&get, keys::LLM_TIMEOUT_SECONDS, defaults::LLM_TIMEOUT_SECONDS),
            },
            handler: HandlerConfig {
                temp_dir: string(keys::TEMP_DIR, defaults::TEMP_DIR),
                upload_limit: parsed(&get, keys::UPLOAD_LIMIT_BYTES, defaults::UPLOAD_LIMIT_BYTES),
                sync_request_timeout: parsed(
                    &get,
                    keys::SYNC_REQUEST_TIMEOUT_SECONDS,
                    defaults::SYNC_REQUEST_TIMEOUT_SECONDS,
                ),
                default_sync_mode: boolean(&get, keys::DEFAULT_SYNC_MODE, defaults::DEFAULT_SYNC_MODE),
                message_limit: parsed(&get, keys::MESSAGE_LIMIT, defaults::MESSAGE_LIMIT).max(1),
            },
            metrics: MetricsConfig {
                exporter_type: string(keys::METRICS_BACKEND, defaults::METRICS_BACKEND).to_lowercase(),
            },
        }
    }
}

/// Represents the path to a job's files
#[derive(Debug, Clone)]
pub struct JobPaths {
    /// Unique folder for this job
    pub folder: PathBuf,
    /// Audio file path
    pub audio_file: PathBuf,
    /// Job ID (UUID)
    pub id: String,
}

/// Comma separated list, trimmed, lowercased, empty items dropped
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Boolean in any of the spellings accepted by the validator
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid value '{}' for {}", value, key);
            None
        }
    }
}

fn parsed<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| parse_or_warn(key, &v))
        .unwrap_or(default)
}

fn boolean<G>(get: &G, key: &str, default: bool) -> bool
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse_bool(&value).unwrap_or_else(|| {
            warn!("Ignoring invalid boolean '{}' for {}", value, key);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.routing.strategy, "single");
        assert_eq!(config.routing.providers, vec!["local".to_string()]);
        assert_eq!(config.queue.max_queue_size, defaults::MAX_QUEUE_SIZE);
        assert_eq!(config.chunking.chunk_size, 1200.0);
        assert_eq!(config.chunking.context_chars, 200);
        assert_eq!(config.routing.quality.provider, "openai");
        assert_eq!(config.routing.quality.model.as_deref(), Some("gpt-4o-transcribe"));
        assert_eq!(config.llm.base_url, "https://api.deepseek.com/v1");
        assert!(config.local.workers >= 1);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = config_from(&[
            ("TRANSCRIPTION_PROVIDERS", "OpenAI, local,"),
            ("TRANSCRIPTION_STRATEGY", "Hybrid"),
            ("ENABLE_CHUNKING", "yes"),
            ("MAX_QUEUE_SIZE", "not-a-number"),
            ("MAX_CONCURRENT", "0"),
            ("BENCHMARK_TARGETS", "openai:whisper-1, local"),
            ("HYBRID_SHORT_THRESHOLD", "30"),
        ]);
        assert_eq!(config.routing.providers, vec!["openai".to_string(), "local".to_string()]);
        assert_eq!(config.routing.strategy, "hybrid");
        assert!(config.chunking.enabled);
        assert_eq!(config.queue.max_queue_size, defaults::MAX_QUEUE_SIZE);
        assert_eq!(config.queue.max_concurrent, 1);
        assert_eq!(config.routing.short_threshold, 30.0);
        assert_eq!(config.routing.benchmark_targets.len(), 2);
        assert_eq!(config.routing.benchmark_targets[1].model, None);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

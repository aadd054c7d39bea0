// Configuration validation for the transcription router
//
// Schema-driven validation of every configuration parameter, run once at startup so a
// bad value stops the service with a clear message instead of surfacing mid-request.
// Every parameter is declared once in `CONFIG_PARAMS`; cross-parameter rules live in
// `ConfigValidator::validate_cross_dependencies`.

use std::env;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use log::{error, info, warn};

use crate::config::{keys, parse_bool, parse_list, AppConfig};
use crate::strategies::{build_strategy, ProviderSelection};

/// Providers this build knows how to construct
pub const KNOWN_PROVIDERS: &[&str] = &["local", "openai"];

const STRATEGIES: &[&str] = &["single", "fallback", "hybrid", "benchmark", "structure"];
const METRICS_BACKENDS: &[&str] = &["prometheus", "none", "disabled"];

/// Configuration parameter types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigType {
    String,
    UnsignedInteger,
    Boolean,
    Float,
    IpAddress,
    Port,
    FilePath,
    Enum(&'static [&'static str]),
    /// Comma separated list of provider names
    ProviderList,
    /// `provider` or `provider:model`
    Selection,
    /// Comma separated list of `provider[:model]`
    SelectionList,
}

/// Validation severity levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationLevel {
    Critical, // Must be valid for application to start
    Standard, // Important but application can start with defaults
    Warning,  // Optional, generates warnings only
}

/// Configuration parameter definition
#[derive(Debug, Clone)]
pub struct ConfigParam {
    pub name: &'static str,
    pub description: &'static str,
    pub param_type: ConfigType,
    pub default_value: Option<&'static str>,
    pub validation_level: ValidationLevel,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Value is a credential and is never echoed back
    pub secret: bool,
}

const fn param(
    name: &'static str,
    description: &'static str,
    param_type: ConfigType,
    default_value: Option<&'static str>,
    validation_level: ValidationLevel,
) -> ConfigParam {
    ConfigParam {
        name,
        description,
        param_type,
        default_value,
        validation_level,
        min: None,
        max: None,
        secret: false,
    }
}

const fn ranged(
    name: &'static str,
    description: &'static str,
    param_type: ConfigType,
    default_value: &'static str,
    min: f64,
    max: f64,
) -> ConfigParam {
    ConfigParam {
        name,
        description,
        param_type,
        default_value: Some(default_value),
        validation_level: ValidationLevel::Standard,
        min: Some(min),
        max: Some(max),
        secret: false,
    }
}

const fn secret(name: &'static str, description: &'static str) -> ConfigParam {
    ConfigParam {
        name,
        description,
        param_type: ConfigType::String,
        default_value: None,
        validation_level: ValidationLevel::Standard,
        min: None,
        max: None,
        secret: true,
    }
}

use ConfigType as T;
use ValidationLevel as L;

/// Centralized configuration parameter registry
pub const CONFIG_PARAMS: &[ConfigParam] = &[
    // Server
    param(keys::SERVER_HOST, "Host IP address for the API server", T::IpAddress, Some("\"127.0.0.1\""), L::Critical),
    param(keys::SERVER_PORT, "Port for the API server", T::Port, Some("8181"), L::Critical),
    // Queue
    ranged(keys::MAX_QUEUE_SIZE, "Pending requests accepted before admission is refused", T::UnsignedInteger, "50", 1.0, 10_000.0),
    ranged(keys::MAX_CONCURRENT, "Requests transcribed at the same time", T::UnsignedInteger, "1", 1.0, 64.0),
    ranged(keys::ESTIMATE_RTF, "Realtime factor used for wait estimates", T::Float, "0.3", 0.001, 100.0),
    ranged(keys::MAX_AUDIO_DURATION_SECONDS, "Longest accepted recording in seconds", T::Float, "10800", 1.0, 86_400.0),
    ranged(keys::RESULT_TTL_SECONDS, "How long finished results are kept for polling", T::UnsignedInteger, "3600", 1.0, 604_800.0),
    ranged(keys::CLEANUP_INTERVAL_SECONDS, "Interval of the expired result cleanup", T::UnsignedInteger, "300", 1.0, 86_400.0),
    // Routing
    param(keys::TRANSCRIPTION_PROVIDERS, "Enabled providers (comma separated: local, openai)", T::ProviderList, Some("\"local\""), L::Critical),
    param(keys::TRANSCRIPTION_STRATEGY, "Routing strategy", T::Enum(STRATEGIES), Some("\"single\""), L::Critical),
    param(keys::PRIMARY_PROVIDER, "Provider used by the single and fallback strategies", T::Enum(KNOWN_PROVIDERS), Some("\"local\""), L::Standard),
    param(keys::PRIMARY_MODEL, "Model of the primary provider (provider default when empty)", T::String, None, L::Warning),
    param(keys::FALLBACK_PROVIDER, "Provider tried once when the primary fails", T::Enum(KNOWN_PROVIDERS), None, L::Standard),
    ranged(keys::HYBRID_SHORT_THRESHOLD, "Recordings up to this many seconds take the quality path", T::Float, "20", 0.0, 86_400.0),
    param(keys::HYBRID_QUALITY, "Quality path of the hybrid strategy (provider:model)", T::Selection, Some("\"openai:gpt-4o-transcribe\""), L::Standard),
    param(keys::HYBRID_DRAFT, "Draft path of the hybrid strategy (provider:model)", T::Selection, Some("\"local:small\""), L::Standard),
    param(keys::REFINE_LONG_AUDIO, "Refine drafts of long recordings with the LLM", T::Boolean, Some("true"), L::Standard),
    param(keys::BENCHMARK_TARGETS, "Targets compared by the benchmark strategy (provider:model, ...)", T::SelectionList, None, L::Standard),
    param(keys::BENCHMARK_REPORT_DIR, "Directory receiving benchmark reports", T::String, None, L::Warning),
    param(keys::BENCHMARK_REFERENCE_FILE, "Reference transcript scoring benchmark quality", T::FilePath, None, L::Warning),
    // Chunking
    param(keys::ENABLE_CHUNKING, "Split recordings over the provider limit into chunks", T::Boolean, Some("false"), L::Standard),
    ranged(keys::CHUNK_SIZE_SECONDS, "Chunk length in seconds", T::Float, "1200", 30.0, 1400.0),
    ranged(keys::CHUNK_OVERLAP_SECONDS, "Overlap between consecutive chunks in seconds", T::Float, "2", 0.0, 60.0),
    param(keys::ENABLE_PARALLEL_CHUNKS, "Transcribe chunks concurrently instead of in sequence", T::Boolean, Some("true"), L::Standard),
    ranged(keys::MAX_PARALLEL_CHUNKS, "Chunks in flight at once in parallel mode", T::UnsignedInteger, "3", 1.0, 32.0),
    ranged(keys::CHUNK_CONTEXT_CHARS, "Characters of the previous chunk passed as prompt in sequential mode", T::UnsignedInteger, "200", 0.0, 2000.0),
    param(keys::AUTO_SWITCH_MODEL, "Switch to a model without duration limit for long recordings", T::Boolean, Some("true"), L::Standard),
    param(keys::SWITCH_MODEL, "Model used when switching", T::String, Some("\"whisper-1\""), L::Standard),
    // OpenAI
    secret(keys::OPENAI_API_KEY, "OpenAI API key"),
    param(keys::OPENAI_BASE_URL, "OpenAI compatible API base URL", T::String, Some("\"https://api.openai.com/v1\""), L::Standard),
    param(keys::OPENAI_MODEL, "Default OpenAI transcription model", T::String, Some("\"whisper-1\""), L::Standard),
    ranged(keys::API_TIMEOUT_SECONDS, "Timeout of one transcription API call", T::UnsignedInteger, "300", 1.0, 3600.0),
    ranged(keys::MAX_FILE_SIZE, "Largest file sent to the API in one request, in bytes", T::UnsignedInteger, "26214400", 1024.0, 1e10),
    // Local
    param(keys::LOCAL_WHISPER_CMD, "whisper.cpp command line binary", T::String, Some("\"whisper-cli\""), L::Standard),
    param(keys::LOCAL_MODEL_PATH, "GGML model file", T::FilePath, Some("\"models/ggml-base.bin\""), L::Warning),
    param(keys::LOCAL_MODEL_NAME, "Name reported for the local model", T::String, Some("\"base\""), L::Standard),
    ranged(keys::LOCAL_THREADS, "Threads per local inference", T::UnsignedInteger, "4", 1.0, 256.0),
    ranged(keys::LOCAL_WORKERS, "Local inferences allowed at once", T::UnsignedInteger, "1", 1.0, 64.0),
    // Audio tools
    param(keys::FFMPEG_PATH, "ffmpeg binary", T::String, Some("\"ffmpeg\""), L::Standard),
    param(keys::FFPROBE_PATH, "ffprobe binary", T::String, Some("\"ffprobe\""), L::Standard),
    ranged(keys::SUBPROCESS_TIMEOUT_SECONDS, "Timeout of every ffmpeg and whisper.cpp run", T::UnsignedInteger, "600", 1.0, 86_400.0),
    // LLM refinement
    param(keys::LLM_REFINEMENT_ENABLED, "Refine drafts with an LLM", T::Boolean, Some("false"), L::Standard),
    secret(keys::LLM_API_KEY, "LLM API key"),
    param(keys::LLM_BASE_URL, "OpenAI compatible chat API base URL", T::String, Some("\"https://api.deepseek.com/v1\""), L::Standard),
    param(keys::LLM_MODEL, "Chat model used for refinement", T::String, Some("\"deepseek-chat\""), L::Standard),
    ranged(keys::LLM_TEMPERATURE, "Sampling temperature of the refinement", T::Float, "0.3", 0.0, 2.0),
    ranged(keys::LLM_MAX_TOKENS, "Completion token budget", T::UnsignedInteger, "8000", 16.0, 128_000.0),
    ranged(keys::LLM_MAX_INPUT_CHARS, "Draft characters sent for refinement", T::UnsignedInteger, "12000", 100.0, 1_000_000.0),
    ranged(keys::LLM_TIMEOUT_SECONDS, "Timeout of one refinement call", T::UnsignedInteger, "60", 1.0, 3600.0),
    // HTTP front end
    param(keys::TEMP_DIR, "Directory for uploaded files", T::String, Some("\"/tmp/transcription_router\""), L::Standard),
    ranged(keys::UPLOAD_LIMIT_BYTES, "Largest accepted upload in bytes", T::UnsignedInteger, "209715200", 1024.0, 1e11),
    ranged(keys::SYNC_REQUEST_TIMEOUT_SECONDS, "Timeout of synchronous requests", T::UnsignedInteger, "1800", 1.0, 86_400.0),
    param(keys::DEFAULT_SYNC_MODE, "Default processing mode when 'sync' is missing", T::Boolean, Some("false"), L::Standard),
    ranged(keys::MESSAGE_LIMIT, "Longest chat message in characters", T::UnsignedInteger, "4096", 64.0, 65_536.0),
    // Metrics
    param(keys::METRICS_BACKEND, "Metrics backend", T::Enum(METRICS_BACKENDS), Some("\"prometheus\""), L::Standard),
];

/// Configuration validation errors with detailed context
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub error_type: ConfigErrorType,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigErrorType {
    InvalidValue,
    InvalidFormat,
    InvalidRange,
    FileNotFound,
    Required,
    Inconsistent,
}

impl ConfigValidationError {
    fn new(field: &str, value: &str, error_type: ConfigErrorType, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            error_type,
            message: message.into(),
            suggestion: None,
        }
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Configuration error in '{}' ({:?}): {} (value: '{}')",
            self.field, self.error_type, self.message, self.value
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " - Suggestion: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result type for configuration validation
pub type ValidationResult<T> = Result<T, ConfigValidationError>;

/// Configuration validation results
#[derive(Debug, Default)]
pub struct ValidationResults {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ConfigValidationError) {
        self.warnings.push(warning);
    }

    fn add(&mut self, level: ValidationLevel, error: ConfigValidationError) {
        match level {
            ValidationLevel::Critical | ValidationLevel::Standard => self.add_error(error),
            ValidationLevel::Warning => self.add_warning(error),
        }
    }

    pub fn print_summary(&self) {
        if !self.errors.is_empty() {
            error!("Configuration validation found {} error(s):", self.errors.len());
            for (i, err) in self.errors.iter().enumerate() {
                error!("  {}. {}", i + 1, err);
            }
        }

        if !self.warnings.is_empty() {
            warn!("Configuration validation found {} warning(s):", self.warnings.len());
            for (i, warning) in self.warnings.iter().enumerate() {
                warn!("  {}. {}", i + 1, warning);
            }
        }

        if self.is_valid() && self.warnings.is_empty() {
            info!("Configuration validation passed successfully");
        } else if self.is_valid() {
            info!("Configuration validation passed with {} warning(s)", self.warnings.len());
        }
    }
}

/// Helper functions for common validation patterns
pub mod validators {
    use super::*;

    pub fn validate_boolean(field: &str, value: &str) -> ValidationResult<bool> {
        parse_bool(value).ok_or_else(|| {
            ConfigValidationError::new(field, value, ConfigErrorType::InvalidValue, "Invalid boolean value")
                .suggest("Use 'true' or 'false'")
        })
    }

    /// Number within the optional inclusive range
    pub fn validate_number<N>(field: &str, value: &str, min: Option<f64>, max: Option<f64>) -> ValidationResult<N>
    where
        N: FromStr + Copy + Into<f64>,
    {
        let parsed = value.parse::<N>().map_err(|_| {
            ConfigValidationError::new(field, value, ConfigErrorType::InvalidFormat, "Invalid number format")
        })?;
        let as_f64: f64 = parsed.into();
        if let Some(min) = min.filter(|min| as_f64 < *min) {
            return Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidRange,
                format!("Value {} is below minimum {}", value, min),
            )
            .suggest(format!("Use a value >= {}", min)));
        }
        if let Some(max) = max.filter(|max| as_f64 > *max) {
            return Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidRange,
                format!("Value {} is above maximum {}", value, max),
            )
            .suggest(format!("Use a value <= {}", max)));
        }
        Ok(parsed)
    }

    pub fn validate_enum(field: &str, value: &str, valid_values: &[&str]) -> ValidationResult<String> {
        let lowered = value.to_lowercase();
        if valid_values.contains(&lowered.as_str()) {
            Ok(lowered)
        } else {
            Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidValue,
                format!("Invalid value, must be one of: {}", valid_values.join(", ")),
            ))
        }
    }

    pub fn validate_ip_address(field: &str, value: &str) -> ValidationResult<IpAddr> {
        IpAddr::from_str(value).map_err(|_| {
            ConfigValidationError::new(field, value, ConfigErrorType::InvalidFormat, "Invalid IP address format")
                .suggest("Use a valid IPv4 or IPv6 address (e.g., 127.0.0.1 or ::1)")
        })
    }

    pub fn validate_port(field: &str, value: &str) -> ValidationResult<u16> {
        match value.parse::<u16>() {
            Ok(0) => Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidRange,
                "Port number cannot be 0",
            )),
            Ok(port) => Ok(port),
            Err(_) => Err(
                ConfigValidationError::new(field, value, ConfigErrorType::InvalidFormat, "Invalid port number format")
                    .suggest("Use a number between 1 and 65535"),
            ),
        }
    }

    pub fn validate_file_exists(field: &str, value: &str) -> ValidationResult<()> {
        if Path::new(value).is_file() {
            Ok(())
        } else {
            Err(
                ConfigValidationError::new(field, value, ConfigErrorType::FileNotFound, "File does not exist")
                    .suggest("Ensure the file exists and the path is correct"),
            )
        }
    }

    pub fn validate_selection(field: &str, value: &str) -> ValidationResult<ProviderSelection> {
        let selection: ProviderSelection = value
            .parse()
            .map_err(|e: String| ConfigValidationError::new(field, value, ConfigErrorType::InvalidFormat, e))?;
        validate_enum(field, &selection.provider, KNOWN_PROVIDERS)?;
        Ok(selection)
    }
}

/// Comprehensive configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the process environment
    pub fn validate_env() -> ValidationResults {
        Self::validate(|key| env::var(key).ok())
    }

    /// Validate every parameter from `lookup`, then the cross-parameter rules
    pub fn validate<F>(lookup: F) -> ValidationResults
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut results = ValidationResults::new();
        info!("Starting configuration validation...");

        for param in CONFIG_PARAMS {
            let Some(value) = lookup(param.name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
                continue;
            };
            if let Err(mut error) = Self::validate_parameter(param, &value) {
                if param.secret {
                    error.value = "***".to_string();
                }
                results.add(param.validation_level, error);
            }
        }

        let config = AppConfig::from_lookup(&lookup);
        Self::validate_cross_dependencies(&mut results, &config);
        results
    }

    /// Validate a single parameter value
    fn validate_parameter(param: &ConfigParam, value: &str) -> ValidationResult<()> {
        use validators::*;
        match param.param_type {
            ConfigType::String => {}
            ConfigType::UnsignedInteger => {
                if value.parse::<u64>().is_err() {
                    return Err(ConfigValidationError::new(
                        param.name,
                        value,
                        ConfigErrorType::InvalidFormat,
                        "Invalid unsigned integer format",
                    )
                    .suggest("Use a valid positive integer number"));
                }
                validate_number::<f64>(param.name, value, param.min, param.max)?;
            }
            ConfigType::Float => {
                validate_number::<f64>(param.name, value, param.min, param.max)?;
            }
            ConfigType::Boolean => {
                validate_boolean(param.name, value)?;
            }
            ConfigType::IpAddress => {
                validate_ip_address(param.name, value)?;
            }
            ConfigType::Port => {
                validate_port(param.name, value)?;
            }
            ConfigType::FilePath => validate_file_exists(param.name, value)?,
            ConfigType::Enum(valid_values) => {
                validate_enum(param.name, value, valid_values)?;
            }
            ConfigType::ProviderList => {
                let providers = parse_list(value);
                if providers.is_empty() {
                    return Err(ConfigValidationError::new(
                        param.name,
                        value,
                        ConfigErrorType::Required,
                        "At least one provider must be enabled",
                    ));
                }
                for provider in providers {
                    validate_enum(param.name, &provider, KNOWN_PROVIDERS)?;
                }
            }
            ConfigType::Selection => {
                validate_selection(param.name, value)?;
            }
            ConfigType::SelectionList => {
                for item in parse_list(value) {
                    validate_selection(param.name, &item)?;
                }
            }
        }
        Ok(())
    }

    /// Validate cross-parameter dependencies
    fn validate_cross_dependencies(results: &mut ValidationResults, config: &AppConfig) {
        if config.chunking.overlap >= config.chunking.chunk_size {
            results.add_error(
                ConfigValidationError::new(
                    keys::CHUNK_OVERLAP_SECONDS,
                    &config.chunking.overlap.to_string(),
                    ConfigErrorType::Inconsistent,
                    "Chunk overlap must be smaller than the chunk size",
                )
                .suggest(format!("Use an overlap below {}", config.chunking.chunk_size)),
            );
        }

        if let Err(e) = build_strategy(&config.routing) {
            results.add_error(ConfigValidationError::new(
                keys::TRANSCRIPTION_STRATEGY,
                &config.routing.strategy,
                ConfigErrorType::Inconsistent,
                e.to_string(),
            ));
        }

        let enabled = |name: &str| config.routing.providers.iter().any(|p| p == name);
        if enabled("openai") && config.openai.api_key.is_empty() {
            results.add_error(
                ConfigValidationError::new(
                    keys::OPENAI_API_KEY,
                    "",
                    ConfigErrorType::Required,
                    "The openai provider is enabled but no API key is set",
                )
                .suggest("Set OPENAI_API_KEY or remove openai from TRANSCRIPTION_PROVIDERS"),
            );
        }

        if config.llm.enabled && config.llm.api_key.is_empty() {
            results.add_warning(
                ConfigValidationError::new(
                    keys::LLM_API_KEY,
                    "",
                    ConfigErrorType::Required,
                    "LLM refinement is enabled but no API key is set; drafts will be delivered unrefined",
                )
                .suggest("Set LLM_API_KEY"),
            );
        }

        if config.routing.refine_long_audio && !config.llm.enabled && config.routing.strategy == "hybrid" {
            results.add_warning(ConfigValidationError::new(
                keys::REFINE_LONG_AUDIO,
                "true",
                ConfigErrorType::Inconsistent,
                "Long recordings ask for refinement but LLM refinement is disabled",
            ));
        }
    }

    /// Generate a sample configuration file with all parameters and descriptions
    pub fn generate_sample_config() -> String {
        let mut output = String::new();
        output.push_str("# Transcription router configuration\n");
        output.push_str("# Environment variables take precedence over the values below\n");

        for param in CONFIG_PARAMS {
            output.push_str(&format!("\n# {}\n", param.description));
            match param.default_value {
                Some(default) => output.push_str(&format!("{} = {}\n", param.name, default)),
                None => output.push_str(&format!("# {} = \"\"\n", param.name)),
            }
        }
        output
    }
}

// Routing strategies
//
// A strategy decides, from the request context alone, which provider (and model) handles
// a request, whether a fallback is allowed and whether the text goes through LLM
// refinement afterwards. Strategies hold only configuration, so every decision is a pure
// function of (context, configuration).

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::config::RoutingConfig;
use crate::models::TranscriptionContext;

/// Provider name plus an optional model override
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProviderSelection {
    pub provider: String,
    pub model: Option<String>,
}

impl ProviderSelection {
    pub fn new<P: Into<String>>(provider: P) -> Self {
        Self {
            provider: provider.into(),
            model: None,
        }
    }

    pub fn with_model<P: Into<String>, M: Into<String>>(provider: P, model: M) -> Self {
        Self {
            provider: provider.into(),
            model: Some(model.into()),
        }
    }

    /// Parse a built-in default. Defaults are well formed, an empty one yields "local".
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| Self::new("local"))
    }
}

impl FromStr for ProviderSelection {
    type Err = String;

    /// `provider` or `provider:model`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (provider, model) = match s.split_once(':') {
            Some((provider, model)) => (provider.trim(), Some(model.trim())),
            None => (s, None),
        };
        if provider.is_empty() {
            return Err(format!("missing provider in '{}'", s));
        }
        Ok(Self {
            provider: provider.to_lowercase(),
            model: model.filter(|m| !m.is_empty()).map(str::to_string),
        })
    }
}

impl fmt::Display for ProviderSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}:{}", self.provider, model),
            None => f.write_str(&self.provider),
        }
    }
}

/// Routing policy
pub trait RoutingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select_provider(&self, context: &TranscriptionContext) -> ProviderSelection;

    fn supports_fallback(&self) -> bool {
        false
    }

    /// Provider to try after `failed_provider` failed. Never returns `failed_provider`.
    fn get_fallback(&self, _failed_provider: &str) -> Option<String> {
        None
    }

    fn requires_post_processing(&self, _context: &TranscriptionContext) -> bool {
        false
    }

    /// Targets to run side by side instead of a single selection
    fn fan_out_targets(&self, _context: &TranscriptionContext) -> Vec<ProviderSelection> {
        Vec::new()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum StrategyError {
    #[error("Unknown routing strategy '{0}' (expected single, fallback, hybrid, benchmark or structure)")]
    UnknownStrategy(String),

    #[error("Strategy '{strategy}' needs provider '{provider}', which is not enabled")]
    ProviderNotEnabled { strategy: String, provider: String },

    #[error("Strategy '{0}' needs at least one target")]
    NoTargets(String),
}

fn preferred<'a>(context: &'a TranscriptionContext, enabled: &[String]) -> Option<&'a str> {
    context
        .provider_preference
        .as_deref()
        .filter(|p| enabled.iter().any(|e| e == *p))
}

/// Always the same provider, no fallback
pub struct SingleProviderStrategy {
    selection: ProviderSelection,
    enabled: Vec<String>,
}

impl SingleProviderStrategy {
    pub fn new(selection: ProviderSelection, enabled: Vec<String>) -> Self {
        Self { selection, enabled }
    }
}

impl RoutingStrategy for SingleProviderStrategy {
    fn name(&self) -> &'static str {
        "single"
    }

    fn select_provider(&self, context: &TranscriptionContext) -> ProviderSelection {
        match preferred(context, &self.enabled) {
            Some(provider) if provider != self.selection.provider => ProviderSelection::new(provider),
            _ => self.selection.clone(),
        }
    }
}

/// Primary provider with one backup
pub struct FallbackStrategy {
    primary: ProviderSelection,
    fallback: String,
    enabled: Vec<String>,
}

impl FallbackStrategy {
    pub fn new(primary: ProviderSelection, fallback: String, enabled: Vec<String>) -> Self {
        Self {
            primary,
            fallback,
            enabled,
        }
    }
}

impl RoutingStrategy for FallbackStrategy {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn select_provider(&self, context: &TranscriptionContext) -> ProviderSelection {
        match preferred(context, &self.enabled) {
            Some(provider) if provider != self.primary.provider => ProviderSelection::new(provider),
            _ => self.primary.clone(),
        }
    }

    fn supports_fallback(&self) -> bool {
        true
    }

    fn get_fallback(&self, failed_provider: &str) -> Option<String> {
        if failed_provider != self.fallback {
            Some(self.fallback.clone())
        } else if failed_provider != self.primary.provider {
            Some(self.primary.provider.clone())
        } else {
            None
        }
    }
}

/// Short audio goes to the quality provider. Long audio gets a fast draft that is refined
/// by the LLM afterwards.
pub struct HybridStrategy {
    short_threshold: f64,
    quality: ProviderSelection,
    draft: ProviderSelection,
    refine_long_audio: bool,
    fallback: Option<String>,
}

impl HybridStrategy {
    pub fn new(
        short_threshold: f64,
        quality: ProviderSelection,
        draft: ProviderSelection,
        refine_long_audio: bool,
        fallback: Option<String>,
    ) -> Self {
        Self {
            short_threshold,
            quality,
            draft,
            refine_long_audio,
            fallback,
        }
    }

    fn is_short(&self, context: &TranscriptionContext) -> bool {
        context.duration_seconds <= self.short_threshold
    }
}

impl RoutingStrategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn select_provider(&self, context: &TranscriptionContext) -> ProviderSelection {
        if self.is_short(context) {
            self.quality.clone()
        } else {
            self.draft.clone()
        }
    }

    fn supports_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn get_fallback(&self, failed_provider: &str) -> Option<String> {
        self.fallback.clone().filter(|f| f != failed_provider)
    }

    fn requires_post_processing(&self, context: &TranscriptionContext) -> bool {
        self.refine_long_audio && !self.is_short(context)
    }
}

/// Runs every target and reports side by side
pub struct BenchmarkStrategy {
    targets: Vec<ProviderSelection>,
}

impl BenchmarkStrategy {
    pub fn new(targets: Vec<ProviderSelection>) -> Result<Self, StrategyError> {
        if targets.is_empty() {
            return Err(StrategyError::NoTargets("benchmark".into()));
        }
        Ok(Self { targets })
    }
}

impl RoutingStrategy for BenchmarkStrategy {
    fn name(&self) -> &'static str {
        "benchmark"
    }

    fn select_provider(&self, _context: &TranscriptionContext) -> ProviderSelection {
        self.targets[0].clone()
    }

    fn fan_out_targets(&self, _context: &TranscriptionContext) -> Vec<ProviderSelection> {
        self.targets.clone()
    }
}

/// Duration split like hybrid, but every transcript is structured by the LLM, and the
/// fallback is whichever other enabled provider comes first.
pub struct StructureStrategy {
    short_threshold: f64,
    short: ProviderSelection,
    long: ProviderSelection,
    enabled: Vec<String>,
}

impl StructureStrategy {
    pub fn new(
        short_threshold: f64,
        short: ProviderSelection,
        long: ProviderSelection,
        enabled: Vec<String>,
    ) -> Self {
        Self {
            short_threshold,
            short,
            long,
            enabled,
        }
    }
}

impl RoutingStrategy for StructureStrategy {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn select_provider(&self, context: &TranscriptionContext) -> ProviderSelection {
        if context.duration_seconds <= self.short_threshold {
            self.short.clone()
        } else {
            self.long.clone()
        }
    }

    fn supports_fallback(&self) -> bool {
        self.enabled.len() > 1
    }

    fn get_fallback(&self, failed_provider: &str) -> Option<String> {
        self.enabled.iter().find(|p| *p != failed_provider).cloned()
    }

    fn requires_post_processing(&self, _context: &TranscriptionContext) -> bool {
        true
    }
}

/// Build the configured strategy, checking that it only names enabled providers
pub fn build_strategy(config: &RoutingConfig) -> Result<Arc<dyn RoutingStrategy>, StrategyError> {
    let enabled = config.providers.clone();
    let require = |strategy: &str, provider: &str| {
        if enabled.iter().any(|e| e == provider) {
            Ok(())
        } else {
            Err(StrategyError::ProviderNotEnabled {
                strategy: strategy.to_string(),
                provider: provider.to_string(),
            })
        }
    };

    let strategy: Arc<dyn RoutingStrategy> = match config.strategy.as_str() {
        "single" => {
            require("single", &config.primary.provider)?;
            Arc::new(SingleProviderStrategy::new(config.primary.clone(), enabled.clone()))
        }
        "fallback" => {
            require("fallback", &config.primary.provider)?;
            let fallback = config
                .fallback_provider
                .clone()
                .or_else(|| enabled.iter().find(|p| **p != config.primary.provider).cloned())
                .ok_or_else(|| StrategyError::ProviderNotEnabled {
                    strategy: "fallback".into(),
                    provider: "<second provider>".into(),
                })?;
            require("fallback", &fallback)?;
            Arc::new(FallbackStrategy::new(config.primary.clone(), fallback, enabled.clone()))
        }
        "hybrid" => {
            require("hybrid", &config.quality.provider)?;
            require("hybrid", &config.draft.provider)?;
            if let Some(fallback) = &config.fallback_provider {
                require("hybrid", fallback)?;
            }
            Arc::new(HybridStrategy::new(
                config.short_threshold,
                config.quality.clone(),
                config.draft.clone(),
                config.refine_long_audio,
                config.fallback_provider.clone(),
            ))
        }
        "benchmark" => {
            for target in &config.benchmark_targets {
                require("benchmark", &target.provider)?;
            }
            let targets = if config.benchmark_targets.is_empty() {
                enabled.iter().map(ProviderSelection::new).collect()
            } else {
                config.benchmark_targets.clone()
            };
            Arc::new(BenchmarkStrategy::new(targets)?)
        }
        "structure" => {
            require("structure", &config.quality.provider)?;
            require("structure", &config.draft.provider)?;
            Arc::new(StructureStrategy::new(
                config.short_threshold,
                config.quality.clone(),
                config.draft.clone(),
                enabled.clone(),
            ))
        }
        other => return Err(StrategyError::UnknownStrategy(other.to_string())),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn routing(pairs: &[(&str, &str)]) -> RoutingConfig {
        let pairs: Vec<(String, String)> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(move |key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())).routing
    }

    fn hybrid() -> HybridStrategy {
        HybridStrategy::new(
            20.0,
            ProviderSelection::with_model("openai", "gpt-4o-transcribe"),
            ProviderSelection::with_model("local", "small"),
            true,
            None,
        )
    }

    #[test]
    fn test_selection_parsing() {
        let selection: ProviderSelection = "OpenAI:gpt-4o-transcribe".parse().unwrap();
        assert_eq!(selection, ProviderSelection::with_model("openai", "gpt-4o-transcribe"));
        assert_eq!("local".parse::<ProviderSelection>().unwrap(), ProviderSelection::new("local"));
        assert_eq!("local:".parse::<ProviderSelection>().unwrap().model, None);
        assert!(":whisper-1".parse::<ProviderSelection>().is_err());
        assert_eq!(selection.to_string(), "openai:gpt-4o-transcribe");
    }

    #[test]
    fn test_hybrid_threshold_is_inclusive() {
        let strategy = hybrid();
        let at = TranscriptionContext::new(20.0);
        let above = TranscriptionContext::new(20.01);

        assert_eq!(strategy.select_provider(&at).provider, "openai");
        assert!(!strategy.requires_post_processing(&at));

        let long = strategy.select_provider(&above);
        assert_eq!(long, ProviderSelection::with_model("local", "small"));
        assert!(strategy.requires_post_processing(&above));
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let strategy = hybrid();
        for duration in [0.5, 19.9, 20.0, 20.5, 1800.0] {
            let context = TranscriptionContext::new(duration);
            let first = strategy.select_provider(&context);
            for _ in 0..10 {
                assert_eq!(strategy.select_provider(&context), first);
                assert_eq!(
                    strategy.requires_post_processing(&context),
                    strategy.requires_post_processing(&context)
                );
            }
        }
    }

    #[test]
    fn test_fallback_never_returns_failed_provider() {
        let strategy = FallbackStrategy::new(
            ProviderSelection::new("openai"),
            "local".into(),
            vec!["openai".into(), "local".into()],
        );
        assert!(strategy.supports_fallback());
        assert_eq!(strategy.get_fallback("openai").as_deref(), Some("local"));
        assert_eq!(strategy.get_fallback("local").as_deref(), Some("openai"));

        let single = SingleProviderStrategy::new(ProviderSelection::new("local"), vec!["local".into()]);
        assert!(!single.supports_fallback());
        assert_eq!(single.get_fallback("local"), None);
    }

    #[test]
    fn test_preference_only_for_enabled_providers() {
        let strategy = SingleProviderStrategy::new(ProviderSelection::new("local"), vec!["local".into(), "openai".into()]);
        let context = TranscriptionContext::new(5.0).with_provider_preference("openai");
        assert_eq!(strategy.select_provider(&context).provider, "openai");

        let context = TranscriptionContext::new(5.0).with_provider_preference("azure");
        assert_eq!(strategy.select_provider(&context).provider, "local");
    }

    #[test]
    fn test_structure_auto_fallback() {
        let strategy = StructureStrategy::new(
            20.0,
            ProviderSelection::new("openai"),
            ProviderSelection::new("local"),
            vec!["openai".into(), "local".into()],
        );
        assert!(strategy.supports_fallback());
        assert_eq!(strategy.get_fallback("openai").as_deref(), Some("local"));
        assert_eq!(strategy.get_fallback("local").as_deref(), Some("openai"));
        assert!(strategy.requires_post_processing(&TranscriptionContext::new(3.0)));
    }

    #[test]
    fn test_build_strategy_checks_providers() {
        let config = routing(&[("TRANSCRIPTION_STRATEGY", "hybrid"), ("TRANSCRIPTION_PROVIDERS", "local")]);
        assert!(matches!(
            build_strategy(&config),
            Err(StrategyError::ProviderNotEnabled { provider, .. }) if provider == "openai"
        ));

        let config = routing(&[("TRANSCRIPTION_STRATEGY", "hybrid"), ("TRANSCRIPTION_PROVIDERS", "local,openai")]);
        assert_eq!(build_strategy(&config).unwrap().name(), "hybrid");

        let config = routing(&[("TRANSCRIPTION_STRATEGY", "roundrobin")]);
        assert!(matches!(build_strategy(&config), Err(StrategyError::UnknownStrategy(_))));

        let config = routing(&[
            ("TRANSCRIPTION_STRATEGY", "fallback"),
            ("TRANSCRIPTION_PROVIDERS", "openai,local"),
            ("PRIMARY_PROVIDER", "openai"),
        ]);
        let strategy = build_strategy(&config).unwrap();
        assert_eq!(strategy.get_fallback("openai").as_deref(), Some("local"));

        let config = routing(&[("TRANSCRIPTION_STRATEGY", "benchmark"), ("TRANSCRIPTION_PROVIDERS", "local,openai")]);
        let strategy = build_strategy(&config).unwrap();
        assert_eq!(strategy.fan_out_targets(&TranscriptionContext::new(1.0)).len(), 2);
    }
}

// LLM refinement
//
// Second pass over a draft transcript: punctuation, casing, paragraphing and obvious
// recognition errors are fixed by an OpenAI-compatible chat completion endpoint.
// Refinement is best effort: every failure ends with the draft being delivered as is.

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::LlmConfig;

const SYSTEM_PROMPT: &str = "You are an editor of speech-to-text transcripts. \
Fix punctuation, capitalization and obvious recognition errors, and split the text into \
paragraphs where the topic changes. Do not add, remove, translate or summarize content. \
Reply with the corrected text only, in the language of the transcript.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefinementFailure {
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("LLM refinement is disabled")]
    Disabled,
}

/// Turns a draft transcript into a refined one
#[async_trait]
pub trait TextRefiner: Send + Sync {
    async fn refine(&self, draft: &str) -> Result<String, RefinementFailure>;

    /// Longest input in characters accepted by `refine`, if bounded
    fn max_input_chars(&self) -> Option<usize> {
        None
    }
}

/// Text to deliver after a refinement attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementOutcome {
    pub text: String,
    pub refined: bool,
    pub duration: Duration,
    pub failure: Option<RefinementFailure>,
}

/// Run `refiner` over `draft`, returning the draft unchanged if refinement fails or
/// comes back empty
pub async fn refine_transcription(refiner: &dyn TextRefiner, draft: &str) -> RefinementOutcome {
    let started = Instant::now();
    if draft.trim().is_empty() {
        return RefinementOutcome {
            text: draft.to_string(),
            refined: false,
            duration: started.elapsed(),
            failure: None,
        };
    }

    let (head, rest) = match refiner.max_input_chars() {
        Some(max_chars) => split_for_refinement(draft.trim(), max_chars),
        None => (draft, ""),
    };
    if !rest.is_empty() {
        info!(
            "Draft exceeds the refinement input cap, refining the first {} of {} characters",
            head.chars().count(),
            draft.chars().count()
        );
    }

    let (text, refined, failure) = match refiner.refine(head).await {
        Ok(text) if !text.trim().is_empty() => (join_refined(text.trim(), rest), true, None),
        Ok(_) => {
            warn!("LLM returned an empty refinement, delivering the draft");
            let failure = RefinementFailure::InvalidResponse("empty completion".into());
            (draft.to_string(), false, Some(failure))
        }
        Err(e) => {
            warn!("Refinement failed, delivering the draft: {}", e);
            (draft.to_string(), false, Some(e))
        }
    };

    let duration = started.elapsed();
    debug!("Refinement finished in {:.2}s (refined: {})", duration.as_secs_f64(), refined);
    RefinementOutcome {
        text,
        refined,
        duration,
        failure,
    }
}

/// Split `text` into a head of at most `max_chars` characters, ending on a word boundary
/// when there is one, and the untouched remainder
pub fn split_for_refinement(text: &str, max_chars: usize) -> (&str, &str) {
    let head = truncate_chars(text, max_chars);
    if head.len() == text.len() {
        return (text, "");
    }
    let cut = if text[head.len()..].starts_with(char::is_whitespace) {
        head.len()
    } else {
        match head.rfind(char::is_whitespace) {
            Some(space) if space > 0 => space,
            _ => head.len(),
        }
    };
    (&text[..cut], &text[cut..])
}

fn join_refined(refined: &str, rest: &str) -> String {
    let rest = rest.trim();
    if rest.is_empty() {
        refined.to_string()
    } else {
        format!("{} {}", refined, rest)
    }
}

/// First `max_chars` characters of `text`
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Chat-completions client (DeepSeek by default, any OpenAI-compatible API works)
pub struct LlmRefiner {
    client: Client,
    config: LlmConfig,
}

impl LlmRefiner {
    pub fn new(config: LlmConfig) -> Result<Self, RefinementFailure> {
        if !config.enabled {
            return Err(RefinementFailure::Disabled);
        }
        if config.api_key.is_empty() {
            return Err(RefinementFailure::Api("missing LLM_API_KEY".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RefinementFailure::Api(e.to_string()))?;
        info!("LLM refinement enabled ({} at {})", config.model, config.base_url);
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextRefiner for LlmRefiner {
    fn max_input_chars(&self) -> Option<usize> {
        Some(self.config.max_input_chars.max(1))
    }

    async fn refine(&self, draft: &str) -> Result<String, RefinementFailure> {
        let input = truncate_chars(draft, self.config.max_input_chars.max(1));
        if input.len() < draft.len() {
            warn!(
                "Draft truncated to {} characters for refinement",
                self.config.max_input_chars
            );
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: input,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RefinementFailure::Timeout(self.config.timeout_secs)
                } else {
                    RefinementFailure::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefinementFailure::Api(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_chars(&body, 200)
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RefinementFailure::Timeout(self.config.timeout_secs)
            } else {
                RefinementFailure::InvalidResponse(e.to_string())
            }
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RefinementFailure::InvalidResponse("no choices in completion".into()))
    }
}

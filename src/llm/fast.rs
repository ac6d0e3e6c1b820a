//! Fast acknowledgment layer
//!
//! Produces a short spoken acknowledgment within ~200 ms of the transcript so
//! the user hears feedback while the main layer is still reasoning. A table
//! of patterns resolves most inputs synchronously; the small model is only
//! consulted when no pattern matches, under a hard 600 ms budget.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::style::{FeedbackLevel, VoiceStyle};
use crate::{Error, Result};

/// Budget for the small-model call; past this the canned fallback speaks
const ACK_MODEL_TIMEOUT: Duration = Duration::from_millis(600);

/// Transcripts shorter than this get no acknowledgment
const MIN_TRANSCRIPT_CHARS: usize = 5;

/// Spoken when the model path times out or returns garbage
const FALLBACK_TEXT: &str = "Got it, working on that.";

static SHORT_GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(hi|hey|hello|yes|no|ok|thanks|bye)[\s!?.]*$").expect("valid regex")
});

/// A resolved acknowledgment
#[derive(Debug, Clone, Deserialize)]
pub struct Acknowledgment {
    pub text: String,
    pub intent: String,
    #[serde(rename = "needsFollowUp", default = "default_true")]
    pub needs_followup: bool,
}

const fn default_true() -> bool {
    true
}

/// Gate: whether this transcript deserves a spoken acknowledgment at all
#[must_use]
pub fn needs_acknowledgment(transcript: &str, style: VoiceStyle) -> bool {
    if style.feedback() == FeedbackLevel::None {
        return false;
    }
    let trimmed = transcript.trim();
    if trimmed.len() < MIN_TRANSCRIPT_CHARS {
        return false;
    }
    !SHORT_GREETING.is_match(trimmed)
}

/// Ordered pattern table: domain keywords first, then question-word
/// prefixes, then imperative prefixes. First match wins.
struct AckPattern {
    matches: fn(&str) -> bool,
    text: &'static str,
    intent: &'static str,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn starts_with_any(haystack: &str, needles: &[&str]) -> bool {
    haystack
        .split_whitespace()
        .next()
        .is_some_and(|first| needles.contains(&first))
}

const PATTERNS: &[AckPattern] = &[
    AckPattern {
        matches: |t| contains_any(t, &["fleet", "ship", "armada"]),
        text: "Checking on your fleet now.",
        intent: "fleet",
    },
    AckPattern {
        matches: |t| contains_any(t, &["wallet", "balance", "funds"]),
        text: "Let me pull up your wallet.",
        intent: "wallet",
    },
    AckPattern {
        matches: |t| contains_any(t, &["market", "price", "trade"]),
        text: "Taking a look at the market.",
        intent: "market",
    },
    AckPattern {
        matches: |t| contains_any(t, &["help", "how do i"]),
        text: "Happy to help, one moment.",
        intent: "help",
    },
    AckPattern {
        matches: |t| {
            starts_with_any(
                t,
                &[
                    "who", "what", "when", "where", "why", "how", "can", "could", "would",
                    "should", "is", "are", "do", "does",
                ],
            )
        },
        text: "Good question, let me check.",
        intent: "question",
    },
    AckPattern {
        matches: |t| {
            starts_with_any(
                t,
                &[
                    "show", "tell", "find", "check", "get", "list", "open", "start", "stop",
                    "set", "send", "play",
                ],
            )
        },
        text: "On it.",
        intent: "command",
    },
];

/// Synchronous pattern fallback; microseconds, no model involved
#[must_use]
pub fn pattern_acknowledgment(transcript: &str) -> Option<Acknowledgment> {
    let lowered = transcript.trim().to_lowercase();
    PATTERNS
        .iter()
        .find(|p| (p.matches)(&lowered))
        .map(|p| Acknowledgment {
            text: p.text.to_string(),
            intent: p.intent.to_string(),
            needs_followup: true,
        })
}

/// Small-model endpoint: one constrained prompt, JSON-shaped reply
#[async_trait]
pub trait AckModel: Send + Sync {
    async fn acknowledge(&self, transcript: &str) -> Result<Acknowledgment>;
}

/// Resolve the acknowledgment for a transcript: gate, then patterns, then
/// the small model with a timeout, then the canned fallback. `None` means
/// this turn gets no acknowledgment.
pub async fn resolve_acknowledgment(
    transcript: &str,
    style: VoiceStyle,
    model: &dyn AckModel,
) -> Option<Acknowledgment> {
    if !needs_acknowledgment(transcript, style) {
        return None;
    }

    if let Some(ack) = pattern_acknowledgment(transcript) {
        return Some(ack);
    }

    match tokio::time::timeout(ACK_MODEL_TIMEOUT, model.acknowledge(transcript)).await {
        Ok(Ok(ack)) if !ack.text.trim().is_empty() => Some(ack),
        Ok(Ok(_)) | Ok(Err(_)) | Err(_) => Some(Acknowledgment {
            text: FALLBACK_TEXT.to_string(),
            intent: "fallback".to_string(),
            needs_followup: true,
        }),
    }
}

const ACK_SYSTEM_PROMPT: &str = "You write one short spoken acknowledgment (10 words or fewer) \
for a voice assistant that is still working on its real answer. Respond with only JSON: \
{\"text\": string, \"intent\": string, \"needsFollowUp\": bool}.";

#[derive(serde::Serialize)]
struct AckRequestBody<'a> {
    model: &'a str,
    messages: [serde_json::Value; 2],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct AckResponseBody {
    choices: Vec<AckChoice>,
}

#[derive(Deserialize)]
struct AckChoice {
    message: AckMessage,
}

#[derive(Deserialize)]
struct AckMessage {
    content: String,
}

/// HTTP client for the small-model endpoint
pub struct HttpAckModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpAckModel {
    #[must_use]
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }
}

#[async_trait]
impl AckModel for HttpAckModel {
    async fn acknowledge(&self, transcript: &str) -> Result<Acknowledgment> {
        let body = AckRequestBody {
            model: &self.model,
            messages: [
                serde_json::json!({"role": "system", "content": ACK_SYSTEM_PROMPT}),
                serde_json::json!({"role": "user", "content": transcript}),
            ],
            max_tokens: 64,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .timeout(ACK_MODEL_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Model(format!("ack request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Model(format!("ack model error {}", response.status())));
        }

        let parsed: AckResponseBody = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("invalid ack response: {e}")))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        serde_json::from_str(content)
            .map_err(|e| Error::Model(format!("ack reply was not the expected JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverAck;

    #[async_trait]
    impl AckModel for NeverAck {
        async fn acknowledge(&self, _transcript: &str) -> Result<Acknowledgment> {
            Err(Error::Model("unreachable in tests".into()))
        }
    }

    #[test]
    fn gate_rejects_short_and_greeting_transcripts() {
        assert!(!needs_acknowledgment("hi", VoiceStyle::Normal));
        assert!(!needs_acknowledgment("ok!", VoiceStyle::Normal));
        assert!(!needs_acknowledgment("Thanks.", VoiceStyle::Normal));
        assert!(!needs_acknowledgment("HELLO", VoiceStyle::Normal));
        assert!(needs_acknowledgment("check my fleet", VoiceStyle::Normal));
    }

    #[test]
    fn gate_respects_style_feedback() {
        assert!(!needs_acknowledgment("check my fleet", VoiceStyle::Concise));
        assert!(needs_acknowledgment("check my fleet", VoiceStyle::Immersive));
    }

    #[test]
    fn domain_keywords_win_over_prefixes() {
        // "check" is an imperative prefix, but "fleet" is a domain keyword
        // and domain rows come first in the table
        let ack = pattern_acknowledgment("check my fleet").unwrap();
        assert_eq!(ack.intent, "fleet");
        assert!(ack.text.contains("fleet"));
    }

    #[test]
    fn question_prefix_matches() {
        let ack = pattern_acknowledgment("What time is the next departure").unwrap();
        assert_eq!(ack.intent, "question");
    }

    #[test]
    fn imperative_prefix_matches() {
        let ack = pattern_acknowledgment("list my open contracts").unwrap();
        assert_eq!(ack.intent, "command");
    }

    #[test]
    fn unmatched_transcript_has_no_pattern() {
        assert!(pattern_acknowledgment("the weather seems nice today").is_none());
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_canned_phrase() {
        let ack = resolve_acknowledgment("the weather seems nice today", VoiceStyle::Normal, &NeverAck)
            .await
            .unwrap();
        assert_eq!(ack.text, FALLBACK_TEXT);
        assert!(ack.needs_followup);
    }

    #[tokio::test]
    async fn gated_transcript_resolves_to_none() {
        let ack = resolve_acknowledgment("hi", VoiceStyle::Normal, &NeverAck).await;
        assert!(ack.is_none());
    }

    #[tokio::test]
    async fn pattern_path_never_consults_model() {
        // NeverAck errors if called; a pattern hit must not reach it
        let ack = resolve_acknowledgment("check my fleet", VoiceStyle::Normal, &NeverAck)
            .await
            .unwrap();
        assert_eq!(ack.intent, "fleet");
    }
}

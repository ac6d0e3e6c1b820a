//! Configuration for the voice gateway
//!
//! All settings come from the environment; every variable has a default so a
//! bare `vox-gateway` starts against local services.

use std::path::PathBuf;

use crate::chunker::ChunkMode;
use crate::{Error, Result};

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket bind address (`VOICE_WS_ADDR`)
    pub ws_addr: String,

    /// Upstream service endpoints
    pub upstream: UpstreamConfig,

    /// Memory engine settings
    pub memory: MemoryConfig,

    /// Per-session limits and defaults
    pub session: SessionConfig,
}

/// Endpoints for the external collaborators (STT, TTS, LLMs, domain APIs)
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Speech-to-text service (`STT_ENDPOINT`)
    pub stt_endpoint: String,

    /// Text-to-speech service (`TTS_ENDPOINT`)
    pub tts_endpoint: String,

    /// Main (authoritative) model chat endpoint (`LLM_MAIN_ENDPOINT`)
    pub llm_main_endpoint: String,

    /// Small acknowledgment model endpoint (`LLM_FAST_ENDPOINT`)
    pub llm_fast_endpoint: String,

    /// Model identifier sent with main-layer requests (`LLM_MAIN_MODEL`)
    pub llm_main_model: String,

    /// Model identifier sent with fast-layer requests (`LLM_FAST_MODEL`)
    pub llm_fast_model: String,

    /// Base URL for domain lookups (wallet, fleet). Optional; the domain
    /// tools report unavailability when unset (`DOMAIN_API_ENDPOINT`)
    pub domain_api_endpoint: Option<String>,
}

/// Memory engine settings
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Path to the embedded store (`MEMORY_DB_PATH`)
    pub db_path: PathBuf,

    /// Conversation turn TTL in hours (`CONVERSATION_TTL_HOURS`)
    pub conversation_ttl_hours: u64,
}

/// Per-session limits and defaults
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum utterance length in seconds before the capture is rejected
    /// (`CAPTURE_MAX_SECONDS`)
    pub capture_max_seconds: u64,

    /// Bound of the per-session outbound frame queue
    /// (`OUTBOUND_QUEUE_CAPACITY`)
    pub outbound_queue_capacity: usize,

    /// Default text chunking mode for TTS segmentation
    /// (`CHUNK_MODE_DEFAULT`: `sentence` | `paragraph`)
    pub chunk_mode_default: ChunkMode,
}

impl Config {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but unparseable
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ws_addr: env_or("VOICE_WS_ADDR", "127.0.0.1:8790"),
            upstream: UpstreamConfig {
                stt_endpoint: env_or("STT_ENDPOINT", "http://127.0.0.1:8001/transcribe"),
                tts_endpoint: env_or("TTS_ENDPOINT", "http://127.0.0.1:8002/synthesize"),
                llm_main_endpoint: env_or(
                    "LLM_MAIN_ENDPOINT",
                    "http://127.0.0.1:8003/v1/chat/completions",
                ),
                llm_fast_endpoint: env_or(
                    "LLM_FAST_ENDPOINT",
                    "http://127.0.0.1:8004/v1/chat/completions",
                ),
                llm_main_model: env_or("LLM_MAIN_MODEL", "main-large"),
                llm_fast_model: env_or("LLM_FAST_MODEL", "ack-small"),
                domain_api_endpoint: std::env::var("DOMAIN_API_ENDPOINT").ok(),
            },
            memory: MemoryConfig {
                db_path: PathBuf::from(env_or("MEMORY_DB_PATH", "./vox.db")),
                conversation_ttl_hours: env_parse("CONVERSATION_TTL_HOURS", 48)?,
            },
            session: SessionConfig {
                capture_max_seconds: env_parse("CAPTURE_MAX_SECONDS", 60)?,
                outbound_queue_capacity: env_parse("OUTBOUND_QUEUE_CAPACITY", 64)?,
                chunk_mode_default: parse_chunk_mode(&env_or("CHUNK_MODE_DEFAULT", "sentence"))?,
            },
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_chunk_mode(raw: &str) -> Result<ChunkMode> {
    match raw {
        "sentence" => Ok(ChunkMode::Sentence),
        "paragraph" => Ok(ChunkMode::Paragraph),
        other => Err(Error::Config(format!(
            "CHUNK_MODE_DEFAULT must be 'sentence' or 'paragraph', got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // Touch only variables this test owns to avoid cross-test races
        let config = Config::from_env().unwrap();
        assert_eq!(config.memory.conversation_ttl_hours, 48);
        assert_eq!(config.session.capture_max_seconds, 60);
        assert_eq!(config.session.outbound_queue_capacity, 64);
        assert_eq!(config.session.chunk_mode_default, ChunkMode::Sentence);
    }

    #[test]
    fn chunk_mode_rejects_unknown() {
        assert!(parse_chunk_mode("sentence").is_ok());
        assert!(parse_chunk_mode("paragraph").is_ok());
        assert!(parse_chunk_mode("word").is_err());
    }
}

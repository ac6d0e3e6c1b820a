//! Text-to-speech adapter
//!
//! Accepts one chunker-sized text segment plus prosody parameters and streams
//! raw PCM back as it is synthesized. Chunks carry their sample rate so the
//! session can announce it before forwarding audio.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::style::Prosody;
use crate::{Error, Result};

/// Sample rate assumed when the service does not declare one
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// One streamed piece of synthesized audio: little-endian signed 16-bit
/// mono PCM at the declared rate
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub pcm: Bytes,
    pub sample_rate: u32,
}

/// Stream of synthesized audio chunks in generation order
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioChunk>> + Send>>;

/// Synthesizes speech from short text segments
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, prosody: Prosody) -> Result<AudioStream>;
}

#[derive(Serialize)]
struct SynthesizeBody<'a> {
    text: &'a str,
    exaggeration: f32,
    #[serde(rename = "speechRate")]
    speech_rate: f32,
}

/// HTTP synthesizer against the configured TTS endpoint
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSynthesizer {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, prosody: Prosody) -> Result<AudioStream> {
        tracing::debug!(chars = text.len(), "starting synthesis");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&SynthesizeBody {
                text,
                exaggeration: prosody.exaggeration,
                speech_rate: prosody.speech_rate,
            })
            .send()
            .await
            .map_err(|e| Error::Tts(format!("request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::UpstreamFatal(format!("TTS auth failure: {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let sample_rate = response
            .headers()
            .get("x-sample-rate")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SAMPLE_RATE);

        let stream = response.bytes_stream().map(move |item| {
            item.map(|pcm| AudioChunk { pcm, sample_rate })
                .map_err(|e| Error::Tts(format!("stream error: {e}")))
        });

        Ok(Box::pin(stream))
    }
}

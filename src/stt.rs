//! Speech-to-text adapter
//!
//! The gateway hands the adapter the whole PCM capture plus its declared
//! sample rate; any resampling is the adapter's problem. Transient upstream
//! failures are retried once with a short backoff before surfacing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{Error, Result};

/// Hard ceiling on a single transcription round-trip
const STT_TIMEOUT: Duration = Duration::from_secs(8);

/// Backoff before the single retry, capped well under the turn budget
const RETRY_BACKOFF: Duration = Duration::from_millis(300);

/// A finished transcription. `partials` is optional intermediate output;
/// only `text` drives the downstream pipeline.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub text: String,
    pub partials: Vec<String>,
}

/// Streams buffered PCM to a speech recognizer and yields a final transcript
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a complete utterance. An empty transcript is valid and
    /// means the utterance was silent.
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcript>;
}

/// Response from the transcription service
#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    partials: Vec<String>,
}

/// HTTP transcriber against the configured STT endpoint
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriber {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn request(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcript> {
        tracing::debug!(bytes = pcm.len(), sample_rate, "starting transcription");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("sample_rate", sample_rate.to_string())])
            .header("Content-Type", "application/octet-stream")
            .body(pcm.to_vec())
            .timeout(STT_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Stt(format!("request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::UpstreamFatal(format!("STT auth failure: {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("STT error {status}: {body}")));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| Error::Stt(format!("invalid STT response: {e}")))?;

        tracing::info!(transcript = %parsed.text, "transcription complete");
        Ok(Transcript {
            text: parsed.text,
            partials: parsed.partials,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcript> {
        match self.request(pcm, sample_rate).await {
            Ok(transcript) => Ok(transcript),
            // Auth and quota failures are not worth retrying
            Err(e @ Error::UpstreamFatal(_)) => Err(e),
            Err(first) => {
                tracing::warn!(error = %first, "transcription failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.request(pcm, sample_rate).await
            }
        }
    }
}

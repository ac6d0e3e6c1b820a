//! JSON fallback for clients that cannot use binary frames
//!
//! Message semantics are identical to the binary codec; types are identified
//! by a `"type"` string and audio payloads are base64-encoded. Retained for
//! environments that cannot set `binaryType=arraybuffer`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{ErrorPayload, Frame, MessageType, FLAG_IS_FINAL, FLAG_NEEDS_FOLLOWUP};
use crate::{Error, Result};

/// Client→server JSON messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    AudioStart {
        #[serde(rename = "sampleRate", default = "default_sample_rate")]
        sample_rate: u32,
        #[serde(default = "default_channels")]
        channels: u16,
    },
    AudioChunk {
        /// Base64-encoded PCM
        data: String,
    },
    AudioEnd,
    Synthesize {
        text: String,
        #[serde(default = "default_exaggeration")]
        exaggeration: f32,
        #[serde(rename = "speechRate", default = "default_speech_rate")]
        speech_rate: f32,
    },
    Ping,
}

const fn default_sample_rate() -> u32 {
    16_000
}

const fn default_channels() -> u16 {
    1
}

const fn default_exaggeration() -> f32 {
    0.5
}

const fn default_speech_rate() -> f32 {
    1.0
}

/// Server→client JSON messages
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready,
    Pong,
    Transcription {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
    },
    LlmChunk {
        text: String,
        #[serde(rename = "needsFollowup", skip_serializing_if = "std::ops::Not::not")]
        needs_followup: bool,
    },
    AudioStart {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
    },
    TtsAudio {
        /// Base64-encoded PCM
        data: String,
        #[serde(rename = "needsFollowup", skip_serializing_if = "std::ops::Not::not")]
        needs_followup: bool,
    },
    AudioEnd {
        #[serde(rename = "durationSeconds")]
        duration_seconds: f64,
    },
    Error {
        code: String,
        message: String,
    },
    Done,
}

/// Decode a client JSON message into the common frame representation
///
/// # Errors
///
/// Returns a protocol error on malformed JSON or invalid base64 audio
pub fn decode_client_text(text: &str) -> Result<Frame> {
    let event: ClientEvent = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("invalid JSON message: {e}")))?;

    let frame = match event {
        ClientEvent::AudioStart { sample_rate, channels } => {
            let meta = serde_json::to_vec(&super::AudioStartMeta { sample_rate, channels })?;
            Frame::new(MessageType::AudioStart, Bytes::from(meta))
        }
        ClientEvent::AudioChunk { data } => {
            let pcm = BASE64
                .decode(data.as_bytes())
                .map_err(|e| Error::Protocol(format!("invalid base64 audio: {e}")))?;
            Frame::new(MessageType::AudioChunk, Bytes::from(pcm))
        }
        ClientEvent::AudioEnd => Frame::new(MessageType::AudioEnd, Bytes::new()),
        ClientEvent::Synthesize { text, exaggeration, speech_rate } => {
            let payload = serde_json::to_vec(&super::SynthesizeRequest {
                text,
                exaggeration,
                speech_rate,
            })?;
            Frame::new(MessageType::Synthesize, Bytes::from(payload))
        }
        ClientEvent::Ping => Frame::new(MessageType::Ping, Bytes::new()),
    };

    Ok(frame)
}

/// Encode a server frame as a JSON fallback message
///
/// # Errors
///
/// Returns error if the frame payload cannot be re-read (malformed internal
/// frame), which indicates a bug upstream of the codec.
pub fn encode_server_frame(frame: &Frame) -> Result<String> {
    let event = match frame.kind {
        MessageType::Ready => ServerEvent::Ready,
        MessageType::Pong => ServerEvent::Pong,
        MessageType::Done => ServerEvent::Done,
        MessageType::Transcription => ServerEvent::Transcription {
            text: frame.text()?.to_string(),
            is_final: frame.flags & FLAG_IS_FINAL != 0,
        },
        MessageType::LlmChunk => ServerEvent::LlmChunk {
            text: frame.text()?.to_string(),
            needs_followup: frame.flags & FLAG_NEEDS_FOLLOWUP != 0,
        },
        MessageType::AudioStart => {
            let meta: super::AudioStartMeta = frame.json()?;
            ServerEvent::AudioStart { sample_rate: meta.sample_rate }
        }
        MessageType::TtsAudio => ServerEvent::TtsAudio {
            data: BASE64.encode(&frame.payload),
            needs_followup: frame.flags & FLAG_NEEDS_FOLLOWUP != 0,
        },
        MessageType::AudioEnd => {
            let meta: super::AudioEndMeta = frame
                .json()
                .unwrap_or(super::AudioEndMeta { duration_seconds: 0.0 });
            ServerEvent::AudioEnd { duration_seconds: meta.duration_seconds }
        }
        MessageType::Error => {
            let payload: ErrorPayload = frame.json()?;
            ServerEvent::Error {
                code: payload.code,
                message: payload.message,
            }
        }
        MessageType::AudioChunk | MessageType::Synthesize | MessageType::Ping => {
            return Err(Error::Internal(format!(
                "client-only frame {:?} cannot be encoded for output",
                frame.kind
            )));
        }
    };

    Ok(serde_json::to_string(&event)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_start_decodes_to_frame() {
        let frame =
            decode_client_text(r#"{"type":"audio_start","sampleRate":16000,"channels":1}"#)
                .unwrap();
        assert_eq!(frame.kind, MessageType::AudioStart);
        let meta: crate::protocol::AudioStartMeta = frame.json().unwrap();
        assert_eq!(meta.sample_rate, 16_000);
    }

    #[test]
    fn audio_chunk_base64_decodes() {
        let pcm = vec![0u8, 1, 2, 3];
        let msg = format!(
            r#"{{"type":"audio_chunk","data":"{}"}}"#,
            BASE64.encode(&pcm)
        );
        let frame = decode_client_text(&msg).unwrap();
        assert_eq!(frame.kind, MessageType::AudioChunk);
        assert_eq!(&frame.payload[..], &pcm[..]);
    }

    #[test]
    fn bad_base64_is_protocol_error() {
        let err = decode_client_text(r#"{"type":"audio_chunk","data":"!!!"}"#).unwrap_err();
        assert_eq!(err.wire_code(), "PROTOCOL");
    }

    #[test]
    fn unknown_type_is_protocol_error() {
        let err = decode_client_text(r#"{"type":"teleport"}"#).unwrap_err();
        assert_eq!(err.wire_code(), "PROTOCOL");
    }

    #[test]
    fn transcription_encodes_with_final_flag() {
        let frame = Frame::transcription("hello", true);
        let json = encode_server_frame(&frame).unwrap();
        assert!(json.contains(r#""type":"transcription""#));
        assert!(json.contains(r#""isFinal":true"#));
    }

    #[test]
    fn tts_audio_encodes_base64() {
        let frame = Frame::tts_audio(Bytes::from_static(&[1, 2, 3]), true);
        let json = encode_server_frame(&frame).unwrap();
        assert!(json.contains(r#""type":"tts_audio""#));
        assert!(json.contains(&BASE64.encode([1u8, 2, 3])));
        assert!(json.contains(r#""needsFollowup":true"#));
    }

    #[test]
    fn ping_roundtrip_to_pong() {
        let frame = decode_client_text(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame.kind, MessageType::Ping);
        let json = encode_server_frame(&Frame::pong()).unwrap();
        assert!(json.contains(r#""type":"pong""#));
    }

    #[test]
    fn synthesize_defaults_applied() {
        let frame = decode_client_text(r#"{"type":"synthesize","text":"hi there"}"#).unwrap();
        let req: crate::protocol::SynthesizeRequest = frame.json().unwrap();
        assert!((req.speech_rate - 1.0).abs() < f32::EPSILON);
    }
}

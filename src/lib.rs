//! Vox Gateway - voice-first conversational gateway
//!
//! Turns continuous microphone audio from a browser into spoken assistant
//! replies with sub-second time-to-first-audio:
//!
//! ```text
//! mic ──AUDIO_CHUNK──► Session ──► STT ──► transcript
//!                         │
//!                         ├─► fast layer ──► chunker ──► TTS ──┐ (queued first)
//!                         │                                    ▼
//!                         └─► main layer ──► chunker ──► TTS ──► TTS_AUDIO ──► speaker
//!                               (streaming + tools)
//! ```
//!
//! The fast layer speaks a short acknowledgment while the main model is
//! still reasoning; the session guarantees the acknowledgment's audio fully
//! precedes the answer's. A per-user knowledge graph with TTL'd conversation
//! history feeds each request's system prompt.

pub mod chunker;
pub mod config;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod stt;
pub mod style;
pub mod tools;
pub mod tts;

pub use chunker::{ChunkMode, ChunkerConfig, TextChunker};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use memory::MemoryHandle;
pub use session::{Services, Session, SessionOptions, SessionState};
pub use style::{Prosody, VoiceStyle};

//! Error types for the voice gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed frame, unknown message type, or out-of-contract client input
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Capture buffer exceeded the configured maximum duration
    #[error("capture too long: {0}")]
    CaptureTooLong(String),

    /// Declared sample rate outside the accepted range
    #[error("sample rate out of range: {0} Hz")]
    SampleRate(u32),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model error (fast or main layer)
    #[error("model error: {0}")]
    Model(String),

    /// Upstream authentication or quota failure; new turns may succeed later
    #[error("upstream fatal: {0}")]
    UpstreamFatal(String),

    /// Outbound queue stalled; the client is not draining audio
    #[error("slow client: {0}")]
    SlowClient(String),

    /// Memory engine error
    #[error("memory error: {0}")]
    Memory(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (task panic, closed channel)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire error code carried in the `ERROR` frame payload.
    ///
    /// Internal detail is collapsed to a coarse code so nothing sensitive
    /// leaks to the client.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "PROTOCOL",
            Self::CaptureTooLong(_) => "INPUT_TOO_LONG",
            Self::SampleRate(_) => "INPUT_SAMPLE_RATE",
            Self::Stt(_) | Self::Tts(_) | Self::Model(_) | Self::Http(_) => "UPSTREAM",
            Self::UpstreamFatal(_) => "UPSTREAM_FATAL",
            Self::SlowClient(_) => "SLOW_CLIENT",
            _ => "INTERNAL",
        }
    }

    /// Whether this error terminates the connection (close code 4002)
    /// rather than resetting the session to idle.
    #[must_use]
    pub const fn closes_connection(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_map_by_kind() {
        assert_eq!(Error::Protocol("bad frame".into()).wire_code(), "PROTOCOL");
        assert_eq!(Error::CaptureTooLong("61s".into()).wire_code(), "INPUT_TOO_LONG");
        assert_eq!(Error::SampleRate(96_000).wire_code(), "INPUT_SAMPLE_RATE");
        assert_eq!(Error::Stt("timeout".into()).wire_code(), "UPSTREAM");
        assert_eq!(Error::UpstreamFatal("quota".into()).wire_code(), "UPSTREAM_FATAL");
        assert_eq!(Error::SlowClient("stalled".into()).wire_code(), "SLOW_CLIENT");
        assert_eq!(Error::Internal("oops".into()).wire_code(), "INTERNAL");
    }

    #[test]
    fn only_protocol_errors_close_the_connection() {
        assert!(Error::Protocol("x".into()).closes_connection());
        assert!(!Error::Stt("x".into()).closes_connection());
        assert!(!Error::SlowClient("x".into()).closes_connection());
    }
}

//! Session state machine
//!
//! The orchestrator is the sole owner of transitions; this module keeps the
//! transition rules pure so they can be checked in isolation.

use std::fmt;

/// Per-connection session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, nothing in flight
    Idle,
    /// Capturing an utterance between `AUDIO_START` and `AUDIO_END`
    Listening,
    /// Utterance closed, transcription in flight
    Processing,
    /// Models are producing the answer; no audio sent yet
    Generating,
    /// Audio is streaming to the client
    Speaking,
    /// Terminal; socket closed
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Generating => "generating",
            Self::Speaking => "speaking",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Client opened a new utterance
    AudioStart,
    /// Client finished the utterance
    AudioEnd,
    /// A final transcript with content arrived
    SttFinal,
    /// The transcript was empty (silent utterance)
    SttEmpty,
    /// The first synthesized audio chunk is ready to send
    FirstAudio,
    /// The main stream ended and the audio queue drained
    TurnComplete,
    /// A stage failed; the session recovers to idle
    FatalError,
    /// The socket closed
    SocketClose,
}

impl SessionState {
    /// The state reached from `self` on `event`, or `None` when the event is
    /// not meaningful in this state (callers ignore those).
    #[must_use]
    pub fn next(self, event: SessionEvent) -> Option<Self> {
        use SessionEvent as E;

        match (self, event) {
            (_, E::SocketClose) => Some(Self::Closed),
            (Self::Closed, _) => None,
            (_, E::FatalError) => Some(Self::Idle),

            (Self::Idle, E::AudioStart) => Some(Self::Listening),
            // Barge-in during capture discards the old buffer and stays put
            (Self::Listening, E::AudioStart) => Some(Self::Listening),
            (Self::Listening, E::AudioEnd) => Some(Self::Processing),

            (Self::Processing, E::SttFinal) => Some(Self::Generating),
            (Self::Processing, E::SttEmpty) => Some(Self::Idle),

            (Self::Generating, E::FirstAudio) => Some(Self::Speaking),
            (Self::Generating | Self::Speaking, E::TurnComplete) => Some(Self::Idle),
            // Barge-in mid-turn: cancel and start listening again
            (Self::Generating | Self::Speaking, E::AudioStart) => Some(Self::Listening),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionEvent as E;
    use super::SessionState as S;

    #[test]
    fn happy_path_walks_the_full_cycle() {
        let mut state = S::Idle;
        for (event, expected) in [
            (E::AudioStart, S::Listening),
            (E::AudioEnd, S::Processing),
            (E::SttFinal, S::Generating),
            (E::FirstAudio, S::Speaking),
            (E::TurnComplete, S::Idle),
        ] {
            state = state.next(event).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn empty_utterance_short_circuits_to_idle() {
        let state = S::Processing.next(E::SttEmpty).unwrap();
        assert_eq!(state, S::Idle);
    }

    #[test]
    fn barge_in_during_capture_stays_listening() {
        assert_eq!(S::Listening.next(E::AudioStart), Some(S::Listening));
    }

    #[test]
    fn barge_in_mid_turn_returns_to_listening() {
        assert_eq!(S::Generating.next(E::AudioStart), Some(S::Listening));
        assert_eq!(S::Speaking.next(E::AudioStart), Some(S::Listening));
    }

    #[test]
    fn fatal_error_recovers_to_idle_from_anywhere() {
        for state in [S::Idle, S::Listening, S::Processing, S::Generating, S::Speaking] {
            assert_eq!(state.next(E::FatalError), Some(S::Idle));
        }
    }

    #[test]
    fn socket_close_is_terminal() {
        for state in [S::Idle, S::Listening, S::Processing, S::Generating, S::Speaking] {
            assert_eq!(state.next(E::SocketClose), Some(S::Closed));
        }
        assert_eq!(S::Closed.next(E::AudioStart), None);
        assert_eq!(S::Closed.next(E::FatalError), None);
    }

    #[test]
    fn audio_end_outside_listening_is_ignored() {
        assert_eq!(S::Idle.next(E::AudioEnd), None);
        assert_eq!(S::Speaking.next(E::AudioEnd), None);
    }
}

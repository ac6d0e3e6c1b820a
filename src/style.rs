//! Voice styles
//!
//! A style bundles a prompt modifier, prosody parameters for every TTS call
//! in the turn, and a feedback level that decides whether the fast
//! acknowledgment layer runs at all. The set is closed.

use serde::{Deserialize, Serialize};

/// Prosody parameters forwarded to the TTS adapter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prosody {
    /// Speech rate multiplier (1.0 = neutral)
    pub speech_rate: f32,
    /// Emotion exaggeration (0.0–1.0)
    pub exaggeration: f32,
}

/// How much spoken feedback the assistant gives beyond the answer itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackLevel {
    /// No acknowledgments; only the answer is spoken
    None,
    /// Short acknowledgment before the answer
    Minimal,
    /// Acknowledgment plus richer verbal cues
    Verbose,
}

/// The closed set of voice styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStyle {
    #[default]
    Normal,
    Formal,
    Concise,
    Immersive,
    Learning,
}

impl VoiceStyle {
    /// Parse a style name; unknown names fall back to `Normal`
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "formal" => Self::Formal,
            "concise" => Self::Concise,
            "immersive" => Self::Immersive,
            "learning" => Self::Learning,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Formal => "formal",
            Self::Concise => "concise",
            Self::Immersive => "immersive",
            Self::Learning => "learning",
        }
    }

    /// Prosody passed to every TTS call in a turn with this style
    #[must_use]
    pub const fn prosody(self) -> Prosody {
        match self {
            Self::Normal => Prosody { speech_rate: 1.0, exaggeration: 0.5 },
            Self::Formal => Prosody { speech_rate: 0.95, exaggeration: 0.3 },
            Self::Concise => Prosody { speech_rate: 1.1, exaggeration: 0.3 },
            Self::Immersive => Prosody { speech_rate: 1.0, exaggeration: 0.8 },
            Self::Learning => Prosody { speech_rate: 0.9, exaggeration: 0.5 },
        }
    }

    /// Feedback level; `None` disables the fast acknowledgment layer
    #[must_use]
    pub const fn feedback(self) -> FeedbackLevel {
        match self {
            Self::Normal | Self::Formal => FeedbackLevel::Minimal,
            Self::Concise => FeedbackLevel::None,
            Self::Immersive | Self::Learning => FeedbackLevel::Verbose,
        }
    }

    /// Text appended to the system prompt for this style
    #[must_use]
    pub const fn prompt_modifier(self) -> &'static str {
        match self {
            Self::Normal => "Speak naturally and conversationally. Keep answers tight enough to listen to.",
            Self::Formal => "Use a measured, professional register. No slang, no filler.",
            Self::Concise => "Answer in as few words as possible. One or two sentences, no preamble.",
            Self::Immersive => "Stay fully in character as the ship's operations officer. Use the vocabulary of the fleet.",
            Self::Learning => "Explain your reasoning step by step and define any term the listener might not know.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_falls_back_to_normal() {
        assert_eq!(VoiceStyle::from_name("normal"), VoiceStyle::Normal);
        assert_eq!(VoiceStyle::from_name("dramatic"), VoiceStyle::Normal);
        assert_eq!(VoiceStyle::from_name(""), VoiceStyle::Normal);
    }

    #[test]
    fn concise_disables_feedback() {
        assert_eq!(VoiceStyle::Concise.feedback(), FeedbackLevel::None);
        assert_ne!(VoiceStyle::Normal.feedback(), FeedbackLevel::None);
    }

    #[test]
    fn every_style_roundtrips_its_name() {
        for style in [
            VoiceStyle::Normal,
            VoiceStyle::Formal,
            VoiceStyle::Concise,
            VoiceStyle::Immersive,
            VoiceStyle::Learning,
        ] {
            assert_eq!(VoiceStyle::from_name(style.as_str()), style);
        }
    }
}

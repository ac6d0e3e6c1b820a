//! System prompt construction
//!
//! The prompt has three parts: a fixed persona preamble, a user-context
//! block rendered from the memory engine, and the voice-style modifier.
//! The build is pure: identical inputs produce identical prompts.

use crate::memory::{ConversationTurn, Entity};
use crate::style::VoiceStyle;

/// Most recently updated entities included in the context block
pub const CONTEXT_ENTITY_LIMIT: usize = 12;

/// Recent turns included in the context block
pub const CONTEXT_TURN_LIMIT: usize = 6;

/// Fixed persona and behavior preamble
const PERSONA_PREAMBLE: &str = "\
You are the voice of a starship operations assistant. You speak out loud, so \
answer the way a person would: short sentences, no markdown, no lists, no \
URLs. Use the memory tools to recall and record what you learn about the \
commander. When a domain lookup fails, say so plainly and move on.";

/// Everything the prompt builder needs from the memory engine
#[derive(Debug, Default)]
pub struct UserMemoryContext {
    /// Most recently updated entities, already bounded
    pub entities: Vec<Entity>,
    /// Prose summary, present only when fresh
    pub summary: Option<String>,
    /// Recent conversation turns, oldest first
    pub recent_turns: Vec<ConversationTurn>,
}

/// Build the full system prompt for a main-layer request
#[must_use]
pub fn build_system_prompt(context: &UserMemoryContext, style: VoiceStyle) -> String {
    let mut parts = vec![PERSONA_PREAMBLE.to_string()];

    let user_block = render_user_context(context);
    if !user_block.is_empty() {
        parts.push(format!("<user-context>\n{user_block}\n</user-context>"));
    }

    parts.push(style.prompt_modifier().to_string());

    parts.join("\n\n")
}

fn render_user_context(context: &UserMemoryContext) -> String {
    let mut sections = Vec::new();

    if let Some(summary) = &context.summary {
        if !summary.is_empty() {
            sections.push(summary.clone());
        }
    }

    if !context.entities.is_empty() {
        let lines: Vec<String> = context
            .entities
            .iter()
            .map(|entity| {
                if entity.observations.is_empty() {
                    format!("- {} ({})", entity.name, entity.entity_type.as_str())
                } else {
                    format!(
                        "- {} ({}): {}",
                        entity.name,
                        entity.entity_type.as_str(),
                        entity.observations.join("; ")
                    )
                }
            })
            .collect();
        sections.push(format!("Known entities:\n{}", lines.join("\n")));
    }

    if !context.recent_turns.is_empty() {
        let lines: Vec<String> = context
            .recent_turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role.as_str(), turn.content))
            .collect();
        sections.push(format!("Recent conversation:\n{}", lines.join("\n")));
    }

    sections.join("\n\n")
}

/// The user message for a turn. When an acknowledgment was already spoken,
/// the first line says so, so the model continues instead of re-greeting.
#[must_use]
pub fn prime_user_message(transcript: &str, acknowledged: bool) -> String {
    if acknowledged {
        format!(
            "(A brief spoken acknowledgment has already been given; continue \
             naturally without greeting or restating the request.)\n{transcript}"
        )
    } else {
        transcript.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{EntityType, TurnRole};

    fn sample_context() -> UserMemoryContext {
        UserMemoryContext {
            entities: vec![Entity {
                id: "e1".into(),
                name: "The Armada".into(),
                entity_type: EntityType::Fleet,
                observations: vec!["has 4 ships".into()],
                created_at: 1,
                updated_at: 2,
                user_edited: false,
            }],
            summary: Some("Alice commands a small trade fleet.".into()),
            recent_turns: vec![ConversationTurn {
                id: "t1".into(),
                user_id: "alice".into(),
                role: TurnRole::User,
                content: "where is my fleet".into(),
                created_at: 1,
                expires_at: 2,
            }],
        }
    }

    #[test]
    fn prompt_contains_all_three_parts() {
        let prompt = build_system_prompt(&sample_context(), VoiceStyle::Formal);

        assert!(prompt.contains("starship operations assistant"));
        assert!(prompt.contains("<user-context>"));
        assert!(prompt.contains("The Armada (fleet): has 4 ships"));
        assert!(prompt.contains("Alice commands a small trade fleet."));
        assert!(prompt.contains("user: where is my fleet"));
        assert!(prompt.contains(VoiceStyle::Formal.prompt_modifier()));
    }

    #[test]
    fn empty_context_omits_the_block() {
        let prompt = build_system_prompt(&UserMemoryContext::default(), VoiceStyle::Normal);
        assert!(!prompt.contains("<user-context>"));
    }

    #[test]
    fn build_is_deterministic() {
        let ctx = sample_context();
        let a = build_system_prompt(&ctx, VoiceStyle::Learning);
        let b = build_system_prompt(&ctx, VoiceStyle::Learning);
        assert_eq!(a, b);
    }

    #[test]
    fn priming_line_only_when_acknowledged() {
        let primed = prime_user_message("check my fleet", true);
        assert!(primed.starts_with("(A brief spoken acknowledgment"));
        assert!(primed.ends_with("check my fleet"));

        let plain = prime_user_message("check my fleet", false);
        assert_eq!(plain, "check my fleet");
    }
}

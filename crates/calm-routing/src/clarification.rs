use crate::validity::TurnInsufficiency;
use calm_core::{ConversationState, ExpectedInput, NextAction};
use serde::Deserialize;
use tracing::info;

pub const EMOTION_PROBE: &str = "I'd like to understand how you're feeling. Could you tell me a little more about what's on your mind right now?";
pub const ELABORATION_PROBE: &str =
    "Could you say a bit more? A sentence or two about what's going on would help me support you.";
pub const GENERIC_PROBE: &str =
    "I want to make sure I understand. Could you tell me more about what's happening?";
pub const CLOSING_FALLBACK: &str = "I'm not quite sure how best to help yet. Would you like some self-care resources, or would you prefer to talk to a professional?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClarificationConfig {
    pub max_attempts: u8,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Bounded retry loop for turns that cannot be routed yet.
#[derive(Debug, Clone, Default)]
pub struct ClarificationManager {
    config: ClarificationConfig,
}

impl ClarificationManager {
    pub fn new(config: ClarificationConfig) -> Self {
        Self { config }
    }

    /// Counts the attempt and asks again, or ends the loop once the attempt
    /// count reaches `max_attempts`.
    pub fn handle(
        &self,
        mut state: ConversationState,
        insufficiency: TurnInsufficiency,
    ) -> ConversationState {
        state.clarification_count = state.clarification_count.saturating_add(1);

        if state.clarification_count >= self.config.max_attempts.max(1) {
            info!(
                event = "clarification_cap_reached",
                attempts = state.clarification_count,
                max_attempts = self.config.max_attempts,
            );
            return state
                .with_action(NextAction::End)
                .with_output(CLOSING_FALLBACK);
        }

        let message = match insufficiency {
            TurnInsufficiency::TooShort => ELABORATION_PROBE,
            TurnInsufficiency::MissingEmotion => EMOTION_PROBE,
            TurnInsufficiency::VagueInput if state.detected_emotion.is_none() => EMOTION_PROBE,
            TurnInsufficiency::VagueInput => GENERIC_PROBE,
        };
        state
            .with_action(NextAction::WaitForInput(ExpectedInput::Clarification))
            .with_output(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_vague_turn_probes_for_feelings() {
        let manager = ClarificationManager::default();
        let state = manager.handle(
            ConversationState::new("u1").begin_turn("fine", 10),
            TurnInsufficiency::VagueInput,
        );
        assert_eq!(state.clarification_count, 1);
        assert_eq!(state.agent_output, EMOTION_PROBE);
        assert_eq!(state.expected_input(), Some(ExpectedInput::Clarification));
    }

    #[test]
    fn second_invalid_turn_ends_the_loop() {
        let manager = ClarificationManager::default();
        let state = ConversationState::new("u1");
        let state = manager.handle(state, TurnInsufficiency::VagueInput);
        let state = manager.handle(state, TurnInsufficiency::TooShort);
        assert_eq!(state.clarification_count, 2);
        assert_eq!(state.next_action, NextAction::End);
        assert_eq!(state.agent_output, CLOSING_FALLBACK);
        assert_eq!(state.expected_input(), None);

        let state = manager.handle(state, TurnInsufficiency::TooShort);
        assert_eq!(state.next_action, NextAction::End);
    }

    #[test]
    fn message_follows_diagnosis() {
        let manager = ClarificationManager::new(ClarificationConfig { max_attempts: 5 });
        let short = manager.handle(ConversationState::new("u1"), TurnInsufficiency::TooShort);
        assert_eq!(short.agent_output, ELABORATION_PROBE);

        let mut known = ConversationState::new("u1");
        known.detected_emotion = Some("stress".to_string());
        let vague = manager.handle(known, TurnInsufficiency::VagueInput);
        assert_eq!(vague.agent_output, GENERIC_PROBE);
    }
}

use crate::conversation::{
    AppointmentStage, ConversationState, ExpectedInput, NextAction, RouterTraceEntry,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub user_input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnResponse {
    pub agent_message: String,
    pub needs_clarification: bool,
    pub waiting_for_input: bool,
    pub expected_input: Option<String>,
    pub appointment_stage: Option<String>,
    pub emotion: Option<String>,
    pub suggestion: Option<String>,
    pub appointment_offer: Option<String>,
    pub appointment_status: Option<String>,
    pub router_trace: Vec<RouterTraceEntry>,
    pub crisis_response: Option<String>,
    pub next_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tailored_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast: Option<String>,
}

impl TurnResponse {
    pub fn from_state(state: &ConversationState) -> Self {
        let expected = state.expected_input();
        let stage = match state.appointment_stage {
            AppointmentStage::Initial => None,
            stage => Some(stage.as_str().to_string()),
        };
        Self {
            agent_message: state.agent_output.clone(),
            needs_clarification: expected == Some(ExpectedInput::Clarification),
            waiting_for_input: matches!(state.next_action, NextAction::WaitForInput(_)),
            expected_input: expected.map(|tag| tag.as_str().to_string()),
            appointment_stage: stage,
            emotion: state.detected_emotion.clone(),
            suggestion: state.suggestion.clone(),
            appointment_offer: state.booking.appointment_offer.clone(),
            appointment_status: state.booking.appointment_status.clone(),
            router_trace: state.router_trace.clone(),
            crisis_response: state.crisis_response.clone(),
            next_action: state.next_action.as_str().to_string(),
            tailored_prompt: state.tailored_prompt.clone(),
            forecast: state.forecast.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clarification_wait_sets_both_flags() {
        let state = ConversationState::new("u1")
            .with_action(NextAction::WaitForInput(ExpectedInput::Clarification))
            .with_output("Could you tell me more?");
        let response = TurnResponse::from_state(&state);
        assert!(response.needs_clarification);
        assert!(response.waiting_for_input);
        assert_eq!(response.expected_input.as_deref(), Some("clarification"));
        assert_eq!(response.next_action, "wait_for_input");
        assert_eq!(response.appointment_stage, None);
    }

    #[test]
    fn serialized_response_uses_wire_field_names() {
        let mut state = ConversationState::new("u1").with_action(NextAction::Crisis);
        state.appointment_stage = AppointmentStage::OfferPending;
        state.crisis_response = Some("help".to_string());
        let value = serde_json::to_value(TurnResponse::from_state(&state)).expect("serialize");
        assert_eq!(value["next_action"], "crisis");
        assert_eq!(value["appointment_stage"], "offer_pending");
        assert_eq!(value["crisis_response"], "help");
        assert!(value["expected_input"].is_null());
        assert!(value.get("forecast").is_none());
    }

    #[test]
    fn request_user_id_is_optional() {
        let request: TurnRequest =
            serde_json::from_str(r#"{"user_input":"hello"}"#).expect("deserialize");
        assert_eq!(request.user_id, None);
        assert_eq!(request.user_input, "hello");
    }
}

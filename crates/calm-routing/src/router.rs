use crate::crisis::{CrisisGate, DEFAULT_CRISIS_PHRASES};
use crate::validity::{TurnInsufficiency, TurnValidator};
use calm_core::{ConversationState, RouteDecision, RouteReason, RouterTraceEntry};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub min_input_chars: usize,
    pub vague_inputs: Vec<String>,
    pub vague_emotions: Vec<String>,
    pub therapy_keywords: Vec<String>,
    pub high_risk_emotions: Vec<String>,
    pub crisis_phrases: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_input_chars: 3,
            vague_inputs: to_strings(&[
                "fine",
                "idk",
                "whatever",
                "ok",
                "okay",
                "nothing",
                "dunno",
                "i don't know",
                "meh",
                "not sure",
                "nm",
            ]),
            vague_emotions: to_strings(&["", "neutral", "unknown"]),
            therapy_keywords: to_strings(&[
                "therapist",
                "therapy",
                "appointment",
                "counseling",
                "counselling",
                "counsellor",
                "counselor",
                "psychologist",
                "book a session",
            ]),
            high_risk_emotions: to_strings(&[
                "anxiety",
                "depression",
                "grief",
                "loneliness",
                "stress",
                "trauma",
            ]),
            crisis_phrases: to_strings(DEFAULT_CRISIS_PHRASES),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub decision: RouteDecision,
    pub reason: RouteReason,
    pub insufficiency: Option<TurnInsufficiency>,
    pub matched: Vec<String>,
}

impl RouteOutcome {
    fn new(decision: RouteDecision, reason: RouteReason) -> Self {
        Self {
            decision,
            reason,
            insufficiency: None,
            matched: Vec::new(),
        }
    }

    fn matched(mut self, matched: Vec<String>) -> Self {
        self.matched = matched;
        self
    }
}

/// Priority-ordered turn router.
///
/// Replies to a pending booking question skip the validity check, since
/// "2" or "yes" are complete answers there; crisis language still wins.
pub struct IntentRouter {
    crisis: CrisisGate,
    validator: TurnValidator,
    therapy_keywords: Vec<String>,
    high_risk_emotions: Vec<String>,
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new(&RouterConfig::default())
    }
}

impl IntentRouter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            crisis: CrisisGate::new(&config.crisis_phrases),
            validator: TurnValidator::new(
                config.min_input_chars,
                &config.vague_inputs,
                &config.vague_emotions,
            ),
            therapy_keywords: normalized(&config.therapy_keywords),
            high_risk_emotions: normalized(&config.high_risk_emotions),
        }
    }

    pub fn crisis_gate(&self) -> &CrisisGate {
        &self.crisis
    }

    pub fn decide(
        &self,
        input: &str,
        emotion: Option<&str>,
        pending_booking: bool,
    ) -> RouteOutcome {
        let crisis_matches = self
            .crisis
            .matches(&format!("{input} {}", emotion.unwrap_or_default()));

        if pending_booking {
            if !crisis_matches.is_empty() {
                return RouteOutcome::new(RouteDecision::Crisis, RouteReason::CrisisPhrase)
                    .matched(crisis_matches);
            }
            return RouteOutcome::new(RouteDecision::ContinueBooking, RouteReason::PendingBooking);
        }

        if let Some(insufficiency) = self.validator.assess(input, emotion) {
            let mut outcome = RouteOutcome::new(RouteDecision::WaitForInput, insufficiency.reason());
            outcome.insufficiency = Some(insufficiency);
            return outcome;
        }

        if !crisis_matches.is_empty() {
            return RouteOutcome::new(RouteDecision::Crisis, RouteReason::CrisisPhrase)
                .matched(crisis_matches);
        }

        let lowered = input.to_lowercase();
        let keywords = self
            .therapy_keywords
            .iter()
            .filter(|keyword| lowered.contains(keyword.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if !keywords.is_empty() {
            return RouteOutcome::new(RouteDecision::Appointment, RouteReason::ExplicitRequest)
                .matched(keywords);
        }

        let risky = emotion
            .map(|emotion| {
                emotion
                    .split(',')
                    .map(|label| label.trim().to_lowercase())
                    .filter(|label| self.high_risk_emotions.contains(label))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if !risky.is_empty() {
            return RouteOutcome::new(RouteDecision::Appointment, RouteReason::EmotionSignal)
                .matched(risky);
        }

        RouteOutcome::new(RouteDecision::SelfCare, RouteReason::Default)
    }

    /// Routes the state's current input and appends the trace entry. A valid
    /// turn closes any open clarification loop.
    pub fn route(
        &self,
        state: ConversationState,
        now: DateTime<Utc>,
    ) -> (RouteOutcome, ConversationState) {
        let outcome = self.decide(
            state.input(),
            state.detected_emotion.as_deref(),
            state.awaiting_booking_reply(),
        );
        let state = self.record(state, &outcome, now);
        (outcome, state)
    }

    /// Crisis short-circuit on raw text, taken before any classification.
    pub fn route_crisis(
        &self,
        state: ConversationState,
        now: DateTime<Utc>,
    ) -> Option<(RouteOutcome, ConversationState)> {
        let matched = self.crisis.matches(state.input());
        if matched.is_empty() {
            return None;
        }
        let outcome =
            RouteOutcome::new(RouteDecision::Crisis, RouteReason::CrisisPhrase).matched(matched);
        let state = self.record(state, &outcome, now);
        Some((outcome, state))
    }

    fn record(
        &self,
        mut state: ConversationState,
        outcome: &RouteOutcome,
        now: DateTime<Utc>,
    ) -> ConversationState {
        if outcome.insufficiency.is_none() {
            state.clarification_count = 0;
        }

        if outcome.decision == RouteDecision::Crisis {
            warn!(
                event = "crisis_detected",
                turn = state.turn_index,
                phrases = outcome.matched.len(),
            );
        } else {
            debug!(
                event = "route_decision",
                turn = state.turn_index,
                decision = outcome.decision.as_str(),
                reason = outcome.reason.as_str(),
                stage = state.appointment_stage.as_str(),
            );
        }

        let entry = RouterTraceEntry {
            turn: state.turn_index,
            ts: now,
            decision: outcome.decision,
            reason: outcome.reason,
            input_chars: state.input().trim().chars().count(),
            emotion: state.detected_emotion.clone(),
            appointment_stage: state.appointment_stage,
            clarification_count: state.clarification_count,
            matched: outcome.matched.clone(),
        };
        state.record_route(entry)
    }
}

fn normalized(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use calm_core::{AppointmentStage, ExpectedInput, NextAction};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0)
            .single()
            .expect("timestamp")
    }

    fn state_with(input: &str, emotion: Option<&str>) -> ConversationState {
        let mut state = ConversationState::new("u1").begin_turn(input, 10);
        state.detected_emotion = emotion.map(str::to_string);
        state
    }

    #[test]
    fn crisis_outranks_therapy_signals() {
        let router = IntentRouter::default();
        let outcome = router.decide(
            "I need a therapist because I want to die",
            Some("depression"),
            false,
        );
        assert_eq!(outcome.decision, RouteDecision::Crisis);
        assert_eq!(outcome.matched, vec!["want to die".to_string()]);
    }

    #[test]
    fn crisis_wins_even_mid_booking() {
        let router = IntentRouter::default();
        let outcome = router.decide("no, I just want to end my life", None, true);
        assert_eq!(outcome.decision, RouteDecision::Crisis);
    }

    #[test]
    fn pending_booking_reply_skips_validity() {
        let router = IntentRouter::default();
        let outcome = router.decide("2", None, true);
        assert_eq!(outcome.decision, RouteDecision::ContinueBooking);
        assert_eq!(outcome.reason, RouteReason::PendingBooking);
    }

    #[test]
    fn vague_and_short_inputs_wait_for_input() {
        let router = IntentRouter::default();
        let vague = router.decide("fine", None, false);
        assert_eq!(vague.decision, RouteDecision::WaitForInput);
        assert_eq!(vague.insufficiency, Some(TurnInsufficiency::VagueInput));
        assert_eq!(
            router.decide("hi", None, false).insufficiency,
            Some(TurnInsufficiency::TooShort)
        );
    }

    #[test]
    fn explicit_request_beats_emotion_signal() {
        let router = IntentRouter::default();
        let explicit = router.decide("Can I book an appointment?", Some("joy"), false);
        assert_eq!(explicit.decision, RouteDecision::Appointment);
        assert_eq!(explicit.reason, RouteReason::ExplicitRequest);
        assert_eq!(explicit.matched, vec!["appointment".to_string()]);

        let emotional = router.decide("my exam is tomorrow", Some("anxiety, fear"), false);
        assert_eq!(emotional.decision, RouteDecision::Appointment);
        assert_eq!(emotional.reason, RouteReason::EmotionSignal);
        assert_eq!(emotional.matched, vec!["anxiety".to_string()]);
    }

    #[test]
    fn everything_else_goes_to_self_care() {
        let router = IntentRouter::default();
        let outcome = router.decide("I had a lovely walk today", Some("joy"), false);
        assert_eq!(outcome.decision, RouteDecision::SelfCare);
        assert_eq!(outcome.reason, RouteReason::Default);
    }

    #[test]
    fn route_appends_trace_and_resets_clarification_on_valid_turn() {
        let router = IntentRouter::default();
        let mut state = state_with("I feel anxious about my exam", Some("anxiety"));
        state.clarification_count = 1;
        let (outcome, state) = router.route(state, now());
        assert_eq!(outcome.decision, RouteDecision::Appointment);
        assert_eq!(state.clarification_count, 0);
        let entry = state.router_trace.last().expect("trace entry");
        assert_eq!(entry.decision, RouteDecision::Appointment);
        assert_eq!(entry.ts, now());
        assert_eq!(entry.appointment_stage, AppointmentStage::Initial);
    }

    #[test]
    fn invalid_turn_keeps_clarification_count() {
        let router = IntentRouter::default();
        let mut state = state_with("idk", None);
        state.clarification_count = 1;
        let (_, state) = router.route(state, now());
        assert_eq!(state.clarification_count, 1);
        assert_eq!(state.router_trace.len(), 1);
    }

    #[test]
    fn route_crisis_only_fires_on_crisis_text() {
        let router = IntentRouter::default();
        let mut waiting = state_with("I want to kill myself", None);
        waiting.next_action = NextAction::WaitForInput(ExpectedInput::SlotSelection);
        let (outcome, state) = router.route_crisis(waiting, now()).expect("crisis");
        assert_eq!(outcome.reason, RouteReason::CrisisPhrase);
        assert_eq!(state.router_trace.len(), 1);

        assert!(router
            .route_crisis(state_with("hello there", None), now())
            .is_none());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config = RouterConfig {
            therapy_keywords: vec!["coach".to_string()],
            ..RouterConfig::default()
        };
        let router = IntentRouter::new(&config);
        assert_eq!(
            router.decide("find me a coach", None, false).decision,
            RouteDecision::Appointment
        );
        assert!(router.crisis_gate().check("suicidal"));
    }
}

mod details;
mod replies;

pub use details::{extract_focus, extract_mode, extract_time, resolve_slot, resolve_therapist};
pub use replies::{ReplyClassifier, ReplyKind};

use calm_core::{
    AppointmentStage, BookingDraft, BookingRequirement, ClaimOutcome, ConversationState,
    NextAction, PortError, SessionMode, Slot, SlotClaim, Therapist, TherapistDirectory,
    TherapistQuery, TimeOfDay, UserKey,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const OFFER_MESSAGE: &str = "Would you like to book a session with a therapist?";
pub const OFFER_REPROMPT: &str = "Sorry, I didn't quite catch that. Would you like me to help you book a session with a therapist? (yes / no)";
pub const DECLINE_MESSAGE: &str = "No problem. If you change your mind, just let me know and I can help you book a session. I'm here to listen in the meantime.";
pub const DATA_ACCESS_MESSAGE: &str = "I'm having trouble finding available times right now. Reply with your preferred time of day, or just say 'try again', and I'll look once more.";
pub const STAGE_RESET_MESSAGE: &str = "Something went wrong with your booking progress, so I've started it over. Just let me know if you'd like to book a session with a therapist.";
pub const CONFIRM_REPROMPT: &str =
    "Please reply yes to confirm the booking, or no to choose a different time.";
pub const NO_THERAPIST_STATUS: &str = "No therapist available right now.";
pub const SLOT_TAKEN_STATUS: &str = "Slot no longer available.";
pub const DECLINED_STATUS: &str = "Declined";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    pub trigger_emotions: Vec<String>,
    pub affirmative_words: Vec<String>,
    pub negative_words: Vec<String>,
    pub cancel_words: Vec<String>,
    pub max_therapists: usize,
    pub max_slots: usize,
}

impl Default for BookingConfig {
    fn default() -> Self {
        let words = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        Self {
            trigger_emotions: words(&[
                "anxiety",
                "depression",
                "grief",
                "loneliness",
                "stress",
                "trauma",
            ]),
            affirmative_words: words(&[
                "yes",
                "yeah",
                "yep",
                "sure",
                "ok",
                "okay",
                "book",
                "please do",
                "sounds good",
                "let's do it",
            ]),
            negative_words: words(&[
                "no",
                "nope",
                "nah",
                "not now",
                "not really",
                "maybe later",
                "no thanks",
                "don't want",
                "don't think so",
                "rather not",
            ]),
            cancel_words: words(&["cancel", "stop booking", "never mind"]),
            max_therapists: 3,
            max_slots: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("therapist directory error: {0}")]
    Directory(#[from] PortError),
    #[error("booking stage {stage} is inconsistent: {reason}")]
    InconsistentStage {
        stage: AppointmentStage,
        reason: String,
    },
}

/// The appointment booking state machine.
///
/// Every step works on an owned state and either returns the next state or
/// an error; on error the flow recovers from the state it was given, so the
/// stage is never left undefined.
pub struct BookingFlow {
    config: BookingConfig,
    replies: ReplyClassifier,
    directory: Arc<dyn TherapistDirectory>,
}

impl BookingFlow {
    pub fn new(config: BookingConfig, directory: Arc<dyn TherapistDirectory>) -> Self {
        let replies = ReplyClassifier::new(
            &config.affirmative_words,
            &config.negative_words,
            &config.cancel_words,
        );
        Self {
            config,
            replies,
            directory,
        }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    pub fn is_trigger(&self, emotion: Option<&str>) -> bool {
        emotion.is_some_and(|emotion| {
            emotion.split(',').any(|label| {
                let label = label.trim();
                self.config
                    .trigger_emotions
                    .iter()
                    .any(|trigger| trigger.eq_ignore_ascii_case(label))
            })
        })
    }

    /// Entry from a settled stage. Offers a session when the emotion is in the
    /// trigger set or the user asked outright. After a decline or a finished
    /// booking only an explicit request reopens the offer.
    pub fn start(&self, mut state: ConversationState, explicit_request: bool) -> ConversationState {
        let settled = matches!(
            state.appointment_stage,
            AppointmentStage::Declined | AppointmentStage::Booked
        );
        let triggered = self.is_trigger(state.detected_emotion.as_deref()) && !settled;
        if !explicit_request && !triggered {
            return state.with_action(NextAction::Continue);
        }

        let input = state.input().to_string();
        state.booking = BookingDraft {
            appointment_offer: Some(OFFER_MESSAGE.to_string()),
            ..BookingDraft::default()
        };
        let state = self.absorb_details(state, &input);
        info!(
            event = "booking_offered",
            turn = state.turn_index,
            explicit = explicit_request,
        );
        self.transition(state, AppointmentStage::OfferPending, OFFER_MESSAGE)
    }

    /// Consumes the reply to the question the current stage asked. Slots
    /// starting before `now` are neither offered nor claimed.
    pub fn advance(
        &self,
        state: ConversationState,
        user: &UserKey,
        now: NaiveDateTime,
    ) -> ConversationState {
        let snapshot = state.clone();
        match self.step(state, user, now) {
            Ok(state) => state,
            Err(err) => self.recover(snapshot, err),
        }
    }

    /// Drops the sub-flow back to `Initial` without touching the turn's
    /// action or output.
    pub fn abandon(&self, mut state: ConversationState) -> ConversationState {
        state.appointment_stage = AppointmentStage::Initial;
        state.booking = BookingDraft::default();
        state
    }

    pub fn reset(&self, state: ConversationState, message: &str) -> ConversationState {
        let state = self.abandon(state);
        self.transition(state, AppointmentStage::Initial, message)
    }

    fn step(
        &self,
        state: ConversationState,
        user: &UserKey,
        now: NaiveDateTime,
    ) -> Result<ConversationState, BookingError> {
        let stage = state.appointment_stage;
        if stage.awaits().is_none() || stage.awaits() != state.expected_input() {
            return Err(BookingError::InconsistentStage {
                stage,
                reason: format!(
                    "waiting for {} at a stage that expects {}",
                    state
                        .expected_input()
                        .map_or("nothing", |expected| expected.as_str()),
                    stage.awaits().map_or("nothing", |expected| expected.as_str()),
                ),
            });
        }

        let reply = state.input().to_string();
        if self.replies.is_cancel(&reply) {
            return Ok(self.decline(state));
        }

        match stage {
            AppointmentStage::OfferPending => self.on_offer_reply(state, &reply),
            AppointmentStage::InfoCollection => {
                let state = self.absorb_details(state, &reply);
                self.collect_or_present(state)
            }
            AppointmentStage::OptionsPresented => self.on_therapist_reply(state, &reply, now),
            AppointmentStage::SlotSelected => self.on_slot_reply(state, &reply),
            AppointmentStage::AwaitingConfirmation => {
                self.on_confirmation(state, &reply, user, now)
            }
            AppointmentStage::Initial | AppointmentStage::Declined | AppointmentStage::Booked => {
                Err(BookingError::InconsistentStage {
                    stage,
                    reason: "stage does not take replies".to_string(),
                })
            }
        }
    }

    fn recover(&self, snapshot: ConversationState, err: BookingError) -> ConversationState {
        match err {
            BookingError::Directory(err) => {
                warn!(
                    event = "booking_data_access_failed",
                    stage = snapshot.appointment_stage.as_str(),
                    error = %err,
                );
                let mut state = snapshot;
                state.booking.available_therapists.clear();
                state.booking.available_slots.clear();
                state.booking.selected_therapist = None;
                state.booking.booked_slot = None;
                self.transition(state, AppointmentStage::InfoCollection, DATA_ACCESS_MESSAGE)
            }
            BookingError::InconsistentStage { stage, reason } => {
                warn!(event = "unknown_stage", stage = stage.as_str(), reason = %reason);
                self.reset(snapshot, STAGE_RESET_MESSAGE)
            }
        }
    }

    fn on_offer_reply(
        &self,
        state: ConversationState,
        reply: &str,
    ) -> Result<ConversationState, BookingError> {
        match self.replies.classify(reply) {
            ReplyKind::Affirmative => {
                let state = self.absorb_details(state, reply);
                self.collect_or_present(state)
            }
            ReplyKind::Negative => Ok(self.decline(state)),
            ReplyKind::Unclear => {
                Ok(self.transition(state, AppointmentStage::OfferPending, OFFER_REPROMPT))
            }
        }
    }

    fn on_therapist_reply(
        &self,
        mut state: ConversationState,
        reply: &str,
        now: NaiveDateTime,
    ) -> Result<ConversationState, BookingError> {
        let candidates = state.booking.available_therapists.clone();
        if candidates.is_empty() {
            return Err(BookingError::InconsistentStage {
                stage: state.appointment_stage,
                reason: "no therapist options to choose from".to_string(),
            });
        }

        if let Some(index) = resolve_therapist(reply, &candidates) {
            return self.offer_slots(state, candidates[index].clone(), now);
        }

        // Widening the window for the therapist whose slots came up empty.
        if let (Some(selected), Some(window)) =
            (state.booking.selected_therapist.clone(), extract_time(reply))
        {
            state.booking.preferred_time = Some(window);
            return self.offer_slots(state, selected, now);
        }

        let message = format!(
            "Sorry, I couldn't tell which therapist you meant.\n{}",
            therapist_listing(&candidates)
        );
        Ok(self.transition(state, AppointmentStage::OptionsPresented, message))
    }

    fn on_slot_reply(
        &self,
        mut state: ConversationState,
        reply: &str,
    ) -> Result<ConversationState, BookingError> {
        let slots = state.booking.available_slots.clone();
        let Some(therapist) = state.booking.selected_therapist.clone() else {
            return Err(BookingError::InconsistentStage {
                stage: state.appointment_stage,
                reason: "slot selection without a chosen therapist".to_string(),
            });
        };
        if slots.is_empty() {
            return Err(BookingError::InconsistentStage {
                stage: state.appointment_stage,
                reason: "no slots to choose from".to_string(),
            });
        }

        let Some(index) = resolve_slot(reply, &slots) else {
            let message = format!(
                "Sorry, I couldn't match that to one of the openings.\n{}",
                slot_listing(&slots)
            );
            return Ok(self.transition(state, AppointmentStage::SlotSelected, message));
        };

        let slot = slots[index].clone();
        let mode = state
            .booking
            .location
            .map_or("session", SessionMode::as_str);
        let message = format!(
            "You're about to book {} on {} ({mode}). Shall I confirm this booking? (yes / no)",
            therapist.name,
            slot.label()
        );
        state.booking.booked_slot = Some(slot);
        Ok(self.transition(state, AppointmentStage::AwaitingConfirmation, message))
    }

    fn on_confirmation(
        &self,
        mut state: ConversationState,
        reply: &str,
        user: &UserKey,
        now: NaiveDateTime,
    ) -> Result<ConversationState, BookingError> {
        match self.replies.classify(reply) {
            ReplyKind::Affirmative => self.finalize(state, user, now),
            ReplyKind::Negative => {
                state.booking.booked_slot = None;
                let message = format!(
                    "No problem, I haven't booked anything.\n{}",
                    slot_listing(&state.booking.available_slots)
                );
                Ok(self.transition(state, AppointmentStage::SlotSelected, message))
            }
            ReplyKind::Unclear => Ok(self.transition(
                state,
                AppointmentStage::AwaitingConfirmation,
                CONFIRM_REPROMPT,
            )),
        }
    }

    fn finalize(
        &self,
        mut state: ConversationState,
        user: &UserKey,
        now: NaiveDateTime,
    ) -> Result<ConversationState, BookingError> {
        let missing = state.booking.missing_requirements();
        if !missing.is_empty() {
            warn!(
                event = "booking_requirements_missing",
                missing = %requirement_names(&missing),
            );
            state.booking.booked_slot = None;
            return self.collect_or_present(state);
        }

        let (Some(therapist), Some(slot)) = (
            state.booking.selected_therapist.clone(),
            state.booking.booked_slot.clone(),
        ) else {
            return Err(BookingError::InconsistentStage {
                stage: state.appointment_stage,
                reason: "confirmation without a chosen therapist and slot".to_string(),
            });
        };

        if slot.starts_at < now {
            info!(
                event = "booking_slot_passed",
                therapist_id = therapist.id,
                slot = %slot.label(),
            );
            return self.slot_gone(state, therapist, slot, now);
        }

        let claim = SlotClaim {
            therapist_id: therapist.id,
            therapist_name: therapist.name.clone(),
            starts_at: slot.starts_at,
            user_key: user.as_str().to_string(),
            emotion: state.booking.focus_emotion.clone().unwrap_or_default(),
        };

        match self.directory.claim_slot(&claim)? {
            ClaimOutcome::Claimed { booking_id } => {
                info!(
                    event = "booking_claimed",
                    booking_id,
                    therapist_id = therapist.id,
                    slot = %slot.label(),
                );
                let status = format!(
                    "Appointment confirmed with {} at {}",
                    therapist.name,
                    slot.label()
                );
                state.booking.appointment_status = Some(status.clone());
                state.booking.booked_therapist = Some(therapist);
                state.booking.available_therapists.clear();
                state.booking.available_slots.clear();
                let message = format!("{status}. Take care of yourself until then.");
                Ok(self.transition(state, AppointmentStage::Booked, message))
            }
            ClaimOutcome::AlreadyTaken => {
                info!(
                    event = "booking_conflict",
                    therapist_id = therapist.id,
                    slot = %slot.label(),
                );
                self.slot_gone(state, therapist, slot, now)
            }
        }
    }

    /// Re-offers the therapist's remaining openings after the chosen one
    /// was taken or has already started.
    fn slot_gone(
        &self,
        mut state: ConversationState,
        therapist: Therapist,
        slot: Slot,
        now: NaiveDateTime,
    ) -> Result<ConversationState, BookingError> {
        state.booking.booked_slot = None;
        state.booking.appointment_status = Some(SLOT_TAKEN_STATUS.to_string());
        let name = therapist.name.clone();
        let mut state = self.offer_slots(state, therapist, now)?;
        state.agent_output = format!(
            "Sorry, {} with {name} is no longer available.\n{}",
            slot.label(),
            state.agent_output
        );
        Ok(state)
    }

    fn collect_or_present(
        &self,
        state: ConversationState,
    ) -> Result<ConversationState, BookingError> {
        let missing = state.booking.missing_requirements();
        if missing.is_empty() {
            return self.present_options(state);
        }
        let message = format!(
            "To find the right therapist, could you tell me {}?",
            requirement_prompts(&missing)
        );
        Ok(self.transition(state, AppointmentStage::InfoCollection, message))
    }

    fn present_options(
        &self,
        mut state: ConversationState,
    ) -> Result<ConversationState, BookingError> {
        let focus = state.booking.focus_emotion.clone().unwrap_or_default();
        let query = TherapistQuery {
            specialty: focus.clone(),
            mode: state.booking.location,
            limit: self.config.max_therapists,
        };
        let mut therapists = self.directory.match_therapists(&query)?;
        therapists.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        therapists.truncate(self.config.max_therapists);

        state.booking.available_slots.clear();
        state.booking.selected_therapist = None;
        state.booking.booked_slot = None;

        if therapists.is_empty() {
            info!(event = "no_therapist_match", focus = %focus);
            state.booking.available_therapists.clear();
            state.booking.appointment_status = Some(NO_THERAPIST_STATUS.to_string());
            let mode = state
                .booking
                .location
                .map(|mode| format!(" ({mode})"))
                .unwrap_or_default();
            let message = format!(
                "I couldn't find a therapist for {focus}{mode} right now. You could try again later, and I'm happy to share some self-care ideas in the meantime."
            );
            return Ok(self.transition(state, AppointmentStage::Initial, message));
        }

        let message = format!(
            "Here are therapists who can help with {focus}:\n{}",
            therapist_listing(&therapists)
        );
        state.booking.available_therapists = therapists;
        Ok(self.transition(state, AppointmentStage::OptionsPresented, message))
    }

    fn offer_slots(
        &self,
        mut state: ConversationState,
        therapist: Therapist,
        now: NaiveDateTime,
    ) -> Result<ConversationState, BookingError> {
        let window = state.booking.preferred_time.unwrap_or(TimeOfDay::Any);
        let mut slots = self
            .directory
            .open_slots(therapist.id, window, now, self.config.max_slots)?;
        slots.retain(|slot| window.contains(&slot.starts_at) && slot.starts_at >= now);
        slots.sort_by_key(|slot| slot.starts_at);
        slots.truncate(self.config.max_slots);

        state.booking.booked_slot = None;
        state.booking.selected_therapist = Some(therapist.clone());

        if slots.is_empty() {
            state.booking.available_slots.clear();
            let listing = therapist_listing(&state.booking.available_therapists);
            let message = match window {
                TimeOfDay::Any => format!(
                    "{} has no open slots right now. Please pick another therapist.\n{listing}",
                    therapist.name
                ),
                window => format!(
                    "{} has no openings in the {window}. Reply 'any time' to see all of their openings, or pick another therapist.\n{listing}",
                    therapist.name
                ),
            };
            return Ok(self.transition(state, AppointmentStage::OptionsPresented, message));
        }

        let message = format!(
            "{} has these openings:\n{}",
            therapist.name,
            slot_listing(&slots)
        );
        state.booking.available_slots = slots;
        Ok(self.transition(state, AppointmentStage::SlotSelected, message))
    }

    fn decline(&self, mut state: ConversationState) -> ConversationState {
        info!(
            event = "booking_declined",
            stage = state.appointment_stage.as_str()
        );
        state.booking = BookingDraft {
            appointment_offer: state.booking.appointment_offer.take(),
            appointment_status: Some(DECLINED_STATUS.to_string()),
            ..BookingDraft::default()
        };
        self.transition(state, AppointmentStage::Declined, DECLINE_MESSAGE)
    }

    /// Fills draft fields the reply mentions; never clears one.
    fn absorb_details(&self, mut state: ConversationState, reply: &str) -> ConversationState {
        if let Some(focus) = extract_focus(reply, &self.config.trigger_emotions) {
            state.booking.focus_emotion = Some(focus);
        }
        if state.booking.focus_emotion.is_none() {
            state.booking.focus_emotion = state.primary_emotion();
        }
        if let Some(window) = extract_time(reply) {
            state.booking.preferred_time = Some(window);
        }
        if let Some(mode) = extract_mode(reply) {
            state.booking.location = Some(mode);
        }
        state
    }

    /// The only place a stage is written; the awaited reply follows from it.
    fn transition(
        &self,
        mut state: ConversationState,
        stage: AppointmentStage,
        message: impl Into<String>,
    ) -> ConversationState {
        state.appointment_stage = stage;
        let action = stage
            .awaits()
            .map_or(NextAction::Continue, NextAction::WaitForInput);
        state.with_action(action).with_output(message)
    }
}

fn therapist_listing(therapists: &[Therapist]) -> String {
    let mut listing = String::new();
    for (index, therapist) in therapists.iter().enumerate() {
        listing.push_str(&format!("{}. {}\n", index + 1, therapist.summary_line()));
    }
    listing.push_str("Reply with a number or a name to choose.");
    listing
}

fn slot_listing(slots: &[Slot]) -> String {
    let mut listing = String::new();
    for (index, slot) in slots.iter().enumerate() {
        listing.push_str(&format!("{}. {}\n", index + 1, slot.label()));
    }
    listing.push_str("Reply with a number or a time to choose.");
    listing
}

fn requirement_names(missing: &[BookingRequirement]) -> String {
    missing
        .iter()
        .map(|requirement| requirement.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn requirement_prompts(missing: &[BookingRequirement]) -> String {
    let prompts = missing
        .iter()
        .map(|requirement| match requirement {
            BookingRequirement::Emotion => {
                "what you'd like support with (for example anxiety, stress or grief)"
            }
            BookingRequirement::PreferredTime => {
                "what time of day suits you (morning, afternoon or evening)"
            }
            BookingRequirement::Location => "whether you'd prefer online or in-person sessions",
        })
        .collect::<Vec<_>>();
    match prompts.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, and {last}", rest.join(", ")),
        Some((last, _)) => last.to_string(),
        None => String::new(),
    }
}

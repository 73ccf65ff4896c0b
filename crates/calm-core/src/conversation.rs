use crate::booking::{SessionMode, Slot, Therapist, TimeOfDay};
use crate::ports::EmotionReading;
use crate::ContractError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What kind of reply the assistant is waiting for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedInput {
    Clarification,
    AppointmentResponse,
    BookingDetails,
    TherapistSelection,
    SlotSelection,
    FinalBookingConfirmation,
}

impl ExpectedInput {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clarification => "clarification",
            Self::AppointmentResponse => "appointment_response",
            Self::BookingDetails => "booking_details",
            Self::TherapistSelection => "therapist_selection",
            Self::SlotSelection => "slot_selection",
            Self::FinalBookingConfirmation => "final_booking_confirmation",
        }
    }

    pub fn is_booking_reply(self) -> bool {
        !matches!(self, Self::Clarification)
    }
}

impl fmt::Display for ExpectedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpectedInput {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "clarification" => Ok(Self::Clarification),
            "appointment_response" => Ok(Self::AppointmentResponse),
            "booking_details" => Ok(Self::BookingDetails),
            "therapist_selection" => Ok(Self::TherapistSelection),
            "slot_selection" => Ok(Self::SlotSelection),
            "final_booking_confirmation" => Ok(Self::FinalBookingConfirmation),
            other => Err(ContractError::UnknownExpectedInput(other.to_string())),
        }
    }
}

/// Signal for what happens after the current turn.
///
/// Waiting carries the expected reply, so a state can never wait without
/// naming what it waits for, or name an expected reply while not waiting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", content = "expected", rename_all = "snake_case")]
pub enum NextAction {
    Continue,
    WaitForInput(ExpectedInput),
    Crisis,
    Appointment,
    SelfCare,
    End,
}

impl NextAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::WaitForInput(_) => "wait_for_input",
            Self::Crisis => "crisis",
            Self::Appointment => "appointment",
            Self::SelfCare => "self_care",
            Self::End => "end",
        }
    }

    pub fn expected_input(self) -> Option<ExpectedInput> {
        match self {
            Self::WaitForInput(expected) => Some(expected),
            _ => None,
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStage {
    Initial,
    OfferPending,
    Declined,
    InfoCollection,
    OptionsPresented,
    SlotSelected,
    AwaitingConfirmation,
    Booked,
}

impl AppointmentStage {
    pub const ALL: [AppointmentStage; 8] = [
        Self::Initial,
        Self::OfferPending,
        Self::Declined,
        Self::InfoCollection,
        Self::OptionsPresented,
        Self::SlotSelected,
        Self::AwaitingConfirmation,
        Self::Booked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::OfferPending => "offer_pending",
            Self::Declined => "declined",
            Self::InfoCollection => "info_collection",
            Self::OptionsPresented => "options_presented",
            Self::SlotSelected => "slot_selected",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Booked => "booked",
        }
    }

    /// The reply a stage waits for, or `None` for stages that hand control
    /// back to the router.
    pub fn awaits(self) -> Option<ExpectedInput> {
        match self {
            Self::OfferPending => Some(ExpectedInput::AppointmentResponse),
            Self::InfoCollection => Some(ExpectedInput::BookingDetails),
            Self::OptionsPresented => Some(ExpectedInput::TherapistSelection),
            Self::SlotSelected => Some(ExpectedInput::SlotSelection),
            Self::AwaitingConfirmation => Some(ExpectedInput::FinalBookingConfirmation),
            Self::Initial | Self::Declined | Self::Booked => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.awaits().is_none()
    }
}

impl fmt::Display for AppointmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStage {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or(ContractError::UnknownStage(normalized))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    WaitForInput,
    Crisis,
    Appointment,
    SelfCare,
    ContinueBooking,
}

impl RouteDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaitForInput => "wait_for_input",
            Self::Crisis => "crisis",
            Self::Appointment => "appointment",
            Self::SelfCare => "self_care",
            Self::ContinueBooking => "continue_booking",
        }
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    TooShort,
    VagueInput,
    MissingEmotion,
    CrisisPhrase,
    PendingBooking,
    ExplicitRequest,
    EmotionSignal,
    Default,
}

impl RouteReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TooShort => "too_short",
            Self::VagueInput => "vague_input",
            Self::MissingEmotion => "missing_emotion",
            Self::CrisisPhrase => "crisis_phrase",
            Self::PendingBooking => "pending_booking",
            Self::ExplicitRequest => "explicit_request",
            Self::EmotionSignal => "emotion_signal",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterTraceEntry {
    pub turn: u64,
    pub ts: DateTime<Utc>,
    pub decision: RouteDecision,
    pub reason: RouteReason,
    pub input_chars: usize,
    pub emotion: Option<String>,
    pub appointment_stage: AppointmentStage,
    pub clarification_count: u8,
    #[serde(default)]
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingRequirement {
    Emotion,
    PreferredTime,
    Location,
}

impl BookingRequirement {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emotion => "emotion",
            Self::PreferredTime => "preferred_time",
            Self::Location => "location",
        }
    }
}

/// Ephemeral booking-flow fields. Only the booking flow writes these.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BookingDraft {
    pub appointment_offer: Option<String>,
    pub appointment_status: Option<String>,
    pub focus_emotion: Option<String>,
    pub preferred_time: Option<TimeOfDay>,
    pub location: Option<SessionMode>,
    pub available_therapists: Vec<Therapist>,
    pub available_slots: Vec<Slot>,
    pub selected_therapist: Option<Therapist>,
    pub booked_therapist: Option<Therapist>,
    pub booked_slot: Option<Slot>,
}

impl BookingDraft {
    pub fn missing_requirements(&self) -> Vec<BookingRequirement> {
        let mut missing = Vec::new();
        if self
            .focus_emotion
            .as_deref()
            .map(str::trim)
            .map_or(true, str::is_empty)
        {
            missing.push(BookingRequirement::Emotion);
        }
        if self.preferred_time.is_none() {
            missing.push(BookingRequirement::PreferredTime);
        }
        if self.location.is_none() {
            missing.push(BookingRequirement::Location);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_requirements().is_empty()
    }
}

/// Per-user dialogue state carried between turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub user_id: String,
    #[serde(default)]
    pub raw_text_history: Vec<String>,
    #[serde(default)]
    pub current_input: Option<String>,
    #[serde(default)]
    pub detected_emotion: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub emotion_details: Option<String>,
    #[serde(default)]
    pub clarification_count: u8,
    pub next_action: NextAction,
    pub appointment_stage: AppointmentStage,
    #[serde(default)]
    pub booking: BookingDraft,
    #[serde(default)]
    pub router_trace: Vec<RouterTraceEntry>,
    #[serde(default)]
    pub agent_output: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub tailored_prompt: Option<String>,
    #[serde(default)]
    pub forecast: Option<String>,
    #[serde(default)]
    pub crisis_response: Option<String>,
    #[serde(default)]
    pub turn_index: u64,
}

impl ConversationState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            raw_text_history: Vec::new(),
            current_input: None,
            detected_emotion: None,
            confidence: None,
            emotion_details: None,
            clarification_count: 0,
            next_action: NextAction::Continue,
            appointment_stage: AppointmentStage::Initial,
            booking: BookingDraft::default(),
            router_trace: Vec::new(),
            agent_output: String::new(),
            suggestion: None,
            tailored_prompt: None,
            forecast: None,
            crisis_response: None,
            turn_index: 0,
        }
    }

    /// Starts a turn: records the raw input and clears last turn's outputs.
    pub fn begin_turn(mut self, input: &str, raw_history_limit: usize) -> Self {
        self.turn_index += 1;
        self.current_input = Some(input.to_string());
        self.raw_text_history.push(input.to_string());
        if self.raw_text_history.len() > raw_history_limit {
            let excess = self.raw_text_history.len() - raw_history_limit;
            self.raw_text_history.drain(..excess);
        }
        self.agent_output.clear();
        self.suggestion = None;
        self.tailored_prompt = None;
        self.forecast = None;
        self.crisis_response = None;
        self
    }

    pub fn consume_input(&mut self) -> Option<String> {
        self.current_input.take()
    }

    pub fn input(&self) -> &str {
        self.current_input.as_deref().unwrap_or("")
    }

    pub fn expected_input(&self) -> Option<ExpectedInput> {
        self.next_action.expected_input()
    }

    pub fn awaiting_booking_reply(&self) -> bool {
        self.expected_input()
            .is_some_and(ExpectedInput::is_booking_reply)
    }

    pub fn with_action(mut self, action: NextAction) -> Self {
        self.next_action = action;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.agent_output = output.into();
        self
    }

    /// Adopts a classification only when it is confident enough; otherwise
    /// the last good value stays.
    pub fn adopt_emotion(mut self, reading: &EmotionReading, confidence_floor: f32) -> Self {
        let emotion = reading.emotion.trim().to_lowercase();
        if emotion.is_empty() || reading.confidence < confidence_floor {
            return self;
        }
        self.detected_emotion = Some(emotion);
        self.confidence = Some(reading.confidence);
        self.emotion_details = reading.details.clone();
        self
    }

    /// First label of a possibly comma-separated emotion string.
    pub fn primary_emotion(&self) -> Option<String> {
        self.detected_emotion
            .as_deref()
            .and_then(|emotion| emotion.split(',').next())
            .map(|emotion| emotion.trim().to_lowercase())
            .filter(|emotion| !emotion.is_empty())
    }

    pub fn record_route(mut self, entry: RouterTraceEntry) -> Self {
        self.router_trace.push(entry);
        self
    }

    /// Keeps only the newest `limit` trace entries.
    pub fn bound_trace(&mut self, limit: usize) {
        if self.router_trace.len() > limit {
            let excess = self.router_trace.len() - limit;
            self.router_trace.drain(..excess);
        }
    }
}

pub mod booking;
pub mod conversation;
pub mod memory;
pub mod ports;
pub mod wire;

pub use booking::{
    ClaimOutcome, SessionMode, Slot, SlotClaim, Therapist, TherapistQuery, TimeOfDay, SLOT_FORMAT,
};
pub use conversation::{
    AppointmentStage, BookingDraft, BookingRequirement, ConversationState, ExpectedInput,
    NextAction, RouteDecision, RouteReason, RouterTraceEntry,
};
pub use memory::{TurnRecord, UserKey, MAX_USER_ID_CHARS};
pub use ports::{
    AcknowledgeRequest, AdapterError, AdapterFailureKind, ContentGenerator, EmotionClassifier,
    EmotionReading, PortError, SelfCareArticle, SelfCareRequest, SelfCareSearch,
    SessionRepository, TherapistDirectory, TurnMemory,
};
pub use wire::{ResetRequest, ResetResponse, TurnRequest, TurnResponse};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("invalid user id: {reason}")]
    InvalidUserId { reason: String },
    #[error("unknown appointment stage: {0}")]
    UnknownStage(String),
    #[error("unknown expected input tag: {0}")]
    UnknownExpectedInput(String),
}

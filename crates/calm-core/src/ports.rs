use crate::booking::{ClaimOutcome, Slot, SlotClaim, Therapist, TherapistQuery, TimeOfDay};
use crate::conversation::RouteDecision;
use crate::memory::{TurnRecord, UserKey};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterFailureKind {
    Timeout,
    ProviderError,
    InvalidOutput,
    Panicked,
}

impl AdapterFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ProviderError => "provider_error",
            Self::InvalidOutput => "invalid_output",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for AdapterFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("external service error ({kind}): {message}")]
pub struct AdapterError {
    pub kind: AdapterFailureKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Failure reported by a storage-backed port.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt data: {0}")]
    Corrupt(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmotionReading {
    pub emotion: String,
    pub confidence: f32,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelfCareArticle {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgeRequest {
    pub decision: RouteDecision,
    pub emotion: Option<String>,
    pub user_input: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfCareRequest {
    pub emotion: String,
    pub user_input: String,
    pub articles: Vec<SelfCareArticle>,
}

pub trait EmotionClassifier: Send + Sync {
    fn classify(
        &self,
        text: &str,
        history: &[TurnRecord],
    ) -> Result<EmotionReading, AdapterError>;
}

pub trait ContentGenerator: Send + Sync {
    fn acknowledge(&self, request: &AcknowledgeRequest) -> Result<String, AdapterError>;
    fn self_care(&self, request: &SelfCareRequest) -> Result<String, AdapterError>;
}

pub trait SelfCareSearch: Send + Sync {
    fn search(&self, emotion: &str) -> Result<Vec<SelfCareArticle>, AdapterError>;
}

/// Append-only per-user turn log.
pub trait TurnMemory: Send + Sync {
    /// Up to `limit` most recent records, oldest first. No history is an
    /// empty list, never an error.
    fn fetch(&self, user: &UserKey, limit: usize) -> Result<Vec<TurnRecord>, PortError>;
    fn append(&self, user: &UserKey, record: &TurnRecord) -> Result<(), PortError>;
    /// Returns whether any history existed.
    fn clear(&self, user: &UserKey) -> Result<bool, PortError>;
}

pub trait TherapistDirectory: Send + Sync {
    fn match_therapists(&self, query: &TherapistQuery) -> Result<Vec<Therapist>, PortError>;
    /// Earliest open slots inside `window` that start at or after `not_before`.
    fn open_slots(
        &self,
        therapist_id: i64,
        window: TimeOfDay,
        not_before: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<Slot>, PortError>;
    /// Atomic check-and-claim: at most one claim per (therapist, slot) succeeds.
    fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimOutcome, PortError>;
}

pub trait SessionRepository: Send + Sync {
    fn load_session(&self, user: &UserKey) -> Result<Option<String>, PortError>;
    fn save_session(&self, user: &UserKey, snapshot_json: &str) -> Result<(), PortError>;
    fn delete_session(&self, user: &UserKey) -> Result<(), PortError>;
}

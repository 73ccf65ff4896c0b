use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage and display format for appointment slots.
pub const SLOT_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Any,
}

impl TimeOfDay {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Any => "any time",
        }
    }

    /// Morning is before noon, afternoon runs until 17:00, evening is the rest.
    pub fn contains_hour(self, hour: u32) -> bool {
        match self {
            Self::Morning => hour < 12,
            Self::Afternoon => (12..17).contains(&hour),
            Self::Evening => hour >= 17,
            Self::Any => true,
        }
    }

    pub fn contains(self, starts_at: &NaiveDateTime) -> bool {
        self.contains_hour(starts_at.hour())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Online,
    InPerson,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::InPerson => "in-person",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Therapist {
    pub id: i64,
    pub name: String,
    pub specialties: Vec<String>,
    pub rating: f32,
    pub city: String,
    pub online: bool,
    pub in_person: bool,
}

impl Therapist {
    pub fn supports(&self, mode: SessionMode) -> bool {
        match mode {
            SessionMode::Online => self.online,
            SessionMode::InPerson => self.in_person,
        }
    }

    pub fn summary_line(&self) -> String {
        let mut modes = Vec::new();
        if self.online {
            modes.push("online");
        }
        if self.in_person {
            modes.push("in person");
        }
        format!(
            "{} ({}) - rated {:.1} - {} - {}",
            self.name,
            self.specialties.join(", "),
            self.rating,
            modes.join(" / "),
            self.city
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub therapist_id: i64,
    pub starts_at: NaiveDateTime,
}

impl Slot {
    pub fn label(&self) -> String {
        self.starts_at.format(SLOT_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TherapistQuery {
    pub specialty: String,
    pub mode: Option<SessionMode>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotClaim {
    pub therapist_id: i64,
    pub therapist_name: String,
    pub starts_at: NaiveDateTime,
    pub user_key: String,
    pub emotion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { booking_id: i64 },
    AlreadyTaken,
}

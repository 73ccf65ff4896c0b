use crate::ContractError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_USER_ID_CHARS: usize = 128;

/// One persisted turn. Records are append-only; only a clear-all removes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnRecord {
    pub timestamp: DateTime<Utc>,
    pub user_input: String,
    pub agent_output: String,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// Storage-safe form of a user id.
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte is
/// percent-escaped. `%` itself is escaped, so distinct ids never collide and
/// the key can never contain a path separator or `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserKey(String);

impl UserKey {
    pub fn parse(raw: &str) -> Result<Self, ContractError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ContractError::InvalidUserId {
                reason: "user id is empty".to_string(),
            });
        }
        if trimmed.chars().count() > MAX_USER_ID_CHARS {
            return Err(ContractError::InvalidUserId {
                reason: format!("user id exceeds {MAX_USER_ID_CHARS} characters"),
            });
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ContractError::InvalidUserId {
                reason: "user id contains control characters".to_string(),
            });
        }

        let mut key = String::with_capacity(trimmed.len());
        for byte in trimmed.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                key.push(char::from(byte));
            } else {
                key.push_str(&format!("%{byte:02X}"));
            }
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

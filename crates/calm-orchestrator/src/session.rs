use calm_core::{AppointmentStage, ConversationState, UserKey};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

pub type SessionSlot = Arc<AsyncMutex<Option<ConversationState>>>;

pub const DEFAULT_SESSION_CACHE_LIMIT: usize = 1024;

/// One async lock per user. Turns for the same user queue on it; different
/// users never share a lock.
///
/// Once `capacity` users are resident, adding another sweeps out every slot
/// no turn is holding or waiting on. Evicted users reload from their saved
/// snapshot on the next turn.
pub struct SessionRegistry {
    slots: Mutex<HashMap<UserKey, SessionSlot>>,
    capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SESSION_CACHE_LIMIT)
    }
}

impl SessionRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn slot(&self, user: &UserKey) -> SessionSlot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(user) {
            return slot.clone();
        }
        if slots.len() >= self.capacity {
            // Only the map holds an idle slot.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        let slot = SessionSlot::default();
        slots.insert(user.clone(), slot.clone());
        slot
    }

    /// Drops the user's entry. `held` is the caller's own handle; if any
    /// other turn holds or waits on the slot the entry stays, so that turn
    /// and later ones keep sharing one lock.
    pub fn forget(&self, user: &UserKey, held: &SessionSlot) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let removable = slots
            .get(user)
            .is_some_and(|slot| Arc::ptr_eq(slot, held) && Arc::strong_count(held) == 2);
        if removable {
            slots.remove(user);
        }
        removable
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoredSession {
    pub state: ConversationState,
    /// The stored stage was not a known stage and was reset to `Initial`.
    pub stage_reset: Option<String>,
}

/// Parses a persisted snapshot. An unknown stage drops the booking draft
/// and the pending question rather than failing the whole snapshot.
pub fn restore_snapshot(json: &str) -> Result<RestoredSession, serde_json::Error> {
    let mut value: Value = serde_json::from_str(json)?;
    let mut stage_reset = None;

    if let Some(object) = value.as_object_mut() {
        let stored = object
            .get("appointment_stage")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(stored) = stored {
            match stored.parse::<AppointmentStage>() {
                Ok(stage) => {
                    object.insert("appointment_stage".to_string(), json!(stage.as_str()));
                }
                Err(_) => {
                    object.insert(
                        "appointment_stage".to_string(),
                        json!(AppointmentStage::Initial.as_str()),
                    );
                    object.remove("booking");
                    object.insert("next_action".to_string(), json!({ "action": "continue" }));
                    stage_reset = Some(stored);
                }
            }
        }
    }

    let state = serde_json::from_value(value)?;
    Ok(RestoredSession { state, stage_reset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use calm_core::{ExpectedInput, NextAction};

    fn snapshot_with_stage(stage: &str) -> String {
        let mut state = ConversationState::new("u1")
            .with_action(NextAction::WaitForInput(ExpectedInput::SlotSelection));
        state.appointment_stage = AppointmentStage::SlotSelected;
        state.booking.focus_emotion = Some("anxiety".to_string());
        let mut value = serde_json::to_value(&state).expect("serialize");
        value["appointment_stage"] = json!(stage);
        value.to_string()
    }

    #[test]
    fn known_stage_restores_unchanged() {
        let restored = restore_snapshot(&snapshot_with_stage("slot_selected")).expect("restore");
        assert_eq!(restored.stage_reset, None);
        assert_eq!(restored.state.appointment_stage, AppointmentStage::SlotSelected);
        assert_eq!(
            restored.state.expected_input(),
            Some(ExpectedInput::SlotSelection)
        );
    }

    #[test]
    fn stage_spelling_is_normalized() {
        let restored = restore_snapshot(&snapshot_with_stage(" Slot_Selected ")).expect("restore");
        assert_eq!(restored.stage_reset, None);
        assert_eq!(restored.state.appointment_stage, AppointmentStage::SlotSelected);
    }

    #[test]
    fn unknown_stage_resets_flow_but_keeps_history() {
        let restored = restore_snapshot(&snapshot_with_stage("payment_pending")).expect("restore");
        assert_eq!(restored.stage_reset.as_deref(), Some("payment_pending"));
        assert_eq!(restored.state.appointment_stage, AppointmentStage::Initial);
        assert_eq!(restored.state.next_action, NextAction::Continue);
        assert!(restored.state.booking.focus_emotion.is_none());
        assert_eq!(restored.state.user_id, "u1");
    }

    #[test]
    fn garbage_snapshot_is_an_error() {
        assert!(restore_snapshot("{not json").is_err());
        assert!(restore_snapshot(r#"{"user_id": 5}"#).is_err());
    }

    #[test]
    fn registry_hands_out_one_lock_per_user() {
        let registry = SessionRegistry::default();
        let alice = UserKey::parse("alice").expect("user");
        let bob = UserKey::parse("bob").expect("user");
        assert!(Arc::ptr_eq(&registry.slot(&alice), &registry.slot(&alice)));
        assert!(!Arc::ptr_eq(&registry.slot(&alice), &registry.slot(&bob)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn full_registry_sweeps_idle_slots_only() {
        let registry = SessionRegistry::with_capacity(2);
        let alice = UserKey::parse("alice").expect("user");
        let bob = UserKey::parse("bob").expect("user");
        let carol = UserKey::parse("carol").expect("user");

        let busy = registry.slot(&alice);
        drop(registry.slot(&bob));
        registry.slot(&carol);
        assert_eq!(registry.len(), 2);
        assert!(Arc::ptr_eq(&busy, &registry.slot(&alice)));
    }

    #[tokio::test]
    async fn forget_leaves_a_slot_another_turn_is_waiting_on() {
        let registry = SessionRegistry::default();
        let user = UserKey::parse("dana").expect("user");

        let held = registry.slot(&user);
        let waiting = registry.slot(&user);
        let guard = held.lock().await;
        assert!(!registry.forget(&user, &held));
        assert_eq!(registry.len(), 1);

        drop(waiting);
        assert!(registry.forget(&user, &held));
        assert!(registry.is_empty());
        drop(guard);
    }
}

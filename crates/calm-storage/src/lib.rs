mod turn_log;

pub use turn_log::JsonlTurnStore;

use calm_core::{
    ClaimOutcome, PortError, SessionRepository, Slot, SlotClaim, Therapist, TherapistDirectory,
    TherapistQuery, TimeOfDay, UserKey, SLOT_FORMAT,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const CALM_SCHEMA_VERSION: i64 = 2;

const BOOKING_STATUS_CONFIRMED: &str = "confirmed";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl From<StorageError> for PortError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Serialization(reason) | StorageError::Timestamp(reason) => {
                PortError::Corrupt(reason)
            }
            other => PortError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTherapist {
    pub name: String,
    pub specialties: Vec<String>,
    pub rating: f32,
    pub city: String,
    pub online: bool,
    pub in_person: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub booking_id: i64,
    pub therapist_id: i64,
    pub therapist_name: String,
    pub starts_at: NaiveDateTime,
    pub user_key: String,
    pub emotion: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed therapist directory, bookings ledger and session snapshots.
///
/// The connection sits behind a mutex so the store can be shared across
/// concurrent turns; slot claims additionally run inside a transaction.
pub struct CalmStore {
    conn: Mutex<Connection>,
}

impl CalmStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let mut current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current > CALM_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: CALM_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            conn.execute_batch(include_str!("../migrations/0001_calm_schema.sql"))?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            conn.execute_batch(include_str!("../migrations/0002_session_state.sql"))?;
            conn.execute("PRAGMA user_version = 2", []).map(|_| ())?;
        }

        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_therapist(&self, therapist: &NewTherapist) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "
            INSERT INTO therapists (name, specialty, rating, city, online, in_person)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                therapist.name,
                therapist
                    .specialties
                    .iter()
                    .map(|value| value.trim().to_lowercase())
                    .collect::<Vec<_>>()
                    .join(","),
                f64::from(therapist.rating),
                therapist.city,
                therapist.online,
                therapist.in_person,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Returns false when the slot was already listed.
    pub fn add_availability(
        &self,
        therapist_id: i64,
        starts_at: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "INSERT OR IGNORE INTO availability (therapist_id, slot) VALUES (?1, ?2)",
            params![therapist_id, starts_at.format(SLOT_FORMAT).to_string()],
        )?;
        Ok(changes > 0)
    }

    pub fn therapist_count(&self) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM therapists", [], |row| row.get(0))?)
    }

    /// Loads the demo directory once; returns the number of therapists added.
    pub fn seed_demo_directory(&self) -> Result<usize, StorageError> {
        if self.therapist_count()? > 0 {
            return Ok(0);
        }

        let roster: [(&str, &[&str], f32, &str, bool, bool, &[&str]); 5] = [
            (
                "Dr. Meera Kapoor",
                &["anxiety", "depression"],
                4.8,
                "Mumbai",
                true,
                true,
                &["2027-06-28 10:00", "2027-06-28 15:00", "2027-06-30 18:30"],
            ),
            (
                "Dr. Aman Verma",
                &["grief", "stress"],
                4.5,
                "Delhi",
                false,
                true,
                &["2027-06-27 18:00", "2027-06-28 12:30"],
            ),
            (
                "Dr. Kavita Shah",
                &["joy", "gratitude", "confidence"],
                4.3,
                "Ahmedabad",
                true,
                true,
                &["2027-06-29 09:00"],
            ),
            (
                "Dr. Rohan Iyer",
                &["anxiety", "stress", "trauma"],
                4.6,
                "Pune",
                true,
                false,
                &["2027-06-27 19:00", "2027-06-29 17:30", "2027-07-01 08:30"],
            ),
            (
                "Dr. Sara Thomas",
                &["loneliness", "depression", "anxiety"],
                4.2,
                "Bengaluru",
                true,
                true,
                &["2027-06-28 11:00", "2027-06-30 20:00"],
            ),
        ];

        for (name, specialties, rating, city, online, in_person, slots) in roster {
            let therapist_id = self.insert_therapist(&NewTherapist {
                name: name.to_string(),
                specialties: specialties.iter().map(|value| value.to_string()).collect(),
                rating,
                city: city.to_string(),
                online,
                in_person,
            })?;
            for slot in slots {
                self.add_availability(therapist_id, parse_slot(slot)?)?;
            }
        }

        Ok(roster.len())
    }

    pub fn match_therapists(&self, query: &TherapistQuery) -> Result<Vec<Therapist>, StorageError> {
        let specialty = query.specialty.trim().to_lowercase();
        let mode = query.mode.map(|mode| mode.as_str());
        let conn = self.conn()?;
        let mut statement = conn.prepare(
            "
            SELECT id, name, specialty, rating, city, online, in_person
            FROM therapists
            WHERE lower(specialty) LIKE ?1
              AND (
                ?2 IS NULL
                OR (?2 = 'online' AND online = 1)
                OR (?2 = 'in-person' AND in_person = 1)
              )
            ORDER BY rating DESC, name ASC
            LIMIT ?3
            ",
        )?;

        let rows = statement.query_map(
            params![format!("%{specialty}%"), mode, query.limit as i64],
            |row| {
                let specialty: String = row.get(2)?;
                Ok(Therapist {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    specialties: specialty
                        .split(',')
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty())
                        .collect(),
                    rating: row.get::<_, f64>(3)? as f32,
                    city: row.get(4)?,
                    online: row.get(5)?,
                    in_person: row.get(6)?,
                })
            },
        )?;

        let mut therapists = Vec::new();
        for row in rows {
            therapists.push(row?);
        }
        Ok(therapists)
    }

    /// Earliest open slots for a therapist inside the requested window.
    /// Slots that start before `not_before` are never offered.
    pub fn open_slots(
        &self,
        therapist_id: i64,
        window: TimeOfDay,
        not_before: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<Slot>, StorageError> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(
            "SELECT slot FROM availability WHERE therapist_id = ?1 AND slot >= ?2 ORDER BY slot ASC",
        )?;
        let not_before = not_before.format(SLOT_FORMAT).to_string();
        let rows = statement.query_map(params![therapist_id, not_before], |row| {
            row.get::<_, String>(0)
        })?;

        let mut slots = Vec::new();
        for row in rows {
            if slots.len() >= limit {
                break;
            }
            let starts_at = parse_slot(&row?)?;
            if window.contains(&starts_at) {
                slots.push(Slot {
                    therapist_id,
                    starts_at,
                });
            }
        }
        Ok(slots)
    }

    pub fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimOutcome, StorageError> {
        let slot = claim.starts_at.format(SLOT_FORMAT).to_string();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM availability WHERE therapist_id = ?1 AND slot = ?2",
            params![claim.therapist_id, slot],
        )?;
        if removed == 0 {
            tx.rollback()?;
            return Ok(ClaimOutcome::AlreadyTaken);
        }

        tx.execute(
            "
            INSERT INTO bookings (
                therapist_id,
                therapist_name,
                slot,
                user_key,
                emotion,
                status,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                claim.therapist_id,
                claim.therapist_name,
                slot,
                claim.user_key,
                claim.emotion,
                BOOKING_STATUS_CONFIRMED,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let booking_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(ClaimOutcome::Claimed { booking_id })
    }

    pub fn bookings_for_user(&self, user_key: &str) -> Result<Vec<BookingRecord>, StorageError> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(
            "
            SELECT id, therapist_id, therapist_name, slot, user_key, emotion, status, created_at
            FROM bookings
            WHERE user_key = ?1
            ORDER BY id ASC
            ",
        )?;

        let rows = statement.query_map([user_key], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut bookings = Vec::new();
        for row in rows {
            let (booking_id, therapist_id, therapist_name, slot, user_key, emotion, status, created) =
                row?;
            bookings.push(BookingRecord {
                booking_id,
                therapist_id,
                therapist_name,
                starts_at: parse_slot(&slot)?,
                user_key,
                emotion,
                status,
                created_at: parse_timestamp(&created)?,
            });
        }
        Ok(bookings)
    }

    pub fn load_session(&self, user_key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT snapshot_json FROM session_state WHERE user_key = ?1",
                [user_key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn save_session(&self, user_key: &str, snapshot_json: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "
            INSERT INTO session_state (user_key, snapshot_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_key) DO UPDATE SET
                snapshot_json=excluded.snapshot_json,
                updated_at=excluded.updated_at
            ",
            params![user_key, snapshot_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, user_key: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "DELETE FROM session_state WHERE user_key = ?1",
            [user_key],
        )?;
        Ok(changes > 0)
    }
}

impl TherapistDirectory for CalmStore {
    fn match_therapists(&self, query: &TherapistQuery) -> Result<Vec<Therapist>, PortError> {
        CalmStore::match_therapists(self, query).map_err(PortError::from)
    }

    fn open_slots(
        &self,
        therapist_id: i64,
        window: TimeOfDay,
        not_before: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<Slot>, PortError> {
        CalmStore::open_slots(self, therapist_id, window, not_before, limit)
            .map_err(PortError::from)
    }

    fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimOutcome, PortError> {
        CalmStore::claim_slot(self, claim).map_err(PortError::from)
    }
}

impl SessionRepository for CalmStore {
    fn load_session(&self, user: &UserKey) -> Result<Option<String>, PortError> {
        CalmStore::load_session(self, user.as_str()).map_err(PortError::from)
    }

    fn save_session(&self, user: &UserKey, snapshot_json: &str) -> Result<(), PortError> {
        CalmStore::save_session(self, user.as_str(), snapshot_json).map_err(PortError::from)
    }

    fn delete_session(&self, user: &UserKey) -> Result<(), PortError> {
        CalmStore::delete_session(self, user.as_str())
            .map(|_| ())
            .map_err(PortError::from)
    }
}

fn parse_slot(value: &str) -> Result<NaiveDateTime, StorageError> {
    NaiveDateTime::parse_from_str(value, SLOT_FORMAT)
        .map_err(|err| StorageError::Timestamp(format!("{value}: {err}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calm_core::SessionMode;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn seeded() -> CalmStore {
        let store = CalmStore::open_in_memory().expect("open store");
        assert_eq!(store.seed_demo_directory().expect("seed"), 5);
        store
    }

    fn long_ago() -> NaiveDateTime {
        parse_slot("2026-01-01 00:00").expect("slot")
    }

    fn claim_for(store: &CalmStore, user: &str, slot: &str) -> SlotClaim {
        let therapist = store
            .match_therapists(&TherapistQuery {
                specialty: "depression".to_string(),
                mode: None,
                limit: 1,
            })
            .expect("match")
            .remove(0);
        SlotClaim {
            therapist_id: therapist.id,
            therapist_name: therapist.name,
            starts_at: parse_slot(slot).expect("slot"),
            user_key: user.to_string(),
            emotion: "depression".to_string(),
        }
    }

    #[test]
    fn migration_creates_tables_and_sets_version() {
        let store = CalmStore::open_in_memory().expect("open store");
        for table in ["therapists", "availability", "bookings", "session_state"] {
            assert!(store.table_exists(table).expect("table check"), "{table}");
        }
        assert_eq!(
            store.schema_version().expect("schema version"),
            CALM_SCHEMA_VERSION
        );
    }

    #[test]
    fn seeding_is_idempotent() {
        let store = seeded();
        assert_eq!(store.seed_demo_directory().expect("reseed"), 0);
        assert_eq!(store.therapist_count().expect("count"), 5);
    }

    #[test]
    fn matches_rank_by_rating_and_respect_mode() {
        let store = seeded();
        let all = store
            .match_therapists(&TherapistQuery {
                specialty: "Anxiety".to_string(),
                mode: None,
                limit: 3,
            })
            .expect("match");
        let names = all.iter().map(|t| t.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["Dr. Meera Kapoor", "Dr. Rohan Iyer", "Dr. Sara Thomas"]
        );

        let in_person = store
            .match_therapists(&TherapistQuery {
                specialty: "anxiety".to_string(),
                mode: Some(SessionMode::InPerson),
                limit: 3,
            })
            .expect("match");
        assert!(in_person.iter().all(|t| t.in_person));
        assert!(!in_person.iter().any(|t| t.name == "Dr. Rohan Iyer"));
    }

    #[test]
    fn open_slots_filter_by_window_in_time_order() {
        let store = seeded();
        let meera = claim_for(&store, "u", "2027-06-28 10:00").therapist_id;
        let evening = store
            .open_slots(meera, TimeOfDay::Evening, long_ago(), 5)
            .expect("slots");
        assert_eq!(
            evening.iter().map(Slot::label).collect::<Vec<_>>(),
            vec!["2027-06-30 18:30"]
        );
        let any = store
            .open_slots(meera, TimeOfDay::Any, long_ago(), 2)
            .expect("slots");
        assert_eq!(
            any.iter().map(Slot::label).collect::<Vec<_>>(),
            vec!["2027-06-28 10:00", "2027-06-28 15:00"]
        );
    }

    #[test]
    fn slots_that_already_started_are_not_offered() {
        let store = seeded();
        let meera = claim_for(&store, "u", "2027-06-28 10:00").therapist_id;
        let later = store
            .open_slots(
                meera,
                TimeOfDay::Any,
                parse_slot("2027-06-28 10:00").expect("slot"),
                5,
            )
            .expect("slots");
        assert_eq!(
            later.iter().map(Slot::label).collect::<Vec<_>>(),
            vec!["2027-06-28 10:00", "2027-06-28 15:00", "2027-06-30 18:30"]
        );

        let after_first = store
            .open_slots(
                meera,
                TimeOfDay::Any,
                parse_slot("2027-06-28 10:01").expect("slot"),
                5,
            )
            .expect("slots");
        assert_eq!(
            after_first.iter().map(Slot::label).collect::<Vec<_>>(),
            vec!["2027-06-28 15:00", "2027-06-30 18:30"]
        );

        let gone = store
            .open_slots(
                meera,
                TimeOfDay::Any,
                parse_slot("2028-01-01 00:00").expect("slot"),
                5,
            )
            .expect("slots");
        assert!(gone.is_empty());
    }

    #[test]
    fn claiming_removes_slot_and_second_claim_is_rejected() {
        let store = seeded();
        let first = claim_for(&store, "alice", "2027-06-28 15:00");
        let second = claim_for(&store, "bob", "2027-06-28 15:00");

        assert!(matches!(
            store.claim_slot(&first).expect("claim"),
            ClaimOutcome::Claimed { .. }
        ));
        assert_eq!(
            store.claim_slot(&second).expect("claim"),
            ClaimOutcome::AlreadyTaken
        );

        let remaining = store
            .open_slots(first.therapist_id, TimeOfDay::Any, long_ago(), 10)
            .expect("slots");
        assert!(!remaining.iter().any(|slot| slot.label() == "2027-06-28 15:00"));

        let bookings = store.bookings_for_user("alice").expect("bookings");
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].status, "confirmed");
        assert!(store.bookings_for_user("bob").expect("bookings").is_empty());
    }

    #[test]
    fn concurrent_claims_for_same_slot_yield_one_booking() {
        let store = Arc::new(seeded());
        let barrier = Arc::new(Barrier::new(4));
        let handles = (0..4)
            .map(|index| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let claim = claim_for(&store, &format!("user-{index}"), "2027-06-28 10:00");
                    barrier.wait();
                    store.claim_slot(&claim).expect("claim")
                })
            })
            .collect::<Vec<_>>();

        let outcomes = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect::<Vec<_>>();
        let claimed = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, ClaimOutcome::Claimed { .. }))
            .count();
        assert_eq!(claimed, 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| **outcome == ClaimOutcome::AlreadyTaken)
                .count(),
            3
        );
    }

    #[test]
    fn session_snapshot_upserts_and_deletes() {
        let store = CalmStore::open_in_memory().expect("open store");
        assert_eq!(store.load_session("u1").expect("load"), None);
        store.save_session("u1", r#"{"v":1}"#).expect("save");
        store.save_session("u1", r#"{"v":2}"#).expect("save again");
        assert_eq!(
            store.load_session("u1").expect("load").as_deref(),
            Some(r#"{"v":2}"#)
        );
        assert!(store.delete_session("u1").expect("delete"));
        assert!(!store.delete_session("u1").expect("delete again"));
    }

    #[test]
    fn port_errors_classify_corrupt_versus_unavailable() {
        assert!(matches!(
            PortError::from(StorageError::Timestamp("bad".to_string())),
            PortError::Corrupt(_)
        ));
        assert!(matches!(
            PortError::from(StorageError::LockPoisoned),
            PortError::Unavailable(_)
        ));
    }
}

use crate::StorageError;
use calm_core::{PortError, TurnMemory, TurnRecord, UserKey};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Append-only JSON-lines turn log, one file per user key.
#[derive(Debug, Clone)]
pub struct JsonlTurnStore {
    root: PathBuf,
}

struct LockedLog {
    file: File,
}

impl LockedLog {
    fn exclusive(file: File) -> Result<Self, std::io::Error> {
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }

    fn shared(file: File) -> Result<Self, std::io::Error> {
        FileExt::lock_shared(&file)?;
        Ok(Self { file })
    }
}

impl Drop for LockedLog {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl JsonlTurnStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are already escaped, so the file always lands inside `root`.
    pub fn path_for(&self, user: &UserKey) -> PathBuf {
        self.root.join(format!("{}.jsonl", user.as_str()))
    }

    pub fn append_record(&self, user: &UserKey, record: &TurnRecord) -> Result<(), StorageError> {
        let line = serde_json::to_string(record)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(user))?;
        let mut locked = LockedLog::exclusive(file)?;
        locked.file.write_all(line.as_bytes())?;
        locked.file.write_all(b"\n")?;
        locked.file.flush()?;
        locked.file.sync_data()?;
        Ok(())
    }

    /// Up to `limit` newest records, oldest first. Lines that fail to parse
    /// are skipped.
    pub fn recent(&self, user: &UserKey, limit: usize) -> Result<Vec<TurnRecord>, StorageError> {
        let file = match File::open(self.path_for(user)) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let locked = LockedLog::shared(file)?;

        let mut records = Vec::new();
        for line in BufReader::new(&locked.file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<TurnRecord>(&line) {
                records.push(record);
            }
        }

        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }

    pub fn clear_user(&self, user: &UserKey) -> Result<bool, StorageError> {
        match fs::remove_file(self.path_for(user)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl TurnMemory for JsonlTurnStore {
    fn fetch(&self, user: &UserKey, limit: usize) -> Result<Vec<TurnRecord>, PortError> {
        self.recent(user, limit).map_err(PortError::from)
    }

    fn append(&self, user: &UserKey, record: &TurnRecord) -> Result<(), PortError> {
        self.append_record(user, record).map_err(PortError::from)
    }

    fn clear(&self, user: &UserKey) -> Result<bool, PortError> {
        self.clear_user(user).map_err(PortError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(minute: u32, input: &str) -> TurnRecord {
        TurnRecord {
            timestamp: Utc
                .with_ymd_and_hms(2026, 2, 1, 9, minute, 0)
                .single()
                .expect("timestamp"),
            user_input: input.to_string(),
            agent_output: format!("reply to {input}"),
            emotion: Some("anxiety".to_string()),
            details: None,
            suggestion: None,
        }
    }

    #[test]
    fn missing_log_reads_as_empty_history() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlTurnStore::open(dir.path()).expect("open");
        let user = UserKey::parse("nobody").expect("user");
        assert!(store.recent(&user, 5).expect("recent").is_empty());
        assert!(!store.clear_user(&user).expect("clear"));
    }

    #[test]
    fn recent_returns_newest_window_in_order() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlTurnStore::open(dir.path()).expect("open");
        let user = UserKey::parse("alice").expect("user");
        for (minute, input) in ["one", "two", "three", "four"].into_iter().enumerate() {
            store
                .append_record(&user, &record(minute as u32, input))
                .expect("append");
        }

        let recent = store.recent(&user, 2).expect("recent");
        assert_eq!(
            recent.iter().map(|r| r.user_input.as_str()).collect::<Vec<_>>(),
            vec!["three", "four"]
        );
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlTurnStore::open(dir.path()).expect("open");
        let user = UserKey::parse("bob").expect("user");
        store.append_record(&user, &record(1, "first")).expect("append");
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.path_for(&user))
            .expect("open log");
        file.write_all(b"{not json\n\n").expect("write junk");
        store.append_record(&user, &record(2, "second")).expect("append");

        let recent = store.recent(&user, 10).expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1], record(2, "second"));
    }

    #[test]
    fn users_are_isolated_and_clear_removes_only_one() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlTurnStore::open(dir.path()).expect("open");
        let alice = UserKey::parse("alice").expect("user");
        let escaped = UserKey::parse("../alice").expect("user");
        store.append_record(&alice, &record(1, "mine")).expect("append");
        store.append_record(&escaped, &record(2, "theirs")).expect("append");

        assert!(store.path_for(&escaped).starts_with(dir.path()));
        assert!(store.clear_user(&escaped).expect("clear"));
        assert!(store.recent(&escaped, 5).expect("recent").is_empty());
        assert_eq!(store.recent(&alice, 5).expect("recent").len(), 1);
    }
}

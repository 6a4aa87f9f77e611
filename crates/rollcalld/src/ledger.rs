//! Attendance ledger — durable record of who has been marked present.
//!
//! The durable store is the source of truth; the in-memory name set is a
//! cache that is re-synced from the store on every first-time mark, since
//! another session (a restart, a second operator window) may have advanced
//! the ledger independently.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One attendance entry. At most one per name per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub time: String,
}

/// Durable document store holding the ledger as a JSON array.
pub trait LedgerStore: Send {
    fn load(&self) -> Result<Vec<AttendanceRecord>, LedgerError>;
    fn save(&self, records: &[AttendanceRecord]) -> Result<(), LedgerError>;
    fn clear(&self) -> Result<(), LedgerError>;
}

/// JSON file store. Writes go to a temp file first, then rename — a crash
/// mid-write never corrupts the ledger.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(records)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), LedgerError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store, for tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<AttendanceRecord>>,
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.records.lock().unwrap().clone())
    }

    fn save(&self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        *self.records.lock().unwrap() = records.to_vec();
        Ok(())
    }

    fn clear(&self) -> Result<(), LedgerError> {
        self.records.lock().unwrap().clear();
        Ok(())
    }
}

/// The attendance ledger: a store plus its in-memory mirror.
pub struct AttendanceLedger {
    store: Box<dyn LedgerStore>,
    records: Vec<AttendanceRecord>,
    marked: HashSet<String>,
}

impl AttendanceLedger {
    pub fn new(store: Box<dyn LedgerStore>) -> Self {
        Self {
            store,
            records: Vec::new(),
            marked: HashSet::new(),
        }
    }

    /// Replace the in-memory mirror with the store contents. Store errors
    /// keep the current mirror (fail-open).
    pub fn sync_from_store(&mut self) {
        match self.store.load() {
            Ok(records) => {
                self.marked = records.iter().map(|r| r.name.clone()).collect();
                self.records = records;
            }
            Err(e) => {
                tracing::warn!(error = %e, "ledger load failed; keeping in-memory state");
            }
        }
    }

    /// Mark `name` present. Returns false when already marked — in memory
    /// or in the durable ledger. Safe to call redundantly every tick.
    ///
    /// A persistence failure does not undo the mark: attendance is
    /// assistive, so the in-memory session keeps the record and the write
    /// is only logged.
    pub fn mark_present(&mut self, name: &str) -> bool {
        if self.marked.contains(name) {
            return false;
        }

        // First sighting this session: pull in anything another session
        // wrote before deciding this is genuinely new.
        match self.store.load() {
            Ok(persisted) => {
                for rec in persisted {
                    if self.marked.insert(rec.name.clone()) {
                        self.records.push(rec);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "ledger re-sync failed; using in-memory state");
            }
        }
        if self.marked.contains(name) {
            return false;
        }

        let record = AttendanceRecord {
            name: name.to_string(),
            time: Local::now().format(TIME_FORMAT).to_string(),
        };
        self.records.push(record);
        self.marked.insert(name.to_string());

        if let Err(e) = self.store.save(&self.records) {
            tracing::warn!(name, error = %e, "ledger write failed; mark kept in memory only");
        }
        true
    }

    /// Roster names not yet marked present, in roster order.
    pub fn list_absent(&self, roster_names: &[String]) -> Vec<String> {
        roster_names
            .iter()
            .filter(|n| !self.marked.contains(n.as_str()))
            .cloned()
            .collect()
    }

    /// Empty the ledger entirely. Subsequent marks behave as on a fresh
    /// session. A store failure leaves the durable ledger untouched and
    /// is propagated to the operator.
    pub fn clear(&mut self) -> Result<(), LedgerError> {
        self.store.clear()?;
        self.records.clear();
        self.marked.clear();
        Ok(())
    }

    /// Human-readable report: present entries with times, then absentees.
    pub fn export_report(&self, roster_names: &[String]) -> String {
        let mut out = String::from("📋 Attendance Report\n\nPresent:\n");
        for rec in &self.records {
            out.push_str(&format!("✔ {} at {}\n", rec.name, rec.time));
        }
        out.push_str("\nAbsent:\n");
        for name in self.list_absent(roster_names) {
            out.push_str(&format!("✘ {name}\n"));
        }
        out
    }

    pub fn present_count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_ledger() -> AttendanceLedger {
        AttendanceLedger::new(Box::<MemoryStore>::default())
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mark_present_inserts_once() {
        let mut ledger = memory_ledger();
        assert!(ledger.mark_present("alice"));
        assert!(!ledger.mark_present("alice"));
        assert_eq!(ledger.present_count(), 1);
        assert_eq!(ledger.records()[0].name, "alice");
    }

    #[test]
    fn test_mark_present_idempotent_across_many_ticks() {
        let mut ledger = memory_ledger();
        for _ in 0..50 {
            ledger.mark_present("alice");
        }
        assert_eq!(ledger.present_count(), 1);
    }

    #[test]
    fn test_mark_present_sees_other_sessions_records() {
        // Another session already wrote alice to the shared store.
        let store = Box::<MemoryStore>::default();
        store
            .save(&[AttendanceRecord {
                name: "alice".into(),
                time: "09:00:00".into(),
            }])
            .unwrap();
        let mut ledger = AttendanceLedger::new(store);

        assert!(!ledger.mark_present("alice"));
        assert_eq!(ledger.present_count(), 1);
        // The pre-existing timestamp survives.
        assert_eq!(ledger.records()[0].time, "09:00:00");
    }

    #[test]
    fn test_list_absent_preserves_roster_order() {
        let mut ledger = memory_ledger();
        ledger.mark_present("bob");
        let absent = ledger.list_absent(&names(&["alice", "bob", "carol"]));
        assert_eq!(absent, names(&["alice", "carol"]));
    }

    #[test]
    fn test_absent_union_present_covers_roster() {
        let roster = names(&["alice", "bob", "carol"]);
        let mut ledger = memory_ledger();
        ledger.mark_present("carol");
        ledger.mark_present("alice");

        let mut all: Vec<String> = ledger.list_absent(&roster);
        all.extend(ledger.records().iter().map(|r| r.name.clone()));
        all.sort();
        let mut expected = roster.clone();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_clear_resets_session() {
        let mut ledger = memory_ledger();
        ledger.mark_present("alice");
        ledger.mark_present("bob");
        ledger.clear().unwrap();
        assert_eq!(ledger.present_count(), 0);
        let roster = names(&["alice", "bob"]);
        assert_eq!(ledger.list_absent(&roster), roster);
        // Fresh session: marking works again.
        assert!(ledger.mark_present("alice"));
    }

    #[test]
    fn test_export_report_format() {
        let store = Box::<MemoryStore>::default();
        store
            .save(&[AttendanceRecord {
                name: "alice".into(),
                time: "09:15:00".into(),
            }])
            .unwrap();
        let mut ledger = AttendanceLedger::new(store);
        ledger.sync_from_store();

        let report = ledger.export_report(&names(&["alice", "bob"]));
        assert!(report.starts_with("📋 Attendance Report\n\nPresent:\n"));
        assert!(report.contains("✔ alice at 09:15:00\n"));
        assert!(report.contains("\nAbsent:\n"));
        assert!(report.contains("✘ bob\n"));
        assert!(!report.contains("✘ alice"));
    }

    struct FailingStore;

    impl LedgerStore for FailingStore {
        fn load(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
            Err(std::io::Error::other("store offline").into())
        }
        fn save(&self, _: &[AttendanceRecord]) -> Result<(), LedgerError> {
            Err(std::io::Error::other("store offline").into())
        }
        fn clear(&self) -> Result<(), LedgerError> {
            Err(std::io::Error::other("store offline").into())
        }
    }

    #[test]
    fn test_mark_present_fail_open_on_store_errors() {
        let mut ledger = AttendanceLedger::new(Box::new(FailingStore));
        assert!(ledger.mark_present("alice"));
        assert!(!ledger.mark_present("alice"));
        assert_eq!(ledger.present_count(), 1);
    }

    #[test]
    fn test_clear_propagates_store_error() {
        let mut ledger = AttendanceLedger::new(Box::new(FailingStore));
        assert!(ledger.clear().is_err());
    }

    #[test]
    fn test_json_file_store_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "rollcall-ledger-test-{}.json",
            uuid::Uuid::new_v4()
        ));
        let store = JsonFileStore::new(path.clone());

        assert!(store.load().unwrap().is_empty());

        let records = vec![AttendanceRecord {
            name: "alice".into(),
            time: "10:00:00".into(),
        }];
        store.save(&records).unwrap();
        assert_eq!(store.load().unwrap(), records);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
        let _ = std::fs::remove_file(path);
    }
}

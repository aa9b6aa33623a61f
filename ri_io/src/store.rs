use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use ri_core::{Error, OperationKey, ProgressRecord, Status};
use tracing::debug;

struct Entry {
    generation: u64,
    record: ProgressRecord,
}

/// Shared, pollable progress records keyed by operation.
///
/// Cloning is cheap and every clone sees the same map. The lock is only ever
/// held while a record is copied or mutated in memory, so pollers never wait
/// on script output or network I/O. Records in a terminal state are frozen:
/// the only way to change one is to replace it with [`ProgressStore::set`] or
/// [`ProgressStore::begin`].
#[derive(Clone, Default)]
pub struct ProgressStore {
    entries: Arc<RwLock<HashMap<OperationKey, Entry>>>,
    generations: Arc<AtomicU64>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for `key` wholesale. Handles issued for an earlier
    /// record stop applying once this returns.
    pub fn set(&self, key: OperationKey, record: ProgressRecord) {
        let generation = self.next_generation();
        self.write().insert(key, Entry { generation, record });
    }

    pub fn get(&self, key: &OperationKey) -> Option<ProgressRecord> {
        self.read().get(key).map(|entry| entry.record.clone())
    }

    /// Returns `false` without touching anything when the key is unknown or
    /// the record has already reached a terminal state.
    pub fn update(
        &self,
        key: &OperationKey,
        percentage: u8,
        message: impl Into<String>,
        status: Option<Status>,
    ) -> bool {
        let message = message.into();
        self.mutate(key, None, |record| {
            record.percentage = percentage.min(100);
            record.message = message;
            if let Some(status) = status {
                record.status = status;
            }
        })
    }

    /// Write a terminal state. A `None` percentage leaves the current value alone.
    pub fn finish(
        &self,
        key: &OperationKey,
        status: Status,
        percentage: Option<u8>,
        message: impl Into<String>,
    ) -> bool {
        let message = message.into();
        self.mutate(key, None, |record| {
            apply_finish(record, status, percentage, message)
        })
    }

    /// Start a new operation for `key`, failing if one is still in flight.
    /// The check and the insert happen under one lock.
    pub fn begin(&self, key: OperationKey, record: ProgressRecord) -> Result<ProgressHandle, Error> {
        let generation = self.next_generation();
        {
            let mut entries = self.write();
            if let Some(existing) = entries.get(&key)
                && matches!(existing.record.status, Status::Running | Status::Paused)
            {
                return Err(Error::AlreadyRunning {
                    key: key.to_string(),
                });
            }
            entries.insert(key.clone(), Entry { generation, record });
        }

        Ok(ProgressHandle {
            store: self.clone(),
            key,
            generation,
        })
    }

    /// Every record currently held, ordered by key.
    pub fn snapshot(&self) -> Vec<(OperationKey, ProgressRecord)> {
        let mut all: Vec<_> = self
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.record.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn mutate(
        &self,
        key: &OperationKey,
        generation: Option<u64>,
        apply: impl FnOnce(&mut ProgressRecord),
    ) -> bool {
        let mut entries = self.write();
        let Some(entry) = entries.get_mut(key) else {
            debug!(%key, "dropping update for unknown operation");
            return false;
        };
        if generation.is_some_and(|g| g != entry.generation) {
            debug!(%key, "dropping update from a superseded run");
            return false;
        }
        if entry.record.is_terminal() {
            debug!(%key, status = ?entry.record.status, "dropping update after terminal state");
            return false;
        }
        apply(&mut entry.record);
        true
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<OperationKey, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<OperationKey, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply_finish(record: &mut ProgressRecord, status: Status, percentage: Option<u8>, message: String) {
    record.status = status;
    record.message = message;
    if let Some(percentage) = percentage {
        record.percentage = percentage.min(100);
    }
    if status.is_terminal() {
        record.eta = None;
    }
}

/// Write access to the record of one specific run. Writes are ignored once a
/// newer run has replaced the record, so tasks that outlive their run can
/// never touch its successor.
#[derive(Clone)]
pub struct ProgressHandle {
    store: ProgressStore,
    key: OperationKey,
    generation: u64,
}

impl ProgressHandle {
    pub fn update(&self, percentage: u8, message: impl Into<String>) -> bool {
        let message = message.into();
        self.store.mutate(&self.key, Some(self.generation), |record| {
            record.percentage = percentage.min(100);
            record.message = message;
        })
    }

    pub fn set_message(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.store
            .mutate(&self.key, Some(self.generation), |record| record.message = message)
    }

    pub fn set_transfer(
        &self,
        percentage: u8,
        message: &str,
        speed: Option<String>,
        eta: Option<String>,
    ) -> bool {
        self.store.mutate(&self.key, Some(self.generation), |record| {
            record.percentage = percentage.min(100);
            if record.message != message {
                record.message = message.to_string();
            }
            record.speed = speed;
            record.eta = eta;
        })
    }

    pub fn finish(&self, status: Status, percentage: Option<u8>, message: impl Into<String>) -> bool {
        let message = message.into();
        self.store.mutate(&self.key, Some(self.generation), |record| {
            apply_finish(record, status, percentage, message)
        })
    }

    pub fn get(&self) -> Option<ProgressRecord> {
        self.store.get(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn update_on_missing_key_is_a_no_op() {
        let store = ProgressStore::new();
        assert!(!store.update(&OperationKey::Install, 50, "late", None));
        assert!(store.get(&OperationKey::Install).is_none());
    }

    #[test]
    fn update_changes_fields_and_optional_status() {
        let store = ProgressStore::new();
        let key = OperationKey::download("win11");
        store.set(key.clone(), ProgressRecord::started("starting download"));

        assert!(store.update(&key, 40, "downloading", None));
        let record = store.get(&key).unwrap();
        assert_eq!(record.percentage, 40);
        assert_eq!(record.message, "downloading");
        assert_eq!(record.status, Status::Running);

        assert!(store.update(&key, 100, "download complete", Some(Status::Succeeded)));
        assert_eq!(store.get(&key).unwrap().status, Status::Succeeded);
    }

    #[test]
    fn terminal_records_are_frozen_until_replaced() {
        let store = ProgressStore::new();
        let key = OperationKey::Install;
        store.set(key.clone(), ProgressRecord::started("starting installation"));
        assert!(store.finish(&key, Status::Stopped, None, "installation stopped"));

        assert!(!store.update(&key, 95, "rebooting phase", None));
        assert!(!store.finish(&key, Status::Failed, None, "exit status 143"));
        let frozen = store.get(&key).unwrap();
        assert_eq!(frozen.status, Status::Stopped);
        assert_eq!(frozen.message, "installation stopped");

        store.set(key.clone(), ProgressRecord::started("again"));
        assert!(store.update(&key, 30, "downloading phase", None));
    }

    #[test]
    fn begin_rejects_a_running_operation() {
        let store = ProgressStore::new();
        let first = store
            .begin(OperationKey::Install, ProgressRecord::started("first"))
            .unwrap();
        first.update(30, "downloading phase");

        let err = store
            .begin(OperationKey::Install, ProgressRecord::started("second"))
            .err()
            .unwrap();
        assert_eq!(
            err,
            Error::AlreadyRunning {
                key: "install".into()
            }
        );
        let record = store.get(&OperationKey::Install).unwrap();
        assert_eq!(record.message, "downloading phase");
        assert_eq!(record.percentage, 30);
    }

    #[test]
    fn begin_replaces_terminal_records() {
        let store = ProgressStore::new();
        let first = store
            .begin(OperationKey::Install, ProgressRecord::started("first"))
            .unwrap();
        first.finish(Status::Failed, None, "exit status 1");

        let second = store
            .begin(OperationKey::Install, ProgressRecord::started("second"))
            .unwrap();
        assert_eq!(second.get().unwrap().status, Status::Running);
    }

    #[test]
    fn stale_handles_cannot_touch_a_newer_run() {
        let store = ProgressStore::new();
        let old = store
            .begin(OperationKey::Install, ProgressRecord::started("first"))
            .unwrap();
        old.finish(Status::Stopped, None, "installation stopped");

        let current = store
            .begin(OperationKey::Install, ProgressRecord::started("second"))
            .unwrap();
        assert!(!old.update(70, "installing phase"));
        assert!(!old.finish(Status::Succeeded, Some(100), "installation complete"));
        assert!(current.update(30, "downloading phase"));

        let record = store.get(&OperationKey::Install).unwrap();
        assert_eq!(record.percentage, 30);
        assert_eq!(record.status, Status::Running);
    }

    #[test]
    fn finish_clears_eta_but_keeps_last_speed() {
        let store = ProgressStore::new();
        let handle = store
            .begin(OperationKey::download("img"), ProgressRecord::started("starting download"))
            .unwrap();
        handle.set_transfer(50, "downloading", Some("1.0 MB/s".into()), Some("3s".into()));
        handle.finish(Status::Succeeded, Some(100), "download complete");

        let record = handle.get().unwrap();
        assert_eq!(record.percentage, 100);
        assert_eq!(record.speed.as_deref(), Some("1.0 MB/s"));
        assert!(record.eta.is_none());
    }

    #[test]
    fn concurrent_writers_and_readers_see_whole_records() {
        let store = ProgressStore::new();
        let key = OperationKey::download("big");
        store.set(key.clone(), ProgressRecord::started("starting download"));

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                let key = key.clone();
                thread::spawn(move || {
                    for pct in 0..=100u8 {
                        store.update(&key, pct, format!("writer {i} at {pct}"), None);
                    }
                })
            })
            .collect();

        for _ in 0..1000 {
            let record = store.get(&key).unwrap();
            if record.percentage > 0 {
                assert!(record.message.ends_with(&format!("at {}", record.percentage)));
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }

    #[test]
    fn snapshot_is_sorted_by_key() {
        let store = ProgressStore::new();
        store.set(OperationKey::download("b"), ProgressRecord::ready());
        store.set(OperationKey::Install, ProgressRecord::ready());
        store.set(OperationKey::download("a"), ProgressRecord::ready());

        let keys: Vec<String> = store.snapshot().iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["install", "download:a", "download:b"]);
    }
}

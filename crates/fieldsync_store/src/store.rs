//! The outbox store: journal-backed collections of offline records.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::journal::{AppendEntry, Journal, JournalEntry};
use crate::record::{Credential, OfflineRecord, RecordPayload};
use crate::types::{RecordId, RecordKind};
use fieldsync_storage::{FileBackend, InMemoryBackend};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// The durable offline record store.
///
/// `OutboxStore` holds one collection per [`RecordKind`] plus secondary
/// indexes by creation time and batch correlation key. Every mutation is
/// written to the journal before the in-memory image changes, so the
/// image is always reconstructible by replay.
///
/// A store handle is created once and shared (`Arc<OutboxStore>`); the
/// directory lock extends the single-writer guarantee across processes,
/// turning a second opener into [`StoreError::StoreLocked`].
///
/// Records marked synced survive until [`prune_synced`](Self::prune_synced)
/// runs; a crash in between simply leaves them for the next pass. Pruning
/// is space reclamation, never a correctness requirement.
pub struct OutboxStore {
    inner: Mutex<Inner>,
    _dir: Option<StoreDir>,
}

struct Inner {
    journal: Journal,
    image: Image,
}

impl OutboxStore {
    /// Opens a store at `path` with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreLocked`] if another process holds the
    /// store, [`StoreError::JournalCorruption`] if replay fails mid-file,
    /// or an I/O error.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a store at `path` with a custom configuration.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open_with_create_dirs(&dir.journal_path())?;
        let journal = Journal::new(Box::new(backend), config.sync_on_write);
        Self::from_journal(journal, Some(dir))
    }

    /// Opens an ephemeral store for tests; nothing touches the disk.
    pub fn open_in_memory() -> StoreResult<Self> {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        Self::from_journal(journal, None)
    }

    fn from_journal(mut journal: Journal, dir: Option<StoreDir>) -> StoreResult<Self> {
        let entries = journal.replay()?;
        let mut image = Image::default();
        for entry in entries {
            image.apply(entry);
        }

        Ok(Self {
            inner: Mutex::new(Inner { journal, image }),
            _dir: dir,
        })
    }

    /// Appends a new record in Created state and returns its id.
    ///
    /// The record kind is derived from the payload variant. The
    /// credential is captured with the record and used verbatim at
    /// submission time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateBatchKey`] if a live batch record
    /// already carries the payload's correlation key, or a storage error
    /// if the journal write fails (quota, I/O).
    pub fn append(&self, payload: RecordPayload, credential: Credential) -> StoreResult<RecordId> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        if let RecordPayload::Batch { batch_key, .. } = &payload {
            if inner.image.batch_keys.contains_key(batch_key) {
                return Err(StoreError::DuplicateBatchKey {
                    key: batch_key.clone(),
                });
            }
        }

        let id = RecordId::new(inner.image.next_id);
        let entry = JournalEntry::Append(AppendEntry {
            id,
            kind: payload.kind(),
            created_at_ms: now_ms(),
            batch_key: payload.batch_key().map(ToString::to_string),
            credential: credential.as_str().to_string(),
            data: payload.data().clone(),
            synced: false,
        });

        inner.journal.append(&entry)?;
        inner.image.apply(entry);
        Ok(id)
    }

    /// Returns every record of a kind, synced or not, in id order.
    ///
    /// Reads serve from the replayed in-memory image and cannot fail.
    #[must_use]
    pub fn list_all(&self, kind: RecordKind) -> Vec<OfflineRecord> {
        let inner = self.inner.lock();
        inner
            .image
            .collection(kind)
            .records
            .values()
            .cloned()
            .collect()
    }

    /// Marks a record as synced after a confirmed remote submission.
    ///
    /// Idempotent: a missing or already-synced record is a no-op `Ok`.
    /// The flag never transitions back to false.
    pub fn mark_synced(&self, kind: RecordKind, id: RecordId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        match inner.image.collection(kind).records.get(&id) {
            None => return Ok(()),
            Some(record) if record.synced => return Ok(()),
            Some(_) => {}
        }

        let entry = JournalEntry::MarkSynced { kind, id };
        inner.journal.append(&entry)?;
        inner.image.apply(entry);
        Ok(())
    }

    /// Deletes every synced record of a kind and returns how many went.
    ///
    /// Created records are never touched; the scan and the removal run
    /// under the store lock, so a concurrent append cannot slip into the
    /// pruned set. Zero synced records means no journal write at all.
    pub fn prune_synced(&self, kind: RecordKind) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let any_synced = inner
            .image
            .collection(kind)
            .records
            .values()
            .any(|r| r.synced);
        if !any_synced {
            return Ok(0);
        }

        let entry = JournalEntry::PruneSynced { kind };
        inner.journal.append(&entry)?;
        Ok(inner.image.apply(entry))
    }

    /// Number of currently-stored records of a kind, synced or not.
    #[must_use]
    pub fn count(&self, kind: RecordKind) -> usize {
        self.inner.lock().image.collection(kind).records.len()
    }

    /// Total record count across every kind.
    #[must_use]
    pub fn total_count(&self) -> usize {
        let inner = self.inner.lock();
        RecordKind::ALL
            .iter()
            .map(|&kind| inner.image.collection(kind).records.len())
            .sum()
    }

    /// Returns the event records correlated to a batch key, in id order.
    #[must_use]
    pub fn find_events_for_batch(&self, batch_key: &str) -> Vec<OfflineRecord> {
        let inner = self.inner.lock();
        let Some(ids) = inner.image.event_keys.get(batch_key) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.image.events.records.get(id).cloned())
            .collect()
    }

    /// Returns the batch record with the given correlation key, if any.
    #[must_use]
    pub fn find_batch_by_key(&self, batch_key: &str) -> Option<OfflineRecord> {
        let inner = self.inner.lock();
        let id = inner.image.batch_keys.get(batch_key)?;
        inner.image.batches.records.get(id).cloned()
    }

    /// Returns records of a kind created in `[from_ms, to_ms]`, oldest
    /// first.
    #[must_use]
    pub fn created_between(&self, kind: RecordKind, from_ms: u64, to_ms: u64) -> Vec<OfflineRecord> {
        let inner = self.inner.lock();
        let collection = inner.image.collection(kind);
        collection
            .by_created
            .range((from_ms, RecordId::new(0))..=(to_ms, RecordId::new(u64::MAX)))
            .filter_map(|&(_, id)| collection.records.get(&id).cloned())
            .collect()
    }

    /// Drops every record of every kind.
    ///
    /// Ids are not reset; the next append continues the sequence.
    pub fn clear_all(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let empty = RecordKind::ALL
            .iter()
            .all(|&kind| inner.image.collection(kind).records.is_empty());
        if empty {
            return Ok(());
        }

        inner.journal.append(&JournalEntry::Clear)?;
        inner.image.apply(JournalEntry::Clear);
        Ok(())
    }

    /// Rewrites the journal down to the live records.
    ///
    /// The rewritten journal starts with an id high-water entry so a
    /// pruned record's id can never be reassigned after reopen.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let mut entries = vec![JournalEntry::NextId {
            next: inner.image.next_id,
        }];

        let mut live: Vec<&OfflineRecord> = inner
            .image
            .events
            .records
            .values()
            .chain(inner.image.batches.records.values())
            .collect();
        live.sort_by_key(|record| record.id);

        for record in live {
            entries.push(JournalEntry::Append(AppendEntry {
                id: record.id,
                kind: record.payload.kind(),
                created_at_ms: record.created_at_ms,
                batch_key: record.payload.batch_key().map(ToString::to_string),
                credential: record.credential.as_str().to_string(),
                data: record.payload.data().clone(),
                synced: record.synced,
            }));
        }

        inner.journal.rewrite(&entries)
    }

    /// Current journal size in bytes; shrinks after [`compact`](Self::compact).
    pub fn journal_size(&self) -> StoreResult<u64> {
        self.inner.lock().journal.size()
    }
}

impl std::fmt::Debug for OutboxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxStore")
            .field("total_count", &self.total_count())
            .finish_non_exhaustive()
    }
}

/// The replayed in-memory image of the journal.
struct Image {
    events: Collection,
    batches: Collection,
    /// Multi-valued correlation index for events.
    event_keys: HashMap<String, BTreeSet<RecordId>>,
    /// Unique correlation index for batches.
    batch_keys: HashMap<String, RecordId>,
    next_id: u64,
}

#[derive(Default)]
struct Collection {
    records: BTreeMap<RecordId, OfflineRecord>,
    by_created: BTreeSet<(u64, RecordId)>,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            events: Collection::default(),
            batches: Collection::default(),
            event_keys: HashMap::new(),
            batch_keys: HashMap::new(),
            next_id: 1,
        }
    }
}

impl Image {
    fn collection(&self, kind: RecordKind) -> &Collection {
        match kind {
            RecordKind::Event => &self.events,
            RecordKind::Batch => &self.batches,
        }
    }

    fn collection_mut(&mut self, kind: RecordKind) -> &mut Collection {
        match kind {
            RecordKind::Event => &mut self.events,
            RecordKind::Batch => &mut self.batches,
        }
    }

    /// Applies one journal entry to the image.
    ///
    /// Runtime mutations and replay go through this same method, so the
    /// image after a reopen is byte-for-byte the image before the crash.
    /// Returns the number of removed records for prune entries.
    fn apply(&mut self, entry: JournalEntry) -> usize {
        match entry {
            JournalEntry::Append(append) => {
                self.apply_append(append);
                0
            }
            JournalEntry::MarkSynced { kind, id } => {
                if let Some(record) = self.collection_mut(kind).records.get_mut(&id) {
                    record.synced = true;
                }
                0
            }
            JournalEntry::PruneSynced { kind } => {
                let ids: Vec<RecordId> = self
                    .collection(kind)
                    .records
                    .values()
                    .filter(|r| r.synced)
                    .map(|r| r.id)
                    .collect();
                for id in &ids {
                    self.remove_record(kind, *id);
                }
                ids.len()
            }
            JournalEntry::Clear => {
                self.events = Collection::default();
                self.batches = Collection::default();
                self.event_keys.clear();
                self.batch_keys.clear();
                0
            }
            JournalEntry::NextId { next } => {
                self.next_id = self.next_id.max(next);
                0
            }
        }
    }

    fn apply_append(&mut self, append: AppendEntry) {
        self.next_id = self.next_id.max(append.id.as_u64() + 1);

        let payload = match append.kind {
            RecordKind::Event => RecordPayload::Event {
                batch_key: append.batch_key.clone(),
                data: append.data,
            },
            RecordKind::Batch => RecordPayload::Batch {
                batch_key: append.batch_key.clone().unwrap_or_default(),
                data: append.data,
            },
        };

        match (append.kind, &append.batch_key) {
            (RecordKind::Event, Some(key)) => {
                self.event_keys
                    .entry(key.clone())
                    .or_default()
                    .insert(append.id);
            }
            (RecordKind::Batch, Some(key)) => {
                self.batch_keys.insert(key.clone(), append.id);
            }
            _ => {}
        }

        let collection = self.collection_mut(append.kind);
        collection.by_created.insert((append.created_at_ms, append.id));
        collection.records.insert(
            append.id,
            OfflineRecord {
                id: append.id,
                payload,
                credential: Credential::new(append.credential),
                created_at_ms: append.created_at_ms,
                synced: append.synced,
            },
        );
    }

    fn remove_record(&mut self, kind: RecordKind, id: RecordId) {
        let Some(record) = self.collection_mut(kind).records.remove(&id) else {
            return;
        };

        self.collection_mut(kind)
            .by_created
            .remove(&(record.created_at_ms, id));

        match &record.payload {
            RecordPayload::Event {
                batch_key: Some(key),
                ..
            } => {
                if let Some(ids) = self.event_keys.get_mut(key) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.event_keys.remove(key);
                    }
                }
            }
            RecordPayload::Batch { batch_key, .. } => {
                self.batch_keys.remove(batch_key);
            }
            _ => {}
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn event(n: u64) -> RecordPayload {
        RecordPayload::Event {
            batch_key: Some(format!("B{n}")),
            data: json!({"step": "harvest", "n": n}),
        }
    }

    fn batch(key: &str) -> RecordPayload {
        RecordPayload::Batch {
            batch_key: key.into(),
            data: json!({"herb": "brahmi"}),
        }
    }

    fn store() -> OutboxStore {
        OutboxStore::open_in_memory().unwrap()
    }

    #[test]
    fn append_assigns_monotonic_ids() {
        let store = store();
        let a = store.append(event(1), "tok".into()).unwrap();
        let b = store.append(batch("B1"), "tok".into()).unwrap();
        let c = store.append(event(2), "tok".into()).unwrap();

        assert!(a < b && b < c);
        assert_eq!(store.count(RecordKind::Event), 2);
        assert_eq!(store.count(RecordKind::Batch), 1);
        assert_eq!(store.total_count(), 3);
    }

    #[test]
    fn new_records_are_unsynced() {
        let store = store();
        store.append(event(1), "tok".into()).unwrap();

        let records = store.list_all(RecordKind::Event);
        assert_eq!(records.len(), 1);
        assert!(!records[0].synced);
    }

    #[test]
    fn count_matches_list_all() {
        let store = store();
        for n in 0..4 {
            store.append(event(n), "tok".into()).unwrap();
        }
        store.append(batch("B9"), "tok".into()).unwrap();

        for kind in RecordKind::ALL {
            assert_eq!(store.count(kind), store.list_all(kind).len());
        }
        assert_eq!(
            store.total_count(),
            store.count(RecordKind::Event) + store.count(RecordKind::Batch)
        );
    }

    #[test]
    fn mark_synced_is_idempotent() {
        let store = store();
        let id = store.append(event(1), "tok".into()).unwrap();

        store.mark_synced(RecordKind::Event, id).unwrap();
        store.mark_synced(RecordKind::Event, id).unwrap();
        store
            .mark_synced(RecordKind::Event, RecordId::new(999))
            .unwrap();

        assert!(store.list_all(RecordKind::Event)[0].synced);
    }

    #[test]
    fn prune_removes_only_synced() {
        let store = store();
        let a = store.append(event(1), "tok".into()).unwrap();
        let _b = store.append(event(2), "tok".into()).unwrap();

        store.mark_synced(RecordKind::Event, a).unwrap();
        let pruned = store.prune_synced(RecordKind::Event).unwrap();

        assert_eq!(pruned, 1);
        let remaining = store.list_all(RecordKind::Event);
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].synced);
    }

    #[test]
    fn prune_with_zero_synced_is_a_noop() {
        let store = store();
        store.append(event(1), "tok".into()).unwrap();
        let size_before = store.journal_size().unwrap();

        assert_eq!(store.prune_synced(RecordKind::Event).unwrap(), 0);
        assert_eq!(store.count(RecordKind::Event), 1);
        // No journal entry is written for an empty prune.
        assert_eq!(store.journal_size().unwrap(), size_before);
    }

    #[test]
    fn duplicate_batch_key_is_rejected() {
        let store = store();
        store.append(batch("LOT-1"), "tok".into()).unwrap();

        let result = store.append(batch("LOT-1"), "tok".into());
        assert!(matches!(
            result,
            Err(StoreError::DuplicateBatchKey { key }) if key == "LOT-1"
        ));
    }

    #[test]
    fn pruned_batch_key_can_be_reused() {
        let store = store();
        let id = store.append(batch("LOT-1"), "tok".into()).unwrap();
        store.mark_synced(RecordKind::Batch, id).unwrap();
        store.prune_synced(RecordKind::Batch).unwrap();

        assert!(store.append(batch("LOT-1"), "tok".into()).is_ok());
    }

    #[test]
    fn correlation_lookups() {
        let store = store();
        store
            .append(
                RecordPayload::Event {
                    batch_key: Some("B1".into()),
                    data: json!({"n": 1}),
                },
                "tok".into(),
            )
            .unwrap();
        store
            .append(
                RecordPayload::Event {
                    batch_key: Some("B1".into()),
                    data: json!({"n": 2}),
                },
                "tok".into(),
            )
            .unwrap();
        store
            .append(
                RecordPayload::Event {
                    batch_key: None,
                    data: json!({"n": 3}),
                },
                "tok".into(),
            )
            .unwrap();
        store.append(batch("B1"), "tok".into()).unwrap();

        assert_eq!(store.find_events_for_batch("B1").len(), 2);
        assert!(store.find_events_for_batch("B2").is_empty());
        assert!(store.find_batch_by_key("B1").is_some());
        assert!(store.find_batch_by_key("B2").is_none());
    }

    #[test]
    fn created_between_is_inclusive_and_ordered() {
        let store = store();
        for n in 0..3 {
            store.append(event(n), "tok".into()).unwrap();
        }

        let records = store.created_between(RecordKind::Event, 0, u64::MAX);
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].id < w[1].id));

        assert!(store
            .created_between(RecordKind::Event, u64::MAX, u64::MAX)
            .is_empty());
    }

    #[test]
    fn clear_all_preserves_id_monotonicity() {
        let store = store();
        let first = store.append(event(1), "tok".into()).unwrap();
        store.append(batch("B1"), "tok".into()).unwrap();

        store.clear_all().unwrap();
        assert_eq!(store.total_count(), 0);

        let next = store.append(event(2), "tok".into()).unwrap();
        assert!(next > first);
    }

    #[test]
    fn clear_on_empty_store_writes_nothing() {
        let store = store();
        let size_before = store.journal_size().unwrap();
        store.clear_all().unwrap();
        assert_eq!(store.journal_size().unwrap(), size_before);
    }

    #[test]
    fn reopen_restores_records_and_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox");

        let synced_id;
        {
            let store = OutboxStore::open(&path).unwrap();
            synced_id = store.append(event(1), "tok-a".into()).unwrap();
            store.append(event(2), "tok-b".into()).unwrap();
            store.append(batch("LOT-1"), "tok-c".into()).unwrap();
            store.mark_synced(RecordKind::Event, synced_id).unwrap();
        }

        let store = OutboxStore::open(&path).unwrap();
        assert_eq!(store.count(RecordKind::Event), 2);
        assert_eq!(store.count(RecordKind::Batch), 1);

        let events = store.list_all(RecordKind::Event);
        assert!(events.iter().any(|r| r.id == synced_id && r.synced));
        assert!(events.iter().any(|r| !r.synced));
        assert_eq!(events[0].credential.as_str(), "tok-a");

        // The duplicate-key index survives replay too.
        assert!(store.append(batch("LOT-1"), "tok".into()).is_err());
    }

    #[test]
    fn reopen_continues_id_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox");

        let last;
        {
            let store = OutboxStore::open(&path).unwrap();
            store.append(event(1), "tok".into()).unwrap();
            last = store.append(event(2), "tok".into()).unwrap();
        }

        let store = OutboxStore::open(&path).unwrap();
        let next = store.append(event(3), "tok".into()).unwrap();
        assert!(next > last);
    }

    #[test]
    fn compaction_shrinks_journal_and_preserves_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox");

        let highest;
        {
            let store = OutboxStore::open(&path).unwrap();
            for n in 0..10 {
                let id = store.append(event(n), "tok".into()).unwrap();
                store.mark_synced(RecordKind::Event, id).unwrap();
            }
            highest = store.append(event(99), "tok".into()).unwrap();
            store.prune_synced(RecordKind::Event).unwrap();

            let before = store.journal_size().unwrap();
            store.compact().unwrap();
            assert!(store.journal_size().unwrap() < before);
            assert_eq!(store.count(RecordKind::Event), 1);
        }

        // Ids assigned after reopen must stay above every pruned id.
        let store = OutboxStore::open(&path).unwrap();
        assert_eq!(store.count(RecordKind::Event), 1);
        let next = store.append(event(100), "tok".into()).unwrap();
        assert!(next > highest);
    }

    #[test]
    fn compaction_keeps_synced_flags() {
        let store = store();
        let a = store.append(event(1), "tok".into()).unwrap();
        store.append(event(2), "tok".into()).unwrap();
        store.mark_synced(RecordKind::Event, a).unwrap();

        store.compact().unwrap();

        let records = store.list_all(RecordKind::Event);
        assert!(records.iter().any(|r| r.id == a && r.synced));
        assert!(records.iter().any(|r| !r.synced));
    }

    #[test]
    fn second_open_of_locked_store_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox");

        let _held = OutboxStore::open(&path).unwrap();
        assert!(matches!(
            OutboxStore::open(&path),
            Err(StoreError::StoreLocked)
        ));
    }
}

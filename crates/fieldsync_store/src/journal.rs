//! Append-only journal: framing, replay, compaction.
//!
//! The journal is the store. Every mutation is one framed entry:
//!
//! ```text
//! +-------+---------+------+---------+--------------+-------+
//! | magic | version | type | length  | CBOR body    | CRC32 |
//! | 4 B   | 2 B LE  | 1 B  | 4 B LE  | length bytes | 4 B LE|
//! +-------+---------+------+---------+--------------+-------+
//! ```
//!
//! The CRC covers everything before it. On open the journal is replayed
//! front to back; a frame that runs past end-of-file or fails its CRC at
//! the very tail is a torn write and is truncated away, while a bad
//! frame with more data behind it is reported as corruption.

use crate::error::{StoreError, StoreResult};
use crate::types::{RecordId, RecordKind};
use fieldsync_storage::StorageBackend;
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"FSJ1";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;

/// CRC32 trailer size.
const CRC_SIZE: usize = 4;

/// Frame type tags.
///
/// Tag 6 is reserved for a future sync-queue collection and must not be
/// assigned to anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum EntryTag {
    Append = 1,
    MarkSynced = 2,
    PruneSynced = 3,
    Clear = 4,
    NextId = 5,
}

impl EntryTag {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Append),
            2 => Some(Self::MarkSynced),
            3 => Some(Self::PruneSynced),
            4 => Some(Self::Clear),
            5 => Some(Self::NextId),
            _ => None,
        }
    }
}

/// Body of an `Append` entry.
///
/// Compaction re-emits live records through this same entry, carrying
/// the current `synced` flag; at first write the flag is always false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntry {
    /// Store-assigned record id.
    pub id: RecordId,
    /// Collection the record belongs to.
    pub kind: RecordKind,
    /// Local write timestamp, Unix epoch milliseconds.
    pub created_at_ms: u64,
    /// Batch correlation key, if the payload carries one.
    pub batch_key: Option<String>,
    /// Bearer token captured at write time.
    pub credential: String,
    /// Opaque payload data.
    pub data: serde_json::Value,
    /// Sync flag at the time the entry was written.
    pub synced: bool,
}

/// One durable mutation of the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A record was created (or re-emitted by compaction).
    Append(AppendEntry),
    /// A record's sync flag flipped to true.
    MarkSynced {
        /// Collection of the record.
        kind: RecordKind,
        /// Id of the record.
        id: RecordId,
    },
    /// Every synced record of a kind was removed.
    PruneSynced {
        /// Collection that was pruned.
        kind: RecordKind,
    },
    /// Every record of every kind was removed.
    Clear,
    /// Id high-water marker, written at the head of a compacted journal
    /// so id monotonicity survives the loss of pruned `Append` entries.
    NextId {
        /// The next id the store may assign.
        next: u64,
    },
}

impl JournalEntry {
    fn tag(&self) -> EntryTag {
        match self {
            JournalEntry::Append(_) => EntryTag::Append,
            JournalEntry::MarkSynced { .. } => EntryTag::MarkSynced,
            JournalEntry::PruneSynced { .. } => EntryTag::PruneSynced,
            JournalEntry::Clear => EntryTag::Clear,
            JournalEntry::NextId { .. } => EntryTag::NextId,
        }
    }
}

/// Owns the backing byte store and the framing discipline.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
}

impl Journal {
    /// Creates a journal over the given backend.
    ///
    /// With `sync_on_write` every appended entry is forced to durable
    /// media before the call returns.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend,
            sync_on_write,
        }
    }

    /// Appends one entry and returns the offset it was written at.
    pub fn append(&mut self, entry: &JournalEntry) -> StoreResult<u64> {
        let frame = encode_frame(entry)?;
        let offset = self.backend.append(&frame)?;

        if self.sync_on_write {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }

        Ok(offset)
    }

    /// Returns the current journal size in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Reads every entry from the start of the journal.
    ///
    /// A torn tail frame is truncated away so the next append lands on a
    /// clean boundary. Corruption anywhere before the tail is an error.
    pub fn replay(&mut self) -> StoreResult<Vec<JournalEntry>> {
        let size = self.backend.size()?;
        let mut entries = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            match self.read_frame(offset, size)? {
                FrameRead::Entry { entry, next_offset } => {
                    entries.push(entry);
                    offset = next_offset;
                }
                FrameRead::TornTail => {
                    self.backend.truncate(offset)?;
                    break;
                }
            }
        }

        Ok(entries)
    }

    /// Replaces the journal contents with exactly `entries`.
    ///
    /// Used by compaction. The rewritten journal is synced to durable
    /// media regardless of `sync_on_write`.
    pub fn rewrite(&mut self, entries: &[JournalEntry]) -> StoreResult<()> {
        self.backend.truncate(0)?;
        for entry in entries {
            let frame = encode_frame(entry)?;
            self.backend.append(&frame)?;
        }
        self.backend.sync()?;
        Ok(())
    }

    fn read_frame(&self, offset: u64, size: u64) -> StoreResult<FrameRead> {
        let remaining = (size - offset) as usize;
        if remaining < HEADER_SIZE {
            return Ok(FrameRead::TornTail);
        }

        let header = self.backend.read_at(offset, HEADER_SIZE)?;

        if header[0..4] != JOURNAL_MAGIC {
            return Err(StoreError::journal_corruption(format!(
                "bad magic at offset {offset}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != JOURNAL_VERSION {
            return Err(StoreError::journal_corruption(format!(
                "unsupported journal version {version}"
            )));
        }

        let tag = EntryTag::from_byte(header[6]).ok_or_else(|| {
            StoreError::journal_corruption(format!(
                "unknown entry tag {} at offset {offset}",
                header[6]
            ))
        })?;

        let body_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let frame_len = HEADER_SIZE + body_len + CRC_SIZE;

        if remaining < frame_len {
            return Ok(FrameRead::TornTail);
        }

        let frame = self.backend.read_at(offset, frame_len)?;
        let crc_stored = u32::from_le_bytes([
            frame[frame_len - 4],
            frame[frame_len - 3],
            frame[frame_len - 2],
            frame[frame_len - 1],
        ]);
        let crc_actual = crc32(&frame[..frame_len - CRC_SIZE]);

        if crc_stored != crc_actual {
            // A CRC mismatch on the very last frame is a torn write; the
            // same mismatch with entries behind it is real corruption.
            if offset + frame_len as u64 == size {
                return Ok(FrameRead::TornTail);
            }
            return Err(StoreError::journal_corruption(format!(
                "CRC mismatch at offset {offset}: stored {crc_stored:08x}, actual {crc_actual:08x}"
            )));
        }

        let body = &frame[HEADER_SIZE..frame_len - CRC_SIZE];
        let entry: JournalEntry = ciborium::de::from_reader(body)
            .map_err(|e| StoreError::codec(format!("undecodable entry at offset {offset}: {e}")))?;

        if entry.tag() != tag {
            return Err(StoreError::journal_corruption(format!(
                "entry tag mismatch at offset {offset}"
            )));
        }

        Ok(FrameRead::Entry {
            entry,
            next_offset: offset + frame_len as u64,
        })
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

enum FrameRead {
    Entry {
        entry: JournalEntry,
        next_offset: u64,
    },
    TornTail,
}

fn encode_frame(entry: &JournalEntry) -> StoreResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(entry, &mut body)
        .map_err(|e| StoreError::codec(format!("unencodable entry: {e}")))?;

    let len = u32::try_from(body.len())
        .map_err(|_| StoreError::codec("journal entry body too large"))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
    frame.extend_from_slice(&JOURNAL_MAGIC);
    frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    frame.push(entry.tag() as u8);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);

    let crc = crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

/// CRC32 (IEEE polynomial) over `data`.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = build_crc32_table();

    let mut crc = u32::MAX;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[idx];
    }
    !crc
}

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut value = i as u32;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 1 != 0 {
                (value >> 1) ^ 0xEDB8_8320
            } else {
                value >> 1
            };
            bit += 1;
        }
        table[i] = value;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_storage::InMemoryBackend;
    use serde_json::json;

    fn append_entry(id: u64) -> JournalEntry {
        JournalEntry::Append(AppendEntry {
            id: RecordId::new(id),
            kind: RecordKind::Event,
            created_at_ms: 1_700_000_000_000 + id,
            batch_key: Some(format!("B{id}")),
            credential: "tok".into(),
            data: json!({"n": id}),
            synced: false,
        })
    }

    fn journal() -> Journal {
        Journal::new(Box::new(InMemoryBackend::new()), false)
    }

    #[test]
    fn empty_journal_replays_nothing() {
        let mut journal = journal();
        assert!(journal.replay().unwrap().is_empty());
    }

    #[test]
    fn entries_replay_in_order() {
        let mut journal = journal();
        journal.append(&append_entry(1)).unwrap();
        journal
            .append(&JournalEntry::MarkSynced {
                kind: RecordKind::Event,
                id: RecordId::new(1),
            })
            .unwrap();
        journal
            .append(&JournalEntry::PruneSynced {
                kind: RecordKind::Event,
            })
            .unwrap();

        let entries = journal.replay().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], append_entry(1));
        assert!(matches!(entries[2], JournalEntry::PruneSynced { .. }));
    }

    #[test]
    fn append_entry_round_trips_payload() {
        let mut journal = journal();
        let entry = JournalEntry::Append(AppendEntry {
            id: RecordId::new(9),
            kind: RecordKind::Batch,
            created_at_ms: 5,
            batch_key: Some("LOT-2024-001".into()),
            credential: "bearer-token".into(),
            data: json!({"herb": "tulsi", "grams": 1250, "organic": true}),
            synced: true,
        });
        journal.append(&entry).unwrap();

        assert_eq!(journal.replay().unwrap(), vec![entry]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let mut journal = journal();
        journal.append(&append_entry(1)).unwrap();
        let good_size = journal.size().unwrap();

        // Simulate a crash mid-write: a few bytes of the next frame.
        let full = encode_frame(&append_entry(2)).unwrap();
        let mut data = read_all(&journal);
        data.extend_from_slice(&full[..7]);
        let mut reopened = Journal::new(Box::new(InMemoryBackend::with_data(data)), false);

        let entries = reopened.replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(reopened.size().unwrap(), good_size);
    }

    #[test]
    fn torn_crc_on_last_frame_is_truncated() {
        let mut journal = journal();
        journal.append(&append_entry(1)).unwrap();
        let good_size = journal.size().unwrap() as usize;

        let mut data = read_all(&journal);
        let mut second = encode_frame(&append_entry(2)).unwrap();
        let last = second.len() - 1;
        second[last] ^= 0xFF;
        data.extend_from_slice(&second);

        let mut reopened = Journal::new(Box::new(InMemoryBackend::with_data(data)), false);
        let entries = reopened.replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(reopened.size().unwrap() as usize, good_size);
    }

    #[test]
    fn mid_journal_corruption_is_an_error() {
        let mut journal = journal();
        journal.append(&append_entry(1)).unwrap();
        journal.append(&append_entry(2)).unwrap();

        // Flip a body byte of the first frame; the second frame is intact
        // behind it, so this must not be mistaken for a torn tail.
        let mut data = read_all(&journal);
        data[HEADER_SIZE + 2] ^= 0xFF;

        let mut reopened = Journal::new(Box::new(InMemoryBackend::with_data(data)), false);
        assert!(matches!(
            reopened.replay(),
            Err(StoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn bad_magic_is_an_error() {
        let mut data = encode_frame(&append_entry(1)).unwrap();
        data[0] = b'X';

        let mut journal = Journal::new(Box::new(InMemoryBackend::with_data(data)), false);
        assert!(matches!(
            journal.replay(),
            Err(StoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn rewrite_replaces_contents() {
        let mut journal = journal();
        for id in 1..=5 {
            journal.append(&append_entry(id)).unwrap();
        }
        let before = journal.size().unwrap();

        journal
            .rewrite(&[JournalEntry::NextId { next: 6 }, append_entry(5)])
            .unwrap();

        assert!(journal.size().unwrap() < before);
        let entries = journal.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], JournalEntry::NextId { next: 6 });
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    fn read_all(journal: &Journal) -> Vec<u8> {
        let size = journal.backend.size().unwrap() as usize;
        journal.backend.read_at(0, size).unwrap()
    }
}

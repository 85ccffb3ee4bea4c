//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store underneath the FieldSync journal.
///
/// The journal appends framed entries and replays them on open; a backend
/// only has to honor the byte-level contract below. Backends do not
/// understand frames, records or sync flags.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, all appended data survives process termination
/// - backends are `Send + Sync` so a store handle can be shared
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the requested range extends beyond the current size, or an I/O
    /// error from the underlying medium.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns the offset it
    /// was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// Weaker than [`sync`](Self::sync): data may still sit in OS caches.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces all data and metadata down to durable media.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes; the next `append` writes here.
    fn size(&self) -> StorageResult<u64>;

    /// Discards everything at and after `new_size`.
    ///
    /// Used to drop a torn tail frame after crash recovery and to rewrite
    /// the journal during compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}

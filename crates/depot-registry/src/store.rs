//! Persistent metadata store backed by redb.
//!
//! One bincode-encoded record per artifact id. Every mutation is a
//! single write txn + commit, so a record and its edge list become
//! visible atomically and partial records are never readable. Reads go
//! through read-txn snapshots and never block writers.

use crate::record::{ArtifactRecord, now_secs};
use crate::tables;
use depot_common::{ArtifactId, Signature};
use redb::{Database, ReadableTable, ReadableTableMetadata};
use std::path::Path;
use tracing::{debug, error};

/// Error type for metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<StoreError> for depot_common::Error {
    fn from(e: StoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a direct `put`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// Record written
    Committed,
    /// An identical record already existed; nothing written
    NoOp,
    /// The id exists with different content; existing record kept
    Conflict,
}

/// Result of a `delete`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Record removed
    Deleted,
    /// A different record still references this id; nothing removed
    StillReferenced { referrer: ArtifactId },
    /// No record with this id
    NotFound,
}

/// Persistent artifact metadata store backed by redb.
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::ARTIFACTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Fetch a record by id from the latest committed snapshot.
    pub fn get(&self, id: &ArtifactId) -> StoreResult<Option<ArtifactRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::ARTIFACTS)?;
        table.get(id.as_str())?.map(|v| decode(v.value())).transpose()
    }

    /// Whether a record with this id is committed.
    pub fn contains(&self, id: &ArtifactId) -> StoreResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::ARTIFACTS)?;
        Ok(table.get(id.as_str())?.is_some())
    }

    /// Write a record atomically with its edge list. Re-registration
    /// with identical content is a no-op; with different content the
    /// existing record wins and `Conflict` is reported.
    pub fn put(&self, record: &ArtifactRecord) -> StoreResult<PutOutcome> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(tables::ARTIFACTS)?;
            let existing = table
                .get(record.id.as_str())?
                .map(|v| decode(v.value()))
                .transpose()?;
            match existing {
                Some(existing) => {
                    if existing.same_content(&record.nar_hash, record.nar_size, &record.refs) {
                        PutOutcome::NoOp
                    } else {
                        PutOutcome::Conflict
                    }
                }
                None => {
                    table.insert(record.id.as_str(), bytes.as_slice())?;
                    PutOutcome::Committed
                }
            }
        };
        if outcome == PutOutcome::Committed {
            write_txn.commit()?;
        }
        Ok(outcome)
    }

    /// Delete a record, refusing while any other committed record still
    /// references it. The referrer scan and the removal share one write
    /// txn, so a registration committed concurrently cannot slip in a
    /// new edge between check and removal.
    pub fn delete(&self, id: &ArtifactId) -> StoreResult<DeleteOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(tables::ARTIFACTS)?;
            if table.get(id.as_str())?.is_none() {
                DeleteOutcome::NotFound
            } else if let Some(referrer) = find_referrer(&table, id)? {
                DeleteOutcome::StillReferenced { referrer }
            } else {
                table.remove(id.as_str())?;
                DeleteOutcome::Deleted
            }
        };
        if matches!(outcome, DeleteOutcome::Deleted) {
            write_txn.commit()?;
        }
        Ok(outcome)
    }

    /// Bump `last_accessed` to now, monotonically non-decreasing.
    /// Returns false if no record with this id exists.
    pub fn touch(&self, id: &ArtifactId) -> StoreResult<bool> {
        let now = now_secs();
        let write_txn = self.db.begin_write()?;
        let found = {
            let mut table = write_txn.open_table(tables::ARTIFACTS)?;
            let existing = table
                .get(id.as_str())?
                .map(|v| decode(v.value()))
                .transpose()?;
            match existing {
                Some(mut record) => {
                    record.last_accessed = Some(record.last_accessed.map_or(now, |t| t.max(now)));
                    let bytes = encode(&record)?;
                    table.insert(id.as_str(), bytes.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(found)
    }

    /// Append a signature over unchanged content. Returns `None` if no
    /// record with this id exists, otherwise whether the signature set
    /// changed.
    pub fn append_signature(
        &self,
        id: &ArtifactId,
        sig: &Signature,
    ) -> StoreResult<Option<bool>> {
        let write_txn = self.db.begin_write()?;
        let appended = {
            let mut table = write_txn.open_table(tables::ARTIFACTS)?;
            let existing = table
                .get(id.as_str())?
                .map(|v| decode(v.value()))
                .transpose()?;
            match existing {
                Some(mut record) => {
                    let changed = record.add_signature(sig.clone());
                    if changed {
                        let bytes = encode(&record)?;
                        table.insert(id.as_str(), bytes.as_slice())?;
                    }
                    Some(changed)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(appended)
    }

    /// All committed records, snapshot-consistent at the moment of the
    /// call. A record that fails to decode aborts the listing: callers
    /// (closure, GC) must never act on a partial view of the graph.
    pub fn list_all(&self) -> StoreResult<Vec<ArtifactRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::ARTIFACTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            match decode(entry.1.value()) {
                Ok(record) => result.push(record),
                Err(e) => {
                    error!("Failed to decode record '{}': {}", entry.0.value(), e);
                    return Err(e);
                }
            }
        }
        debug!("listed {} records", result.len());
        Ok(result)
    }

    /// Number of committed records.
    pub fn len(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::ARTIFACTS)?;
        Ok(table.len()?)
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Begin a write transaction for a multi-record commit. The
    /// transactor performs its edge re-validation and all inserts
    /// against this txn, so check and commit cannot straddle a
    /// transaction boundary.
    pub(crate) fn begin_write(&self) -> StoreResult<redb::WriteTransaction> {
        Ok(self.db.begin_write()?)
    }
}

/// Find any record other than `id` itself whose refs include `id`.
fn find_referrer(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &ArtifactId,
) -> StoreResult<Option<ArtifactId>> {
    for entry in table.iter()? {
        let entry = entry?;
        if entry.0.value() == id.as_str() {
            continue;
        }
        let record = decode(entry.1.value())?;
        if record.refs.contains(id) {
            return Ok(Some(record.id));
        }
    }
    Ok(None)
}

pub(crate) fn encode(record: &ArtifactRecord) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(record)?)
}

pub(crate) fn decode(bytes: &[u8]) -> StoreResult<ArtifactRecord> {
    Ok(bincode::deserialize(bytes)?)
}

//! Redb table definitions for the path registry.

use redb::TableDefinition;

// Key: artifact id, Value: bincode-encoded ArtifactRecord.
// The record includes its full outgoing edge list, so a single insert
// commits the record and its edges as one atomic unit.
pub const ARTIFACTS: TableDefinition<&str, &[u8]> = TableDefinition::new("artifacts");

//! Garbage collector
//!
//! Mark-and-sweep over the reference graph. The root set is supplied by
//! the caller; liveness is the closure of the roots, never a guess from
//! access times. The sweep deletes dead records in reverse-topological
//! order, a record going only after every dead record referencing it is
//! gone, so the store never holds a dangling forward edge even if the
//! pass is interrupted. Per-record failures are logged and skipped; one
//! bad deletion never aborts the sweep.

use crate::graph::ReferenceGraph;
use crate::record::ArtifactRecord;
use crate::store::{DeleteOutcome, MetadataStore, StoreResult};
use depot_common::{ArtifactId, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Outcome of one collection pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectReport {
    /// Ids deleted, in deletion order (least recently accessed first
    /// among records that became deletable together)
    pub deleted: Vec<ArtifactId>,
    /// Ids whose deletion failed; retried on the next pass
    pub failed: Vec<ArtifactId>,
    /// Dead ids left in place: a referrer was not deleted, or a
    /// registration made them live again mid-pass
    pub skipped: Vec<ArtifactId>,
    /// Total `nar_size` of the deleted records
    pub reclaimed_bytes: u64,
}

/// Deletes records unreachable from a root set.
pub struct Collector<'a> {
    store: &'a MetadataStore,
}

impl<'a> Collector<'a> {
    #[must_use]
    pub const fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    /// Run one mark-and-sweep pass from `roots`.
    pub fn collect(&self, roots: &BTreeSet<ArtifactId>) -> Result<CollectReport> {
        let graph = ReferenceGraph::new(self.store);
        let live = graph.closure(roots)?;

        let dead: BTreeMap<ArtifactId, ArtifactRecord> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|r| !live.contains(&r.id))
            .map(|r| (r.id.clone(), r))
            .collect();
        info!(
            "collection pass: {} live, {} dead",
            live.len(),
            dead.len()
        );

        let report = sweep(&dead, |id| self.store.delete(id));

        if !report.failed.is_empty() || !report.skipped.is_empty() {
            warn!(
                "collection pass incomplete: {} failed, {} left in place",
                report.failed.len(),
                report.skipped.len()
            );
        }
        info!(
            "collection pass done: {} deleted, {} bytes reclaimed",
            report.deleted.len(),
            report.reclaimed_bytes
        );
        Ok(report)
    }
}

/// Delete the dead records in reverse-topological order via `delete`.
///
/// `delete` is the store's delete operation; the seam lets tests drive
/// the failure and refusal branches deterministically.
fn sweep(
    dead: &BTreeMap<ArtifactId, ArtifactRecord>,
    mut delete: impl FnMut(&ArtifactId) -> StoreResult<DeleteOutcome>,
) -> CollectReport {
    // blockers[x] = number of dead records other than x that still
    // reference x. A record is deletable once its count reaches
    // zero; live referrers cannot exist, or x would be live too.
    let mut blockers: BTreeMap<&ArtifactId, usize> =
        dead.keys().map(|id| (id, 0)).collect();
    for record in dead.values() {
        for target in &record.refs {
            if target != &record.id
                && let Some(n) = blockers.get_mut(target)
            {
                *n += 1;
            }
        }
    }

    let mut ready: Vec<&ArtifactId> = blockers
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut report = CollectReport::default();
    // Records no longer in the store, removed by this sweep or earlier.
    let mut gone: BTreeSet<&ArtifactId> = BTreeSet::new();
    let mut visited: BTreeSet<&ArtifactId> = BTreeSet::new();

    while !ready.is_empty() {
        // Advisory retention order: least recently accessed first.
        ready.sort_by_key(|id| (dead[*id].last_accessed, (*id).clone()));
        let id = ready.remove(0);
        visited.insert(id);

        let unblocked = match delete(id) {
            Ok(DeleteOutcome::Deleted) => {
                debug!("collected {}", id);
                report.deleted.push(id.clone());
                report.reclaimed_bytes += dead[id].nar_size;
                gone.insert(id);
                true
            }
            Ok(DeleteOutcome::StillReferenced { referrer }) => {
                // A registration committed an edge to this id after
                // the mark phase; it is live now.
                warn!("skipping {}: newly referenced by {}", id, referrer);
                false
            }
            Ok(DeleteOutcome::NotFound) => {
                debug!("already gone: {}", id);
                gone.insert(id);
                true
            }
            Err(e) => {
                error!("failed to delete {}: {}", id, e);
                report.failed.push(id.clone());
                false
            }
        };

        if unblocked {
            for target in &dead[id].refs {
                if target != id
                    && let Some(n) = blockers.get_mut(target)
                {
                    *n -= 1;
                    if *n == 0 && !visited.contains(target) {
                        ready.push(target);
                    }
                }
            }
        }
    }

    let failed: BTreeSet<&ArtifactId> = report.failed.iter().collect();
    for id in dead.keys() {
        if !gone.contains(id) && !failed.contains(id) {
            report.skipped.push(id.clone());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::testutil::{record, store_with};
    use tempfile::tempdir;

    fn roots(names: &[&str]) -> BTreeSet<ArtifactId> {
        names.iter().map(|n| ArtifactId::new_unchecked(*n)).collect()
    }

    fn id(name: &str) -> ArtifactId {
        ArtifactId::new_unchecked(name)
    }

    fn dead_set(records: &[ArtifactRecord]) -> BTreeMap<ArtifactId, ArtifactRecord> {
        records.iter().map(|r| (r.id.clone(), r.clone())).collect()
    }

    #[test]
    fn test_collect_keeps_root_closure() {
        let dir = tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[
                record("bbb", &[]),
                record("aaa", &["bbb"]),
                record("unrelated", &[]),
            ],
        );
        let collector = Collector::new(&store);

        let report = collector.collect(&roots(&["aaa"])).unwrap();
        assert_eq!(report.deleted, vec![id("unrelated")]);
        assert!(report.failed.is_empty());
        assert!(report.skipped.is_empty());

        assert!(store.contains(&id("aaa")).unwrap());
        assert!(store.contains(&id("bbb")).unwrap());
        assert!(!store.contains(&id("unrelated")).unwrap());
    }

    #[test]
    fn test_collect_sweeps_in_reverse_topological_order() {
        let dir = tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[record("ccc", &[]), record("bbb", &["ccc"]), record("aaa", &["bbb"])],
        );
        let collector = Collector::new(&store);

        let report = collector.collect(&roots(&[])).unwrap();
        // referrers go first, so no delete is ever refused
        assert_eq!(report.deleted, vec![id("aaa"), id("bbb"), id("ccc")]);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_collect_handles_self_loop() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), &[record("selfy", &["selfy"])]);
        let collector = Collector::new(&store);

        let report = collector.collect(&roots(&[])).unwrap();
        assert_eq!(report.deleted, vec![id("selfy")]);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_collect_with_unregistered_root() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), &[record("aaa", &[])]);
        let collector = Collector::new(&store);

        let report = collector.collect(&roots(&["ghost"])).unwrap();
        assert_eq!(report.deleted, vec![id("aaa")]);
    }

    #[test]
    fn test_collect_reports_reclaimed_bytes() {
        let dir = tempdir().unwrap();
        let dead = record("dead-weight", &[]);
        let store = store_with(dir.path(), &[record("root", &[]), dead.clone()]);
        let collector = Collector::new(&store);

        let report = collector.collect(&roots(&["root"])).unwrap();
        assert_eq!(report.reclaimed_bytes, dead.nar_size);
    }

    #[test]
    fn test_collect_prefers_least_recently_accessed() {
        let dir = tempdir().unwrap();
        let mut old = record("old", &[]);
        old.last_accessed = Some(100);
        let mut fresh = record("fresh", &[]);
        fresh.last_accessed = Some(200);
        let store = store_with(dir.path(), &[fresh, old]);
        let collector = Collector::new(&store);

        let report = collector.collect(&roots(&[])).unwrap();
        assert_eq!(report.deleted, vec![id("old"), id("fresh")]);
    }

    #[test]
    fn test_no_dangling_edges_after_collect() {
        let dir = tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[
                record("base", &[]),
                record("lib", &["base"]),
                record("app", &["lib", "base"]),
                record("stale-app", &["lib", "base"]),
            ],
        );
        let collector = Collector::new(&store);
        collector.collect(&roots(&["app"])).unwrap();

        let remaining = store.list_all().unwrap();
        let ids: BTreeSet<ArtifactId> = remaining.iter().map(|r| r.id.clone()).collect();
        for record in &remaining {
            for target in &record.refs {
                assert!(ids.contains(target), "dangling edge to {target}");
            }
        }
        assert!(!ids.contains(&id("stale-app")));
    }

    #[test]
    fn test_sweep_continues_after_failed_delete() {
        let dead = dead_set(&[
            record("aaa", &["bbb"]),
            record("bbb", &[]),
            record("ccc", &[]),
        ]);

        let report = sweep(&dead, |target| {
            if target.as_str() == "ccc" {
                Err(StoreError::Io(std::io::Error::other("disk failure")))
            } else {
                Ok(DeleteOutcome::Deleted)
            }
        });

        // one failed deletion never aborts the rest of the sweep
        assert_eq!(report.deleted, vec![id("aaa"), id("bbb")]);
        assert_eq!(report.failed, vec![id("ccc")]);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_sweep_skips_record_referenced_during_pass() {
        // A registration can commit an edge to a dead record between
        // the mark phase and its deletion; the store then refuses the
        // delete and the record (plus everything it blocks) stays.
        let dead = dead_set(&[record("aaa", &["bbb"]), record("bbb", &[])]);

        let report = sweep(&dead, |target| {
            if target.as_str() == "aaa" {
                Ok(DeleteOutcome::StillReferenced {
                    referrer: id("fresh"),
                })
            } else {
                Ok(DeleteOutcome::Deleted)
            }
        });

        assert!(report.deleted.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.skipped, vec![id("aaa"), id("bbb")]);
        assert_eq!(report.reclaimed_bytes, 0);
    }
}

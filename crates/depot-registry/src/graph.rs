//! Reference graph over the metadata store
//!
//! A derived, read-mostly view: closures, dangling-edge checks, cycle
//! detection for batches, and reverse-edge scans. All traversal is
//! memoized on a visited set, so self-loops and shared sub-dependencies
//! cost linear time in edges.

use crate::record::Candidate;
use crate::store::{MetadataStore, StoreResult};
use depot_common::ArtifactId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::warn;

/// Read-only view of the dependency graph stored in the record edge
/// lists.
pub struct ReferenceGraph<'a> {
    store: &'a MetadataStore,
}

impl<'a> ReferenceGraph<'a> {
    #[must_use]
    pub const fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    /// The smallest superset of `ids` closed under `refs`.
    ///
    /// Breadth-first over the latest committed snapshot per lookup. An
    /// id without a record (a root that was never registered, or a
    /// record committed after this scan started) is kept in the result
    /// but not expanded; for GC root expansion that is safe, since a
    /// not-yet-committed record cannot be referenced by anything live.
    pub fn closure(&self, ids: &BTreeSet<ArtifactId>) -> StoreResult<BTreeSet<ArtifactId>> {
        let mut visited: BTreeSet<ArtifactId> = BTreeSet::new();
        let mut queue: VecDeque<ArtifactId> = ids.iter().cloned().collect();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            match self.store.get(&id)? {
                Some(record) => {
                    for target in record.refs {
                        if !visited.contains(&target) {
                            queue.push_back(target);
                        }
                    }
                }
                None => warn!("closure member has no record: {}", id),
            }
        }

        Ok(visited)
    }

    /// Edge targets in `refs` that resolve neither in the store nor in
    /// `batch`, the candidates' own ids during a batch registration.
    pub fn missing_targets(
        &self,
        refs: &BTreeSet<ArtifactId>,
        batch: &BTreeSet<ArtifactId>,
    ) -> StoreResult<Vec<ArtifactId>> {
        let mut missing = Vec::new();
        for target in refs {
            if !batch.contains(target) && !self.store.contains(target)? {
                missing.push(target.clone());
            }
        }
        Ok(missing)
    }

    /// Ids of all committed records other than `id` itself whose refs
    /// include `id`.
    pub fn referrers(&self, id: &ArtifactId) -> StoreResult<Vec<ArtifactId>> {
        let mut result = Vec::new();
        for record in self.store.list_all()? {
            if record.id != *id && record.refs.contains(id) {
                result.push(record.id);
            }
        }
        Ok(result)
    }
}

/// Detect a multi-node cycle among the candidates of one batch.
///
/// Edges to already-committed records cannot close a cycle (the target
/// committed earlier without an edge back), so only intra-batch edges
/// matter. Self-loops are permitted and ignored. Returns the ids stuck
/// in a cycle, in sorted order, or `None` when the batch is acyclic.
#[must_use]
pub fn find_batch_cycle(candidates: &[Candidate]) -> Option<Vec<ArtifactId>> {
    let batch: BTreeSet<&ArtifactId> = candidates.iter().map(|c| &c.id).collect();

    // Kahn's algorithm over intra-batch, non-self edges.
    let mut blockers: BTreeMap<&ArtifactId, usize> =
        batch.iter().map(|id| (*id, 0)).collect();
    let mut dependents: BTreeMap<&ArtifactId, Vec<&ArtifactId>> = BTreeMap::new();
    for candidate in candidates {
        for target in &candidate.refs {
            if target != &candidate.id && batch.contains(target) {
                *blockers.entry(&candidate.id).or_insert(0) += 1;
                dependents.entry(target).or_default().push(&candidate.id);
            }
        }
    }

    let mut ready: VecDeque<&ArtifactId> = blockers
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut resolved = 0usize;
    while let Some(id) = ready.pop_front() {
        resolved += 1;
        if let Some(deps) = dependents.get(id) {
            for dependent in deps {
                if let Some(n) = blockers.get_mut(*dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }
    }

    if resolved == batch.len() {
        None
    } else {
        let members: Vec<ArtifactId> = blockers
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(id, _)| id.clone())
            .collect();
        Some(members)
    }
}

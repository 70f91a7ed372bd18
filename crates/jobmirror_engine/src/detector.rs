//! Field-level diffing against persisted snapshots.

use jobmirror_model::{ChangeSet, FileIndex, FileRecord, Snapshot};
use jobmirror_store::FileChange;
use std::collections::HashMap;

/// Computes sparse change-sets.
///
/// Values are compared with strict inequality: no tolerance for reals, and
/// statuses by their enumerated value. A NaN real always differs, so the
/// engine maps NaN availability to 0.0 before diffing. A record without a
/// snapshot has no detectable change; its insert establishes the baseline.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeDetector;

impl ChangeDetector {
    /// Diffs `current` against its last persisted snapshot.
    pub fn diff<S: Snapshot>(current: &S, snapshot: Option<&S>) -> ChangeSet {
        let mut changes = ChangeSet::new();
        let Some(snapshot) = snapshot else {
            return changes;
        };
        for field in S::FIELDS {
            let value = (field.get)(current);
            if value != (field.get)(snapshot) {
                changes.push(field.column, value);
            }
        }
        changes
    }

    /// Diffs a job's files against the persisted file rows.
    ///
    /// Files without a stored row are skipped. The result is ordered by
    /// file index.
    pub fn diff_files(
        current: &[FileRecord],
        snapshots: &HashMap<FileIndex, FileRecord>,
    ) -> Vec<FileChange> {
        let mut changes: Vec<FileChange> = current
            .iter()
            .filter_map(|file| {
                let changes = Self::diff(file, snapshots.get(&file.index));
                (!changes.is_empty()).then_some((file.index, changes))
            })
            .collect();
        changes.sort_by_key(|(index, _)| *index);
        changes
    }
}

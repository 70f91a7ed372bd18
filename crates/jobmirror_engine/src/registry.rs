//! Working set of jobs awaiting a commit decision.

use jobmirror_model::{Fingerprint, JobSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Pending jobs keyed by fingerprint.
///
/// The registry holds shared references to upstream jobs; it never copies or
/// mutates them. All operations take one short lock, so `add` from a
/// notification thread and `drain_pending` from the coordinator never
/// interleave.
#[derive(Default)]
pub struct EntityRegistry {
    pending: Mutex<HashMap<Fingerprint, Arc<dyn JobSource>>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job unless its fingerprint is already pending.
    ///
    /// Returns true if the job was newly added.
    pub fn add(&self, fingerprint: Fingerprint, job: Arc<dyn JobSource>) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains_key(&fingerprint) {
            return false;
        }
        pending.insert(fingerprint, job);
        true
    }

    /// Removes a job. Returns whether it was pending.
    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        self.pending.lock().remove(fingerprint).is_some()
    }

    /// Takes the whole pending set, leaving the registry empty.
    pub fn drain_pending(&self) -> HashMap<Fingerprint, Arc<dyn JobSource>> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Returns true if the fingerprint is pending.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.pending.lock().contains_key(fingerprint)
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmirror_testkit::FakeJob;
    use std::thread;

    #[test]
    fn add_is_idempotent() {
        let registry = EntityRegistry::new();
        let job = FakeJob::new("a");
        assert!(registry.add(job.fingerprint(), job.clone()));
        assert!(!registry.add(job.fingerprint(), job.clone()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let registry = EntityRegistry::new();
        let job = FakeJob::new("a");
        registry.add(job.fingerprint(), job.clone());
        assert!(registry.remove(&job.fingerprint()));
        assert!(!registry.remove(&job.fingerprint()));
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_empties_registry() {
        let registry = EntityRegistry::new();
        for name in ["a", "b", "c"] {
            let job = FakeJob::new(name);
            registry.add(job.fingerprint(), job);
        }
        let drained = registry.drain_pending();
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());
        assert!(registry.drain_pending().is_empty());
    }

    #[test]
    fn concurrent_adds_are_never_lost() {
        let registry = Arc::new(EntityRegistry::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..250 {
                        let job = FakeJob::new(format!("job-{t}-{i}"));
                        registry.add(job.fingerprint(), job);
                    }
                })
            })
            .collect();

        let mut seen = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            seen += registry.drain_pending().len();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        seen += registry.drain_pending().len();
        assert_eq!(seen, 1000);
    }
}

//! Per-technician workload bookkeeping.

use std::collections::BTreeSet;

use desk_id::ProblemId;

/// The open problems held by one technician.
///
/// `current` is the most recently attached problem that is still open. It is
/// informational: the set is the source of truth for workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    assigned: BTreeSet<ProblemId>,
    current: Option<ProblemId>,
}

impl Workload {
    /// Rebuild from stored fields. Duplicates collapse; a `current` that is
    /// not in the set is dropped.
    pub fn new(assigned: impl IntoIterator<Item = ProblemId>, current: Option<ProblemId>) -> Self {
        let assigned: BTreeSet<_> = assigned.into_iter().collect();
        let current = current.filter(|c| assigned.contains(c));
        Self { assigned, current }
    }

    pub fn count(&self) -> usize {
        self.assigned.len()
    }

    pub fn current(&self) -> Option<ProblemId> {
        self.current
    }

    pub fn contains(&self, problem: &ProblemId) -> bool {
        self.assigned.contains(problem)
    }

    pub fn assigned(&self) -> impl Iterator<Item = &ProblemId> + '_ {
        self.assigned.iter()
    }

    /// Add a problem and make it current.
    ///
    /// Returns false if the problem was already held, in which case the
    /// count is unchanged.
    pub fn attach(&mut self, problem: ProblemId) -> bool {
        self.current = Some(problem);
        self.assigned.insert(problem)
    }

    /// Remove a problem. Clears `current` if it pointed at it.
    ///
    /// Returns false if the problem was not held.
    pub fn detach(&mut self, problem: ProblemId) -> bool {
        if self.current == Some(problem) {
            self.current = None;
        }
        self.assigned.remove(&problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CapacityPolicy;

    #[test]
    fn test_attach_increments_by_one() {
        let mut workload = Workload::new([ProblemId::new(), ProblemId::new()], None);
        let problem = ProblemId::new();

        assert!(workload.attach(problem));
        assert_eq!(workload.count(), 3);
        assert_eq!(workload.current(), Some(problem));
    }

    #[test]
    fn test_attach_is_set_semantics() {
        let problem = ProblemId::new();
        let mut workload = Workload::default();

        assert!(workload.attach(problem));
        assert!(!workload.attach(problem));
        assert_eq!(workload.count(), 1);
    }

    #[test]
    fn test_availability_flips_at_capacity() {
        let policy = CapacityPolicy::default();
        let mut workload = Workload::default();

        for expected_available in [true, true, false] {
            workload.attach(ProblemId::new());
            assert_eq!(
                policy.is_available("electrical", workload.count()),
                expected_available
            );
        }
    }

    #[test]
    fn test_detach_clears_current_only_when_matching() {
        let first = ProblemId::new();
        let second = ProblemId::new();
        let mut workload = Workload::default();
        workload.attach(first);
        workload.attach(second);

        assert!(workload.detach(first));
        assert_eq!(workload.current(), Some(second));

        assert!(workload.detach(second));
        assert_eq!(workload.current(), None);
        assert_eq!(workload.count(), 0);

        assert!(!workload.detach(second));
    }

    #[test]
    fn test_new_drops_stale_current() {
        let held = ProblemId::new();
        let stale = ProblemId::new();
        let workload = Workload::new([held, held], Some(stale));

        assert_eq!(workload.count(), 1);
        assert_eq!(workload.current(), None);
    }
}

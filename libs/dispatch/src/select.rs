//! Technician selection.

use chrono::{DateTime, Utc};
use desk_id::UserId;

use crate::CapacityPolicy;

/// A technician that matched the category query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub technician_id: UserId,
    pub specialty: String,
    /// Number of open problems currently assigned.
    pub workload: usize,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl Candidate {
    /// Ordering key: least loaded first, then whoever waited longest since
    /// their last assignment (never-assigned first), then lowest id.
    fn rank(&self) -> (usize, Option<DateTime<Utc>>, UserId) {
        (self.workload, self.last_assigned_at, self.technician_id)
    }
}

/// Pick the technician that should receive the next problem.
///
/// Candidates at or above their capacity are skipped even if the store still
/// flags them available; the flag is only as fresh as the last write.
/// Returns `None` when nobody qualifies, which is a normal outcome.
pub fn select_technician<'a>(
    candidates: &'a [Candidate],
    policy: &CapacityPolicy,
) -> Option<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| policy.is_available(&c.specialty, c.workload))
        .min_by_key(|c| c.rank())
}

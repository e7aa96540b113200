//! Assignment policy for the problem desk.
//!
//! Everything in this crate is pure: callers load state from the store, ask
//! the policy what to do, and write the answer back under a row lock.
//!
//! - [`select_technician`] is the single technician selection rule. The
//!   synchronous create path and the backfill worker both go through it.
//! - [`Workload`] models a technician's open problem set and the
//!   "most recently assigned" pointer.
//! - [`CapacityPolicy`] decides availability from workload and specialty.
//! - [`ProblemStatus`] and [`Transition`] form the status state machine.
//! - [`RetryPolicy`] schedules redelivery of outbound collaborator calls.
//!
//! # Invariants
//!
//! - Selection is deterministic for a given candidate list, regardless of
//!   the order the store returned it in.
//! - A technician is available exactly when its workload is below the
//!   capacity for its specialty.

mod capacity;
mod retry;
mod select;
mod status;
mod workload;

pub use capacity::{CapacityParseError, CapacityPolicy, DEFAULT_CAPACITY};
pub use retry::{RetryDecision, RetryPolicy};
pub use select::{select_technician, Candidate};
pub use status::{ProblemStatus, Transition, TransitionError, TransitionOutcome, UnknownStatus};
pub use workload::Workload;

/// Normalise a category or specialty tag for matching.
///
/// Matching is case-insensitive and ignores surrounding whitespace, so
/// "Plumbing " and "plumbing" select the same technicians.
pub fn normalize_category(raw: &str) -> String {
    raw.trim().to_lowercase()
}

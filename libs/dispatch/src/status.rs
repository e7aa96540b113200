//! Problem status state machine.
//!
//! ```text
//!   waiting <──────> in_progress
//!      │                 │
//!      └──> solved <─────┘
//!             │
//!             └── reopen ──> waiting
//! ```
//!
//! Writing the status a problem already has is accepted and changes
//! nothing, so a repeated "solve" keeps its original `solved_at`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemStatus {
    Waiting,
    InProgress,
    Solved,
}

impl ProblemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Solved => "solved",
        }
    }

    /// Open problems count towards a technician's workload.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Solved)
    }
}

impl fmt::Display for ProblemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string that is not one of the known statuses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown problem status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ProblemStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "in_progress" => Ok(Self::InProgress),
            "solved" => Ok(Self::Solved),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Generic status write (`PUT /problems/{id}`).
    Set(ProblemStatus),
    /// Explicit `solved -> waiting`.
    Reopen,
}

/// What applying a transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Unchanged(ProblemStatus),
    Changed {
        from: ProblemStatus,
        to: ProblemStatus,
    },
}

impl TransitionOutcome {
    pub fn status(&self) -> ProblemStatus {
        match self {
            Self::Unchanged(status) => *status,
            Self::Changed { to, .. } => *to,
        }
    }

    /// The problem just became solved.
    pub fn is_solve(&self) -> bool {
        matches!(
            self,
            Self::Changed {
                to: ProblemStatus::Solved,
                ..
            }
        )
    }

    /// The problem just left the solved state.
    pub fn is_reopen(&self) -> bool {
        matches!(
            self,
            Self::Changed {
                from: ProblemStatus::Solved,
                ..
            }
        )
    }
}

/// Rejected transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot move a problem from {from} to {to}")]
    Illegal {
        from: ProblemStatus,
        to: ProblemStatus,
    },

    #[error("only solved problems can be reopened, this one is {0}")]
    NotSolved(ProblemStatus),
}

impl Transition {
    /// Apply this transition to a problem currently in `from`.
    pub fn apply(self, from: ProblemStatus) -> Result<TransitionOutcome, TransitionError> {
        use ProblemStatus::*;

        match self {
            Transition::Reopen => match from {
                Solved => Ok(TransitionOutcome::Changed { from, to: Waiting }),
                other => Err(TransitionError::NotSolved(other)),
            },
            Transition::Set(to) if to == from => Ok(TransitionOutcome::Unchanged(from)),
            Transition::Set(to) => match (from, to) {
                (Waiting, InProgress) | (InProgress, Waiting) | (Waiting, Solved) | (InProgress, Solved) => {
                    Ok(TransitionOutcome::Changed { from, to })
                }
                // leaving `solved` needs Transition::Reopen
                _ => Err(TransitionError::Illegal { from, to }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ProblemStatus::*;

    #[rstest]
    #[case(Waiting, InProgress)]
    #[case(InProgress, Waiting)]
    #[case(Waiting, Solved)]
    #[case(InProgress, Solved)]
    fn test_legal_sets(#[case] from: ProblemStatus, #[case] to: ProblemStatus) {
        let outcome = Transition::Set(to).apply(from).unwrap();
        assert_eq!(outcome, TransitionOutcome::Changed { from, to });
        assert_eq!(outcome.status(), to);
    }

    #[rstest]
    #[case(Solved, Waiting)]
    #[case(Solved, InProgress)]
    fn test_cannot_leave_solved_by_set(#[case] from: ProblemStatus, #[case] to: ProblemStatus) {
        assert_eq!(
            Transition::Set(to).apply(from),
            Err(TransitionError::Illegal { from, to })
        );
    }

    #[rstest]
    #[case(Waiting)]
    #[case(InProgress)]
    #[case(Solved)]
    fn test_same_status_is_noop(#[case] status: ProblemStatus) {
        let outcome = Transition::Set(status).apply(status).unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged(status));
        assert!(!outcome.is_solve());
        assert!(!outcome.is_reopen());
    }

    #[test]
    fn test_reopen() {
        let outcome = Transition::Reopen.apply(Solved).unwrap();
        assert!(outcome.is_reopen());
        assert_eq!(outcome.status(), Waiting);

        assert_eq!(
            Transition::Reopen.apply(InProgress),
            Err(TransitionError::NotSolved(InProgress))
        );
    }

    #[test]
    fn test_solve_flag() {
        assert!(Transition::Set(Solved).apply(InProgress).unwrap().is_solve());
        assert!(!Transition::Set(InProgress).apply(Waiting).unwrap().is_solve());
    }

    #[test]
    fn test_status_strings() {
        for status in [Waiting, InProgress, Solved] {
            assert_eq!(status.as_str().parse::<ProblemStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert_eq!(
            "done".parse::<ProblemStatus>(),
            Err(UnknownStatus("done".to_string()))
        );
    }
}

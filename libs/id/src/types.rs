//! ID definitions for problem desk records.

use crate::define_id;

define_id!(
    /// A reported problem (service ticket) or a problem template.
    ProblemId,
    "prb"
);

define_id!(
    /// A user record. Technicians are users with the technician role.
    UserId,
    "usr"
);

define_id!(
    /// Correlates log lines and error bodies for one HTTP request.
    RequestId,
    "req"
);

/// Outbox message id. Assigned by the store (bigserial), not ULID-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutboxId(i64);

impl OutboxId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OutboxId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl serde::Serialize for OutboxId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

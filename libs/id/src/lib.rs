//! # desk-id
//!
//! Typed identifiers used across the problem desk.
//!
//! Every record id is `{prefix}_{ulid}`:
//!
//! - `prb_01HV4Z2WQXKJNM8GPQY6VBKC3D` for a problem
//! - `usr_01HV4Z3MXNKPQR9HSTZ7WCLD4E` for a user (technicians are users)
//! - `req_01HV4Z4NYPLTRS0JTUA8XDME5F` for an HTTP request
//!
//! The prefix keeps a technician id from being passed where a problem id is
//! expected, and ULIDs sort by creation time, which the backfill worker
//! relies on to serve the oldest unassigned problems first.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

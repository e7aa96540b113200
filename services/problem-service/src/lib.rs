//! Problem desk service library.
//!
//! The crate ships the `problem-service` binary; the library surface exists
//! so the integration tests can build the router and workers directly.

pub mod api;
pub mod assignment;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod outbox;
pub mod state;

//! Shared runtime components that back every node.
//!
//! `request` drives the read lifecycle (deduplication, settling, deferred cleans)
//! and `tasks` owns the timer-driven cache expiry.

pub mod request;
pub mod tasks;

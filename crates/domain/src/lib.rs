//! Shared domain types for chatwire: the crate-wide error type,
//! gateway configuration, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;

//! Application-level orchestration.
//!
//! This module owns the savepoint lifecycle (cluster start through resume),
//! the wait-for-RUNNING poll loop and the preflight checks run before any
//! side effect. The CLI layer builds the services and renders the events this
//! module emits.

mod lifecycle;
mod poll;
mod preflight;

pub(crate) use lifecycle::Lifecycle;
pub(crate) use preflight::check_preconditions;

//!
//! Documentation of the safety module.
//! The SafetyMapper rules, free of HTTP and database concerns.
//!

pub mod access;
pub mod events;
pub mod geo;
pub mod ledger;
pub mod media;
pub mod sessions;
pub mod solar;

/// A request that breaks a validation rule; the message is shown to the client
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct Invalid(pub String);

// src/error.rs
//! Error taxonomy for the arena crate.
//!
//! Only [`ConfigError`] is ever propagated out of a public constructor.
//! Every other failure mode (upstream allocation failure, pinned allocation
//! failure during expansion, hard-limit rejection, persistence failure) is
//! recovered locally and surfaced through telemetry or a log line instead —
//! the arena never panics on a valid API call.

use thiserror::Error;

/// Fatal, construction-time configuration problem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `secret_key` was empty. The key is required for integrity-tagging
    /// the persisted prediction state.
    #[error("secret key is required for integrity verification")]
    MissingSecretKey,
}

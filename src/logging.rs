//! Logging initialization for embedders of the core.
//!
//! The core never configures logging globally on its own — that belongs to
//! the daemon/service wrapper (out of scope, per spec.md §1). This module
//! offers a convenience initializer for tests and examples.

use crate::error::{AgentError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a global `tracing` subscriber at the given filter directive.
///
/// Returns an error if a subscriber is already installed, rather than
/// panicking, so embedders can call this defensively.
pub fn init_logging(directive: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(directive)
                .map_err(|e| AgentError::ModelLoad(format!("invalid log directive: {e}")))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| AgentError::ModelLoad("logging already initialized".into()))
}

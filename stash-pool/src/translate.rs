//! Error translation at the facade boundary.
//!
//! Every backend-call site routes failures through here: backend errors are
//! wrapped into [`PoolError::Operation`] carrying the name of the attempted
//! top-level operation, caller-input failures pass through as
//! [`PoolError::InvalidArgument`], and each failure is logged once at its
//! severity before being re-raised. The `tracing` macros are no-ops without
//! a subscriber, so logging is never required for correctness.

use stash_core::{BackendError, InvalidArgument, PoolError, Severity};

/// Wrap a backend failure, log it, and hand it back for re-raising.
pub(crate) fn backend_failure(operation: &'static str, source: BackendError) -> PoolError {
    let err = PoolError::operation(operation, source);
    log(&err);
    err
}

/// Classify a caller-input failure, log it, and hand it back for re-raising.
pub(crate) fn invalid_argument(source: InvalidArgument) -> PoolError {
    let err = PoolError::from(source);
    log(&err);
    err
}

fn log(err: &PoolError) {
    match err.severity() {
        Severity::Warning => tracing::warn!(error = %err, "cache argument rejected"),
        Severity::Alert => tracing::error!(error = %err, "cache operation failed"),
    }
}

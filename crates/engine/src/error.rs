use thiserror::Error;
use uuid::Uuid;

use atrium_common::error::AppError;

/// Failure to turn member ids into recipients.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("member lookup failed for chunk {chunk}: {source}")]
    Lookup {
        chunk: usize,
        #[source]
        source: AppError,
    },

    #[error("member lookup for chunk {chunk} timed out after {timeout_ms}ms")]
    Timeout { chunk: usize, timeout_ms: u64 },

    /// Listing the members of a workspace failed before any chunk was looked up.
    #[error("listing members of workspace {workspace_id} failed: {source}")]
    Expansion {
        workspace_id: Uuid,
        #[source]
        source: AppError,
    },
}

/// Failure of a fan-out before any delivery was scheduled.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("could not resolve recipients for event {event_id}: {source}")]
    Resolution {
        event_id: Uuid,
        #[source]
        source: ResolveError,
    },
}

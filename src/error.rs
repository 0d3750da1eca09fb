//! Error types for the trace model
//!
//! Every invariant violation is raised synchronously at the call that breaks
//! it and names the invariant. Nothing here is recovered locally: the
//! importer decides whether to abort or to record an import warning.

use crate::timestamp::Timestamp;
use std::fmt;
use thiserror::Error;

/// Which temporal invariant an ordering violation broke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingKind {
    /// A creation arrived while the previous instance was still alive
    CreateBeforeDelete,
    /// A creation arrived before the previous instance's deletion time
    CreateBeforePriorDeletion { deletion_ts: Timestamp },
    /// A snapshot is older than the creation of the instance it targets
    SnapshotBeforeCreation { creation_ts: Timestamp },
    /// A snapshot targets an instance that was already deleted
    SnapshotAfterDeletion { deletion_ts: Timestamp },
    /// A snapshot is older than the previous snapshot of the same instance
    SnapshotBeforePrevious { previous_ts: Timestamp },
    /// A deletion is older than the creation of the instance
    DeleteBeforeCreation { creation_ts: Timestamp },
    /// A deletion is older than the last snapshot of the instance
    DeleteBeforeLastSnapshot { snapshot_ts: Timestamp },
    /// A deletion is older than the deletion already recorded
    DeleteBeforePriorDeletion { deletion_ts: Timestamp },
    /// A counter sample is not strictly after the previous one
    NonMonotonicSample { previous_ts: Timestamp },
    /// A slice starts before the previous slice of its group
    SliceBeforePrevious { previous_start: Timestamp },
    /// A slice ends before it starts
    SliceEndBeforeStart { start: Timestamp },
}

impl fmt::Display for OrderingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingKind::CreateBeforeDelete => {
                write!(f, "created while the previous instance is still alive")
            }
            OrderingKind::CreateBeforePriorDeletion { deletion_ts } => {
                write!(f, "created before the previous deletion at {}", deletion_ts)
            }
            OrderingKind::SnapshotBeforeCreation { creation_ts } => {
                write!(f, "snapshot precedes creation at {}", creation_ts)
            }
            OrderingKind::SnapshotAfterDeletion { deletion_ts } => {
                write!(f, "snapshot targets an instance deleted at {}", deletion_ts)
            }
            OrderingKind::SnapshotBeforePrevious { previous_ts } => {
                write!(f, "snapshot precedes the previous snapshot at {}", previous_ts)
            }
            OrderingKind::DeleteBeforeCreation { creation_ts } => {
                write!(f, "deletion precedes creation at {}", creation_ts)
            }
            OrderingKind::DeleteBeforeLastSnapshot { snapshot_ts } => {
                write!(f, "deletion precedes the last snapshot at {}", snapshot_ts)
            }
            OrderingKind::DeleteBeforePriorDeletion { deletion_ts } => {
                write!(f, "deletion precedes the recorded deletion at {}", deletion_ts)
            }
            OrderingKind::NonMonotonicSample { previous_ts } => {
                write!(f, "sample is not after the previous sample at {}", previous_ts)
            }
            OrderingKind::SliceBeforePrevious { previous_start } => {
                write!(f, "slice starts before the previous slice at {}", previous_start)
            }
            OrderingKind::SliceEndBeforeStart { start } => {
                write!(f, "slice ends before its start at {}", start)
            }
        }
    }
}

/// Identity field that changed across a continuous instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Category,
    Name,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityField::Category => write!(f, "category"),
            IdentityField::Name => write!(f, "name"),
        }
    }
}

/// Errors raised by the model's mutation and query operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Ordering violation on {subject} at ts={ts}: {kind}")]
    OrderingViolation {
        subject: String,
        ts: Timestamp,
        kind: OrderingKind,
    },

    #[error("Identity mismatch on {id}: {field} was {expected:?}, got {actual:?}")]
    IdentityMismatch {
        id: String,
        field: IdentityField,
        expected: String,
        actual: String,
    },

    #[error("Duplicate snapshot of {id} at ts={ts}")]
    DuplicateTimestamp { id: String, ts: Timestamp },

    #[error("Query of {id} at ts={ts} is outside [{creation_ts}, {deletion_ts}]")]
    OutOfRangeQuery {
        id: String,
        ts: Timestamp,
        creation_ts: Timestamp,
        deletion_ts: Timestamp,
    },

    #[error("endSlice at ts={ts} without an open slice")]
    NoOpenSlice { ts: Timestamp },

    #[error("Implicit snapshot id {raw_id:?} must have the form TypeName/id")]
    UnnamedImplicitSnapshot { raw_id: String },

    #[error("Snapshot args of {id} at ts={ts} cannot have an id field")]
    IdFieldInArgs { id: String, ts: Timestamp },
}

impl ModelError {
    /// Stable short name of the error kind, used to de-duplicate log output
    pub fn kind_name(&self) -> &'static str {
        match self {
            ModelError::OrderingViolation { .. } => "ordering_violation",
            ModelError::IdentityMismatch { .. } => "identity_mismatch",
            ModelError::DuplicateTimestamp { .. } => "duplicate_timestamp",
            ModelError::OutOfRangeQuery { .. } => "out_of_range_query",
            ModelError::NoOpenSlice { .. } => "no_open_slice",
            ModelError::UnnamedImplicitSnapshot { .. } => "unnamed_implicit_snapshot",
            ModelError::IdFieldInArgs { .. } => "id_field_in_args",
        }
    }

    pub(crate) fn ordering(subject: impl Into<String>, ts: Timestamp, kind: OrderingKind) -> Self {
        ModelError::OrderingViolation {
            subject: subject.into(),
            ts,
            kind,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

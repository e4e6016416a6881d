use thiserror::Error;

use crate::model::Timestamp;

/// Raised when a timestamp string is neither an ISO-8601 instant nor a
/// relative duration.
#[derive(Debug, Clone, Error)]
#[error("unable to parse timestamp from '{input}'")]
pub struct TimestampParseError {
    pub input: String,
}

/// Caller mistakes detected before any query executes.
#[derive(Debug, Clone, Error)]
pub enum DiffError {
    #[error("diff_from is mandatory when diffing on the default branch '{branch}'")]
    DiffFromRequiredOnDefaultBranch { branch: String },

    #[error("diff_to ({diff_to}) must not be earlier than diff_from ({diff_from})")]
    RangeValidation {
        diff_from: Timestamp,
        diff_to: Timestamp,
    },
}

/// Data-integrity and query-shape violations from the graph store.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// An edge carried a status other than `active`/`deleted`. This is a
    /// corruption signal, never silently defaulted.
    #[error("unexpected branch-status value '{value}' on edge {edge_id}")]
    UnexpectedStatus { edge_id: String, value: String },

    #[error("query '{query}' returned no rows but at least one was required")]
    EmptyResult { query: String },

    #[error("unknown node '{node_id}'")]
    NodeNotFound { node_id: String },

    #[error("relationship '{relationship_id}' is missing one of its endpoint edges")]
    DanglingRelationship { relationship_id: String },
}

/// Merge refusals. A merge either transacts fully or raises.
#[derive(Debug, Clone, Error)]
pub enum MergeError {
    #[error("branch '{branch}' failed validation and cannot be merged: {}", messages.join("; "))]
    ValidationFailed {
        branch: String,
        messages: Vec<String>,
    },

    #[error("branch '{branch}' not found in registry")]
    BranchNotFound { branch: String },

    #[error("the default branch '{branch}' cannot be merged")]
    CannotMergeDefaultBranch { branch: String },
}

use serde::{Deserialize, Serialize};

use crate::model::Id;

/// RPC request to the external repository-diff service: list file names
/// changed between two commits. The diff engine knows nothing about git
/// internals beyond this contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitDiffNamesOnlyRequest {
    pub repository_id: Id,
    pub repository_name: String,
    pub repository_kind: String,
    pub first_commit: String,
    pub second_commit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitDiffNamesOnlyResponse {
    pub files_changed: Vec<String>,
    pub files_added: Vec<String>,
    pub files_removed: Vec<String>,
}

/// A repository whose commit pointer changed on a branch within the diff
/// window, as discovered by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedRepository {
    pub repository_id: Id,
    pub repository_name: String,
    pub repository_kind: String,
    pub branch: String,
    pub first_commit: String,
    pub second_commit: String,
}

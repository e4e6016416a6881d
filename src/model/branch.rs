use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::Timestamp;

pub const DEFAULT_BRANCH_NAME: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BranchStatus {
    Open,
    Closed,
}

/// A named, versioned pointer into the graph's timeline. A branch is the
/// unit of isolation: every edge is stamped with exactly one branch name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub status: BranchStatus,
    pub description: Option<String>,
    /// Which branch this one was created from.
    pub origin_branch: String,
    /// The instant up to which default-branch history is inherited.
    /// Advanced by `rebase`.
    pub branched_from: Timestamp,
    pub is_default: bool,
    pub is_protected: bool,
    pub is_data_only: bool,
    /// Tie-break weight for overlapping edges across branches; stamped onto
    /// every edge this branch writes.
    pub hierarchy_level: i64,
}

/// One entry of the branch set consulted to resolve graph state: query
/// `branch` as of `at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchScopeEntry {
    pub branch: String,
    pub at: Timestamp,
}

impl Branch {
    pub fn new_default(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: BranchStatus::Open,
            description: Some("Default branch".to_string()),
            origin_branch: name.to_string(),
            branched_from: Timestamp::now(),
            is_default: true,
            is_protected: true,
            is_data_only: false,
            hierarchy_level: 1,
        }
    }

    pub fn new(name: &str, origin_branch: &str, branched_from: Timestamp) -> Self {
        Self {
            name: name.to_string(),
            status: BranchStatus::Open,
            description: None,
            origin_branch: origin_branch.to_string(),
            branched_from,
            is_default: false,
            is_protected: false,
            is_data_only: false,
            hierarchy_level: 2,
        }
    }

    /// The ordered `(branch, effective time)` pairs to consult when
    /// resolving state as of `at`.
    ///
    /// On the default branch the scope is just the branch itself. Elsewhere
    /// the default branch comes first, capped at `branched_from` so that
    /// default-branch changes made after the branch point do not leak in —
    /// unless `ephemeral_rebase` asks for them (used transiently while
    /// computing a rebase).
    pub fn get_branches_in_scope(
        &self,
        at: Timestamp,
        ephemeral_rebase: bool,
    ) -> Vec<BranchScopeEntry> {
        if self.is_default {
            return vec![BranchScopeEntry {
                branch: self.name.clone(),
                at,
            }];
        }

        let default_at = if ephemeral_rebase {
            at
        } else {
            at.min(self.branched_from)
        };

        vec![
            BranchScopeEntry {
                branch: self.origin_branch.clone(),
                at: default_at,
            },
            BranchScopeEntry {
                branch: self.name.clone(),
                at,
            },
        ]
    }

    /// Treat the branch as if it were created now: its own history is kept,
    /// its dependency on older default-branch state is discarded.
    pub fn rebase(&mut self, at: Timestamp, registry: &BranchRegistry) {
        self.branched_from = at;
        registry.upsert(self.clone());
    }
}

/// Explicit, injectable branch registry. Passed to the diff/merge engines
/// rather than consulted as a process global, so concurrent diffs over
/// different branch sets cannot cross-talk.
#[derive(Debug, Default, Clone)]
pub struct BranchRegistry {
    inner: Arc<RwLock<HashMap<String, Branch>>>,
}

impl BranchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Branch> {
        self.inner.read().get(name).cloned()
    }

    pub fn upsert(&self, branch: Branch) {
        self.inner.write().insert(branch.name.clone(), branch);
    }

    pub fn default_branch(&self) -> Option<Branch> {
        self.inner.read().values().find(|b| b.is_default).cloned()
    }

    pub fn list(&self) -> Vec<Branch> {
        self.inner.read().values().cloned().collect()
    }

    /// Test support: drop every registered branch.
    pub fn reset(&self) {
        self.inner.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn test_default_branch_scope_is_itself_only() {
        let main = Branch::new_default("main");
        let at = ts("2024-05-01T00:00:00Z");
        let scope = main.get_branches_in_scope(at, false);
        assert_eq!(scope.len(), 1);
        assert_eq!(scope[0].branch, "main");
        assert_eq!(scope[0].at, at);
    }

    #[test]
    fn test_branch_scope_caps_default_at_branch_point() {
        let branched_from = ts("2024-05-01T00:00:00Z");
        let branch = Branch::new("branch1", "main", branched_from);
        let at = ts("2024-06-01T00:00:00Z");

        let scope = branch.get_branches_in_scope(at, false);
        assert_eq!(scope.len(), 2);
        assert_eq!(scope[0].branch, "main");
        assert_eq!(scope[0].at, branched_from, "default time capped");
        assert_eq!(scope[1].branch, "branch1");
        assert_eq!(scope[1].at, at);

        // Ephemeral rebase uses `at` directly.
        let scope = branch.get_branches_in_scope(at, true);
        assert_eq!(scope[0].at, at);
    }

    #[test]
    fn test_scope_before_branch_point_uses_at() {
        let branched_from = ts("2024-05-01T00:00:00Z");
        let branch = Branch::new("branch1", "main", branched_from);
        let earlier = ts("2024-04-01T00:00:00Z");
        let scope = branch.get_branches_in_scope(earlier, false);
        assert_eq!(scope[0].at, earlier);
    }

    #[test]
    fn test_rebase_advances_branch_point_and_registry() {
        let registry = BranchRegistry::new();
        let mut branch = Branch::new("branch1", "main", ts("2024-05-01T00:00:00Z"));
        registry.upsert(branch.clone());

        let now = ts("2024-07-01T00:00:00Z");
        branch.rebase(now, &registry);

        assert_eq!(branch.branched_from, now);
        assert_eq!(registry.get("branch1").unwrap().branched_from, now);
    }

    #[test]
    fn test_registry_default_branch_lookup() {
        let registry = BranchRegistry::new();
        registry.upsert(Branch::new_default("main"));
        registry.upsert(Branch::new("branch1", "main", Timestamp::now()));
        assert_eq!(registry.default_branch().unwrap().name, "main");
        registry.reset();
        assert!(registry.default_branch().is_none());
    }
}

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;

use crate::logic::diff::BranchDiffer;
use crate::logic::merge::{MergeEngine, MergeReport};
use crate::logic::query::DiffQueryFilters;
use crate::model::{Branch, BranchRegistry, MergeError, SchemaView, Timestamp};
use crate::store::traits::GraphStore;

/// An extra gate a merge must pass, beyond the built-in conflict check.
/// Returns human-readable refusal messages; an empty vec means the check
/// passed.
#[async_trait]
pub trait MergeCheck: Send + Sync {
    async fn run(&self, source: &Branch) -> Result<Vec<String>>;
}

/// Branch lifecycle: create, rebase, validate, merge. Validation always
/// runs before any write; a merge that validates clean is then handed to
/// [`MergeEngine`].
pub struct BranchOperations;

impl BranchOperations {
    /// Registers the default branch if missing and returns it.
    pub fn create_default_branch(registry: &BranchRegistry, name: &str) -> Branch {
        if let Some(existing) = registry.get(name) {
            return existing;
        }
        let branch = Branch::new_default(name);
        registry.upsert(branch.clone());
        info!("created default branch '{}'", name);
        branch
    }

    /// Creates a branch off the default branch, anchored at `branched_from`.
    pub fn create_branch(
        registry: &BranchRegistry,
        name: &str,
        description: Option<String>,
        branched_from: Timestamp,
    ) -> Result<Branch> {
        if registry.get(name).is_some() {
            return Err(anyhow!("branch '{}' already exists", name));
        }
        let origin = registry
            .default_branch()
            .ok_or_else(|| anyhow!("no default branch registered"))?;
        let mut branch = Branch::new(name, &origin.name, branched_from);
        branch.description = description;
        registry.upsert(branch.clone());
        info!(
            "created branch '{}' from '{}' at {}",
            name, origin.name, branched_from
        );
        Ok(branch)
    }

    /// Moves the branch point forward to `at`: the branch keeps its own
    /// changes and adopts everything its origin did in the meantime.
    pub fn rebase_branch(registry: &BranchRegistry, name: &str, at: Timestamp) -> Result<Branch> {
        let mut branch = registry.get(name).ok_or(MergeError::BranchNotFound {
            branch: name.to_string(),
        })?;
        if branch.is_default {
            return Err(anyhow!("the default branch '{}' cannot be rebased", name));
        }
        branch.rebase(at, registry);
        info!("rebased branch '{}' onto {}", name, at);
        Ok(branch)
    }

    /// Runs the conflict check plus any extra checks and collects every
    /// refusal message instead of stopping at the first.
    pub async fn validate_branch<S: GraphStore>(
        store: &S,
        registry: &BranchRegistry,
        schema: &dyn SchemaView,
        name: &str,
        checks: &[Box<dyn MergeCheck>],
    ) -> Result<Vec<String>> {
        let branch = registry.get(name).ok_or(MergeError::BranchNotFound {
            branch: name.to_string(),
        })?;
        if branch.is_default {
            return Err(MergeError::CannotMergeDefaultBranch {
                branch: branch.name.clone(),
            }
            .into());
        }

        let mut messages = Vec::new();
        let mut differ = BranchDiffer::new(
            store,
            schema,
            branch.clone(),
            None,
            None,
            DiffQueryFilters::default(),
        )?;
        for conflict in differ.get_conflicts().await? {
            messages.push(format!("conflict at {}", conflict.conflict_path));
        }
        for check in checks {
            messages.extend(check.run(&branch).await?);
        }
        Ok(messages)
    }

    /// Validate, merge into the origin, then advance the branch point so the
    /// branch can keep living past its merge.
    pub async fn merge_branch<S: GraphStore>(
        store: &S,
        registry: &BranchRegistry,
        schema: &dyn SchemaView,
        name: &str,
        checks: &[Box<dyn MergeCheck>],
    ) -> Result<MergeReport> {
        let messages = Self::validate_branch(store, registry, schema, name, checks).await?;
        if !messages.is_empty() {
            return Err(MergeError::ValidationFailed {
                branch: name.to_string(),
                messages,
            }
            .into());
        }

        let at = Timestamp::now();
        let report = MergeEngine::merge_branch(store, registry, schema, name, at).await?;
        Self::rebase_branch(registry, name, at)?;
        Ok(report)
    }
}

use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::logic::diff::BranchDiffer;
use crate::logic::query::DiffQueryFilters;
use crate::model::{
    Branch, BranchRegistry, DiffAction, EdgeKind, EdgeStatus, GraphError, Id, MergeError, NewEdge,
    SchemaView, Timestamp,
};
use crate::store::traits::GraphStore;

/// What a merge run did, for logging and idempotence checks: a second run
/// of the same merge reports zero closed and zero created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub edges_closed: usize,
    pub edges_created: usize,
    pub skipped_existing: usize,
}

/// One node's worth of merge work, extracted from the diff.
#[derive(Debug, Clone)]
pub struct NodeMergePayload {
    pub node_id: Id,
    pub action: DiffAction,
    pub attributes: Vec<AttributeMergePayload>,
    pub properties: Vec<PropertyMergePayload>,
}

#[derive(Debug, Clone)]
pub struct AttributeMergePayload {
    pub attribute_id: Id,
    pub name: String,
    pub action: DiffAction,
}

/// A property edge to move: `subject_id` is the attribute or relationship
/// node the edge hangs off.
#[derive(Debug, Clone)]
pub struct PropertyMergePayload {
    pub subject_id: Id,
    pub kind: EdgeKind,
    pub status: EdgeStatus,
}

#[derive(Debug, Clone)]
pub struct RelationshipMergePayload {
    pub relationship_id: Id,
    pub action: DiffAction,
    pub properties: Vec<PropertyMergePayload>,
}

/// Replays a branch's changes onto its origin by flipping edges: close the
/// branch-stamped edge, then create the equivalent origin-stamped edge
/// unless one is already open. Every write is a close-then-create pair, so
/// interrupted or repeated merges converge instead of duplicating state.
///
/// Conflict validation is the caller's responsibility (see
/// [`crate::logic::branch_ops::BranchOperations::merge_branch`]); the engine
/// itself applies whatever the branch's diff says, which is what keeps a
/// re-run over an already-merged branch a no-op instead of a self-conflict.
pub struct MergeEngine;

impl MergeEngine {
    /// Merges `source_branch` into its origin. All created edges carry
    /// `from = at`.
    pub async fn merge_branch<S: GraphStore>(
        store: &S,
        registry: &BranchRegistry,
        schema: &dyn SchemaView,
        source_branch: &str,
        at: Timestamp,
    ) -> Result<MergeReport> {
        let source = registry
            .get(source_branch)
            .ok_or_else(|| MergeError::BranchNotFound {
                branch: source_branch.to_string(),
            })?;
        if source.is_default {
            return Err(MergeError::CannotMergeDefaultBranch {
                branch: source.name.clone(),
            }
            .into());
        }
        let target =
            registry
                .get(&source.origin_branch)
                .ok_or_else(|| MergeError::BranchNotFound {
                    branch: source.origin_branch.clone(),
                })?;

        let mut differ = BranchDiffer::new(
            store,
            schema,
            source.clone(),
            None,
            Some(at),
            DiffQueryFilters::default(),
        )?;

        let (nodes, relationships) = Self::collect_payloads(&mut differ, &source.name).await?;
        debug!(
            "merging '{}' into '{}': {} node payload(s), {} relationship payload(s)",
            source.name,
            target.name,
            nodes.len(),
            relationships.len()
        );

        let mut report = MergeReport::default();
        for payload in &nodes {
            Self::merge_node(store, &source, &target, payload, at, &mut report).await?;
        }
        for payload in &relationships {
            Self::merge_relationship(store, &source, &target, payload, at, &mut report).await?;
        }

        info!(
            "merged '{}' into '{}': {} edge(s) closed, {} created, {} already present",
            source.name,
            target.name,
            report.edges_closed,
            report.edges_created,
            report.skipped_existing
        );
        Ok(report)
    }

    /// Extracts the source branch's bucket of the diff into flat payloads.
    async fn collect_payloads<S: GraphStore>(
        differ: &mut BranchDiffer<'_, S>,
        source_branch: &str,
    ) -> Result<(Vec<NodeMergePayload>, Vec<RelationshipMergePayload>)> {
        let mut nodes = Vec::new();
        for element in differ
            .get_nodes()
            .await?
            .get(source_branch)
            .into_iter()
            .flat_map(|m| m.values())
        {
            let mut payload = NodeMergePayload {
                node_id: element.id.clone(),
                action: element.action,
                attributes: Vec::new(),
                properties: Vec::new(),
            };
            for attribute in element.attributes.values() {
                payload.attributes.push(AttributeMergePayload {
                    attribute_id: attribute.id.clone(),
                    name: attribute.name.clone(),
                    action: attribute.action,
                });
                for property in attribute.properties.values() {
                    payload.properties.push(PropertyMergePayload {
                        subject_id: attribute.id.clone(),
                        kind: property.kind.edge_kind(),
                        status: match property.action {
                            DiffAction::Removed => EdgeStatus::Deleted,
                            _ => EdgeStatus::Active,
                        },
                    });
                }
            }
            nodes.push(payload);
        }

        let mut relationships = Vec::new();
        for element in differ
            .get_relationships()
            .await?
            .get(source_branch)
            .into_iter()
            .flat_map(|m| m.values())
        {
            relationships.push(RelationshipMergePayload {
                relationship_id: element.id.clone(),
                action: element.action,
                properties: element
                    .properties
                    .values()
                    .map(|p| PropertyMergePayload {
                        subject_id: element.id.clone(),
                        kind: p.kind.edge_kind(),
                        status: match p.action {
                            DiffAction::Removed => EdgeStatus::Deleted,
                            _ => EdgeStatus::Active,
                        },
                    })
                    .collect(),
            });
        }
        Ok((nodes, relationships))
    }

    async fn merge_node<S: GraphStore>(
        store: &S,
        source: &Branch,
        target: &Branch,
        payload: &NodeMergePayload,
        at: Timestamp,
        report: &mut MergeReport,
    ) -> Result<()> {
        match payload.action {
            DiffAction::Added => {
                Self::flip_edges(
                    store,
                    &payload.node_id,
                    EdgeKind::IsPartOf,
                    EdgeStatus::Active,
                    None,
                    source,
                    target,
                    at,
                    report,
                )
                .await?;
            }
            DiffAction::Removed => {
                Self::flip_edges(
                    store,
                    &payload.node_id,
                    EdgeKind::IsPartOf,
                    EdgeStatus::Deleted,
                    None,
                    source,
                    target,
                    at,
                    report,
                )
                .await?;
            }
            DiffAction::Updated => {}
        }

        for attribute in &payload.attributes {
            let status = match attribute.action {
                DiffAction::Added => EdgeStatus::Active,
                DiffAction::Removed => EdgeStatus::Deleted,
                DiffAction::Updated => continue,
            };
            Self::flip_edges(
                store,
                &payload.node_id,
                EdgeKind::HasAttribute,
                status,
                Some(&attribute.attribute_id),
                source,
                target,
                at,
                report,
            )
            .await?;
        }

        for property in &payload.properties {
            Self::flip_edges(
                store,
                &property.subject_id,
                property.kind,
                property.status,
                None,
                source,
                target,
                at,
                report,
            )
            .await?;
        }
        Ok(())
    }

    /// Both IS_RELATED edges of a relationship move in the same pass so a
    /// half-merged relationship can never be observed.
    async fn merge_relationship<S: GraphStore>(
        store: &S,
        source: &Branch,
        target: &Branch,
        payload: &RelationshipMergePayload,
        at: Timestamp,
        report: &mut MergeReport,
    ) -> Result<()> {
        if payload.action != DiffAction::Updated {
            let status = match payload.action {
                DiffAction::Added => EdgeStatus::Active,
                DiffAction::Removed => EdgeStatus::Deleted,
                DiffAction::Updated => unreachable!(),
            };
            let (peer_source, peer_dest) = store
                .relationship_peers(&payload.relationship_id)
                .await?
                .ok_or_else(|| {
                    anyhow!(GraphError::DanglingRelationship {
                        relationship_id: payload.relationship_id.clone(),
                    })
                })?;
            for (subject, object) in [
                (peer_source.clone(), Some(payload.relationship_id.clone())),
                (payload.relationship_id.clone(), Some(peer_dest.clone())),
            ] {
                Self::flip_edges(
                    store,
                    &subject,
                    EdgeKind::IsRelated,
                    status,
                    object.as_ref(),
                    source,
                    target,
                    at,
                    report,
                )
                .await?;
            }
        }

        for property in &payload.properties {
            Self::flip_edges(
                store,
                &property.subject_id,
                property.kind,
                property.status,
                None,
                source,
                target,
                at,
                report,
            )
            .await?;
        }
        Ok(())
    }

    /// The merge primitive. For each open source-branch edge matching
    /// (subject, kind, status[, object]):
    ///   1. close it,
    ///   2. close the target's open counterpart being superseded (the
    ///      same-object ACTIVE edge when merging a removal, the
    ///      other-object ACTIVE edge when merging a single-valued update),
    ///   3. create the target-stamped equivalent unless an open one with
    ///      the same object already exists.
    #[allow(clippy::too_many_arguments)]
    async fn flip_edges<S: GraphStore>(
        store: &S,
        subject: &Id,
        kind: EdgeKind,
        status: EdgeStatus,
        object: Option<&Id>,
        source: &Branch,
        target: &Branch,
        at: Timestamp,
        report: &mut MergeReport,
    ) -> Result<()> {
        let source_edges = store
            .open_edges(subject, kind, &source.name, Some(status), object)
            .await?;

        for edge in source_edges {
            store.close_edge(&edge.id, at).await?;
            report.edges_closed += 1;

            match status {
                EdgeStatus::Deleted => {
                    // A merged removal retires the target's live edge.
                    for open in store
                        .open_edges(
                            subject,
                            kind,
                            &target.name,
                            Some(EdgeStatus::Active),
                            Some(&edge.object),
                        )
                        .await?
                    {
                        store.close_edge(&open.id, at).await?;
                        report.edges_closed += 1;
                    }
                }
                EdgeStatus::Active if kind.is_single_valued() => {
                    // Close the target's current value before installing
                    // the branch's.
                    for open in store
                        .open_edges(subject, kind, &target.name, Some(EdgeStatus::Active), None)
                        .await?
                    {
                        if open.object != edge.object {
                            store.close_edge(&open.id, at).await?;
                            report.edges_closed += 1;
                        }
                    }
                }
                EdgeStatus::Active => {}
            }

            let existing = store
                .open_edges(subject, kind, &target.name, Some(status), Some(&edge.object))
                .await?;
            if !existing.is_empty() {
                report.skipped_existing += 1;
                continue;
            }
            store
                .create_edge(NewEdge {
                    kind,
                    subject: subject.clone(),
                    object: edge.object.clone(),
                    branch: target.name.clone(),
                    status,
                    from: at,
                    branch_level: target.hierarchy_level,
                })
                .await?;
            report.edges_created += 1;
        }
        Ok(())
    }
}

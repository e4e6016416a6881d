use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    AttributeRecord, Branch, BranchScopeEntry, Edge, Id, NodeRecord, PropertyKind,
    RelationshipNode, Timestamp,
};

/// The branch-set predicate every diff query carries: an edge qualifies if,
/// for any `(branch, time)` pair in scope, it is stamped with that branch
/// and was opened no later than that time.
///
/// For a non-default branch the default-branch entry is capped at
/// `branched_from`, which is what keeps post-branch-point default changes
/// out of the branch's view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchFilter {
    pub entries: Vec<BranchScopeEntry>,
}

impl BranchFilter {
    pub fn for_branch(branch: &Branch, at: Timestamp) -> Self {
        Self {
            entries: branch.get_branches_in_scope(at, false),
        }
    }

    /// Scope check only; the time-window check is separate.
    pub fn in_scope(&self, edge: &Edge) -> bool {
        self.entries
            .iter()
            .any(|entry| edge.branch == entry.branch && edge.from <= entry.at)
    }

    /// Full as-of-instant predicate: `branch = $b AND from <= $t AND
    /// (to IS NULL OR to >= $t)`, OR'd across the scope entries.
    pub fn valid_at_scope(&self, edge: &Edge) -> bool {
        self.entries.iter().any(|entry| {
            edge.branch == entry.branch
                && edge.from <= entry.at
                && edge.to.map_or(true, |to| to >= entry.at)
        })
    }

    pub fn branch_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.branch.as_str()).collect()
    }
}

/// The `[diff_from, diff_to]` observation window. The `to` boundary is
/// inclusive: an edge closed exactly at `diff_to` is part of the diff, one
/// closed earlier is a superseded (stale) row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl TimeWindow {
    pub fn contains(&self, at: Timestamp) -> bool {
        at >= self.from && at <= self.to
    }

    /// Whether the edge was opened or closed within the window, i.e.
    /// represents a change this diff should report.
    pub fn edge_changed_within(&self, edge: &Edge) -> bool {
        self.contains(edge.from) || edge.to.map_or(false, |to| self.contains(to))
    }

    /// A row whose `to` is set strictly before `diff_to` was superseded
    /// within the window by a later edge and must be skipped.
    pub fn is_stale(&self, edge: &Edge) -> bool {
        edge.to.map_or(false, |to| to < self.to)
    }
}

/// Optional kind/namespace include/exclude filters shared by all diff
/// queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffQueryFilters {
    pub namespaces_include: Option<Vec<String>>,
    pub namespaces_exclude: Option<Vec<String>>,
    pub kinds_include: Option<Vec<String>>,
    pub kinds_exclude: Option<Vec<String>>,
}

impl DiffQueryFilters {
    pub fn accepts(&self, node: &NodeRecord) -> bool {
        if let Some(include) = &self.namespaces_include {
            if !include.contains(&node.namespace) {
                return false;
            }
        }
        if let Some(exclude) = &self.namespaces_exclude {
            if exclude.contains(&node.namespace) {
                return false;
            }
        }
        if let Some(include) = &self.kinds_include {
            if !include.contains(&node.kind) {
                return false;
            }
        }
        if let Some(exclude) = &self.kinds_exclude {
            if exclude.contains(&node.kind) {
                return false;
            }
        }
        true
    }
}

/// Explicit limit/offset. Queries without one are paginated internally by
/// the driver at the configured page size; the in-memory store returns
/// everything in one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Pagination {
    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        let mut iter = rows.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.by_ref().take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Finds nodes whose IS_PART_OF membership edge changed within the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffNodeQuery {
    pub branch_filter: BranchFilter,
    pub window: TimeWindow,
    pub filters: DiffQueryFilters,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMembershipRow {
    pub node: NodeRecord,
    pub membership_edge: Edge,
}

/// Finds HAS_ATTRIBUTE edges whose attribute saw in-window property
/// activity, together with those property edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffAttributeQuery {
    pub branch_filter: BranchFilter,
    pub window: TimeWindow,
    pub filters: DiffQueryFilters,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChangeRow {
    /// Branch the in-window activity happened on. Not necessarily the
    /// branch of `attribute_edge`: a value change on a branch rides on the
    /// ownership edge inherited from the default branch.
    pub branch: String,
    pub node: NodeRecord,
    pub attribute: AttributeRecord,
    pub attribute_edge: Edge,
    /// Property edges on this attribute that changed within the window.
    pub properties: Vec<PropertyRow>,
}

/// One property edge with its resolved value (value/owner/source nodes
/// resolve to their payload, flags to a boolean).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRow {
    /// Attribute or relationship node the property hangs off.
    pub subject_id: Id,
    pub kind: PropertyKind,
    pub edge: Edge,
    pub value: Option<serde_json::Value>,
}

/// Fetches property edges on the given attribute/relationship ids that are
/// valid as of a single instant — used to find the value that was true
/// right before a diff window opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPropertiesByIdsQuery {
    pub ids: Vec<Id>,
    pub at: Timestamp,
    pub branch_filter: BranchFilter,
}

/// Range variant: property edges on the given ids that were valid at any
/// point within the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPropertiesByIdsRangeQuery {
    pub ids: Vec<Id>,
    pub window: TimeWindow,
    pub branch_filter: BranchFilter,
}

/// Finds relationship add/remove events: IS_RELATED edge pairs changed
/// within the window. Rows are deduplicated across the two traversal
/// directions by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRelationshipQuery {
    pub branch_filter: BranchFilter,
    pub window: TimeWindow,
    pub filters: DiffQueryFilters,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub relationship: RelationshipNode,
    /// Representative edge; both IS_RELATED edges of the pair share branch,
    /// status, from and to.
    pub edge: Edge,
    pub source: NodeRecord,
    pub dest: NodeRecord,
}

/// Finds in-window property-edge changes on relationship nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRelationshipPropertyQuery {
    pub branch_filter: BranchFilter,
    pub window: TimeWindow,
    pub filters: DiffQueryFilters,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPropertyRow {
    pub relationship: RelationshipNode,
    pub source: NodeRecord,
    pub dest: NodeRecord,
    pub property: PropertyRow,
}

/// Pick the single authoritative row per `(subject, property kind)` when
/// several branches produced candidates: higher `branch_level` wins (the
/// edge's own level, not a path sum), then the more recently opened edge,
/// then the open one over the closed one.
pub fn pick_authoritative_rows(rows: Vec<PropertyRow>) -> HashMap<(Id, PropertyKind), PropertyRow> {
    let mut best: HashMap<(Id, PropertyKind), PropertyRow> = HashMap::new();
    for row in rows {
        let key = (row.subject_id.clone(), row.kind);
        match best.get(&key) {
            Some(current) if !edge_outranks(&row.edge, &current.edge) => {}
            _ => {
                best.insert(key, row);
            }
        }
    }
    best
}

/// Edge-level ordering used by the scoring above and by the store when
/// several in-scope edges survive for the same logical path.
pub fn edge_outranks(candidate: &Edge, current: &Edge) -> bool {
    if candidate.branch_level != current.branch_level {
        return candidate.branch_level > current.branch_level;
    }
    if candidate.from != current.from {
        return candidate.from > current.from;
    }
    // An open edge outranks a closed one; between two closed edges the
    // later-closed wins.
    match (candidate.to, current.to) {
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a > b,
        (None, None) => false,
    }
}

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use itertools::Itertools;
use log::debug;

use crate::config::QueryConfig;
use crate::logic::query::{
    pick_authoritative_rows, BranchFilter, DiffAttributeQuery, DiffNodeQuery,
    DiffPropertiesByIdsQuery, DiffPropertiesByIdsRangeQuery, DiffQueryFilters,
    DiffRelationshipPropertyQuery, DiffRelationshipQuery, Pagination, PropertyRow, TimeWindow,
};
use crate::model::{
    Branch, BranchChanges, DataConflict, DiffAction, DiffError, EdgeStatus, Id, ModifiedPath,
    NodeAttributeDiffElement, NodeDiffElement, NodeRecord, PathType, PeerInfo,
    PropertyDiffElement, PropertyKind, RelationshipCardinality, RelationshipDiffElement,
    RelationshipEdgeNodeDiffElement, SchemaView, Timestamp, UNDEFINED_RELATIONSHIP_NAME,
};
use crate::store::traits::GraphStore;

/// Per-branch diff results with explicit computed flags. Results are
/// computed at most once per differ instance and never persisted.
#[derive(Debug, Default)]
struct DiffAccumulator {
    nodes: HashMap<String, HashMap<Id, NodeDiffElement>>,
    relationships: HashMap<String, HashMap<Id, RelationshipDiffElement>>,
    nodes_computed: bool,
    relationships_computed: bool,
}

/// The reconstruction engine: consumes raw query rows and assembles, per
/// branch, the structured diff of everything that changed within
/// `[diff_from, diff_to]`, then intersects branches' path sets to find
/// conflicts.
pub struct BranchDiffer<'a, S: GraphStore> {
    store: &'a S,
    schema: &'a dyn SchemaView,
    branch: Branch,
    diff_from: Timestamp,
    diff_to: Timestamp,
    filters: DiffQueryFilters,
    page_size: usize,
    accumulator: DiffAccumulator,
}

impl<'a, S: GraphStore> std::fmt::Debug for BranchDiffer<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchDiffer")
            .field("branch", &self.branch)
            .field("diff_from", &self.diff_from)
            .field("diff_to", &self.diff_to)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl<'a, S: GraphStore> BranchDiffer<'a, S> {
    /// Validates the time range before any query executes. On a non-default
    /// branch `diff_from` defaults to the branch point and `diff_to` to now.
    pub fn new(
        store: &'a S,
        schema: &'a dyn SchemaView,
        branch: Branch,
        diff_from: Option<Timestamp>,
        diff_to: Option<Timestamp>,
        filters: DiffQueryFilters,
    ) -> Result<Self, DiffError> {
        let diff_from = match diff_from {
            Some(ts) => ts,
            None if branch.is_default => {
                return Err(DiffError::DiffFromRequiredOnDefaultBranch {
                    branch: branch.name.clone(),
                })
            }
            None => branch.branched_from,
        };
        let diff_to = diff_to.unwrap_or_else(Timestamp::now);
        if diff_to < diff_from {
            return Err(DiffError::RangeValidation { diff_from, diff_to });
        }
        Ok(Self {
            store,
            schema,
            branch,
            diff_from,
            diff_to,
            filters,
            page_size: QueryConfig::default().page_size,
            accumulator: DiffAccumulator::default(),
        })
    }

    /// Page size for the change-window queries, normally
    /// [`crate::config::AppConfig`]'s `query.page_size`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            from: self.diff_from,
            to: self.diff_to,
        }
    }

    /// Branch set for the change-window queries. Uses the uncapped default
    /// branch time: conflict detection must see default-branch changes made
    /// after the branch point.
    fn window_filter(&self) -> BranchFilter {
        BranchFilter {
            entries: self.branch.get_branches_in_scope(self.diff_to, true),
        }
    }

    /// Branch set for "what was true right before the window" follow-ups,
    /// per the branch the change happened on.
    fn previous_value_filter(&self, change_branch: &str) -> BranchFilter {
        if change_branch == self.branch.name && !self.branch.is_default {
            BranchFilter {
                entries: self.branch.get_branches_in_scope(self.diff_from, false),
            }
        } else {
            BranchFilter {
                entries: vec![crate::model::BranchScopeEntry {
                    branch: change_branch.to_string(),
                    at: self.diff_from,
                }],
            }
        }
    }

    // -- node + attribute diff --

    /// Per-branch node-level diff, memoized.
    pub async fn get_nodes(&mut self) -> Result<&HashMap<String, HashMap<Id, NodeDiffElement>>> {
        if !self.accumulator.nodes_computed {
            self.calculate_diff_nodes().await?;
            self.accumulator.nodes_computed = true;
        }
        Ok(&self.accumulator.nodes)
    }

    async fn calculate_diff_nodes(&mut self) -> Result<()> {
        let window = self.window();
        let filter = self.window_filter();

        let store = self.store;
        let page_size = self.page_size;
        let filters = self.filters.clone();

        // Independent queries, issued concurrently; each pulls pages until
        // a short page marks the result set exhausted.
        let node_rows_fut = async {
            let mut query = DiffNodeQuery {
                branch_filter: filter.clone(),
                window,
                filters: filters.clone(),
                pagination: Pagination {
                    limit: Some(page_size),
                    offset: Some(0),
                },
            };
            let mut rows = Vec::new();
            loop {
                let batch = store.query_nodes(&query).await?;
                let batch_len = batch.len();
                rows.extend(batch);
                if batch_len < page_size {
                    break;
                }
                query.pagination.offset = Some(rows.len());
            }
            anyhow::Ok(rows)
        };
        let attribute_rows_fut = async {
            let mut query = DiffAttributeQuery {
                branch_filter: filter.clone(),
                window,
                filters: filters.clone(),
                pagination: Pagination {
                    limit: Some(page_size),
                    offset: Some(0),
                },
            };
            let mut rows = Vec::new();
            loop {
                let batch = store.query_attributes(&query).await?;
                let batch_len = batch.len();
                rows.extend(batch);
                if batch_len < page_size {
                    break;
                }
                query.pagination.offset = Some(rows.len());
            }
            anyhow::Ok(rows)
        };
        let (node_rows, attribute_rows) = tokio::try_join!(node_rows_fut, attribute_rows_fut)?;

        let mut results: HashMap<String, HashMap<Id, NodeDiffElement>> = HashMap::new();

        for row in node_rows {
            let edge = &row.membership_edge;
            // Superseded before the window end: a later membership edge on
            // the same branch carries the final state.
            if window.is_stale(edge) {
                continue;
            }
            let action = match edge.status {
                EdgeStatus::Active => DiffAction::Added,
                EdgeStatus::Deleted => DiffAction::Removed,
            };
            let element = NodeDiffElement {
                branch: edge.branch.clone(),
                kind: row.node.kind.clone(),
                id: row.node.id.clone(),
                labels: row.node.labels.clone(),
                action,
                changed_at: Some(edge.from),
                attributes: HashMap::new(),
            };
            let branch_map = results.entry(edge.branch.clone()).or_default();
            match branch_map.get(&row.node.id) {
                Some(existing) if existing.changed_at >= element.changed_at => {}
                _ => {
                    branch_map.insert(row.node.id.clone(), element);
                }
            }
        }

        // Attribute ids needing a previous-value follow-up, per branch.
        let mut follow_up: HashMap<String, Vec<Id>> = HashMap::new();

        for row in attribute_rows {
            let branch = row.branch.clone();
            let branch_map = results.entry(branch.clone()).or_default();
            let node_element = branch_map
                .entry(row.node.id.clone())
                .or_insert_with(|| NodeDiffElement {
                    branch: branch.clone(),
                    kind: row.node.kind.clone(),
                    id: row.node.id.clone(),
                    labels: row.node.labels.clone(),
                    action: DiffAction::Updated,
                    changed_at: None,
                    attributes: HashMap::new(),
                });
            let node_action = node_element.action;

            if node_element.attributes.contains_key(&row.attribute.name) {
                continue;
            }

            let attr_edge = &row.attribute_edge;
            let action = if node_action == DiffAction::Added
                && attr_edge.from >= self.diff_from
                && attr_edge.status == EdgeStatus::Active
            {
                DiffAction::Added
            } else if attr_edge.from >= self.diff_from && attr_edge.status == EdgeStatus::Deleted {
                DiffAction::Removed
            } else {
                DiffAction::Updated
            };
            if action != DiffAction::Added {
                follow_up
                    .entry(branch.clone())
                    .or_default()
                    .push(row.attribute.id.clone());
            }

            let mut attribute_element = NodeAttributeDiffElement {
                id: row.attribute.id.clone(),
                name: row.attribute.name.clone(),
                action,
                changed_at: (attr_edge.from >= self.diff_from).then_some(attr_edge.from),
                properties: HashMap::new(),
            };

            // New values: the authoritative non-stale in-window row per
            // property kind.
            let live_rows: Vec<PropertyRow> = row
                .properties
                .iter()
                .filter(|p| !window.is_stale(&p.edge))
                .cloned()
                .collect();
            for ((_, kind), prop_row) in pick_authoritative_rows(live_rows) {
                let new_value = if prop_row.edge.status == EdgeStatus::Active {
                    prop_row.value.clone()
                } else {
                    None
                };
                attribute_element.properties.insert(
                    kind,
                    PropertyDiffElement {
                        branch: branch.clone(),
                        kind,
                        action,
                        value: crate::model::ValueElement {
                            previous: None,
                            new: new_value,
                        },
                        changed_at: Some(prop_row.edge.from),
                    },
                );
            }

            node_element
                .attributes
                .insert(row.attribute.name.clone(), attribute_element);
        }

        // Previous values: what each queued attribute's properties were
        // right before the window opened.
        for (branch, ids) in follow_up {
            let query = DiffPropertiesByIdsQuery {
                ids: ids.clone(),
                at: self.diff_from,
                branch_filter: self.previous_value_filter(&branch),
            };
            let rows = self.store.query_properties_at(&query).await?;
            let previous = pick_authoritative_rows(rows);

            let Some(branch_map) = results.get_mut(&branch) else {
                continue;
            };
            for node_element in branch_map.values_mut() {
                for attribute in node_element.attributes.values_mut() {
                    if !ids.contains(&attribute.id) {
                        continue;
                    }
                    apply_previous_values(attribute, &branch, &previous);
                }
            }
        }

        debug!(
            "node diff computed for '{}' over [{}, {}]: {} branch bucket(s)",
            self.branch.name,
            self.diff_from,
            self.diff_to,
            results.len()
        );
        self.accumulator.nodes = results;
        Ok(())
    }

    // -- relationship diff --

    /// Per-branch relationship-level diff, memoized.
    pub async fn get_relationships(
        &mut self,
    ) -> Result<&HashMap<String, HashMap<Id, RelationshipDiffElement>>> {
        if !self.accumulator.relationships_computed {
            self.calculate_diff_relationships().await?;
            self.accumulator.relationships_computed = true;
        }
        Ok(&self.accumulator.relationships)
    }

    async fn calculate_diff_relationships(&mut self) -> Result<()> {
        let window = self.window();
        let filter = self.window_filter();

        let store = self.store;
        let page_size = self.page_size;
        let filters = self.filters.clone();

        let relationship_rows_fut = async {
            let mut query = DiffRelationshipQuery {
                branch_filter: filter.clone(),
                window,
                filters: filters.clone(),
                pagination: Pagination {
                    limit: Some(page_size),
                    offset: Some(0),
                },
            };
            let mut rows = Vec::new();
            loop {
                let batch = store.query_relationships(&query).await?;
                let batch_len = batch.len();
                rows.extend(batch);
                if batch_len < page_size {
                    break;
                }
                query.pagination.offset = Some(rows.len());
            }
            anyhow::Ok(rows)
        };
        let property_rows_fut = async {
            let mut query = DiffRelationshipPropertyQuery {
                branch_filter: filter.clone(),
                window,
                filters: filters.clone(),
                pagination: Pagination {
                    limit: Some(page_size),
                    offset: Some(0),
                },
            };
            let mut rows = Vec::new();
            loop {
                let batch = store.query_relationship_properties(&query).await?;
                let batch_len = batch.len();
                rows.extend(batch);
                if batch_len < page_size {
                    break;
                }
                query.pagination.offset = Some(rows.len());
            }
            anyhow::Ok(rows)
        };
        let (relationship_rows, property_rows) =
            tokio::try_join!(relationship_rows_fut, property_rows_fut)?;

        let mut results: HashMap<String, HashMap<Id, RelationshipDiffElement>> = HashMap::new();
        let mut follow_up: HashMap<String, Vec<Id>> = HashMap::new();

        for row in relationship_rows {
            let edge = &row.edge;
            if window.is_stale(edge) {
                continue;
            }
            let action = match edge.status {
                EdgeStatus::Active => DiffAction::Added,
                EdgeStatus::Deleted => DiffAction::Removed,
            };
            if action == DiffAction::Removed {
                follow_up
                    .entry(edge.branch.clone())
                    .or_default()
                    .push(row.relationship.id.clone());
            }

            let (name, paths, conflict_paths) =
                self.parse_relationship_paths(&row.source, &row.dest, &row.relationship.name);

            let element = RelationshipDiffElement {
                branch: edge.branch.clone(),
                id: row.relationship.id.clone(),
                name,
                identifier: row.relationship.name.clone(),
                action,
                nodes: endpoint_map(&row.source, &row.dest),
                properties: HashMap::new(),
                changed_at: Some(edge.from),
                paths,
                conflict_paths,
            };
            let branch_map = results.entry(edge.branch.clone()).or_default();
            match branch_map.get(&row.relationship.id) {
                Some(existing) if existing.changed_at >= element.changed_at => {}
                _ => {
                    branch_map.insert(row.relationship.id.clone(), element);
                }
            }
        }

        for row in property_rows {
            let prop = &row.property;
            if window.is_stale(&prop.edge) {
                continue;
            }
            let branch = prop.edge.branch.clone();
            let branch_map = results.entry(branch.clone()).or_default();
            if !branch_map.contains_key(&row.relationship.id) {
                // Only a property changed: synthesize an UPDATED element.
                let (name, paths, conflict_paths) =
                    self.parse_relationship_paths(&row.source, &row.dest, &row.relationship.name);
                branch_map.insert(
                    row.relationship.id.clone(),
                    RelationshipDiffElement {
                        branch: branch.clone(),
                        id: row.relationship.id.clone(),
                        name,
                        identifier: row.relationship.name.clone(),
                        action: DiffAction::Updated,
                        nodes: endpoint_map(&row.source, &row.dest),
                        properties: HashMap::new(),
                        changed_at: None,
                        paths,
                        conflict_paths,
                    },
                );
                follow_up
                    .entry(branch.clone())
                    .or_default()
                    .push(row.relationship.id.clone());
            }
            let element = branch_map
                .get_mut(&row.relationship.id)
                .expect("element inserted above");
            let new_value = if prop.edge.status == EdgeStatus::Active {
                prop.value.clone()
            } else {
                None
            };
            element.properties.insert(
                prop.kind,
                PropertyDiffElement {
                    branch: branch.clone(),
                    kind: prop.kind,
                    action: element.action,
                    value: crate::model::ValueElement {
                        previous: None,
                        new: new_value,
                    },
                    changed_at: Some(prop.edge.from),
                },
            );
        }

        for (branch, ids) in follow_up {
            let query = DiffPropertiesByIdsRangeQuery {
                ids: ids.clone(),
                window,
                branch_filter: self.previous_value_filter(&branch),
            };
            let rows = self.store.query_properties_range(&query).await?;
            // Only rows already valid when the window opened describe the
            // previous state.
            let before: Vec<PropertyRow> = rows
                .into_iter()
                .filter(|r| {
                    r.edge.status == EdgeStatus::Active
                        && r.edge.from <= self.diff_from
                        && r.edge.to.map_or(true, |to| to >= self.diff_from)
                })
                .collect();
            let previous = pick_authoritative_rows(before);

            let Some(branch_map) = results.get_mut(&branch) else {
                continue;
            };
            for element in branch_map.values_mut() {
                if !ids.contains(&element.id) {
                    continue;
                }
                let removed = element.action == DiffAction::Removed;
                for (key, prop) in previous.iter().filter(|((id, _), _)| *id == element.id) {
                    if removed {
                        let entry = element
                            .properties
                            .entry(key.1)
                            .or_insert_with(|| PropertyDiffElement {
                                branch: branch.clone(),
                                kind: key.1,
                                action: DiffAction::Removed,
                                value: crate::model::ValueElement::default(),
                                changed_at: None,
                            });
                        entry.action = DiffAction::Removed;
                        entry.value.previous = prop.value.clone();
                        entry.value.new = None;
                    } else if let Some(entry) = element.properties.get_mut(&key.1) {
                        entry.value.previous = prop.value.clone();
                    }
                }
                for property in element.properties.values_mut() {
                    if property.action == DiffAction::Updated
                        && property.value.previous.is_none()
                        && property.value.new.is_some()
                    {
                        property.action = DiffAction::Added;
                    }
                }
            }
        }

        self.accumulator.relationships = results;
        Ok(())
    }

    /// Resolve the relationship's display name per endpoint schema and
    /// build the two path strings plus their peer-erased conflict forms.
    fn parse_relationship_paths(
        &self,
        source: &NodeRecord,
        dest: &NodeRecord,
        identifier: &str,
    ) -> (String, Vec<String>, Vec<String>) {
        let mut display_name = UNDEFINED_RELATIONSHIP_NAME.to_string();
        let mut paths = Vec::new();
        let mut conflict_paths = Vec::new();
        for (this, other) in [(source, dest), (dest, source)] {
            let name = self
                .schema
                .node_schema(&this.kind, &self.branch.name)
                .and_then(|s| {
                    s.relationship_by_identifier(identifier)
                        .map(|r| r.name.clone())
                })
                .unwrap_or_else(|| UNDEFINED_RELATIONSHIP_NAME.to_string());
            if this.id == source.id && name != UNDEFINED_RELATIONSHIP_NAME {
                display_name = name.clone();
            }
            paths.push(format!("data/{}/{}/{}", this.id, name, other.id));
            conflict_paths.push(format!("data/{}/{}/peer", this.id, name));
        }
        (display_name, paths, conflict_paths)
    }

    // -- modified paths + conflicts --

    /// Per-branch sets of logical paths touched in the window, with
    /// cardinality-one relationship events folded into single UPDATED
    /// entries.
    pub async fn get_modified_paths(&mut self) -> Result<HashMap<String, Vec<ModifiedPath>>> {
        self.get_nodes().await?;
        self.get_relationships().await?;

        let mut paths: HashMap<String, Vec<ModifiedPath>> = HashMap::new();

        for (branch, nodes) in &self.accumulator.nodes {
            let branch_paths = paths.entry(branch.clone()).or_default();
            for node in nodes.values() {
                if node.action != DiffAction::Updated {
                    branch_paths.push(ModifiedPath {
                        path_type: PathType::Node,
                        node_id: node.id.clone(),
                        kind: node.kind.clone(),
                        element_name: None,
                        property_name: None,
                        peer_id: None,
                        action: node.action,
                        change: None,
                    });
                }
                for attribute in node.attributes.values() {
                    for property in attribute.properties.values() {
                        branch_paths.push(ModifiedPath {
                            path_type: PathType::Attribute,
                            node_id: node.id.clone(),
                            kind: node.kind.clone(),
                            element_name: Some(attribute.name.clone()),
                            property_name: Some(property.kind.to_string()),
                            peer_id: None,
                            action: property.action,
                            change: Some(property.value.clone()),
                        });
                    }
                }
            }
        }

        // Cardinality-one fold: REMOVE(old peer) + ADD(new peer) for the
        // same (node, relationship name) is one semantic change, not two.
        let mut folds: HashMap<String, HashMap<(Id, String), CardinalityOneFold>> = HashMap::new();
        let mut peer_ids: HashSet<Id> = HashSet::new();

        for (branch, relationships) in &self.accumulator.relationships {
            let branch_paths = paths.entry(branch.clone()).or_default();
            for element in relationships.values() {
                for (endpoint_id, endpoint) in &element.nodes {
                    let other = element
                        .nodes
                        .values()
                        .find(|n| &n.id != endpoint_id)
                        .map(|n| n.id.clone())
                        .unwrap_or_default();
                    let schema_rel = self
                        .schema
                        .node_schema(&endpoint.kind, &self.branch.name)
                        .and_then(|s| {
                            s.relationship_by_identifier(&element.identifier).cloned()
                        });
                    let (name, cardinality) = match &schema_rel {
                        Some(rel) => (rel.name.clone(), rel.cardinality),
                        None => (
                            UNDEFINED_RELATIONSHIP_NAME.to_string(),
                            RelationshipCardinality::Many,
                        ),
                    };
                    let path_type = match cardinality {
                        RelationshipCardinality::One => PathType::RelationshipOne,
                        RelationshipCardinality::Many => PathType::RelationshipMany,
                    };

                    if cardinality == RelationshipCardinality::One
                        && element.action != DiffAction::Updated
                    {
                        let fold = folds
                            .entry(branch.clone())
                            .or_default()
                            .entry((endpoint_id.clone(), name.clone()))
                            .or_insert_with(|| CardinalityOneFold {
                                kind: endpoint.kind.clone(),
                                previous_peer: None,
                                new_peer: None,
                            });
                        match element.action {
                            DiffAction::Added => fold.new_peer = Some(other.clone()),
                            DiffAction::Removed => fold.previous_peer = Some(other.clone()),
                            DiffAction::Updated => {}
                        }
                        peer_ids.insert(other);
                        continue;
                    }

                    if element.action != DiffAction::Updated {
                        branch_paths.push(ModifiedPath {
                            path_type,
                            node_id: endpoint_id.clone(),
                            kind: endpoint.kind.clone(),
                            element_name: Some(name.clone()),
                            property_name: None,
                            peer_id: Some(other.clone()),
                            action: element.action,
                            change: None,
                        });
                    }
                    for property in element.properties.values() {
                        branch_paths.push(ModifiedPath {
                            path_type,
                            node_id: endpoint_id.clone(),
                            kind: endpoint.kind.clone(),
                            element_name: Some(name.clone()),
                            property_name: Some(property.kind.to_string()),
                            peer_id: Some(other.clone()),
                            action: property.action,
                            change: Some(property.value.clone()),
                        });
                    }
                }
            }
        }

        // Batched display-label resolution for every peer seen in a fold.
        let peer_ids: Vec<Id> = peer_ids.into_iter().collect();
        let label_filter = BranchFilter {
            entries: self.branch.get_branches_in_scope(self.diff_to, false),
        };
        let mut peers = self
            .store
            .get_display_labels(&peer_ids, self.schema, &label_filter)
            .await?;
        // A fold peer the label query could not resolve must still be a
        // real node; a missing one is a data-integrity error.
        for id in &peer_ids {
            if !peers.contains_key(id) {
                let node = self.store.get_node(id).await?;
                peers.insert(
                    id.clone(),
                    PeerInfo {
                        id: id.clone(),
                        display_label: node.id.clone(),
                        kind: node.kind,
                    },
                );
            }
        }

        for (branch, branch_folds) in folds {
            let branch_paths = paths.entry(branch).or_default();
            for ((node_id, name), fold) in branch_folds {
                let action = match (&fold.previous_peer, &fold.new_peer) {
                    (Some(prev), Some(new)) if prev == new => continue,
                    (Some(_), Some(_)) => DiffAction::Updated,
                    (None, Some(_)) => DiffAction::Added,
                    (Some(_), None) => DiffAction::Removed,
                    (None, None) => continue,
                };
                let to_value = |id: &Option<Id>| {
                    id.as_ref().map(|id| {
                        peers
                            .get(id)
                            .map(|p| serde_json::to_value(p).unwrap_or_default())
                            .unwrap_or_else(|| serde_json::Value::String(id.clone()))
                    })
                };
                branch_paths.push(ModifiedPath {
                    path_type: PathType::RelationshipOne,
                    node_id,
                    kind: fold.kind.clone(),
                    element_name: Some(name),
                    property_name: None,
                    peer_id: fold.new_peer.clone().or_else(|| fold.previous_peer.clone()),
                    action,
                    change: Some(crate::model::ValueElement {
                        previous: to_value(&fold.previous_peer),
                        new: to_value(&fold.new_peer),
                    }),
                });
            }
        }

        paths.retain(|_, v| !v.is_empty());
        Ok(paths)
    }

    /// Cross-branch conflicts: the intersection of two branches' modified
    /// path sets, minus paths both sides merely removed. Symmetric in its
    /// operands; a single-branch diff cannot self-conflict.
    pub async fn get_conflicts(&mut self) -> Result<Vec<DataConflict>> {
        let modified = self.get_modified_paths().await?;
        if modified.len() < 2 {
            return Ok(Vec::new());
        }

        let mut conflicts: HashMap<String, DataConflict> = HashMap::new();
        for (branch_a, branch_b) in modified.keys().sorted().tuple_combinations() {
            let paths_a = &modified[branch_a];
            let paths_b = &modified[branch_b];
            for a in paths_a {
                for b in paths_b {
                    if !a.conflicts_with(b) {
                        continue;
                    }
                    let key = a.conflict_path();
                    let conflict = conflicts
                        .entry(key.clone())
                        .or_insert_with(|| DataConflict::new(key, a));
                    for (branch, path) in [(branch_a, a), (branch_b, b)] {
                        if conflict.changes.iter().any(|c| &c.branch == branch) {
                            continue;
                        }
                        conflict.changes.push(BranchChanges {
                            branch: branch.clone(),
                            action: path.action,
                            previous: path.change.as_ref().and_then(|c| c.previous.clone()),
                            new: path.change.as_ref().and_then(|c| c.new.clone()),
                        });
                    }
                }
            }
        }

        Ok(conflicts
            .into_values()
            .sorted_by(|a, b| a.conflict_path.cmp(&b.conflict_path))
            .collect())
    }
}

#[derive(Debug)]
struct CardinalityOneFold {
    kind: String,
    previous_peer: Option<Id>,
    new_peer: Option<Id>,
}

fn endpoint_map(
    source: &NodeRecord,
    dest: &NodeRecord,
) -> HashMap<Id, RelationshipEdgeNodeDiffElement> {
    let mut nodes = HashMap::new();
    for record in [source, dest] {
        nodes.insert(
            record.id.clone(),
            RelationshipEdgeNodeDiffElement {
                id: record.id.clone(),
                kind: record.kind.clone(),
                labels: record.labels.clone(),
            },
        );
    }
    nodes
}

/// The follow-up returns every property valid at `diff_from`, not just the
/// changed ones. For a live attribute only in-window entries get their
/// `previous` filled; for a removed attribute the follow-up rows define the
/// erased state.
fn apply_previous_values(
    attribute: &mut NodeAttributeDiffElement,
    branch: &str,
    previous: &HashMap<(Id, PropertyKind), PropertyRow>,
) {
    let removed = attribute.action == DiffAction::Removed;
    for ((subject, kind), row) in previous {
        if *subject != attribute.id {
            continue;
        }
        if removed {
            let entry = attribute
                .properties
                .entry(*kind)
                .or_insert_with(|| PropertyDiffElement {
                    branch: branch.to_string(),
                    kind: *kind,
                    action: DiffAction::Removed,
                    value: crate::model::ValueElement::default(),
                    changed_at: None,
                });
            entry.action = DiffAction::Removed;
            entry.value.previous = row.value.clone();
            entry.value.new = None;
        } else if let Some(entry) = attribute.properties.get_mut(kind) {
            entry.value.previous = row.value.clone();
        }
    }
    // A property with no prior state is genuinely new.
    for property in attribute.properties.values_mut() {
        if property.action == DiffAction::Updated
            && property.value.previous.is_none()
            && property.value.new.is_some()
        {
            property.action = DiffAction::Added;
        }
    }
}

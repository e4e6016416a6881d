use std::collections::HashMap;

use anyhow::Result;

use crate::logic::query::{
    AttributeChangeRow, BranchFilter, DiffAttributeQuery, DiffNodeQuery,
    DiffPropertiesByIdsQuery, DiffPropertiesByIdsRangeQuery, DiffRelationshipPropertyQuery,
    DiffRelationshipQuery, NodeMembershipRow, PropertyRow, RelationshipPropertyRow,
    RelationshipRow,
};
use crate::model::{
    Edge, EdgeKind, EdgeStatus, Id, NewEdge, NodeRecord, PeerInfo, SchemaView, Timestamp,
};

/// The graph-store boundary. Each diff query shape has a typed execution
/// method returning typed rows; merge writes go through edge-level
/// primitives. A production implementation would translate these calls into
/// Cypher-style traversals; [`crate::store::MemoryGraphStore`] is the
/// reference implementation.
///
/// Diff execution is read-only; only the merge engine calls the write
/// primitives. Edges are immutable once written except for their `to`
/// field, which is set exactly once by `close_edge`.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    // -- diff read queries --

    async fn query_nodes(&self, query: &DiffNodeQuery) -> Result<Vec<NodeMembershipRow>>;

    async fn query_attributes(&self, query: &DiffAttributeQuery)
        -> Result<Vec<AttributeChangeRow>>;

    async fn query_properties_at(
        &self,
        query: &DiffPropertiesByIdsQuery,
    ) -> Result<Vec<PropertyRow>>;

    async fn query_properties_range(
        &self,
        query: &DiffPropertiesByIdsRangeQuery,
    ) -> Result<Vec<PropertyRow>>;

    async fn query_relationships(
        &self,
        query: &DiffRelationshipQuery,
    ) -> Result<Vec<RelationshipRow>>;

    async fn query_relationship_properties(
        &self,
        query: &DiffRelationshipPropertyQuery,
    ) -> Result<Vec<RelationshipPropertyRow>>;

    // -- lookups --

    /// Fetch a node that is known to exist; an unknown id is a
    /// data-integrity error ([`crate::model::GraphError::NodeNotFound`]).
    async fn get_node(&self, id: &Id) -> Result<NodeRecord>;

    /// The two endpoints of a relationship node, `(source, dest)`.
    async fn relationship_peers(&self, relationship_id: &Id) -> Result<Option<(Id, Id)>>;

    /// Batched display-label resolution for cardinality-one peer changes.
    async fn get_display_labels(
        &self,
        ids: &[Id],
        schema: &dyn SchemaView,
        filter: &BranchFilter,
    ) -> Result<HashMap<Id, PeerInfo>>;

    // -- merge write primitives --

    /// Currently-open edges (`to IS NULL`) on `subject` matching the given
    /// kind/branch, optionally narrowed by status and object.
    async fn open_edges(
        &self,
        subject: &Id,
        kind: EdgeKind,
        branch: &str,
        status: Option<EdgeStatus>,
        object: Option<&Id>,
    ) -> Result<Vec<Edge>>;

    /// Set `to = at` on the edge. Closing an already-closed edge is a
    /// no-op, which is what makes merge re-runs safe. An unknown edge id
    /// matches zero rows where one was structurally required and raises
    /// [`crate::model::GraphError::EmptyResult`].
    async fn close_edge(&self, edge_id: &Id, at: Timestamp) -> Result<()>;

    async fn create_edge(&self, edge: NewEdge) -> Result<Edge>;

    // -- monitoring / test support --

    async fn count_edges(&self, kind: Option<EdgeKind>) -> Result<usize>;
}

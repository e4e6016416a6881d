use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Sentinel relationship name used when the schema lags the data (e.g.
/// mid-migration) and an identifier cannot be resolved.
pub const UNDEFINED_RELATIONSHIP_NAME: &str = "-undefined-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipCardinality {
    One,
    Many,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSchema {
    /// Human-readable relationship name ("previous_owner").
    pub name: String,
    /// Raw identifier stamped on relationship nodes in the graph.
    pub identifier: String,
    /// Peer node kind.
    pub peer: String,
    pub cardinality: RelationshipCardinality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub kind: String,
    /// Attribute names contributing to the rendered display label.
    pub display_labels: Vec<String>,
    pub relationships: Vec<RelationshipSchema>,
}

impl NodeSchema {
    pub fn relationship_by_identifier(&self, identifier: &str) -> Option<&RelationshipSchema> {
        self.relationships
            .iter()
            .find(|r| r.identifier == identifier)
    }
}

/// Read-only schema lookup, injected into the diff engine rather than
/// reached through a process-global registry.
pub trait SchemaView: Send + Sync {
    /// Schema for `kind` as visible from `branch`.
    fn node_schema(&self, kind: &str, branch: &str) -> Option<NodeSchema>;
}

/// Map-backed schema view. Branch-agnostic: the same schema is served for
/// every branch, which is what the tests and the seed dataset need.
#[derive(Debug, Default, Clone)]
pub struct StaticSchemaView {
    schemas: HashMap<String, NodeSchema>,
}

impl StaticSchemaView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: NodeSchema) {
        self.schemas.insert(schema.kind.clone(), schema);
    }
}

impl SchemaView for StaticSchemaView {
    fn node_schema(&self, kind: &str, _branch: &str) -> Option<NodeSchema> {
        self.schemas.get(kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_lookup_by_identifier() {
        let mut view = StaticSchemaView::new();
        view.register(NodeSchema {
            kind: "Car".into(),
            display_labels: vec!["name".into()],
            relationships: vec![RelationshipSchema {
                name: "previous_owner".into(),
                identifier: "car__person".into(),
                peer: "Person".into(),
                cardinality: RelationshipCardinality::One,
            }],
        });

        let schema = view.node_schema("Car", "main").unwrap();
        let rel = schema.relationship_by_identifier("car__person").unwrap();
        assert_eq!(rel.name, "previous_owner");
        assert_eq!(rel.cardinality, RelationshipCardinality::One);
        assert!(schema.relationship_by_identifier("unknown").is_none());
        assert!(view.node_schema("Boat", "main").is_none());
    }
}

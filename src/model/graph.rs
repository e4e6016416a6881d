use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::errors::GraphError;
use crate::model::Timestamp;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Validity of an edge on its branch. Any other value found in stored data
/// is a data-integrity violation and must fail loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Active,
    Deleted,
}

impl EdgeStatus {
    pub fn parse(edge_id: &str, value: &str) -> Result<Self, GraphError> {
        value.parse().map_err(|_| GraphError::UnexpectedStatus {
            edge_id: edge_id.to_string(),
            value: value.to_string(),
        })
    }
}

impl FromStr for EdgeStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EdgeStatus::Active),
            "deleted" => Ok(EdgeStatus::Deleted),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeStatus::Active => write!(f, "active"),
            EdgeStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Every edge type in the graph. Structural edges link nodes to the graph
/// and to each other; property edges hang values and flags off attributes
/// and relationship nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    IsPartOf,
    HasAttribute,
    IsRelated,
    HasValue,
    IsProtected,
    IsVisible,
    HasOwner,
    HasSource,
}

impl EdgeKind {
    /// Whether a subject carries at most one open ACTIVE edge of this kind
    /// per branch. Membership and every property edge are single-valued; a
    /// node owns many attributes and relationship endpoints.
    pub fn is_single_valued(&self) -> bool {
        !matches!(self, EdgeKind::HasAttribute | EdgeKind::IsRelated)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EdgeKind::IsPartOf => "IS_PART_OF",
            EdgeKind::HasAttribute => "HAS_ATTRIBUTE",
            EdgeKind::IsRelated => "IS_RELATED",
            EdgeKind::HasValue => "HAS_VALUE",
            EdgeKind::IsProtected => "IS_PROTECTED",
            EdgeKind::IsVisible => "IS_VISIBLE",
            EdgeKind::HasOwner => "HAS_OWNER",
            EdgeKind::HasSource => "HAS_SOURCE",
        };
        write!(f, "{}", name)
    }
}

/// The property subset of [`EdgeKind`]: edges whose change is reported at
/// property granularity in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyKind {
    HasValue,
    IsProtected,
    IsVisible,
    HasOwner,
    HasSource,
}

/// Property kinds valid on an attribute.
pub const ATTRIBUTE_PROPERTY_KINDS: &[PropertyKind] = &[
    PropertyKind::HasValue,
    PropertyKind::IsProtected,
    PropertyKind::IsVisible,
    PropertyKind::HasOwner,
    PropertyKind::HasSource,
];

/// Property kinds valid on a relationship node (no HAS_VALUE: the peer is
/// the value).
pub const RELATIONSHIP_PROPERTY_KINDS: &[PropertyKind] = &[
    PropertyKind::IsProtected,
    PropertyKind::IsVisible,
    PropertyKind::HasOwner,
    PropertyKind::HasSource,
];

impl PropertyKind {
    pub fn edge_kind(&self) -> EdgeKind {
        match self {
            PropertyKind::HasValue => EdgeKind::HasValue,
            PropertyKind::IsProtected => EdgeKind::IsProtected,
            PropertyKind::IsVisible => EdgeKind::IsVisible,
            PropertyKind::HasOwner => EdgeKind::HasOwner,
            PropertyKind::HasSource => EdgeKind::HasSource,
        }
    }

    pub fn from_edge_kind(kind: EdgeKind) -> Option<Self> {
        match kind {
            EdgeKind::HasValue => Some(PropertyKind::HasValue),
            EdgeKind::IsProtected => Some(PropertyKind::IsProtected),
            EdgeKind::IsVisible => Some(PropertyKind::IsVisible),
            EdgeKind::HasOwner => Some(PropertyKind::HasOwner),
            EdgeKind::HasSource => Some(PropertyKind::HasSource),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.edge_kind())
    }
}

/// The fundamental versioning unit: a branch-stamped edge with a half-open
/// validity window `[from, to)` where `to = None` means currently valid.
///
/// Invariant: for a given `(subject, kind, object?, branch, status)` at most
/// one edge has `to = None` at any time. Edges are closed before a
/// superseding edge is opened; once written, only `to` is ever mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Id,
    pub kind: EdgeKind,
    /// Node/attribute/relationship-node the edge hangs off.
    pub subject: Id,
    /// What it points at: branch root, attribute, value node, peer node...
    pub object: Id,
    pub branch: String,
    pub status: EdgeStatus,
    pub from: Timestamp,
    pub to: Option<Timestamp>,
    /// Hierarchy weight of the stamping branch, used to break ties when
    /// overlapping edges from several branches survive the scope filter.
    pub branch_level: i64,
}

impl Edge {
    /// Whether the edge is valid at `at` on its own branch timeline.
    pub fn is_valid_at(&self, at: Timestamp) -> bool {
        self.from <= at && self.to.map_or(true, |to| to >= at)
    }

    pub fn is_open(&self) -> bool {
        self.to.is_none()
    }
}

/// Input form for creating an edge during merge or seeding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEdge {
    pub kind: EdgeKind,
    pub subject: Id,
    pub object: Id,
    pub branch: String,
    pub status: EdgeStatus,
    pub from: Timestamp,
    pub branch_level: i64,
}

/// A top-level data node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: Id,
    pub kind: String,
    pub namespace: String,
    pub labels: Vec<String>,
}

/// An attribute, modeled as an intermediate graph node owned via
/// HAS_ATTRIBUTE and carrying property edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub id: Id,
    pub name: String,
}

/// A value node pointed at by HAS_VALUE/HAS_OWNER/HAS_SOURCE edges. Value
/// nodes are immutable and shared; changing a value opens an edge to a
/// different value node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub id: Id,
    pub value: serde_json::Value,
}

/// A relationship, modeled as an intermediate node with one IS_RELATED edge
/// to each endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipNode {
    pub id: Id,
    /// Raw relationship name; resolves to a schema identifier for display.
    pub name: String,
}

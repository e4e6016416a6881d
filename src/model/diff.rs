use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Id, PropertyKind, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAction {
    Added,
    Updated,
    Removed,
}

/// A before/after value pair. `previous = None` means the element is
/// genuinely new; `new = None` means it was removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueElement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
}

/// One property-level change (HAS_VALUE, IS_PROTECTED, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDiffElement {
    pub branch: String,
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    pub action: DiffAction,
    pub value: ValueElement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<Timestamp>,
}

/// One attribute touched on a node within the diff window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributeDiffElement {
    pub id: Id,
    pub name: String,
    pub action: DiffAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<Timestamp>,
    pub properties: HashMap<PropertyKind, PropertyDiffElement>,
}

/// One node touched on a branch within the diff window. `changed_at` is
/// None for UPDATED nodes (the node itself did not change, an attribute
/// did).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDiffElement {
    pub branch: String,
    pub kind: String,
    pub id: Id,
    pub labels: Vec<String>,
    pub action: DiffAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<Timestamp>,
    pub attributes: HashMap<String, NodeAttributeDiffElement>,
}

/// One endpoint of a changed relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdgeNodeDiffElement {
    pub id: Id,
    pub kind: String,
    pub labels: Vec<String>,
}

/// One relationship touched on a branch within the diff window. `nodes`
/// holds exactly the two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDiffElement {
    pub branch: String,
    pub id: Id,
    /// Schema-resolved relationship name ("-undefined-" when the schema
    /// lags the data).
    pub name: String,
    /// Raw identifier as stored on the relationship node; kept for
    /// per-endpoint schema lookups.
    #[serde(skip)]
    pub identifier: String,
    pub action: DiffAction,
    pub nodes: HashMap<Id, RelationshipEdgeNodeDiffElement>,
    pub properties: HashMap<PropertyKind, PropertyDiffElement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<Timestamp>,
    pub paths: Vec<String>,
    pub conflict_paths: Vec<String>,
}

/// Display-label-enriched peer reference, used as the value of a
/// cardinality-one relationship change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: Id,
    pub display_label: String,
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    Node,
    Attribute,
    RelationshipOne,
    RelationshipMany,
}

/// The conflict-comparison key: one logical path touched on one branch.
///
/// The full `path()` includes the specific peer/value segment; the
/// `conflict_path()` erases it, which is what lets "same relationship
/// pointed at different peers on two branches" register as one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedPath {
    pub path_type: PathType,
    pub node_id: Id,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<Id>,
    pub action: DiffAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<ValueElement>,
}

impl ModifiedPath {
    /// Full path including the specific peer, e.g.
    /// `data/c1/previous_owner/p2`.
    pub fn path(&self) -> String {
        self.render(self.peer_id.as_deref())
    }

    /// Peer-erased path used for cross-branch comparison, e.g.
    /// `data/c1/previous_owner/peer`.
    pub fn conflict_path(&self) -> String {
        let peer = self.peer_id.as_ref().map(|_| "peer");
        self.render(peer)
    }

    fn render(&self, peer: Option<&str>) -> String {
        let mut path = format!("data/{}", self.node_id);
        if let Some(element) = &self.element_name {
            path.push('/');
            path.push_str(element);
        }
        if let Some(peer) = peer {
            path.push('/');
            path.push_str(peer);
        }
        match &self.property_name {
            Some(prop) if prop == "HAS_VALUE" => path.push_str("/value"),
            Some(prop) => {
                path.push_str("/property/");
                path.push_str(prop);
            }
            None => {}
        }
        path
    }

    /// Whether two branches touching this same logical path constitutes a
    /// reportable conflict. Distinct from structural equality: both sides
    /// independently removing the same node or the same element is not a
    /// conflict.
    pub fn conflicts_with(&self, other: &ModifiedPath) -> bool {
        if self.conflict_path() != other.conflict_path() {
            return false;
        }
        !(self.action == DiffAction::Removed && other.action == DiffAction::Removed)
    }
}

impl fmt::Display for ModifiedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// One branch's side of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchChanges {
    pub branch: String,
    pub action: DiffAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
}

/// A logical path touched incompatibly on two branches, with both sides'
/// before/after values for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConflict {
    pub conflict_path: String,
    #[serde(rename = "type")]
    pub conflict_type: String,
    pub path_type: PathType,
    pub node_id: Id,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    pub changes: Vec<BranchChanges>,
}

impl DataConflict {
    pub fn new(conflict_path: String, path: &ModifiedPath) -> Self {
        Self {
            conflict_path,
            conflict_type: "data".to_string(),
            path_type: path.path_type,
            node_id: path.node_id.clone(),
            kind: path.kind.clone(),
            element_name: path.element_name.clone(),
            property_name: path.property_name.clone(),
            changes: Vec::new(),
        }
    }

    /// JSON payload shape consumed by API layers.
    pub fn to_conflict_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// One file-level change folded in from the repository-diff collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiffElement {
    pub branch: String,
    pub repository: Id,
    pub location: String,
    pub action: DiffAction,
}

//! Tree nodes: a folder tree holds exactly two kinds of node

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ids::{DocumentId, FolderId};

/// Discriminant stored alongside every tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Document,
    Folder,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Folder => "folder",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" => Ok(Self::Document),
            "folder" => Ok(Self::Folder),
            other => Err(other.to_string()),
        }
    }
}

/// Reference to a node of the folder tree.
///
/// `Unrecognized` carries rows whose stored kind is neither document nor
/// folder. Traversal treats it as corrupt data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "NodeRecord", into = "NodeRecord")]
pub enum Node {
    Document(DocumentId),
    Folder(FolderId),
    Unrecognized { id: Uuid, kind: String },
}

impl Node {
    /// Build a node from a stored `(kind, id)` pair
    pub fn from_parts(kind: &str, id: Uuid) -> Self {
        match kind.parse::<NodeKind>() {
            Ok(NodeKind::Document) => Self::Document(DocumentId(id)),
            Ok(NodeKind::Folder) => Self::Folder(FolderId(id)),
            Err(kind) => Self::Unrecognized { id, kind },
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Document(id) => id.0,
            Self::Folder(id) => id.0,
            Self::Unrecognized { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> Option<NodeKind> {
        match self {
            Self::Document(_) => Some(NodeKind::Document),
            Self::Folder(_) => Some(NodeKind::Folder),
            Self::Unrecognized { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            Self::Document(_) => NodeKind::Document.as_str(),
            Self::Folder(_) => NodeKind::Folder.as_str(),
            Self::Unrecognized { kind, .. } => kind,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_name(), self.id())
    }
}

impl From<DocumentId> for Node {
    fn from(id: DocumentId) -> Self {
        Self::Document(id)
    }
}

impl From<FolderId> for Node {
    fn from(id: FolderId) -> Self {
        Self::Folder(id)
    }
}

/// Wire shape of a node: `{"kind": "...", "id": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRecord {
    kind: String,
    id: Uuid,
}

impl From<NodeRecord> for Node {
    fn from(record: NodeRecord) -> Self {
        Node::from_parts(&record.kind, record.id)
    }
}

impl From<Node> for NodeRecord {
    fn from(node: Node) -> Self {
        NodeRecord {
            kind: node.kind_name().to_string(),
            id: node.id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_dispatch() {
        let id = Uuid::new_v4();
        assert_eq!(Node::from_parts("document", id), Node::Document(DocumentId(id)));
        assert_eq!(Node::from_parts("Folder", id), Node::Folder(FolderId(id)));

        let odd = Node::from_parts("shortcut", id);
        assert_eq!(odd.kind(), None);
        assert_eq!(odd.kind_name(), "shortcut");
    }

    #[test]
    fn test_node_json_shape() {
        let id = FolderId::new();
        let json = serde_json::to_value(Node::Folder(id)).unwrap();
        assert_eq!(json["kind"], "folder");
        assert_eq!(json["id"], id.0.to_string());

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, Node::Folder(id));
    }

    #[test]
    fn test_unknown_kind_survives_deserialization() {
        let id = Uuid::new_v4();
        let node: Node =
            serde_json::from_str(&format!(r#"{{"kind":"tag","id":"{}"}}"#, id)).unwrap();
        assert_eq!(node, Node::Unrecognized { id, kind: "tag".to_string() });
    }
}

//! Job request messages as delivered by the queue

use serde::{Deserialize, Serialize};

use super::ids::DocumentId;
use super::node::Node;

/// Request to OCR the current version of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrRequest {
    pub document_id: DocumentId,
    /// Language hint, passed to the OCR engine unchanged
    pub lang: String,
    /// Routing/tenancy hint, passed through unchanged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl OcrRequest {
    pub fn new(document_id: DocumentId, lang: impl Into<String>) -> Self {
        Self {
            document_id,
            lang: lang.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Request to normalize every page reachable from `origin`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeRequest {
    pub origin: Node,
}

impl NormalizeRequest {
    pub fn new(origin: impl Into<Node>) -> Self {
        Self { origin: origin.into() }
    }
}

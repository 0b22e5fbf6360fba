// id.rs — Stable identifiers for graph elements
//
// Node and edge ids come from the authoring layer and survive incremental
// edits; port keys are (node, port name) pairs and never depend on array
// position. Ids for compiler-inserted elements are derived from content
// (SHA-256 of the replaced edge and the adapter rule), never from a counter,
// so repeated runs over an unchanged graph region reproduce them exactly.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier of a graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a graph edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn new(id: impl Into<String>) -> Self {
        EdgeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a single port: the owning node plus the port's declared name.
///
/// Serialized as `node.port`; node ids may themselves contain dots, port
/// names may not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortKey {
    pub node: NodeId,
    pub port: String,
}

impl PortKey {
    pub fn new(node: impl Into<String>, port: impl Into<String>) -> Self {
        PortKey {
            node: NodeId(node.into()),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

impl From<PortKey> for String {
    fn from(key: PortKey) -> String {
        key.to_string()
    }
}

impl TryFrom<String> for PortKey {
    type Error = String;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        match text.rsplit_once('.') {
            Some((node, port)) if !node.is_empty() && !port.is_empty() => {
                Ok(PortKey::new(node, port))
            }
            _ => Err(format!("port reference '{}' is not of the form node.port", text)),
        }
    }
}

/// A template axis variable instantiated on one node (`?T` of node `add1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarKey {
    pub node: NodeId,
    pub var: String,
}

impl VarKey {
    pub fn new(node: &NodeId, var: impl Into<String>) -> Self {
        VarKey {
            node: node.clone(),
            var: var.into(),
        }
    }
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.node, self.var)
    }
}

// ── Content-derived ids ─────────────────────────────────────────────────────

const ADAPTER_HASH_HEX_LEN: usize = 12;

/// Derive the id of an adapter spliced into the edge `from → to` by `rule`.
///
/// Only the edge endpoints and the rule identity feed the hash, so the id is
/// unaffected by unrelated edits elsewhere in the graph.
pub fn adapter_node_id(from: &PortKey, to: &PortKey, rule: &str) -> NodeId {
    let mut hasher = Sha256::new();
    hasher.update(b"adapter\0");
    hasher.update(from.node.0.as_bytes());
    hasher.update(b"\0");
    hasher.update(from.port.as_bytes());
    hasher.update(b"\0");
    hasher.update(to.node.0.as_bytes());
    hasher.update(b"\0");
    hasher.update(to.port.as_bytes());
    hasher.update(b"\0");
    hasher.update(rule.as_bytes());
    let digest = hasher.finalize();
    let hex = bytes_to_hex(&digest);
    NodeId(format!("adapter.{}.{}", rule, &hex[..ADAPTER_HASH_HEX_LEN]))
}

/// Id of an edge created while splicing an adapter: `<adapter>:<side>`.
pub fn adapter_edge_id(adapter: &NodeId, side: &str) -> EdgeId {
    EdgeId(format!("{}:{}", adapter, side))
}

/// Lowercase hex encoding of a digest.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// SHA-256 of arbitrary bytes as a hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    bytes_to_hex(&hasher.finalize())
}

//! The read-only workflow graph the engine executes against.
//!
//! A [`Workflow`] is an immutable snapshot handed to the engine by a
//! `WorkflowRepository` lookup (§6): nodes and edges never mutate in place —
//! editing a workflow produces a new one.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EdgeId, NodeId};

/// What kind of work a node performs. The engine itself never interprets
/// this beyond picking the start node and routing through edges — concrete
/// behavior lives in whatever [`crate::node_executor::NodeExecutor`] is
/// registered for it (§9 "dynamic node properties").
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Virtual entry point; has no incoming edges.
    Start,
    /// Virtual terminal marker; has no outgoing edges.
    End,
    Llm,
    Tool,
    Condition,
    Transform,
    Wait,
    Custom(String),
}

impl NodeType {
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
            Self::Llm => write!(f, "llm"),
            Self::Tool => write!(f, "tool"),
            Self::Condition => write!(f, "condition"),
            Self::Transform => write!(f, "transform"),
            Self::Wait => write!(f, "wait"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        match s {
            "start" => NodeType::Start,
            "end" => NodeType::End,
            "llm" => NodeType::Llm,
            "tool" => NodeType::Tool,
            "condition" => NodeType::Condition,
            "transform" => NodeType::Transform,
            "wait" => NodeType::Wait,
            other => NodeType::Custom(other.to_string()),
        }
    }
}

/// A node's static description: its type tag, free-form properties (the
/// engine passes these through untouched to the node executor), and an
/// optional UI layout hint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub node_type: NodeType,
    #[serde(default)]
    pub properties: FxHashMap<String, Value>,
    #[serde(default)]
    pub position: Option<(f64, f64)>,
}

impl NodeDescriptor {
    #[must_use]
    pub fn new(id: NodeId, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            properties: FxHashMap::default(),
            position: None,
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// What bucket a [`Conditional Router`](crate::router::ConditionalRouter) sorts an edge into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Normal,
    Error,
    Default,
}

/// A directed edge between two nodes, optionally guarded by an expression
/// evaluated against the routing scope (§4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    #[serde(default)]
    pub guard: Option<String>,
}

impl Edge {
    #[must_use]
    pub fn new(id: EdgeId, from: NodeId, to: NodeId, kind: EdgeKind) -> Self {
        Self {
            id,
            from,
            to,
            kind,
            guard: None,
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }
}

/// Lifecycle status of a workflow definition, independent of any thread
/// executing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Active,
    Inactive,
    Deleted,
}

/// An immutable workflow graph: the input the engine is given to execute.
///
/// Node/edge insertion order is preserved (`IndexMap`-free, plain insertion
/// order vectors) so that "first node in insertion order" (§4.8 step 0) and
/// "declaration order within a bucket" (§4.4 step 3) are well defined without
/// relying on hash-map iteration order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub id: crate::ids::WorkflowId,
    pub status: WorkflowStatus,
    nodes: Vec<NodeDescriptor>,
    edges: Vec<Edge>,
}

impl Workflow {
    #[must_use]
    pub fn new(id: crate::ids::WorkflowId) -> Self {
        Self {
            id,
            status: WorkflowStatus::Active,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_node(mut self, node: NodeDescriptor) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// The node tagged [`NodeType::Start`], else the first node in insertion
    /// order (§4.8 step 0).
    #[must_use]
    pub fn start_node(&self) -> Option<&NodeDescriptor> {
        self.nodes
            .iter()
            .find(|n| n.node_type.is_start())
            .or_else(|| self.nodes.first())
    }

    /// Outgoing edges for `node`, in declaration order.
    #[must_use]
    pub fn outgoing_edges(&self, node: &NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.from == node).collect()
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }
}

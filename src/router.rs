//! §4.4 Conditional Router — decides the next node(s) from a just-executed
//! node's outgoing edges.
//!
//! Routing algorithm:
//! 1. Split `workflow.outgoing_edges(node)` into three buckets by
//!    [`EdgeKind`]: error, normal, default.
//! 2. If the just-executed node failed, route within the error bucket only;
//!    otherwise route within the normal bucket.
//! 3. Walk the chosen bucket in declaration order, evaluating each edge's
//!    guard (if any) via the [`ExpressionEvaluator`]. The first edge whose
//!    guard is absent or evaluates truthy wins.
//! 4. If nothing in the chosen bucket matches, fall through to the default
//!    bucket (first edge there wins, guard or not).
//! 5. If still nothing matches, the result is "no route" — the engine
//!    surfaces this as the thread reaching a dead end.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::expression::{EvalScope, ExpressionEvaluator};
use crate::ids::{EdgeId, NodeId};
use crate::workflow::{EdgeKind, Workflow};

/// Outcome of one routing decision, optionally recorded for audit (§4.4
/// "routing-history recording").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub from: NodeId,
    pub to: Option<NodeId>,
    pub edge: Option<EdgeId>,
    pub bucket: RoutingBucket,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingBucket {
    Error,
    Normal,
    Default,
    NoRoute,
}

#[derive(Default)]
pub struct ConditionalRouter {
    history: parking_lot::Mutex<Vec<RoutingDecision>>,
}

impl ConditionalRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes from `node` given whether its execution just failed. Guards
    /// that fail to parse or throw are treated as `false` (§4.4 step 5), never
    /// as a hard error — a malformed guard just means that edge doesn't
    /// match. `record_history` mirrors `EngineConfig::record_routing_history`
    /// (§6) — callers that don't need a routing audit trail can skip
    /// growing the in-memory log.
    pub fn route(&self, workflow: &Workflow, node: &NodeId, node_failed: bool, scope: &EvalScope, record_history: bool) -> RoutingDecision {
        let edges = workflow.outgoing_edges(node);

        let mut error_bucket = Vec::new();
        let mut normal_bucket = Vec::new();
        let mut default_bucket = Vec::new();
        for edge in edges {
            match edge.kind {
                EdgeKind::Error => error_bucket.push(edge),
                EdgeKind::Normal => normal_bucket.push(edge),
                EdgeKind::Default => default_bucket.push(edge),
            }
        }

        let primary = if node_failed { &error_bucket } else { &normal_bucket };
        let primary_label = if node_failed { RoutingBucket::Error } else { RoutingBucket::Normal };

        let decision = Self::first_match(primary, scope)
            .map(|edge| (edge, primary_label))
            .or_else(|| default_bucket.first().map(|edge| (*edge, RoutingBucket::Default)));

        let decision = match decision {
            Some((edge, bucket)) => RoutingDecision {
                from: node.clone(),
                to: Some(edge.to.clone()),
                edge: Some(edge.id.clone()),
                bucket,
            },
            None => RoutingDecision {
                from: node.clone(),
                to: None,
                edge: None,
                bucket: RoutingBucket::NoRoute,
            },
        };

        if record_history {
            self.history.lock().push(decision.clone());
        }
        decision
    }

    fn first_match<'a>(bucket: &[&'a crate::workflow::Edge], scope: &EvalScope) -> Option<&'a crate::workflow::Edge> {
        bucket
            .iter()
            .find(|edge| match &edge.guard {
                None => true,
                Some(expr) => ExpressionEvaluator::evaluate_or_false(expr, scope),
            })
            .copied()
    }

    #[must_use]
    pub fn history(&self) -> Vec<RoutingDecision> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

#[must_use]
pub fn empty_scope() -> EvalScope {
    EvalScope {
        state_data: FxHashMap::default(),
        state_metadata: FxHashMap::default(),
        previous_result: FxHashMap::default(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::ids::WorkflowId;
    use crate::workflow::{Edge, NodeDescriptor, NodeType};

    fn workflow_with_guard(guard: &str) -> Workflow {
        Workflow::new(WorkflowId::generate())
            .with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Transform))
            .with_node(NodeDescriptor::new(NodeId::from("B"), NodeType::Transform))
            .with_node(NodeDescriptor::new(NodeId::from("C"), NodeType::Transform))
            .with_edge(
                Edge::new(EdgeId::from("e1"), NodeId::from("A"), NodeId::from("B"), EdgeKind::Normal)
                    .with_guard(guard),
            )
            .with_edge(Edge::new(EdgeId::from("e2"), NodeId::from("A"), NodeId::from("C"), EdgeKind::Default))
    }

    #[test]
    fn guarded_edge_wins_when_truthy() {
        let workflow = workflow_with_guard("state.data.x > 0");
        let mut scope = empty_scope();
        scope.state_data.insert("x".to_string(), Value::from(1));

        let router = ConditionalRouter::new();
        let decision = router.route(&workflow, &NodeId::from("A"), false, &scope, true);
        assert_eq!(decision.to, Some(NodeId::from("B")));
        assert_eq!(decision.bucket, RoutingBucket::Normal);
    }

    #[test]
    fn falls_through_to_default_when_guard_is_false() {
        let workflow = workflow_with_guard("state.data.x > 0");
        let mut scope = empty_scope();
        scope.state_data.insert("x".to_string(), Value::from(-1));

        let router = ConditionalRouter::new();
        let decision = router.route(&workflow, &NodeId::from("A"), false, &scope, true);
        assert_eq!(decision.to, Some(NodeId::from("C")));
        assert_eq!(decision.bucket, RoutingBucket::Default);
    }

    #[test]
    fn failed_node_routes_through_error_bucket_only() {
        let workflow = Workflow::new(WorkflowId::generate())
            .with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Transform))
            .with_node(NodeDescriptor::new(NodeId::from("recover"), NodeType::Transform))
            .with_edge(Edge::new(
                EdgeId::from("err"),
                NodeId::from("A"),
                NodeId::from("recover"),
                EdgeKind::Error,
            ));
        let router = ConditionalRouter::new();
        let decision = router.route(&workflow, &NodeId::from("A"), true, &empty_scope(), true);
        assert_eq!(decision.to, Some(NodeId::from("recover")));
        assert_eq!(decision.bucket, RoutingBucket::Error);
    }

    #[test]
    fn no_matching_edge_is_no_route() {
        let workflow = Workflow::new(WorkflowId::generate())
            .with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Transform));
        let router = ConditionalRouter::new();
        let decision = router.route(&workflow, &NodeId::from("A"), false, &empty_scope(), true);
        assert_eq!(decision.bucket, RoutingBucket::NoRoute);
        assert!(decision.to.is_none());
    }

    #[test]
    fn routing_history_accumulates_across_calls() {
        let workflow = workflow_with_guard("state.data.x > 0");
        let router = ConditionalRouter::new();
        router.route(&workflow, &NodeId::from("A"), false, &empty_scope(), true);
        router.route(&workflow, &NodeId::from("A"), false, &empty_scope(), true);
        assert_eq!(router.history().len(), 2);
    }
}

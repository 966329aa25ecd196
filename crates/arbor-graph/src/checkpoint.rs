//! Checkpoint controller: early release of forward buffers during the
//! forward sweep, and transparent recomputation during backward.
//!
//! Checkpointing is opt-in per node via `ops::checkpoint`. A marked node's
//! forward buffer becomes eligible for release once every consumer inside
//! the current evaluation closure has read it; the bytes go back to the
//! buffer pool. When backward later needs the value, the minimal missing
//! sub-graph is re-run forward, a pure recomputation that touches no
//! gradient state, so nothing is double-counted.

use std::collections::HashSet;
use std::sync::Arc;

use arbor_core::{ArborError, Result};

use crate::forward;
use crate::graph::Graph;
use crate::node::Node;

/// Remaining-consumer counts for one evaluation closure.
///
/// `consumed(id)` ticks off one read and reports whether that was the last
/// one; a buffer must never be discarded while a not-yet-visited consumer
/// in the current pass still needs it.
pub(crate) struct ReleasePlan {
    remaining: Vec<u32>,
    member: Vec<bool>,
}

impl ReleasePlan {
    pub(crate) fn build(graph: &Graph, closure: &[usize]) -> Self {
        let size = closure.last().map_or(0, |&id| id + 1);
        let mut plan = ReleasePlan {
            remaining: vec![0; size],
            member: vec![false; size],
        };
        for &id in closure {
            plan.member[id] = true;
        }
        for &id in closure {
            for input in graph.node(id).inputs() {
                plan.remaining[input.id()] += 1;
            }
        }
        plan
    }

    /// Record that one consumer of `id` has computed. True when `id` has no
    /// consumers left in this closure.
    pub(crate) fn consumed(&mut self, id: usize) -> bool {
        if !self.member[id] {
            return false;
        }
        self.remaining[id] = self.remaining[id].saturating_sub(1);
        self.remaining[id] == 0
    }
}

impl Graph {
    /// Release a node's forward buffer if it is checkpointed. Leaf buffers
    /// are never released: their initializers may be stochastic, so a refill
    /// would not be the deterministic recomputation backward relies on.
    pub(crate) fn maybe_release(&self, node: &Arc<Node>) {
        if !node.is_checkpointed() || node.is_leaf() {
            return;
        }
        let (value, aux) = node.take_value();
        if let Some(t) = value {
            tracing::trace!(node = node.id(), "released checkpointed buffer");
            self.reclaim(t);
        }
        if let Some(t) = aux {
            self.reclaim(t);
        }
    }

    /// Make sure `node` has a forward buffer for the current generation,
    /// re-running the minimal released sub-graph if necessary.
    pub(crate) fn ensure_value(&self, node: &Arc<Node>) -> Result<()> {
        let generation = self.generation();
        if node.value_for(generation).is_some() {
            return Ok(());
        }

        // collect the missing region, bounded below by still-live buffers
        let mut missing: Vec<Arc<Node>> = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![Arc::clone(node)];
        while let Some(n) = stack.pop() {
            if !seen.insert(n.id()) || n.value_for(generation).is_some() {
                continue;
            }
            for input in n.inputs() {
                if input.value_for(generation).is_none() {
                    stack.push(Arc::clone(input));
                }
            }
            missing.push(n);
        }

        // creation order is the valid forward order
        missing.sort_by_key(|n| n.id());
        for n in &missing {
            if n.value_for(generation).is_some() {
                continue;
            }
            let value = forward::compute(n, generation).map_err(|e| {
                ArborError::RecomputeFailed {
                    id: n.id(),
                    reason: e.to_string(),
                }
            })?;
            n.set_value(value, generation);
            tracing::trace!(node = n.id(), kind = n.kind().name(), "recomputed");
        }
        Ok(())
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arbor_core::{DType, Result, Shape, Tensor};
use parking_lot::RwLock;
use smallvec::{smallvec, SmallVec};

use crate::graph::GraphInner;
use crate::inits::Init;
use crate::kind::Kind;

/// A forward buffer tagged with the generation it was computed in. Stale
/// buffers from a prior generation are never served silently.
pub(crate) struct Slot {
    pub tensor: Tensor,
    pub generation: u64,
}

/// One vertex of the computation graph.
///
/// Identity is the creation-order index, unique within the owning graph;
/// every input has a strictly smaller index, which makes creation order the
/// topological forward order by construction. Shape and dtype are derived
/// once by the operator factory and immutable afterwards.
pub struct Node {
    id: usize,
    kind: Kind,
    inputs: SmallVec<[Arc<Node>; 2]>,
    shape: Shape,
    dtype: DType,
    trainable: bool,
    needs_grad: bool,
    checkpoint: AtomicBool,
    init: Option<Init>,
    value: RwLock<Option<Slot>>,
    grad: RwLock<Option<Tensor>>,
    /// Secondary buffer for multi-output kinds (top-k indices, max-pool
    /// argmax). Lives and dies with `value`.
    aux: RwLock<Option<Tensor>>,
    pub(crate) graph: Weak<GraphInner>,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        kind: Kind,
        inputs: SmallVec<[Arc<Node>; 2]>,
        shape: Shape,
        dtype: DType,
        trainable: bool,
        init: Option<Init>,
        graph: Weak<GraphInner>,
    ) -> Self {
        let needs_grad = dtype.is_float()
            && kind.propagates_grad()
            && if kind.is_leaf() {
                trainable
            } else {
                inputs.iter().any(|i| i.needs_grad)
            };
        Self {
            id,
            kind,
            inputs,
            shape,
            dtype,
            trainable,
            needs_grad,
            checkpoint: AtomicBool::new(false),
            init,
            value: RwLock::new(None),
            grad: RwLock::new(None),
            aux: RwLock::new(None),
            graph,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn inputs(&self) -> &[Arc<Node>] {
        &self.inputs
    }

    pub fn is_leaf(&self) -> bool {
        self.kind.is_leaf()
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    /// Whether gradient accumulation on this node is useful: it is a
    /// trainable leaf, or gradient flowing into it can reach one.
    pub fn needs_grad(&self) -> bool {
        self.needs_grad
    }

    pub(crate) fn init(&self) -> Option<&Init> {
        self.init.as_ref()
    }

    // ---- checkpoint flag ----

    pub fn is_checkpointed(&self) -> bool {
        self.checkpoint.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_checkpoint(&self) {
        self.checkpoint.store(true, Ordering::Relaxed);
    }

    // ---- forward value ----

    /// The forward buffer, if one is valid for `generation`. Leaf buffers
    /// (parameters, constants) stay valid across generations.
    pub(crate) fn value_for(&self, generation: u64) -> Option<Tensor> {
        let slot = self.value.read();
        match &*slot {
            Some(s) if s.generation == generation || self.is_leaf() => Some(s.tensor.clone()),
            _ => None,
        }
    }

    /// Publish a fully computed forward buffer.
    pub(crate) fn set_value(&self, tensor: Tensor, generation: u64) {
        *self.value.write() = Some(Slot { tensor, generation });
    }

    /// Drop the forward buffer (checkpoint release / generation reset),
    /// together with any aux buffer.
    pub(crate) fn take_value(&self) -> (Option<Tensor>, Option<Tensor>) {
        let value = self.value.write().take().map(|s| s.tensor);
        let aux = self.aux.write().take();
        (value, aux)
    }

    // ---- aux buffer ----

    pub(crate) fn aux(&self) -> Option<Tensor> {
        self.aux.read().clone()
    }

    pub(crate) fn set_aux(&self, tensor: Tensor) {
        *self.aux.write() = Some(tensor);
    }

    // ---- gradient ----

    /// The accumulated gradient, if any contribution has arrived.
    pub fn grad(&self) -> Option<Tensor> {
        self.grad.read().clone()
    }

    /// Add a contribution into the gradient buffer (never overwrite).
    /// Returns the superseded buffers so the caller can recycle them.
    pub(crate) fn accumulate_grad(&self, grad: Tensor) -> Result<SmallVec<[Tensor; 2]>> {
        let mut lock = self.grad.write();
        match lock.take() {
            Some(existing) => {
                let sum = existing.add(&grad)?;
                *lock = Some(sum);
                Ok(smallvec![existing, grad])
            }
            None => {
                *lock = Some(grad);
                Ok(SmallVec::new())
            }
        }
    }

    pub(crate) fn take_grad(&self) -> Option<Tensor> {
        self.grad.write().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(trainable: bool) -> Node {
        Node::new(
            0,
            if trainable { Kind::Param } else { Kind::Constant },
            SmallVec::new(),
            Shape::new(&[2]),
            DType::F32,
            trainable,
            Some(Init::Zeros),
            Weak::new(),
        )
    }

    #[test]
    fn test_needs_grad() {
        assert!(leaf(true).needs_grad());
        assert!(!leaf(false).needs_grad());
    }

    #[test]
    fn test_grad_accumulation() {
        let node = leaf(true);
        let g1 = Tensor::from_f32(&[1.0, 2.0], &[2]);
        let g2 = Tensor::from_f32(&[3.0, 4.0], &[2]);

        assert!(node.accumulate_grad(g1).unwrap().is_empty());
        let superseded = node.accumulate_grad(g2).unwrap();
        assert_eq!(superseded.len(), 2);

        let grad = node.grad().unwrap();
        assert_eq!(grad.as_f32_slice().unwrap(), &[4.0, 6.0]);
    }

    #[test]
    fn test_value_generation() {
        let a = Node::new(
            1,
            Kind::Neg,
            smallvec![Arc::new(leaf(false))],
            Shape::new(&[2]),
            DType::F32,
            false,
            None,
            Weak::new(),
        );
        a.set_value(Tensor::from_f32(&[1.0, 2.0], &[2]), 3);
        assert!(a.value_for(3).is_some());
        // interior buffers from an older generation must not be reused
        assert!(a.value_for(4).is_none());

        // leaves stay valid across generations
        let p = leaf(true);
        p.set_value(Tensor::from_f32(&[1.0, 2.0], &[2]), 3);
        assert!(p.value_for(9).is_some());
    }

    #[test]
    fn test_checkpoint_flag() {
        let node = leaf(false);
        assert!(!node.is_checkpointed());
        node.mark_checkpoint();
        assert!(node.is_checkpointed());
    }
}

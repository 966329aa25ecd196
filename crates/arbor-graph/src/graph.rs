use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbor_core::{ArborError, BufferPool, DType, PoolMetrics, Result, Shape, Storage, Tensor};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use smallvec::SmallVec;

use crate::checkpoint::ReleasePlan;
use crate::expr::Expr;
use crate::forward;
use crate::inits::Init;
use crate::kind::Kind;
use crate::node::Node;

pub(crate) struct GraphInner {
    /// Node arena in creation order. A node's index here is its identity
    /// and the only valid topological forward order.
    pub(crate) nodes: RwLock<Vec<Arc<Node>>>,
    /// Per-node list of consumer ids, maintained on insertion; the
    /// checkpoint controller reads this to decide when a buffer is dead.
    pub(crate) consumers: RwLock<Vec<SmallVec<[usize; 2]>>>,
    generation: AtomicU64,
    params: RwLock<HashMap<String, usize>>,
    scalars: RwLock<HashMap<(u32, DType), usize>>,
    masks: RwLock<HashMap<(u32, Vec<usize>), usize>>,
    pub(crate) rng: Mutex<StdRng>,
    pool: Mutex<BufferPool>,
}

/// Owner of one computation's node set.
///
/// The graph assigns creation order, drives forward evaluation and backward
/// propagation, owns the checkpoint policy, and exposes constant/parameter
/// creation. Construction is single-threaded per graph; traversals use the
/// interior locks so published buffers can be read concurrently.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// A graph whose initializers and dropout masks draw from a seeded RNG.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                nodes: RwLock::new(Vec::new()),
                consumers: RwLock::new(Vec::new()),
                generation: AtomicU64::new(0),
                params: RwLock::new(HashMap::new()),
                scalars: RwLock::new(HashMap::new()),
                masks: RwLock::new(HashMap::new()),
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
                pool: Mutex::new(BufferPool::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<GraphInner>) -> Self {
        Self { inner }
    }

    // ---- node creation ----

    pub(crate) fn insert(
        &self,
        kind: Kind,
        inputs: &[&Expr],
        shape: Shape,
        dtype: DType,
    ) -> Expr {
        self.insert_node(kind, inputs, shape, dtype, false, None)
    }

    fn insert_node(
        &self,
        kind: Kind,
        inputs: &[&Expr],
        shape: Shape,
        dtype: DType,
        trainable: bool,
        init: Option<Init>,
    ) -> Expr {
        let mut nodes = self.inner.nodes.write();
        let mut consumers = self.inner.consumers.write();
        let id = nodes.len();
        let input_arcs: SmallVec<[Arc<Node>; 2]> =
            inputs.iter().map(|e| Arc::clone(&e.node)).collect();
        for e in inputs {
            consumers[e.id()].push(id);
        }
        let node = Arc::new(Node::new(
            id,
            kind,
            input_arcs,
            shape,
            dtype,
            trainable,
            init,
            Arc::downgrade(&self.inner),
        ));
        nodes.push(Arc::clone(&node));
        consumers.push(SmallVec::new());
        Expr::new(node)
    }

    /// Create a non-trainable constant leaf filled by `init` at first
    /// evaluation.
    pub fn constant(&self, shape: impl Into<Shape>, dtype: DType, init: Init) -> Result<Expr> {
        let shape = shape.into();
        if !init.len_matches(shape.numel()) {
            return Err(ArborError::ShapeMismatch {
                expected: vec![shape.numel()],
                got: vec![init.data_len().unwrap_or(0)],
            });
        }
        Ok(self.insert_node(Kind::Constant, &[], shape, dtype, false, Some(init)))
    }

    /// Create (or fetch) a named trainable parameter. Re-requesting a name
    /// with the same shape returns the existing node; a different shape is
    /// an error.
    pub fn param(&self, name: &str, shape: impl Into<Shape>, init: Init) -> Result<Expr> {
        let shape = shape.into();
        let existing = self.inner.params.read().get(name).copied();
        if let Some(id) = existing {
            let node = self.node(id);
            if node.shape() == &shape {
                return Ok(Expr::new(node));
            }
            return Err(ArborError::ParamRedefined {
                name: name.to_string(),
                shape: node.shape().dims().to_vec(),
            });
        }
        if !init.len_matches(shape.numel()) {
            return Err(ArborError::ShapeMismatch {
                expected: vec![shape.numel()],
                got: vec![init.data_len().unwrap_or(0)],
            });
        }
        let expr = self.insert_node(Kind::Param, &[], shape, DType::F32, true, Some(init));
        self.inner.params.write().insert(name.to_string(), expr.id());
        Ok(expr)
    }

    /// Cached rank-0 constant. Equal (value, dtype) pairs share one node, so
    /// scalar operator sugar builds the same graph as constructing the
    /// constant by hand.
    pub fn scalar(&self, value: f32, dtype: DType) -> Expr {
        let key = (value.to_bits(), dtype);
        let cached = self.inner.scalars.read().get(&key).copied();
        if let Some(id) = cached {
            return Expr::new(self.node(id));
        }
        let expr = self.insert_node(
            Kind::Constant,
            &[],
            Shape::scalar(),
            dtype,
            false,
            Some(Init::Fill(value)),
        );
        self.inner.scalars.write().insert(key, expr.id());
        expr
    }

    /// Cached inverted-dropout mask constant for (drop probability, shape).
    /// The cache is cleared at each generation boundary so every training
    /// iteration draws fresh masks.
    pub fn dropout_mask(&self, prob: f32, shape: &Shape) -> Result<Expr> {
        if !(0.0..1.0).contains(&prob) {
            return Err(ArborError::Storage(format!(
                "dropout probability {prob} outside [0, 1)"
            )));
        }
        let key = (prob.to_bits(), shape.dims().to_vec());
        let cached = self.inner.masks.read().get(&key).copied();
        if let Some(id) = cached {
            return Ok(Expr::new(self.node(id)));
        }
        let expr = self.insert_node(
            Kind::Constant,
            &[],
            shape.clone(),
            DType::F32,
            false,
            Some(Init::Bernoulli { keep: 1.0 - prob }),
        );
        self.inner.masks.write().insert(key, expr.id());
        Ok(expr)
    }

    // ---- lookups ----

    pub(crate) fn node(&self, id: usize) -> Arc<Node> {
        Arc::clone(&self.inner.nodes.read()[id])
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.read().len()
    }

    /// Cache-epoch counter. Buffers computed under an older generation are
    /// never served.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn check_owned(&self, expr: &Expr) -> Result<()> {
        if std::ptr::eq(expr.node.graph.as_ptr(), Arc::as_ptr(&self.inner)) {
            Ok(())
        } else {
            Err(ArborError::GraphMismatch)
        }
    }

    /// Ids of the dependency closure of `root`, in creation (topological)
    /// order.
    pub(crate) fn closure_of(&self, root: usize) -> Vec<usize> {
        let nodes = self.inner.nodes.read();
        let mut visited = vec![false; nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if visited[id] {
                continue;
            }
            visited[id] = true;
            for input in nodes[id].inputs() {
                if !visited[input.id()] {
                    stack.push(input.id());
                }
            }
        }
        (0..nodes.len()).filter(|&i| visited[i]).collect()
    }

    // ---- forward evaluation ----

    /// Ensure every node `target` transitively depends on has a valid
    /// forward buffer for the current generation.
    ///
    /// Traversal is strictly increasing creation index over the dependency
    /// closure; inputs always predate consumers, so no cycle detection is
    /// needed. Nodes with a valid cached buffer are skipped. Checkpointed
    /// inputs are released as soon as their last consumer in this closure
    /// has computed.
    pub fn evaluate(&self, target: &Expr) -> Result<()> {
        self.check_owned(target)?;
        let generation = self.generation();
        let closure = self.closure_of(target.id());
        let mut plan = ReleasePlan::build(self, &closure);

        for &id in &closure {
            let node = self.node(id);
            if node.value_for(generation).is_none() {
                let value = forward::compute(&node, generation)?;
                // publish only after the kernel fully completed
                node.set_value(value, generation);
                tracing::trace!(node = id, kind = node.kind().name(), "forward");
            }
            for input in node.inputs() {
                if plan.consumed(input.id()) {
                    self.maybe_release(input);
                }
            }
        }
        Ok(())
    }

    // ---- lifecycle ----

    /// Start the next training iteration: bump the cache epoch, drop every
    /// interior forward buffer and every gradient, and clear the per-
    /// iteration dropout-mask cache. Parameter and constant values persist.
    pub fn next_generation(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.masks.write().clear();
        let nodes: Vec<Arc<Node>> = self.inner.nodes.read().clone();
        for node in nodes {
            if !node.is_leaf() {
                let (value, aux) = node.take_value();
                if let Some(t) = value {
                    self.reclaim(t);
                }
                if let Some(t) = aux {
                    self.reclaim(t);
                }
            }
            if let Some(g) = node.take_grad() {
                self.reclaim(g);
            }
        }
    }

    /// Drop every accumulated gradient without touching forward buffers.
    pub fn zero_grad(&self) {
        let nodes: Vec<Arc<Node>> = self.inner.nodes.read().clone();
        for node in nodes {
            if let Some(g) = node.take_grad() {
                self.reclaim(g);
            }
        }
    }

    /// Full teardown: empties the node arena and every cache. Outstanding
    /// expression handles keep their nodes alive but are invalid by
    /// convention after this call.
    pub fn clear(&self) {
        self.inner.nodes.write().clear();
        self.inner.consumers.write().clear();
        self.inner.params.write().clear();
        self.inner.scalars.write().clear();
        self.inner.masks.write().clear();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    // ---- buffer pool plumbing ----

    /// Return a dead buffer's bytes to the pool, if nothing else holds them.
    pub(crate) fn reclaim(&self, tensor: Tensor) {
        if let Some(bytes) = tensor.into_storage().into_bytes() {
            self.inner.pool.lock().recycle(bytes);
        }
    }

    /// Zero-filled tensor drawing its bytes from the pool.
    pub(crate) fn zeros_pooled(&self, shape: &Shape, dtype: DType) -> Result<Tensor> {
        let bytes = self
            .inner
            .pool
            .lock()
            .acquire_zeroed(dtype.storage_bytes(shape.numel()));
        let storage = Storage::from_bytes(dtype, shape.numel(), bytes)?;
        Tensor::from_storage(storage, shape.clone())
    }

    pub fn pool_metrics(&self) -> PoolMetrics {
        self.inner.pool.lock().metrics()
    }

    // ---- gradient plumbing ----

    /// Add a contribution into a node's gradient buffer, recycling any
    /// superseded buffers.
    pub(crate) fn accumulate_grad(&self, node: &Arc<Node>, grad: Tensor) -> Result<()> {
        if grad.shape() != node.shape() {
            return Err(ArborError::ShapeMismatch {
                expected: node.shape().dims().to_vec(),
                got: grad.shape().dims().to_vec(),
            });
        }
        for superseded in node.accumulate_grad(grad)? {
            self.reclaim(superseded);
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

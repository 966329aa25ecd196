use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arbor_core::{ArborError, DType, Result, Shape, Tensor};

use crate::graph::Graph;
use crate::node::Node;
use crate::ops;

/// A shared, reference-counted handle to a graph node.
///
/// Every operator factory returns one of these. Cloning shares the node, so
/// an expression consumed by several operators appears once in the graph and
/// its gradient is the sum over all consumers. Equality is node identity.
#[derive(Clone)]
pub struct Expr {
    pub(crate) node: Arc<Node>,
}

impl Expr {
    pub(crate) fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    /// Creation-order index within the owning graph.
    pub fn id(&self) -> usize {
        self.node.id()
    }

    pub fn shape(&self) -> &Shape {
        self.node.shape()
    }

    pub fn dtype(&self) -> DType {
        self.node.dtype()
    }

    /// Operator name of the underlying node.
    pub fn kind_name(&self) -> &'static str {
        self.node.kind().name()
    }

    pub fn trainable(&self) -> bool {
        self.node.trainable()
    }

    pub fn is_checkpointed(&self) -> bool {
        self.node.is_checkpointed()
    }

    /// The owning graph.
    pub fn graph(&self) -> Result<Graph> {
        self.node
            .graph
            .upgrade()
            .map(Graph::from_inner)
            .ok_or(ArborError::GraphDropped)
    }

    /// The forward value of this expression in the current generation.
    /// Fails if the node has not been evaluated (or its buffer was released
    /// and not yet recomputed).
    pub fn val(&self) -> Result<Tensor> {
        let graph = self.graph()?;
        self.node
            .value_for(graph.generation())
            .ok_or(ArborError::NotEvaluated { id: self.id() })
    }

    /// The accumulated gradient, if any contribution has arrived.
    pub fn grad(&self) -> Option<Tensor> {
        self.node.grad()
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.node) as usize).hash(state);
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Expr(id={}, kind={}, shape={}, dtype={})",
            self.id(),
            self.kind_name(),
            self.shape(),
            self.dtype()
        )
    }
}

/// Two co-dependent handles returned by multi-output operators (top-k).
/// Each element is an independent consumer for traversal purposes.
#[derive(Clone, Debug)]
pub struct Expr2(pub Expr, pub Expr);

impl Expr2 {
    /// The selected values.
    pub fn values(&self) -> &Expr {
        &self.0
    }

    /// The source indices of the selected values.
    pub fn indices(&self) -> &Expr {
        &self.1
    }
}

// Operator sugar. The named factory functions return `Result`; these panic
// on malformed graphs, mirroring how the numeric overloads behave.

impl std::ops::Add for &Expr {
    type Output = Expr;
    fn add(self, rhs: &Expr) -> Expr {
        ops::add(self, rhs).expect("add failed")
    }
}

impl std::ops::Sub for &Expr {
    type Output = Expr;
    fn sub(self, rhs: &Expr) -> Expr {
        ops::sub(self, rhs).expect("sub failed")
    }
}

impl std::ops::Mul for &Expr {
    type Output = Expr;
    fn mul(self, rhs: &Expr) -> Expr {
        ops::mul(self, rhs).expect("mul failed")
    }
}

impl std::ops::Div for &Expr {
    type Output = Expr;
    fn div(self, rhs: &Expr) -> Expr {
        ops::div(self, rhs).expect("div failed")
    }
}

impl std::ops::Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        ops::neg(self).expect("neg failed")
    }
}

impl std::ops::Add<f32> for &Expr {
    type Output = Expr;
    fn add(self, rhs: f32) -> Expr {
        ops::add_value(self, rhs).expect("add failed")
    }
}

impl std::ops::Add<&Expr> for f32 {
    type Output = Expr;
    fn add(self, rhs: &Expr) -> Expr {
        ops::add_value(rhs, self).expect("add failed")
    }
}

impl std::ops::Sub<f32> for &Expr {
    type Output = Expr;
    fn sub(self, rhs: f32) -> Expr {
        ops::add_value(self, -rhs).expect("sub failed")
    }
}

impl std::ops::Sub<&Expr> for f32 {
    type Output = Expr;
    fn sub(self, rhs: &Expr) -> Expr {
        ops::value_sub(self, rhs).expect("sub failed")
    }
}

impl std::ops::Mul<f32> for &Expr {
    type Output = Expr;
    fn mul(self, rhs: f32) -> Expr {
        ops::mul_value(self, rhs).expect("mul failed")
    }
}

impl std::ops::Mul<&Expr> for f32 {
    type Output = Expr;
    fn mul(self, rhs: &Expr) -> Expr {
        ops::mul_value(rhs, self).expect("mul failed")
    }
}

impl std::ops::Div<f32> for &Expr {
    type Output = Expr;
    fn div(self, rhs: f32) -> Expr {
        ops::mul_value(self, 1.0 / rhs).expect("div failed")
    }
}

impl std::ops::Div<&Expr> for f32 {
    type Output = Expr;
    fn div(self, rhs: &Expr) -> Expr {
        ops::value_div(self, rhs).expect("div failed")
    }
}

use std::fmt;
use std::sync::Arc;

use arbor_core::ops::pooling::Pool2d;
use arbor_core::{Result, Tensor};

/// Comparison flavor of a `Kind::Cmp` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Reduction flavor of a `Kind::Reduce` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
    Prod,
    LogSumExp,
}

/// Caller-supplied forward rule of a lambda node.
pub type LambdaForward = Arc<dyn Fn(&[Tensor]) -> Result<Tensor> + Send + Sync>;
/// Caller-supplied backward rule: maps (output gradient, input values) to one
/// gradient contribution per input.
pub type LambdaBackward =
    Arc<dyn Fn(&Tensor, &[Tensor]) -> Result<Vec<Option<Tensor>>> + Send + Sync>;

/// Forward/backward closures captured by a lambda node. Omitting the
/// backward rule makes the node gradient-opaque, like `stop_gradient`.
#[derive(Clone)]
pub struct LambdaRules {
    pub forward: LambdaForward,
    pub backward: Option<LambdaBackward>,
}

impl fmt::Debug for LambdaRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LambdaRules {{ backward: {} }}",
            self.backward.is_some()
        )
    }
}

/// The closed set of operator semantics a node can carry.
///
/// Forward and backward rules are dispatched by exhaustive match (see
/// `forward.rs` / `backward.rs`), so adding a variant without its gradient
/// rule fails to compile rather than failing at runtime.
#[derive(Debug, Clone)]
pub enum Kind {
    // leaves
    Constant,
    Param,

    // elementwise binary
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,

    // elementwise unary
    Neg,
    Abs,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Sqrt { eps: f32 },
    Sigmoid,
    Tanh,
    Relu,
    PRelu { alpha: f32 },
    Swish { beta: f32 },
    Clip { c: f32 },
    ClipGradient { c: f32 },
    StopGradient,
    Debug { message: String },
    Cast,

    Cmp { op: CmpOp },

    // matrix products
    Dot { trans_a: bool, trans_b: bool, scale: f32 },
    Bdot { trans_a: bool, trans_b: bool, scale: f32 },
    Affine { trans_a: bool, trans_b: bool, scale: f32 },

    // shape manipulation
    Transpose { perm: Vec<usize> },
    Reshape,
    Concat { axis: usize },
    Slice { axis: usize, start: usize, end: usize },
    Shift { offsets: Vec<isize>, pad: f32 },

    // selection
    Gather { axis: usize },
    IndexSelect { axis: usize },
    TopK { axis: usize, k: usize, descending: bool },
    TopKIndices,

    // reductions and softmax family
    Reduce { op: ReduceOp, axis: usize },
    Softmax { axis: usize },
    LogSoftmax,
    CrossEntropy { smoothing: f32 },

    // pooling
    AvgPool(Pool2d),
    MaxPool(Pool2d),

    Lambda(LambdaRules),
}

impl Kind {
    /// Short name for logging and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Constant => "constant",
            Kind::Param => "param",
            Kind::Add => "add",
            Kind::Sub => "sub",
            Kind::Mul => "mul",
            Kind::Div => "div",
            Kind::Maximum => "maximum",
            Kind::Minimum => "minimum",
            Kind::Neg => "neg",
            Kind::Abs => "abs",
            Kind::Exp => "exp",
            Kind::Log => "log",
            Kind::Sin => "sin",
            Kind::Cos => "cos",
            Kind::Tan => "tan",
            Kind::Sqrt { .. } => "sqrt",
            Kind::Sigmoid => "sigmoid",
            Kind::Tanh => "tanh",
            Kind::Relu => "relu",
            Kind::PRelu { .. } => "prelu",
            Kind::Swish { .. } => "swish",
            Kind::Clip { .. } => "clip",
            Kind::ClipGradient { .. } => "clip_gradient",
            Kind::StopGradient => "stop_gradient",
            Kind::Debug { .. } => "debug",
            Kind::Cast => "cast",
            Kind::Cmp { .. } => "cmp",
            Kind::Dot { .. } => "dot",
            Kind::Bdot { .. } => "bdot",
            Kind::Affine { .. } => "affine",
            Kind::Transpose { .. } => "transpose",
            Kind::Reshape => "reshape",
            Kind::Concat { .. } => "concat",
            Kind::Slice { .. } => "slice",
            Kind::Shift { .. } => "shift",
            Kind::Gather { .. } => "gather",
            Kind::IndexSelect { .. } => "index_select",
            Kind::TopK { .. } => "topk",
            Kind::TopKIndices => "topk_indices",
            Kind::Reduce { .. } => "reduce",
            Kind::Softmax { .. } => "softmax",
            Kind::LogSoftmax => "logsoftmax",
            Kind::CrossEntropy { .. } => "cross_entropy",
            Kind::AvgPool(_) => "avg_pool",
            Kind::MaxPool(_) => "max_pool",
            Kind::Lambda(_) => "lambda",
        }
    }

    /// Whether this kind is a graph leaf (no inputs, value from an
    /// initializer).
    pub fn is_leaf(&self) -> bool {
        matches!(self, Kind::Constant | Kind::Param)
    }

    /// Whether gradient flowing into a node of this kind can reach its
    /// inputs. Comparison results and top-k indices are non-differentiable
    /// by convention; `stop_gradient` and backward-less lambdas sever the
    /// graph deliberately.
    pub fn propagates_grad(&self) -> bool {
        !matches!(
            self,
            Kind::Cmp { .. }
                | Kind::TopKIndices
                | Kind::StopGradient
                | Kind::Lambda(LambdaRules { backward: None, .. })
        )
    }
}

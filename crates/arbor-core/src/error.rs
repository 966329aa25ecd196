use crate::dtype::DType;

/// Error type shared by arbor-core and arbor-graph.
///
/// Shape/type variants are raised at operator-construction time, before any
/// node is linked into a graph. Sequencing variants are raised when forward
/// and backward passes are driven in an invalid order. Resource and
/// recomputation variants come from the storage pool and the checkpoint
/// controller.
#[derive(thiserror::Error, Debug)]
pub enum ArborError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("cannot broadcast shapes {lhs:?} and {rhs:?}")]
    BroadcastIncompatible { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: isize, rank: usize },

    #[error("no type promotion defined between {lhs} and {rhs}")]
    NoPromotion { lhs: DType, rhs: DType },

    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("kernel does not support dtype {0}")]
    UnsupportedDType(DType),

    #[error("cannot reshape {numel} elements to {shape:?}")]
    InvalidReshape { numel: usize, shape: Vec<isize> },

    #[error("index {index} out of bounds for axis of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("matmul dimension mismatch: [{m}, {k1}] x [{k2}, {n}]")]
    MatmulDimMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    #[error("node {id} has no forward value; call evaluate before backward")]
    NotEvaluated { id: usize },

    #[error("backward on non-scalar node {id} requires an explicit seed gradient")]
    SeedRequired { id: usize },

    #[error("expressions belong to different graphs")]
    GraphMismatch,

    #[error("the owning graph has been dropped")]
    GraphDropped,

    #[error("parameter {name:?} already registered with shape {shape:?}")]
    ParamRedefined { name: String, shape: Vec<usize> },

    #[error("checkpoint recompute failed at node {id}: {reason}")]
    RecomputeFailed { id: usize, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

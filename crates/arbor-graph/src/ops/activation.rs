//! Activation-function factories.

use arbor_core::Result;

use crate::expr::Expr;
use crate::kind::Kind;
use crate::ops::unary_float;

/// Logistic sigmoid.
pub fn sigmoid(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Sigmoid, a)
}

/// Hyperbolic tangent.
pub fn tanh(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Tanh, a)
}

/// Rectified linear unit.
pub fn relu(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Relu, a)
}

/// Leaky ReLU: PReLU with a fixed slope of 0.01.
pub fn leakyrelu(a: &Expr) -> Result<Expr> {
    prelu(a, 0.01)
}

/// Parametric ReLU; `alpha` is a fixed constant, not trainable.
pub fn prelu(a: &Expr, alpha: f32) -> Result<Expr> {
    unary_float(Kind::PRelu { alpha }, a)
}

/// Swish with beta = 1: `x * sigmoid(x)`.
pub fn swish(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Swish { beta: 1.0 }, a)
}

/// GELU approximated as swish with beta = 1.702.
pub fn gelu(a: &Expr) -> Result<Expr> {
    unary_float(Kind::Swish { beta: 1.702 }, a)
}

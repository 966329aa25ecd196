//! Axis reductions and the softmax family.
//!
//! Every reduction collapses exactly one axis to size 1; the axis is kept, not
//! removed; callers reshape explicitly when they want it gone. The backward
//! rules broadcast the output gradient back across the collapsed axis,
//! scaled per flavor (mean divides by the axis length, and so on).

use arbor_core::{ArborError, DType, Result, Shape};

use crate::expr::Expr;
use crate::kind::{Kind, ReduceOp};
use crate::ops::{arithmetic, math, owning_graph, unary_float};

fn reduce(op: ReduceOp, a: &Expr, axis: isize) -> Result<Expr> {
    if !a.dtype().is_float() {
        return Err(ArborError::UnsupportedDType(a.dtype()));
    }
    let graph = a.graph()?;
    let ax = a
        .shape()
        .normalize_axis(axis)
        .ok_or(ArborError::AxisOutOfRange {
            axis,
            rank: a.shape().ndim(),
        })?;
    let shape = a.shape().with_dim(ax, 1);
    Ok(graph.insert(Kind::Reduce { op, axis: ax }, &[a], shape, a.dtype()))
}

/// Sum along `axis` (axis kept with size 1).
pub fn sum(a: &Expr, axis: isize) -> Result<Expr> {
    reduce(ReduceOp::Sum, a, axis)
}

/// Mean along `axis`.
pub fn mean(a: &Expr, axis: isize) -> Result<Expr> {
    reduce(ReduceOp::Mean, a, axis)
}

/// Maximum along `axis`. Gradient routes to the first position holding the
/// maximum.
pub fn max(a: &Expr, axis: isize) -> Result<Expr> {
    reduce(ReduceOp::Max, a, axis)
}

/// Minimum along `axis`.
pub fn min(a: &Expr, axis: isize) -> Result<Expr> {
    reduce(ReduceOp::Min, a, axis)
}

/// Product along `axis`.
pub fn prod(a: &Expr, axis: isize) -> Result<Expr> {
    reduce(ReduceOp::Prod, a, axis)
}

/// Numerically stable log-sum-exp along `axis`.
pub fn logsumexp(a: &Expr, axis: isize) -> Result<Expr> {
    reduce(ReduceOp::LogSumExp, a, axis)
}

/// Variance along `axis`: `mean(square(a - mean(a)))`.
pub fn var(a: &Expr, axis: isize) -> Result<Expr> {
    let centered = arithmetic::sub(a, &mean(a, axis)?)?;
    mean(&math::square(&centered)?, axis)
}

/// Standard deviation along `axis`.
pub fn std(a: &Expr, axis: isize) -> Result<Expr> {
    math::sqrt(&var(a, axis)?, 0.0)
}

/// Dot product along `axis`: `sum(a * b)`.
pub fn scalar_product(a: &Expr, b: &Expr, axis: isize) -> Result<Expr> {
    sum(&arithmetic::mul(a, b)?, axis)
}

/// Weighted average along `axis`: `sum(a * weights) / sum(weights)`.
pub fn weighted_average(a: &Expr, weights: &Expr, axis: isize) -> Result<Expr> {
    let weighted = scalar_product(a, weights, axis)?;
    arithmetic::div(&weighted, &sum(weights, axis)?)
}

/// Softmax along `axis`.
pub fn softmax(a: &Expr, axis: isize) -> Result<Expr> {
    if !a.dtype().is_float() {
        return Err(ArborError::UnsupportedDType(a.dtype()));
    }
    let graph = a.graph()?;
    let ax = a
        .shape()
        .normalize_axis(axis)
        .ok_or(ArborError::AxisOutOfRange {
            axis,
            rank: a.shape().ndim(),
        })?;
    Ok(graph.insert(Kind::Softmax { axis: ax }, &[a], a.shape().clone(), a.dtype()))
}

/// Softmax along `axis` restricted to positions where the 0/1 `mask` is
/// non-zero. The mask broadcasts over `a` and receives no gradient.
pub fn softmax_with_mask(a: &Expr, mask: &Expr, axis: isize) -> Result<Expr> {
    let graph = owning_graph(a, &[mask])?;
    let ax = a
        .shape()
        .normalize_axis(axis)
        .ok_or(ArborError::AxisOutOfRange {
            axis,
            rank: a.shape().ndim(),
        })?;
    match mask.shape().broadcast_with(a.shape()) {
        Some(joint) if &joint == a.shape() => {}
        _ => {
            return Err(ArborError::BroadcastIncompatible {
                lhs: mask.shape().dims().to_vec(),
                rhs: a.shape().dims().to_vec(),
            })
        }
    }
    Ok(graph.insert(
        Kind::Softmax { axis: ax },
        &[a, mask],
        a.shape().clone(),
        a.dtype(),
    ))
}

/// Log-softmax over the last axis.
pub fn logsoftmax(a: &Expr) -> Result<Expr> {
    if a.shape().ndim() == 0 {
        return Err(ArborError::AxisOutOfRange { axis: -1, rank: 0 });
    }
    unary_float(Kind::LogSoftmax, a)
}

/// Cross-entropy of `logits` (shape `[..., classes]`) against integer
/// `labels` (the leading dims). The class axis is consumed; `smoothing`
/// spreads that fraction of the target mass uniformly.
pub fn cross_entropy(logits: &Expr, labels: &Expr, smoothing: f32) -> Result<Expr> {
    let graph = owning_graph(logits, &[labels])?;
    if logits.shape().ndim() == 0 {
        return Err(ArborError::AxisOutOfRange { axis: -1, rank: 0 });
    }
    if labels.dtype() != DType::I32 {
        return Err(ArborError::DTypeMismatch {
            expected: DType::I32,
            got: labels.dtype(),
        });
    }
    let lead = &logits.shape().dims()[..logits.shape().ndim() - 1];
    if labels.shape().dims() != lead {
        return Err(ArborError::ShapeMismatch {
            expected: lead.to_vec(),
            got: labels.shape().dims().to_vec(),
        });
    }
    Ok(graph.insert(
        Kind::CrossEntropy { smoothing },
        &[logits, labels],
        Shape::new(lead),
        DType::F32,
    ))
}

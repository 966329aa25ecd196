//! Escape hatches: debug taps, checkpoint marking, caller-defined lambda
//! nodes, dropout, and constants shaped like an existing expression.

use std::sync::Arc;

use arbor_core::{ArborError, DType, Result, Shape, Tensor};

use crate::expr::Expr;
use crate::inits::Init;
use crate::kind::{Kind, LambdaRules};
use crate::ops::{arithmetic, owning_graph};

/// Transparent identity node that surfaces its forward value (and gradient,
/// when one flows) through the `tracing` subscriber. Never alters numeric
/// results.
pub fn debug(a: &Expr, message: &str) -> Result<Expr> {
    let graph = a.graph()?;
    Ok(graph.insert(
        Kind::Debug {
            message: message.to_string(),
        },
        &[a],
        a.shape().clone(),
        a.dtype(),
    ))
}

/// Mark a node's forward buffer as eligible for early release once all its
/// consumers have read it; backward transparently recomputes it on demand.
pub fn checkpoint(a: &Expr) -> Expr {
    a.node.mark_checkpoint();
    a.clone()
}

/// Node whose forward rule is supplied by the caller instead of drawn from
/// the fixed kind set. The closure's output must match the declared shape
/// and element type. Passing `None` for `backward` makes the node
/// gradient-opaque, like `stop_gradient`.
pub fn lambda<F, B>(
    inputs: &[Expr],
    shape: impl Into<Shape>,
    dtype: DType,
    forward: F,
    backward: Option<B>,
) -> Result<Expr>
where
    F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync + 'static,
    B: Fn(&Tensor, &[Tensor]) -> Result<Vec<Option<Tensor>>> + Send + Sync + 'static,
{
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| ArborError::Storage("lambda: at least one input required".into()))?;
    let refs: Vec<&Expr> = rest.iter().collect();
    let graph = owning_graph(first, &refs)?;
    let rules = LambdaRules {
        forward: Arc::new(forward),
        backward: backward
            .map(|b| Arc::new(b) as crate::kind::LambdaBackward),
    };
    let all: Vec<&Expr> = inputs.iter().collect();
    Ok(graph.insert(Kind::Lambda(rules), &all, shape.into(), dtype))
}

/// Inverted dropout: multiply by a cached per-generation 0-or-1/keep mask.
/// A probability of zero is the identity.
pub fn dropout(x: &Expr, prob: f32) -> Result<Expr> {
    if prob == 0.0 {
        return Ok(x.clone());
    }
    let graph = x.graph()?;
    let mask = graph.dropout_mask(prob, x.shape())?;
    arithmetic::mul(x, &mask)
}

/// Dropout with an explicit mask expression.
pub fn dropout_with_mask(x: &Expr, mask: &Expr) -> Result<Expr> {
    arithmetic::mul(x, mask)
}

/// A constant with the shape and element type of an existing expression.
pub fn constant_like(a: &Expr, init: Init) -> Result<Expr> {
    a.graph()?.constant(a.shape().clone(), a.dtype(), init)
}

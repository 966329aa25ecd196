//! Operator factories: the public catalog.
//!
//! Every function here is a pure construction call: it validates its inputs,
//! derives the result shape and element type through the promotion rules,
//! records exactly one node (or, for top-k, a fixed pair) in the owning
//! graph, and hands back expression handles. Failures are raised here,
//! before any node is linked in, so a graph is never left half-built.

pub mod activation;
pub mod arithmetic;
pub mod compare;
pub mod linalg;
pub mod manipulate;
pub mod math;
pub mod pooling;
pub mod reduce;
pub mod select;
pub mod special;

pub use activation::*;
pub use arithmetic::*;
pub use compare::*;
pub use linalg::*;
pub use manipulate::*;
pub use math::*;
pub use pooling::*;
pub use reduce::*;
pub use select::*;
pub use special::*;

use arbor_core::dtype::promote;
use arbor_core::{ArborError, Result};

use crate::expr::Expr;
use crate::graph::Graph;
use crate::kind::Kind;

/// Resolve the graph all operands belong to; mixing graphs is a
/// construction-time error.
pub(crate) fn owning_graph(first: &Expr, rest: &[&Expr]) -> Result<Graph> {
    let graph = first.graph()?;
    for expr in rest {
        graph.check_owned(expr)?;
    }
    Ok(graph)
}

/// Build an elementwise binary node: broadcast the shapes, promote the
/// element types, insert.
pub(crate) fn binary(kind: Kind, a: &Expr, b: &Expr) -> Result<Expr> {
    let graph = owning_graph(a, &[b])?;
    let dtype = promote(a.dtype(), b.dtype()).ok_or(ArborError::NoPromotion {
        lhs: a.dtype(),
        rhs: b.dtype(),
    })?;
    let shape = a
        .shape()
        .broadcast_with(b.shape())
        .ok_or_else(|| ArborError::BroadcastIncompatible {
            lhs: a.shape().dims().to_vec(),
            rhs: b.shape().dims().to_vec(),
        })?;
    Ok(graph.insert(kind, &[a, b], shape, dtype))
}

/// Build a shape/type-preserving unary node.
pub(crate) fn unary(kind: Kind, a: &Expr) -> Result<Expr> {
    let graph = a.graph()?;
    Ok(graph.insert(kind, &[a], a.shape().clone(), a.dtype()))
}

/// Unary node over a floating-point input.
pub(crate) fn unary_float(kind: Kind, a: &Expr) -> Result<Expr> {
    if !a.dtype().is_float() {
        return Err(ArborError::UnsupportedDType(a.dtype()));
    }
    unary(kind, a)
}

/// Either an expression or a float literal. Literal operands are promoted
/// to cached scalar constants of the other side's element type, producing
/// the same graph as constructing that constant by hand.
#[derive(Clone, Copy)]
pub enum Operand<'a> {
    Expr(&'a Expr),
    Value(f32),
}

impl<'a> From<&'a Expr> for Operand<'a> {
    fn from(e: &'a Expr) -> Self {
        Operand::Expr(e)
    }
}

impl<'a> From<f32> for Operand<'a> {
    fn from(v: f32) -> Self {
        Operand::Value(v)
    }
}

pub(crate) fn resolve_operands(a: Operand<'_>, b: Operand<'_>) -> Result<(Expr, Expr)> {
    match (a, b) {
        (Operand::Expr(x), Operand::Expr(y)) => Ok((x.clone(), y.clone())),
        (Operand::Expr(x), Operand::Value(v)) => {
            let scalar = x.graph()?.scalar(v, x.dtype());
            Ok((x.clone(), scalar))
        }
        (Operand::Value(v), Operand::Expr(y)) => {
            let scalar = y.graph()?.scalar(v, y.dtype());
            Ok((scalar, y.clone()))
        }
        (Operand::Value(_), Operand::Value(_)) => Err(ArborError::Storage(
            "an operation over two float literals has no owning graph".into(),
        )),
    }
}

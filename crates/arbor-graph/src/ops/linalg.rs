//! Matrix-product factories.

use arbor_core::dtype::promote;
use arbor_core::{ArborError, Result, Shape};

use crate::expr::Expr;
use crate::kind::Kind;
use crate::ops::owning_graph;

fn product_dims(
    a_dims: &[usize],
    b_dims: &[usize],
    trans_a: bool,
    trans_b: bool,
) -> Result<(usize, usize)> {
    let (m, ka) = if trans_a {
        (a_dims[1], a_dims[0])
    } else {
        (a_dims[0], a_dims[1])
    };
    let (kb, n) = if trans_b {
        (b_dims[1], b_dims[0])
    } else {
        (b_dims[0], b_dims[1])
    };
    if ka != kb {
        return Err(ArborError::MatmulDimMismatch {
            m,
            k1: ka,
            k2: kb,
            n,
        });
    }
    Ok((m, n))
}

fn product_dtype(a: &Expr, b: &Expr) -> Result<arbor_core::DType> {
    promote(a.dtype(), b.dtype()).ok_or(ArborError::NoPromotion {
        lhs: a.dtype(),
        rhs: b.dtype(),
    })
}

/// Matrix product `scale * op(a) @ op(b)` over rank-2 operands, where `op`
/// optionally transposes.
pub fn dot(a: &Expr, b: &Expr, trans_a: bool, trans_b: bool, scale: f32) -> Result<Expr> {
    let graph = owning_graph(a, &[b])?;
    if a.shape().ndim() != 2 || b.shape().ndim() != 2 {
        return Err(ArborError::ShapeMismatch {
            expected: vec![2],
            got: vec![a.shape().ndim(), b.shape().ndim()],
        });
    }
    let (m, n) = product_dims(a.shape().dims(), b.shape().dims(), trans_a, trans_b)?;
    let dtype = product_dtype(a, b)?;
    Ok(graph.insert(
        Kind::Dot {
            trans_a,
            trans_b,
            scale,
        },
        &[a, b],
        Shape::new(&[m, n]),
        dtype,
    ))
}

/// Batched matrix product over rank-3 operands with matching batch
/// dimension.
pub fn bdot(a: &Expr, b: &Expr, trans_a: bool, trans_b: bool, scale: f32) -> Result<Expr> {
    let graph = owning_graph(a, &[b])?;
    if a.shape().ndim() != 3 || b.shape().ndim() != 3 {
        return Err(ArborError::ShapeMismatch {
            expected: vec![3],
            got: vec![a.shape().ndim(), b.shape().ndim()],
        });
    }
    let a_dims = a.shape().dims();
    let b_dims = b.shape().dims();
    if a_dims[0] != b_dims[0] {
        return Err(ArborError::ShapeMismatch {
            expected: a_dims.to_vec(),
            got: b_dims.to_vec(),
        });
    }
    let (m, n) = product_dims(&a_dims[1..], &b_dims[1..], trans_a, trans_b)?;
    let dtype = product_dtype(a, b)?;
    Ok(graph.insert(
        Kind::Bdot {
            trans_a,
            trans_b,
            scale,
        },
        &[a, b],
        Shape::new(&[a_dims[0], m, n]),
        dtype,
    ))
}

/// Fused `scale * op(a) @ op(b) + bias`; the bias broadcasts over the
/// product's shape.
pub fn affine(
    a: &Expr,
    b: &Expr,
    bias: &Expr,
    trans_a: bool,
    trans_b: bool,
    scale: f32,
) -> Result<Expr> {
    let graph = owning_graph(a, &[b, bias])?;
    if a.shape().ndim() != 2 || b.shape().ndim() != 2 {
        return Err(ArborError::ShapeMismatch {
            expected: vec![2],
            got: vec![a.shape().ndim(), b.shape().ndim()],
        });
    }
    let (m, n) = product_dims(a.shape().dims(), b.shape().dims(), trans_a, trans_b)?;
    let out = Shape::new(&[m, n]);
    match bias.shape().broadcast_with(&out) {
        Some(joint) if joint == out => {}
        _ => {
            return Err(ArborError::BroadcastIncompatible {
                lhs: bias.shape().dims().to_vec(),
                rhs: out.dims().to_vec(),
            })
        }
    }
    let dtype = product_dtype(a, b)?;
    Ok(graph.insert(
        Kind::Affine {
            trans_a,
            trans_b,
            scale,
        },
        &[a, b, bias],
        out,
        dtype,
    ))
}

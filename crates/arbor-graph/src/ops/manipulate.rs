//! Shape-manipulation factories.

use arbor_core::{ArborError, DType, Result};

use crate::expr::Expr;
use crate::kind::Kind;
use crate::ops::{owning_graph, unary_float};

/// Swap the last two axes.
pub fn transpose(a: &Expr) -> Result<Expr> {
    let rank = a.shape().ndim();
    if rank < 2 {
        return Err(ArborError::AxisOutOfRange { axis: -2, rank });
    }
    let mut perm: Vec<usize> = (0..rank).collect();
    perm.swap(rank - 2, rank - 1);
    permuted(a, perm)
}

/// Permute axes so that output axis `i` is input axis `axes[i]`; negative
/// entries count from the end.
pub fn transpose_axes(a: &Expr, axes: &[isize]) -> Result<Expr> {
    let rank = a.shape().ndim();
    let mut perm = Vec::with_capacity(axes.len());
    for &ax in axes {
        perm.push(
            a.shape()
                .normalize_axis(ax)
                .ok_or(ArborError::AxisOutOfRange { axis: ax, rank })?,
        );
    }
    permuted(a, perm)
}

/// Interchange two axes.
pub fn swap_axes(a: &Expr, axis1: isize, axis2: isize) -> Result<Expr> {
    let rank = a.shape().ndim();
    let a1 = a
        .shape()
        .normalize_axis(axis1)
        .ok_or(ArborError::AxisOutOfRange { axis: axis1, rank })?;
    let a2 = a
        .shape()
        .normalize_axis(axis2)
        .ok_or(ArborError::AxisOutOfRange { axis: axis2, rank })?;
    let mut perm: Vec<usize> = (0..rank).collect();
    perm.swap(a1, a2);
    permuted(a, perm)
}

fn permuted(a: &Expr, perm: Vec<usize>) -> Result<Expr> {
    let graph = a.graph()?;
    let shape = a
        .shape()
        .permute(&perm)
        .ok_or(ArborError::AxisOutOfRange {
            axis: perm.last().map_or(0, |&p| p as isize),
            rank: a.shape().ndim(),
        })?;
    Ok(graph.insert(Kind::Transpose { perm }, &[a], shape, a.dtype()))
}

/// Reshape to `dims`; at most one entry may be -1 (inferred).
pub fn reshape(a: &Expr, dims: &[isize]) -> Result<Expr> {
    let graph = a.graph()?;
    let shape = a
        .shape()
        .resolve_reshape(dims)
        .ok_or_else(|| ArborError::InvalidReshape {
            numel: a.shape().numel(),
            shape: dims.to_vec(),
        })?;
    Ok(graph.insert(Kind::Reshape, &[a], shape, a.dtype()))
}

/// Flatten to one dimension.
pub fn flatten(a: &Expr) -> Result<Expr> {
    reshape(a, &[-1])
}

/// Flatten to two dimensions, preserving the last axis.
pub fn flatten_2d(a: &Expr) -> Result<Expr> {
    let rank = a.shape().ndim();
    if rank == 0 {
        return Err(ArborError::AxisOutOfRange { axis: -1, rank });
    }
    let last = a.shape().dims()[rank - 1] as isize;
    reshape(a, &[-1, last])
}

pub fn atleast_1d(a: &Expr) -> Result<Expr> {
    atleast_nd(a, 1)
}

pub fn atleast_2d(a: &Expr) -> Result<Expr> {
    atleast_nd(a, 2)
}

pub fn atleast_3d(a: &Expr) -> Result<Expr> {
    atleast_nd(a, 3)
}

pub fn atleast_4d(a: &Expr) -> Result<Expr> {
    atleast_nd(a, 4)
}

/// Prepend size-1 axes until the expression has at least `n` dimensions.
pub fn atleast_nd(a: &Expr, n: usize) -> Result<Expr> {
    let rank = a.shape().ndim();
    if rank >= n {
        return Ok(a.clone());
    }
    let mut dims: Vec<isize> = vec![1; n - rank];
    dims.extend(a.shape().dims().iter().map(|&d| d as isize));
    reshape(a, &dims)
}

/// Cast to another element type. Casting to the current type is the
/// identity.
pub fn cast(a: &Expr, dtype: DType) -> Result<Expr> {
    if a.dtype() == dtype {
        return Ok(a.clone());
    }
    let supported = |d: DType| matches!(d, DType::F32 | DType::F64 | DType::I32);
    if !supported(a.dtype()) || !supported(dtype) {
        return Err(ArborError::UnsupportedDType(if supported(a.dtype()) {
            dtype
        } else {
            a.dtype()
        }));
    }
    let graph = a.graph()?;
    Ok(graph.insert(Kind::Cast, &[a], a.shape().clone(), dtype))
}

/// Concatenate expressions along `axis`. All parts must agree on rank,
/// element type and every other axis.
pub fn concatenate(parts: &[Expr], axis: isize) -> Result<Expr> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| ArborError::Storage("concatenate: empty expression list".into()))?;
    let refs: Vec<&Expr> = rest.iter().collect();
    let graph = owning_graph(first, &refs)?;
    let rank = first.shape().ndim();
    let ax = first
        .shape()
        .normalize_axis(axis)
        .ok_or(ArborError::AxisOutOfRange { axis, rank })?;
    let mut total = 0;
    for p in parts {
        if p.dtype() != first.dtype() {
            return Err(ArborError::DTypeMismatch {
                expected: first.dtype(),
                got: p.dtype(),
            });
        }
        if p.shape().ndim() != rank
            || p.shape()
                .dims()
                .iter()
                .enumerate()
                .any(|(d, &s)| d != ax && s != first.shape().dims()[d])
        {
            return Err(ArborError::ShapeMismatch {
                expected: first.shape().dims().to_vec(),
                got: p.shape().dims().to_vec(),
            });
        }
        total += p.shape().dims()[ax];
    }
    let inputs: Vec<&Expr> = parts.iter().collect();
    Ok(graph.insert(
        Kind::Concat { axis: ax },
        &inputs,
        first.shape().with_dim(ax, total),
        first.dtype(),
    ))
}

/// Repeat an expression `repeats` times along `axis`.
pub fn repeat(a: &Expr, repeats: usize, axis: isize) -> Result<Expr> {
    if repeats == 0 {
        return Err(ArborError::Storage("repeat: zero repeats".into()));
    }
    if repeats == 1 {
        return Ok(a.clone());
    }
    concatenate(&vec![a.clone(); repeats], axis)
}

/// Clamp forward values to `[-c, c]`. The gradient passes only where the
/// input was inside the interval; compare `clip_gradient`, which leaves the
/// forward value untouched and clamps the gradient instead.
pub fn clip(a: &Expr, c: f32) -> Result<Expr> {
    unary_float(Kind::Clip { c }, a)
}

/// Identity on the forward value; clamps the *gradient* to `[-c, c]` on
/// the way back.
pub fn clip_gradient(a: &Expr, c: f32) -> Result<Expr> {
    unary_float(Kind::ClipGradient { c }, a)
}

/// Shift content by `offsets[d]` along each axis, padding vacated
/// positions with `pad`.
pub fn shift(a: &Expr, offsets: &[isize], pad: f32) -> Result<Expr> {
    if offsets.len() != a.shape().ndim() {
        return Err(ArborError::ShapeMismatch {
            expected: vec![a.shape().ndim()],
            got: vec![offsets.len()],
        });
    }
    let graph = a.graph()?;
    Ok(graph.insert(
        Kind::Shift {
            offsets: offsets.to_vec(),
            pad,
        },
        &[a],
        a.shape().clone(),
        a.dtype(),
    ))
}

/// Identity on the forward value; always contributes a zero gradient to
/// its input, deliberately severing the graph.
pub fn stop_gradient(a: &Expr) -> Result<Expr> {
    let graph = a.graph()?;
    Ok(graph.insert(Kind::StopGradient, &[a], a.shape().clone(), a.dtype()))
}

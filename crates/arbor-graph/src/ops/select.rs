//! Selection factories: top-k, argmax/argmin, gather, index_select, slice.

use arbor_core::{ArborError, DType, Result, Shape};

use crate::expr::{Expr, Expr2};
use crate::inits;
use crate::kind::Kind;
use crate::ops::owning_graph;

/// Top-k values and indices along `axis`, descending by default. The two
/// handles are co-dependent outputs of one selection: gradient flows only
/// to the selected positions of the input, and only through the values
/// handle. Ties break toward the lower source index.
pub fn topk(a: &Expr, k: usize, axis: isize, descending: bool) -> Result<Expr2> {
    let graph = a.graph()?;
    let rank = a.shape().ndim();
    let ax = a
        .shape()
        .normalize_axis(axis)
        .ok_or(ArborError::AxisOutOfRange { axis, rank })?;
    let n = a.shape().dims()[ax];
    if k == 0 || k > n {
        return Err(ArborError::IndexOutOfBounds {
            index: k as i64,
            size: n,
        });
    }
    let out_shape = a.shape().with_dim(ax, k);
    let values = graph.insert(
        Kind::TopK {
            axis: ax,
            k,
            descending,
        },
        &[a],
        out_shape.clone(),
        a.dtype(),
    );
    let indices = graph.insert(Kind::TopKIndices, &[&values], out_shape, DType::I32);
    Ok(Expr2(values, indices))
}

/// Top-1 along `axis`, descending: `(max values, argmax indices)`.
pub fn argmax(a: &Expr, axis: isize) -> Result<Expr2> {
    topk(a, 1, axis, true)
}

/// Top-1 along `axis`, ascending: `(min values, argmin indices)`.
pub fn argmin(a: &Expr, axis: isize) -> Result<Expr2> {
    topk(a, 1, axis, false)
}

/// Elementwise gather along `axis`; `indices` is an i32 expression with the
/// output's shape, equal to the input on every other axis.
pub fn gather(a: &Expr, axis: isize, indices: &Expr) -> Result<Expr> {
    let graph = owning_graph(a, &[indices])?;
    let rank = a.shape().ndim();
    let ax = a
        .shape()
        .normalize_axis(axis)
        .ok_or(ArborError::AxisOutOfRange { axis, rank })?;
    if indices.dtype() != DType::I32 {
        return Err(ArborError::DTypeMismatch {
            expected: DType::I32,
            got: indices.dtype(),
        });
    }
    if indices.shape().ndim() != rank
        || indices
            .shape()
            .dims()
            .iter()
            .enumerate()
            .any(|(d, &s)| d != ax && s != a.shape().dims()[d])
    {
        return Err(ArborError::ShapeMismatch {
            expected: a.shape().dims().to_vec(),
            got: indices.shape().dims().to_vec(),
        });
    }
    Ok(graph.insert(
        Kind::Gather { axis: ax },
        &[a, indices],
        indices.shape().clone(),
        a.dtype(),
    ))
}

/// Select whole sub-slices along `axis` by a rank-1 i32 index expression.
pub fn index_select(a: &Expr, axis: isize, indices: &Expr) -> Result<Expr> {
    let graph = owning_graph(a, &[indices])?;
    let rank = a.shape().ndim();
    let ax = a
        .shape()
        .normalize_axis(axis)
        .ok_or(ArborError::AxisOutOfRange { axis, rank })?;
    if indices.dtype() != DType::I32 {
        return Err(ArborError::DTypeMismatch {
            expected: DType::I32,
            got: indices.dtype(),
        });
    }
    if indices.shape().ndim() != 1 {
        return Err(ArborError::ShapeMismatch {
            expected: vec![1],
            got: vec![indices.shape().ndim()],
        });
    }
    let out_shape = a.shape().with_dim(ax, indices.shape().numel());
    Ok(graph.insert(
        Kind::IndexSelect { axis: ax },
        &[a, indices],
        out_shape,
        a.dtype(),
    ))
}

/// `index_select` from a literal index vector (becomes an i32 constant
/// node).
pub fn index_select_vec(a: &Expr, axis: isize, indices: &[i32]) -> Result<Expr> {
    let graph = a.graph()?;
    let idx = graph.constant(
        Shape::new(&[indices.len()]),
        DType::I32,
        inits::from_vec_i32(indices.to_vec()),
    )?;
    index_select(a, axis, &idx)
}

/// Select rows (axis 0).
pub fn rows(a: &Expr, indices: &Expr) -> Result<Expr> {
    index_select(a, 0, indices)
}

/// Select rows from a literal index vector.
pub fn rows_vec(a: &Expr, indices: &[i32]) -> Result<Expr> {
    index_select_vec(a, 0, indices)
}

/// Select columns (last axis).
pub fn cols(a: &Expr, indices: &Expr) -> Result<Expr> {
    index_select(a, -1, indices)
}

/// Select columns from a literal index vector.
pub fn cols_vec(a: &Expr, indices: &[i32]) -> Result<Expr> {
    index_select_vec(a, -1, indices)
}

/// Contiguous sub-range `[start, end)` along `axis`.
pub fn slice(a: &Expr, axis: isize, start: usize, end: usize) -> Result<Expr> {
    let graph = a.graph()?;
    let rank = a.shape().ndim();
    let ax = a
        .shape()
        .normalize_axis(axis)
        .ok_or(ArborError::AxisOutOfRange { axis, rank })?;
    let n = a.shape().dims()[ax];
    if start >= end || end > n {
        return Err(ArborError::IndexOutOfBounds {
            index: end as i64,
            size: n,
        });
    }
    Ok(graph.insert(
        Kind::Slice {
            axis: ax,
            start,
            end,
        },
        &[a],
        a.shape().with_dim(ax, end - start),
        a.dtype(),
    ))
}

/// Single index along `axis`, kept as a size-1 axis.
pub fn slice_one(a: &Expr, axis: isize, index: usize) -> Result<Expr> {
    slice(a, axis, index, index + 1)
}

/// `length` elements along `axis` starting at `start`.
pub fn narrow(a: &Expr, axis: isize, start: usize, length: usize) -> Result<Expr> {
    slice(a, axis, start, start + length)
}

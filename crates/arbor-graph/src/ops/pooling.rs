//! Pooling factories over `[batch, channels, height, width]` inputs.

use arbor_core::ops::pooling::Pool2d;
use arbor_core::{ArborError, Result, Shape};

use crate::expr::Expr;
use crate::kind::Kind;

fn pooled(x: &Expr, spec: Pool2d, max: bool) -> Result<Expr> {
    let graph = x.graph()?;
    let dims = x.shape().dims();
    if dims.len() != 4 {
        return Err(ArborError::ShapeMismatch {
            expected: vec![4],
            got: vec![dims.len()],
        });
    }
    let (ho, wo) = spec.output_hw(dims[2], dims[3])?;
    let shape = Shape::new(&[dims[0], dims[1], ho, wo]);
    let kind = if max {
        Kind::MaxPool(spec)
    } else {
        Kind::AvgPool(spec)
    };
    Ok(graph.insert(kind, &[x], shape, x.dtype()))
}

/// Average pooling; each output gradient spreads evenly over its window.
#[allow(clippy::too_many_arguments)]
pub fn avg_pooling(
    x: &Expr,
    height: usize,
    width: usize,
    pad_height: usize,
    pad_width: usize,
    stride_height: usize,
    stride_width: usize,
) -> Result<Expr> {
    pooled(
        x,
        Pool2d {
            kernel: (height, width),
            pad: (pad_height, pad_width),
            stride: (stride_height, stride_width),
        },
        false,
    )
}

/// Max pooling; the gradient routes to each window's recorded argmax.
#[allow(clippy::too_many_arguments)]
pub fn max_pooling(
    x: &Expr,
    height: usize,
    width: usize,
    pad_height: usize,
    pad_width: usize,
    stride_height: usize,
    stride_width: usize,
) -> Result<Expr> {
    pooled(
        x,
        Pool2d {
            kernel: (height, width),
            pad: (pad_height, pad_width),
            stride: (stride_height, stride_width),
        },
        true,
    )
}

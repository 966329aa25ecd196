//! Index-based selection kernels: index_select, gather, top-k, and their
//! scatter-add adjoints.

use crate::error::ArborError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

fn axis_extents(shape: &Shape, axis: usize) -> (usize, usize, usize) {
    let dims = shape.dims();
    (
        dims[..axis].iter().product(),
        dims[axis],
        dims[axis + 1..].iter().product(),
    )
}

fn check_index(idx: i32, size: usize) -> Result<usize> {
    if idx < 0 || idx as usize >= size {
        return Err(ArborError::IndexOutOfBounds {
            index: i64::from(idx),
            size,
        });
    }
    Ok(idx as usize)
}

impl Tensor {
    /// Select whole sub-slices along `axis` by a rank-1 i32 index vector.
    /// The output replaces the axis extent with the index count.
    pub fn index_select(&self, axis: usize, indices: &Tensor) -> Result<Tensor> {
        let idx = indices
            .as_i32_slice()
            .ok_or(ArborError::UnsupportedDType(indices.dtype()))?;
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let (outer, n, inner) = axis_extents(self.shape(), axis);
        let k = idx.len();
        let mut out = vec![0.0f32; outer * k * inner];
        for o in 0..outer {
            for (j, &ix) in idx.iter().enumerate() {
                let src = (o * n + check_index(ix, n)?) * inner;
                let dst = (o * k + j) * inner;
                out[dst..dst + inner].copy_from_slice(&data[src..src + inner]);
            }
        }
        Ok(Tensor::from_f32(&out, self.shape().with_dim(axis, k).dims()))
    }

    /// Adjoint of `index_select`: scatter-add the gradient's sub-slices back
    /// into a zero tensor of shape `input`. Repeated indices accumulate.
    pub fn index_select_backward(
        &self,
        input: &Shape,
        axis: usize,
        indices: &Tensor,
    ) -> Result<Tensor> {
        let idx = indices
            .as_i32_slice()
            .ok_or(ArborError::UnsupportedDType(indices.dtype()))?;
        let grad = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let (outer, n, inner) = axis_extents(input, axis);
        let k = idx.len();
        let mut out = vec![0.0f32; input.numel()];
        for o in 0..outer {
            for (j, &ix) in idx.iter().enumerate() {
                let dst = (o * n + check_index(ix, n)?) * inner;
                let src = (o * k + j) * inner;
                for i in 0..inner {
                    out[dst + i] += grad[src + i];
                }
            }
        }
        Ok(Tensor::from_f32(&out, input.dims()))
    }

    /// Element-wise gather along `axis`: the i32 `indices` tensor has the
    /// output's shape, which must match this tensor on every other axis.
    pub fn gather(&self, axis: usize, indices: &Tensor) -> Result<Tensor> {
        let idx = indices
            .as_i32_slice()
            .ok_or(ArborError::UnsupportedDType(indices.dtype()))?;
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        if indices.ndim() != self.ndim()
            || indices
                .shape()
                .dims()
                .iter()
                .enumerate()
                .any(|(d, &s)| d != axis && s != self.shape().dims()[d])
        {
            return Err(ArborError::ShapeMismatch {
                expected: self.shape().dims().to_vec(),
                got: indices.shape().dims().to_vec(),
            });
        }
        let (outer, n, inner) = axis_extents(self.shape(), axis);
        let k = indices.shape().dims()[axis];
        let mut out = vec![0.0f32; indices.numel()];
        for o in 0..outer {
            for j in 0..k {
                for i in 0..inner {
                    let pos = (o * k + j) * inner + i;
                    let src = check_index(idx[pos], n)?;
                    out[pos] = data[(o * n + src) * inner + i];
                }
            }
        }
        Ok(Tensor::from_f32(&out, indices.shape().dims()))
    }

    /// Adjoint of `gather` (also of top-k value selection): scatter-add this
    /// gradient back into a zero tensor of shape `input` at `indices`.
    pub fn gather_backward(&self, input: &Shape, axis: usize, indices: &Tensor) -> Result<Tensor> {
        let idx = indices
            .as_i32_slice()
            .ok_or(ArborError::UnsupportedDType(indices.dtype()))?;
        let grad = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let (outer, n, inner) = axis_extents(input, axis);
        let k = indices.shape().dims()[axis];
        let mut out = vec![0.0f32; input.numel()];
        for o in 0..outer {
            for j in 0..k {
                for i in 0..inner {
                    let pos = (o * k + j) * inner + i;
                    let dst = check_index(idx[pos], n)?;
                    out[(o * n + dst) * inner + i] += grad[pos];
                }
            }
        }
        Ok(Tensor::from_f32(&out, input.dims()))
    }

    /// Top-k values and their source indices along `axis`, ordered
    /// descending by default. Ties break toward the lower source index so
    /// the operator stays deterministic.
    pub fn topk(&self, axis: usize, k: usize, descending: bool) -> Result<(Tensor, Tensor)> {
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let (outer, n, inner) = axis_extents(self.shape(), axis);
        if k == 0 || k > n {
            return Err(ArborError::IndexOutOfBounds {
                index: k as i64,
                size: n,
            });
        }
        let mut values = vec![0.0f32; outer * k * inner];
        let mut indices = vec![0i32; outer * k * inner];
        let mut order: Vec<usize> = Vec::with_capacity(n);
        for o in 0..outer {
            for i in 0..inner {
                let at = |j: usize| data[(o * n + j) * inner + i];
                order.clear();
                order.extend(0..n);
                // stable sort on value keeps lower indices first among ties
                if descending {
                    order.sort_by(|&x, &y| at(y).total_cmp(&at(x)));
                } else {
                    order.sort_by(|&x, &y| at(x).total_cmp(&at(y)));
                }
                for (j, &src) in order[..k].iter().enumerate() {
                    let pos = (o * k + j) * inner + i;
                    values[pos] = at(src);
                    indices[pos] = src as i32;
                }
            }
        }
        let out_dims = self.shape().with_dim(axis, k);
        Ok((
            Tensor::from_f32(&values, out_dims.dims()),
            Tensor::from_i32(&indices, out_dims.dims()),
        ))
    }
}

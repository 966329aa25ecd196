//! Axis reductions and their gradient helpers.
//!
//! Every reduction collapses exactly one axis to size 1; callers that want
//! the axis removed reshape afterwards. `reduce_to_shape` is the shared
//! helper every broadcasting binary operator's backward rule uses to fold a
//! gradient back onto an input's shape.

use crate::error::ArborError;
use crate::ops::arithmetic::broadcast_index;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

/// Split `shape` around `axis` into (outer, n, inner) extents.
fn axis_extents(shape: &Shape, axis: usize) -> (usize, usize, usize) {
    let dims = shape.dims();
    let outer: usize = dims[..axis].iter().product();
    let n = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();
    (outer, n, inner)
}

impl Tensor {
    fn reduce_axis(
        &self,
        axis: usize,
        init: impl Fn() -> f32,
        fold: impl Fn(f32, f32) -> f32,
        finish: impl Fn(f32, usize) -> f32,
    ) -> Result<Tensor> {
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        if self.shape().normalize_axis(axis as isize).is_none() {
            return Err(ArborError::AxisOutOfRange {
                axis: axis as isize,
                rank: self.ndim(),
            });
        }
        let (outer, n, inner) = axis_extents(self.shape(), axis);
        let mut out = vec![0.0f32; outer * inner];
        for o in 0..outer {
            for i in 0..inner {
                let mut acc = init();
                for j in 0..n {
                    acc = fold(acc, data[(o * n + j) * inner + i]);
                }
                out[o * inner + i] = finish(acc, n);
            }
        }
        Ok(Tensor::from_f32(
            &out,
            self.shape().with_dim(axis, 1).dims(),
        ))
    }

    /// Sum along `axis`, keeping the axis with size 1.
    pub fn sum_axis(&self, axis: usize) -> Result<Tensor> {
        self.reduce_axis(axis, || 0.0, |a, v| a + v, |a, _| a)
    }

    /// Mean along `axis`, keeping the axis with size 1.
    pub fn mean_axis(&self, axis: usize) -> Result<Tensor> {
        self.reduce_axis(axis, || 0.0, |a, v| a + v, |a, n| a / n as f32)
    }

    /// Maximum along `axis`, keeping the axis with size 1.
    pub fn max_axis(&self, axis: usize) -> Result<Tensor> {
        self.reduce_axis(axis, || f32::NEG_INFINITY, f32::max, |a, _| a)
    }

    /// Minimum along `axis`, keeping the axis with size 1.
    pub fn min_axis(&self, axis: usize) -> Result<Tensor> {
        self.reduce_axis(axis, || f32::INFINITY, f32::min, |a, _| a)
    }

    /// Product along `axis`, keeping the axis with size 1.
    pub fn prod_axis(&self, axis: usize) -> Result<Tensor> {
        self.reduce_axis(axis, || 1.0, |a, v| a * v, |a, _| a)
    }

    /// Numerically stable log-sum-exp along `axis`, keeping the axis with
    /// size 1.
    pub fn logsumexp_axis(&self, axis: usize) -> Result<Tensor> {
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        if self.shape().normalize_axis(axis as isize).is_none() {
            return Err(ArborError::AxisOutOfRange {
                axis: axis as isize,
                rank: self.ndim(),
            });
        }
        let (outer, n, inner) = axis_extents(self.shape(), axis);
        let mut out = vec![0.0f32; outer * inner];
        for o in 0..outer {
            for i in 0..inner {
                let mut m = f32::NEG_INFINITY;
                for j in 0..n {
                    m = m.max(data[(o * n + j) * inner + i]);
                }
                let mut sum = 0.0f32;
                for j in 0..n {
                    sum += (data[(o * n + j) * inner + i] - m).exp();
                }
                out[o * inner + i] = m + sum.ln();
            }
        }
        Ok(Tensor::from_f32(
            &out,
            self.shape().with_dim(axis, 1).dims(),
        ))
    }

    /// Sum this tensor down to `target`, folding every axis that was
    /// broadcast up (missing leading axes and size-1 axes).
    ///
    /// `target` must be broadcast-compatible with this tensor's shape and no
    /// larger along any axis.
    pub fn reduce_to_shape(&self, target: &Shape) -> Result<Tensor> {
        if self.shape() == target {
            return Ok(self.clone());
        }
        let joint = self.shape().broadcast_with(target).ok_or_else(|| {
            ArborError::BroadcastIncompatible {
                lhs: self.shape().dims().to_vec(),
                rhs: target.dims().to_vec(),
            }
        })?;
        if &joint != self.shape() {
            return Err(ArborError::ShapeMismatch {
                expected: self.shape().dims().to_vec(),
                got: target.dims().to_vec(),
            });
        }
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let mut out = vec![0.0f32; target.numel()];
        for (i, &v) in data.iter().enumerate() {
            out[broadcast_index(i, self.shape(), target)] += v;
        }
        Ok(Tensor::from_f32(&out, target.dims()))
    }

    /// Materialize this tensor broadcast up to `target`.
    pub fn broadcast_to(&self, target: &Shape) -> Result<Tensor> {
        if self.shape() == target {
            return Ok(self.clone());
        }
        let joint = self.shape().broadcast_with(target).ok_or_else(|| {
            ArborError::BroadcastIncompatible {
                lhs: self.shape().dims().to_vec(),
                rhs: target.dims().to_vec(),
            }
        })?;
        if &joint != target {
            return Err(ArborError::ShapeMismatch {
                expected: target.dims().to_vec(),
                got: self.shape().dims().to_vec(),
            });
        }
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let out: Vec<f32> = (0..target.numel())
            .map(|i| data[broadcast_index(i, target, self.shape())])
            .collect();
        Ok(Tensor::from_f32(&out, target.dims()))
    }

    /// 0/1 mask marking, per slice along `axis`, the first position whose
    /// value equals the reduced value. Ties route to the lowest index so
    /// max/min gradients stay deterministic.
    pub fn first_match_mask(&self, reduced: &Tensor, axis: usize) -> Result<Tensor> {
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let red = reduced
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(reduced.dtype()))?;
        let (outer, n, inner) = axis_extents(self.shape(), axis);
        let mut out = vec![0.0f32; data.len()];
        for o in 0..outer {
            for i in 0..inner {
                let target = red[o * inner + i];
                for j in 0..n {
                    let idx = (o * n + j) * inner + i;
                    if data[idx] == target {
                        out[idx] = 1.0;
                        break;
                    }
                }
            }
        }
        Ok(Tensor::from_f32(&out, self.shape().dims()))
    }

    /// For each element, the product of all *other* elements in its slice
    /// along `axis` (prefix/suffix products, so zeros are handled exactly).
    pub fn prod_except(&self, axis: usize) -> Result<Tensor> {
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let (outer, n, inner) = axis_extents(self.shape(), axis);
        let mut out = vec![0.0f32; data.len()];
        let mut prefix = vec![0.0f32; n];
        let mut suffix = vec![0.0f32; n];
        for o in 0..outer {
            for i in 0..inner {
                let at = |j: usize| data[(o * n + j) * inner + i];
                let mut acc = 1.0;
                for j in 0..n {
                    prefix[j] = acc;
                    acc *= at(j);
                }
                acc = 1.0;
                for j in (0..n).rev() {
                    suffix[j] = acc;
                    acc *= at(j);
                }
                for j in 0..n {
                    out[(o * n + j) * inner + i] = prefix[j] * suffix[j];
                }
            }
        }
        Ok(Tensor::from_f32(&out, self.shape().dims()))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Shape, Tensor};

    #[test]
    fn test_sum_mean_axis() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let s = t.sum_axis(1).unwrap();
        assert_eq!(s.shape().dims(), &[2, 1]);
        assert_eq!(s.as_f32_slice().unwrap(), &[6.0, 15.0]);

        let m = t.mean_axis(0).unwrap();
        assert_eq!(m.shape().dims(), &[1, 3]);
        assert_eq!(m.as_f32_slice().unwrap(), &[2.5, 3.5, 4.5]);
    }

    #[test]
    fn test_max_min_prod_axis() {
        let t = Tensor::from_f32(&[3.0, 1.0, 2.0, -1.0, 5.0, 0.0], &[2, 3]);
        assert_eq!(t.max_axis(1).unwrap().as_f32_slice().unwrap(), &[3.0, 5.0]);
        assert_eq!(
            t.min_axis(1).unwrap().as_f32_slice().unwrap(),
            &[1.0, -1.0]
        );
        assert_eq!(t.prod_axis(1).unwrap().as_f32_slice().unwrap(), &[6.0, 0.0]);
    }

    #[test]
    fn test_logsumexp() {
        let t = Tensor::from_f32(&[0.0, 0.0], &[1, 2]);
        let l = t.logsumexp_axis(1).unwrap();
        assert!((l.as_f32_slice().unwrap()[0] - 2.0f32.ln()).abs() < 1e-6);

        // large values must not overflow
        let t = Tensor::from_f32(&[1000.0, 1000.0], &[1, 2]);
        let l = t.logsumexp_axis(1).unwrap();
        assert!((l.as_f32_slice().unwrap()[0] - (1000.0 + 2.0f32.ln())).abs() < 1e-3);
    }

    #[test]
    fn test_axis_out_of_range() {
        let t = Tensor::from_f32(&[1.0, 2.0], &[2]);
        assert!(t.sum_axis(1).is_err());
    }

    #[test]
    fn test_reduce_to_shape() {
        let g = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let r = g.reduce_to_shape(&Shape::new(&[3])).unwrap();
        assert_eq!(r.as_f32_slice().unwrap(), &[5.0, 7.0, 9.0]);

        let r = g.reduce_to_shape(&Shape::new(&[2, 1])).unwrap();
        assert_eq!(r.as_f32_slice().unwrap(), &[6.0, 15.0]);

        let r = g.reduce_to_shape(&Shape::scalar()).unwrap();
        assert_eq!(r.as_f32_slice().unwrap(), &[21.0]);
    }

    #[test]
    fn test_broadcast_to() {
        let t = Tensor::from_f32(&[1.0, 2.0], &[2, 1]);
        let b = t.broadcast_to(&Shape::new(&[2, 3])).unwrap();
        assert_eq!(b.as_f32_slice().unwrap(), &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_first_match_mask_ties() {
        let t = Tensor::from_f32(&[2.0, 5.0, 5.0], &[1, 3]);
        let m = t.max_axis(1).unwrap();
        let mask = t.first_match_mask(&m, 1).unwrap();
        // tie at positions 1 and 2: lower index wins
        assert_eq!(mask.as_f32_slice().unwrap(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_prod_except() {
        let t = Tensor::from_f32(&[2.0, 3.0, 4.0], &[1, 3]);
        let p = t.prod_except(1).unwrap();
        assert_eq!(p.as_f32_slice().unwrap(), &[12.0, 8.0, 6.0]);

        // zero in the slice: only its own position keeps the full product
        let t = Tensor::from_f32(&[0.0, 3.0, 4.0], &[1, 3]);
        let p = t.prod_except(1).unwrap();
        assert_eq!(p.as_f32_slice().unwrap(), &[12.0, 0.0, 0.0]);
    }
}

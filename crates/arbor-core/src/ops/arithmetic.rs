//! Element-wise arithmetic and dense matrix products.

use rayon::prelude::*;

use crate::dtype::DType;
use crate::error::ArborError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

/// Below this element count the serial path is faster than spawning rayon
/// tasks.
const PAR_THRESHOLD: usize = 16384;

impl Tensor {
    /// Element-wise addition with broadcasting.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| a + b)
    }

    /// Element-wise subtraction with broadcasting.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| a - b)
    }

    /// Element-wise multiplication with broadcasting.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| a * b)
    }

    /// Element-wise division with broadcasting.
    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| a / b)
    }

    pub fn neg(&self) -> Result<Tensor> {
        self.map(|a| -a)
    }

    pub fn abs(&self) -> Result<Tensor> {
        self.map(f32::abs)
    }

    /// Element-wise sign: -1, 0 or +1.
    pub fn sign(&self) -> Result<Tensor> {
        self.map(|a| {
            if a > 0.0 {
                1.0
            } else if a < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
    }

    pub fn exp(&self) -> Result<Tensor> {
        self.map(f32::exp)
    }

    pub fn log(&self) -> Result<Tensor> {
        self.map(f32::ln)
    }

    pub fn sin(&self) -> Result<Tensor> {
        self.map(f32::sin)
    }

    pub fn cos(&self) -> Result<Tensor> {
        self.map(f32::cos)
    }

    pub fn tan(&self) -> Result<Tensor> {
        self.map(f32::tan)
    }

    pub fn sqrt(&self) -> Result<Tensor> {
        self.map(f32::sqrt)
    }

    pub fn reciprocal(&self) -> Result<Tensor> {
        self.map(|a| 1.0 / a)
    }

    pub fn add_scalar(&self, scalar: f32) -> Result<Tensor> {
        self.map(|a| a + scalar)
    }

    pub fn mul_scalar(&self, scalar: f32) -> Result<Tensor> {
        self.map(|a| a * scalar)
    }

    /// Clamp all elements to `[min, max]`.
    pub fn clamp(&self, min: f32, max: f32) -> Result<Tensor> {
        self.map(move |a| a.clamp(min, max))
    }

    /// Apply a unary function element-wise (f32 kernels only).
    pub fn map(&self, op: impl Fn(f32) -> f32 + Sync) -> Result<Tensor> {
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let result: Vec<f32> = if data.len() >= PAR_THRESHOLD {
            data.par_iter().map(|&v| op(v)).collect()
        } else {
            data.iter().map(|&v| op(v)).collect()
        };
        Ok(Tensor::from_f32(&result, self.shape().dims()))
    }

    /// Apply a binary function element-wise with broadcasting (f32 kernels
    /// only). Both inputs must share the same dtype; type promotion happens
    /// at graph-construction time, not here.
    pub fn zip(&self, other: &Tensor, op: impl Fn(f32, f32) -> f32 + Sync) -> Result<Tensor> {
        if self.dtype() != other.dtype() {
            return Err(ArborError::DTypeMismatch {
                expected: self.dtype(),
                got: other.dtype(),
            });
        }
        let a_data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let b_data = other
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(other.dtype()))?;

        let out_shape = self.shape().broadcast_with(other.shape()).ok_or_else(|| {
            ArborError::BroadcastIncompatible {
                lhs: self.shape().dims().to_vec(),
                rhs: other.shape().dims().to_vec(),
            }
        })?;
        let numel = out_shape.numel();

        // Fast path: identical shapes, direct pairwise loop.
        let result: Vec<f32> = if self.shape() == other.shape() {
            if numel >= PAR_THRESHOLD {
                a_data
                    .par_iter()
                    .zip(b_data.par_iter())
                    .map(|(&a, &b)| op(a, b))
                    .collect()
            } else {
                a_data
                    .iter()
                    .zip(b_data.iter())
                    .map(|(&a, &b)| op(a, b))
                    .collect()
            }
        } else {
            let index = |i: usize| {
                let ai = broadcast_index(i, &out_shape, self.shape());
                let bi = broadcast_index(i, &out_shape, other.shape());
                op(a_data[ai], b_data[bi])
            };
            if numel >= PAR_THRESHOLD {
                (0..numel).into_par_iter().map(index).collect()
            } else {
                (0..numel).map(index).collect()
            }
        };

        Ok(Tensor::from_f32(&result, out_shape.dims()))
    }

    /// Matrix product `scale * op(self) @ op(other)` over two rank-2 inputs,
    /// where `op` optionally transposes.
    pub fn dot(&self, other: &Tensor, trans_a: bool, trans_b: bool, scale: f32) -> Result<Tensor> {
        check_f32_pair(self, other)?;
        if self.ndim() != 2 || other.ndim() != 2 {
            return Err(ArborError::ShapeMismatch {
                expected: vec![2],
                got: vec![self.ndim(), other.ndim()],
            });
        }
        let a = self.as_f32_slice().expect("checked f32");
        let b = other.as_f32_slice().expect("checked f32");
        let (m, k, n) = dot_dims(
            self.shape().dims(),
            other.shape().dims(),
            trans_a,
            trans_b,
        )?;
        let mut out = vec![0.0f32; m * n];
        matmul_slice(
            a,
            b,
            &mut out,
            self.shape().dims(),
            other.shape().dims(),
            trans_a,
            trans_b,
            scale,
            0,
            0,
            m,
            k,
            n,
        );
        Ok(Tensor::from_f32(&out, &[m, n]))
    }

    /// Batched matrix product over two rank-3 inputs with equal batch size.
    pub fn bdot(&self, other: &Tensor, trans_a: bool, trans_b: bool, scale: f32) -> Result<Tensor> {
        check_f32_pair(self, other)?;
        if self.ndim() != 3 || other.ndim() != 3 {
            return Err(ArborError::ShapeMismatch {
                expected: vec![3],
                got: vec![self.ndim(), other.ndim()],
            });
        }
        let a_dims = self.shape().dims();
        let b_dims = other.shape().dims();
        if a_dims[0] != b_dims[0] {
            return Err(ArborError::ShapeMismatch {
                expected: a_dims.to_vec(),
                got: b_dims.to_vec(),
            });
        }
        let batch = a_dims[0];
        let (m, k, n) = dot_dims(&a_dims[1..], &b_dims[1..], trans_a, trans_b)?;

        let a = self.as_f32_slice().expect("checked f32");
        let b = other.as_f32_slice().expect("checked f32");
        let mut out = vec![0.0f32; batch * m * n];
        let a_stride = a_dims[1] * a_dims[2];
        let b_stride = b_dims[1] * b_dims[2];
        out.par_chunks_mut(m * n).enumerate().for_each(|(bi, chunk)| {
            matmul_slice(
                a,
                b,
                chunk,
                &a_dims[1..],
                &b_dims[1..],
                trans_a,
                trans_b,
                scale,
                bi * a_stride,
                bi * b_stride,
                m,
                k,
                n,
            );
        });
        Ok(Tensor::from_f32(&out, &[batch, m, n]))
    }
}

fn check_f32_pair(a: &Tensor, b: &Tensor) -> Result<()> {
    if a.dtype() != b.dtype() {
        return Err(ArborError::DTypeMismatch {
            expected: a.dtype(),
            got: b.dtype(),
        });
    }
    if a.dtype() != DType::F32 {
        return Err(ArborError::UnsupportedDType(a.dtype()));
    }
    Ok(())
}

/// Logical (m, k, n) of a matrix product after applying the transpose flags
/// to 2-D operand dims.
fn dot_dims(
    a_dims: &[usize],
    b_dims: &[usize],
    trans_a: bool,
    trans_b: bool,
) -> Result<(usize, usize, usize)> {
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
    Ok((m, ka, n))
}

/// One `scale * op(A) @ op(B)` product into `out`, reading transposed
/// operands in place instead of materializing them.
#[allow(clippy::too_many_arguments)]
fn matmul_slice(
    a: &[f32],
    b: &[f32],
    out: &mut [f32],
    a_dims: &[usize],
    b_dims: &[usize],
    trans_a: bool,
    trans_b: bool,
    scale: f32,
    a_off: usize,
    b_off: usize,
    m: usize,
    k: usize,
    n: usize,
) {
    let a_cols = a_dims[1];
    let b_cols = b_dims[1];
    let a_at = |i: usize, p: usize| {
        if trans_a {
            a[a_off + p * a_cols + i]
        } else {
            a[a_off + i * a_cols + p]
        }
    };
    let b_at = |p: usize, j: usize| {
        if trans_b {
            b[b_off + j * b_cols + p]
        } else {
            b[b_off + p * b_cols + j]
        }
    };
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for p in 0..k {
                sum += a_at(i, p) * b_at(p, j);
            }
            out[i * n + j] = scale * sum;
        }
    }
}

/// Source index of a broadcasted element: maps a flat index into `out_shape`
/// back into `src_shape`, treating size-1 and missing leading axes as
/// broadcast.
pub(crate) fn broadcast_index(flat_idx: usize, out_shape: &Shape, src_shape: &Shape) -> usize {
    let out_dims = out_shape.dims();
    let src_dims = src_shape.dims();
    let out_ndim = out_dims.len();
    let src_ndim = src_dims.len();

    let mut remaining = flat_idx;
    let mut src_idx = 0;
    let out_strides = out_shape.contiguous_strides();
    let src_strides = src_shape.contiguous_strides();

    for i in 0..out_ndim {
        let coord = remaining / out_strides[i];
        remaining %= out_strides[i];

        let src_dim_idx = i as isize - (out_ndim as isize - src_ndim as isize);
        if src_dim_idx >= 0 {
            let si = src_dim_idx as usize;
            if src_dims[si] > 1 {
                src_idx += coord * src_strides[si];
            }
        }
    }

    src_idx
}

#[cfg(test)]
mod tests {
    use crate::Tensor;

    #[test]
    fn test_add() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0], &[3]);
        let b = Tensor::from_f32(&[4.0, 5.0, 6.0], &[3]);
        assert_eq!(a.add(&b).unwrap().as_f32_slice().unwrap(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_broadcast_add() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = Tensor::from_f32(&[10.0, 20.0, 30.0], &[3]);
        let c = a.add(&b).unwrap();
        assert_eq!(c.shape().dims(), &[2, 3]);
        assert_eq!(
            c.as_f32_slice().unwrap(),
            &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]
        );
    }

    #[test]
    fn test_scalar_broadcast() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[2]);
        let s = Tensor::scalar(10.0);
        let c = a.mul(&s).unwrap();
        assert_eq!(c.as_f32_slice().unwrap(), &[10.0, 20.0]);
    }

    #[test]
    fn test_broadcast_incompatible() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[2]);
        let b = Tensor::from_f32(&[1.0, 2.0, 3.0], &[3]);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn test_unary() {
        let a = Tensor::from_f32(&[-1.0, 0.0, 4.0], &[3]);
        assert_eq!(a.abs().unwrap().as_f32_slice().unwrap(), &[1.0, 0.0, 4.0]);
        assert_eq!(a.neg().unwrap().as_f32_slice().unwrap(), &[1.0, 0.0, -4.0]);
        assert_eq!(a.sign().unwrap().as_f32_slice().unwrap(), &[-1.0, 0.0, 1.0]);
        assert_eq!(a.sqrt().unwrap().as_f32_slice().unwrap()[2], 2.0);
    }

    #[test]
    fn test_scalar_ops() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[2]);
        assert_eq!(
            a.add_scalar(10.0).unwrap().as_f32_slice().unwrap(),
            &[11.0, 12.0]
        );
        assert_eq!(
            a.mul_scalar(3.0).unwrap().as_f32_slice().unwrap(),
            &[3.0, 6.0]
        );
    }

    #[test]
    fn test_clamp() {
        let a = Tensor::from_f32(&[-2.0, 0.5, 3.0], &[3]);
        assert_eq!(
            a.clamp(0.0, 1.0).unwrap().as_f32_slice().unwrap(),
            &[0.0, 0.5, 1.0]
        );
    }

    #[test]
    fn test_dot() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = Tensor::from_f32(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]);
        let c = a.dot(&b, false, false, 1.0).unwrap();
        assert_eq!(c.shape().dims(), &[2, 2]);
        assert_eq!(c.as_f32_slice().unwrap(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_dot_transposed() {
        // A^T @ B with A stored [3,2]
        let a = Tensor::from_f32(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0], &[3, 2]);
        let b = Tensor::from_f32(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]);
        let c = a.dot(&b, true, false, 1.0).unwrap();
        assert_eq!(c.as_f32_slice().unwrap(), &[58.0, 64.0, 139.0, 154.0]);

        // A @ B^T with B stored [2,3]
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = Tensor::from_f32(&[7.0, 9.0, 11.0, 8.0, 10.0, 12.0], &[2, 3]);
        let c = a.dot(&b, false, true, 1.0).unwrap();
        assert_eq!(c.as_f32_slice().unwrap(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_dot_scaled() {
        let a = Tensor::from_f32(&[1.0, 0.0, 0.0, 1.0], &[2, 2]);
        let b = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let c = a.dot(&b, false, false, 0.5).unwrap();
        assert_eq!(c.as_f32_slice().unwrap(), &[0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_dot_dim_mismatch() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = Tensor::from_f32(&[1.0, 2.0, 3.0], &[3, 1]);
        assert!(a.dot(&b, false, false, 1.0).is_err());
    }

    #[test]
    fn test_bdot() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 1.0, 0.0, 0.0, 1.0], &[2, 2, 2]);
        let b = Tensor::from_f32(&[1.0, 0.0, 0.0, 1.0, 5.0, 6.0, 7.0, 8.0], &[2, 2, 2]);
        let c = a.bdot(&b, false, false, 1.0).unwrap();
        assert_eq!(c.shape().dims(), &[2, 2, 2]);
        assert_eq!(
            c.as_f32_slice().unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn test_bdot_batch_mismatch() {
        let a = Tensor::zeros(&crate::Shape::new(&[2, 2, 2]), crate::DType::F32);
        let b = Tensor::zeros(&crate::Shape::new(&[3, 2, 2]), crate::DType::F32);
        assert!(a.bdot(&b, false, false, 1.0).is_err());
    }
}

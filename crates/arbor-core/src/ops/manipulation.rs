//! Shape manipulation kernels: permutes, reshapes, concatenation, slicing,
//! shifting and casts.

use crate::dtype::DType;
use crate::error::ArborError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// Reinterpret under a new shape with the same element count. Shares
    /// storage; no data moves.
    pub fn view(&self, shape: &Shape) -> Result<Tensor> {
        if shape.numel() != self.numel() {
            return Err(ArborError::InvalidReshape {
                numel: self.numel(),
                shape: shape.dims().iter().map(|&d| d as isize).collect(),
            });
        }
        Ok(self.with_shape(shape.clone()))
    }

    /// Reshape with at most one inferred (-1) dimension.
    pub fn reshape(&self, target: &[isize]) -> Result<Tensor> {
        let shape = self.shape().resolve_reshape(target).ok_or_else(|| {
            ArborError::InvalidReshape {
                numel: self.numel(),
                shape: target.to_vec(),
            }
        })?;
        Ok(self.with_shape(shape))
    }

    /// Materialize a permutation of axes: output axis `i` is input axis
    /// `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Tensor> {
        let out_shape = self.shape().permute(perm).ok_or_else(|| {
            ArborError::AxisOutOfRange {
                axis: perm.last().map_or(0, |&p| p as isize),
                rank: self.ndim(),
            }
        })?;
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let in_strides = self.shape().contiguous_strides();
        let out_strides = out_shape.contiguous_strides();
        let mut out = vec![0.0f32; data.len()];
        for (i, slot) in out.iter_mut().enumerate() {
            let mut remaining = i;
            let mut src = 0;
            for (d, &os) in out_strides.iter().enumerate() {
                let coord = remaining / os;
                remaining %= os;
                src += coord * in_strides[perm[d]];
            }
            *slot = data[src];
        }
        Ok(Tensor::from_f32(&out, out_shape.dims()))
    }

    /// Swap the last two axes.
    pub fn transpose(&self) -> Result<Tensor> {
        if self.ndim() < 2 {
            return Err(ArborError::AxisOutOfRange {
                axis: -2,
                rank: self.ndim(),
            });
        }
        let mut perm: Vec<usize> = (0..self.ndim()).collect();
        perm.swap(self.ndim() - 2, self.ndim() - 1);
        self.permute(&perm)
    }

    /// Contiguous sub-range `[start, end)` along `axis`.
    pub fn slice_axis(&self, axis: usize, start: usize, end: usize) -> Result<Tensor> {
        let n = self.shape().dim(axis).ok_or(ArborError::AxisOutOfRange {
            axis: axis as isize,
            rank: self.ndim(),
        })?;
        if start >= end || end > n {
            return Err(ArborError::IndexOutOfBounds {
                index: end as i64,
                size: n,
            });
        }
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let dims = self.shape().dims();
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        let len = end - start;
        let mut out = Vec::with_capacity(outer * len * inner);
        for o in 0..outer {
            let base = (o * n + start) * inner;
            out.extend_from_slice(&data[base..base + len * inner]);
        }
        Ok(Tensor::from_f32(&out, self.shape().with_dim(axis, len).dims()))
    }

    /// Inverse of `slice_axis` for gradients: place this tensor into a
    /// zero-filled tensor of shape `full` at offset `start` along `axis`.
    pub fn embed_axis(&self, full: &Shape, axis: usize, start: usize) -> Result<Tensor> {
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let n = full.dims()[axis];
        let len = self.shape().dims()[axis];
        let dims = full.dims();
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        let mut out = vec![0.0f32; full.numel()];
        for o in 0..outer {
            let src = o * len * inner;
            let dst = (o * n + start) * inner;
            out[dst..dst + len * inner].copy_from_slice(&data[src..src + len * inner]);
        }
        Ok(Tensor::from_f32(&out, full.dims()))
    }

    /// Shift content by `offsets[d]` along each axis, filling vacated
    /// positions with `pad`. Positive offsets move content toward higher
    /// indices.
    pub fn shift(&self, offsets: &[isize], pad: f32) -> Result<Tensor> {
        if offsets.len() != self.ndim() {
            return Err(ArborError::ShapeMismatch {
                expected: vec![self.ndim()],
                got: vec![offsets.len()],
            });
        }
        let data = self
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(self.dtype()))?;
        let dims = self.shape().dims();
        let strides = self.shape().contiguous_strides();
        let mut out = vec![pad; data.len()];
        'outer: for (i, slot) in out.iter_mut().enumerate() {
            let mut remaining = i;
            let mut src = 0;
            for d in 0..dims.len() {
                let coord = (remaining / strides[d]) as isize;
                remaining %= strides[d];
                let from = coord - offsets[d];
                if from < 0 || from >= dims[d] as isize {
                    continue 'outer;
                }
                src += from as usize * strides[d];
            }
            *slot = data[src];
        }
        Ok(Tensor::from_f32(&out, dims))
    }

    /// Cast between element types. Supported pairs cover f32, f64 and i32;
    /// float→int truncates toward zero, matching the explicitness promotion
    /// demands.
    pub fn cast(&self, dtype: DType) -> Result<Tensor> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        let values: Vec<f64> = match self.dtype() {
            DType::F32 => self
                .as_f32_slice()
                .expect("dtype checked")
                .iter()
                .map(|&v| f64::from(v))
                .collect(),
            DType::F64 => self.as_f64_slice().expect("dtype checked").to_vec(),
            DType::I32 => self
                .as_i32_slice()
                .expect("dtype checked")
                .iter()
                .map(|&v| f64::from(v))
                .collect(),
            other => return Err(ArborError::UnsupportedDType(other)),
        };
        let dims = self.shape().dims();
        match dtype {
            DType::F32 => Ok(Tensor::from_f32(
                &values.iter().map(|&v| v as f32).collect::<Vec<_>>(),
                dims,
            )),
            DType::F64 => Ok(Tensor::from_f64(&values, dims)),
            DType::I32 => Ok(Tensor::from_i32(
                &values.iter().map(|&v| v as i32).collect::<Vec<_>>(),
                dims,
            )),
            other => Err(ArborError::UnsupportedDType(other)),
        }
    }
}

/// Concatenate tensors along `axis`. All parts must agree on every other
/// axis and share a dtype.
pub fn concat(parts: &[&Tensor], axis: usize) -> Result<Tensor> {
    let first = parts.first().ok_or_else(|| {
        ArborError::Storage("concat: empty tensor list".into())
    })?;
    let rank = first.ndim();
    if axis >= rank {
        return Err(ArborError::AxisOutOfRange {
            axis: axis as isize,
            rank,
        });
    }
    let mut total = 0;
    for p in parts {
        if p.ndim() != rank
            || p.dtype() != first.dtype()
            || p.shape()
                .dims()
                .iter()
                .enumerate()
                .any(|(d, &s)| d != axis && s != first.shape().dims()[d])
        {
            return Err(ArborError::ShapeMismatch {
                expected: first.shape().dims().to_vec(),
                got: p.shape().dims().to_vec(),
            });
        }
        total += p.shape().dims()[axis];
    }

    let dims = first.shape().dims();
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();
    let mut out = vec![0.0f32; outer * total * inner];
    let mut offset = 0;
    for p in parts {
        let data = p
            .as_f32_slice()
            .ok_or(ArborError::UnsupportedDType(p.dtype()))?;
        let len = p.shape().dims()[axis];
        for o in 0..outer {
            let src = o * len * inner;
            let dst = (o * total + offset) * inner;
            out[dst..dst + len * inner].copy_from_slice(&data[src..src + len * inner]);
        }
        offset += len;
    }
    Ok(Tensor::from_f32(
        &out,
        first.shape().with_dim(axis, total).dims(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose_values() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let t = a.transpose().unwrap();
        assert_eq!(t.shape().dims(), &[3, 2]);
        assert_eq!(t.as_f32_slice().unwrap(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_permute() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[1, 2, 3]);
        let p = a.permute(&[2, 0, 1]).unwrap();
        assert_eq!(p.shape().dims(), &[3, 1, 2]);
        assert_eq!(p.as_f32_slice().unwrap(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_reshape_view() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let r = a.reshape(&[4]).unwrap();
        assert_eq!(r.shape().dims(), &[4]);
        assert_eq!(r.as_f32_slice().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(a.reshape(&[3]).is_err());
    }

    #[test]
    fn test_slice_embed_roundtrip() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let s = a.slice_axis(1, 1, 3).unwrap();
        assert_eq!(s.shape().dims(), &[2, 2]);
        assert_eq!(s.as_f32_slice().unwrap(), &[2.0, 3.0, 5.0, 6.0]);

        let e = s.embed_axis(a.shape(), 1, 1).unwrap();
        assert_eq!(e.as_f32_slice().unwrap(), &[0.0, 2.0, 3.0, 0.0, 5.0, 6.0]);
    }

    #[test]
    fn test_slice_bounds() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0], &[3]);
        assert!(a.slice_axis(0, 2, 2).is_err());
        assert!(a.slice_axis(0, 0, 4).is_err());
    }

    #[test]
    fn test_shift() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[4]);
        let s = a.shift(&[1], 0.0).unwrap();
        assert_eq!(s.as_f32_slice().unwrap(), &[0.0, 1.0, 2.0, 3.0]);
        let s = a.shift(&[-2], 9.0).unwrap();
        assert_eq!(s.as_f32_slice().unwrap(), &[3.0, 4.0, 9.0, 9.0]);
    }

    #[test]
    fn test_cast() {
        let a = Tensor::from_f32(&[1.5, -2.5], &[2]);
        let i = a.cast(DType::I32).unwrap();
        assert_eq!(i.as_i32_slice().unwrap(), &[1, -2]);
        let f = i.cast(DType::F32).unwrap();
        assert_eq!(f.as_f32_slice().unwrap(), &[1.0, -2.0]);
    }

    #[test]
    fn test_concat() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[1, 2]);
        let b = Tensor::from_f32(&[3.0, 4.0, 5.0, 6.0], &[2, 2]);
        let c = concat(&[&a, &b], 0).unwrap();
        assert_eq!(c.shape().dims(), &[3, 2]);
        assert_eq!(
            c.as_f32_slice().unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );

        let c = concat(&[&a, &a], 1).unwrap();
        assert_eq!(c.shape().dims(), &[1, 4]);
        assert_eq!(c.as_f32_slice().unwrap(), &[1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_concat_mismatch() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[1, 2]);
        let b = Tensor::from_f32(&[1.0, 2.0, 3.0], &[1, 3]);
        assert!(concat(&[&a, &b], 0).is_err());
    }
}

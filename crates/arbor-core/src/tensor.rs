use std::fmt;

use crate::shape::Shape;
use crate::storage::Storage;
use crate::{ArborError, DType, Device, Result};

/// A contiguous n-dimensional buffer: the value a graph node computes into.
///
/// Tensors are immutable once built: kernels always produce a fresh tensor
/// rather than writing through shared storage, so a buffer is never observed
/// partially written. Cloning shares storage via `Arc`.
#[derive(Clone)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
}

impl Tensor {
    /// Create a tensor from f32 data with the given shape.
    ///
    /// # Panics
    /// Panics if the element count does not match the shape.
    pub fn from_f32(data: &[f32], dims: &[usize]) -> Self {
        let shape = Shape::new(dims);
        assert_eq!(
            shape.numel(),
            data.len(),
            "shape {:?} requires {} elements, got {}",
            dims,
            shape.numel(),
            data.len()
        );
        Self {
            storage: Storage::from_f32(data),
            shape,
        }
    }

    /// Create a tensor from f64 data with the given shape.
    pub fn from_f64(data: &[f64], dims: &[usize]) -> Self {
        let shape = Shape::new(dims);
        assert_eq!(shape.numel(), data.len());
        Self {
            storage: Storage::from_f64(data),
            shape,
        }
    }

    /// Create a tensor from i32 data with the given shape.
    pub fn from_i32(data: &[i32], dims: &[usize]) -> Self {
        let shape = Shape::new(dims);
        assert_eq!(shape.numel(), data.len());
        Self {
            storage: Storage::from_i32(data),
            shape,
        }
    }

    /// Create a zero-filled tensor.
    pub fn zeros(shape: &Shape, dtype: DType) -> Self {
        Self {
            storage: Storage::zeros(dtype, shape.numel()),
            shape: shape.clone(),
        }
    }

    /// Create an f32 tensor filled with ones.
    pub fn ones(shape: &Shape) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create an f32 tensor filled with `value`.
    pub fn full(shape: &Shape, value: f32) -> Self {
        let data = vec![value; shape.numel()];
        Self {
            storage: Storage::from_f32(&data),
            shape: shape.clone(),
        }
    }

    /// Create a rank-0 f32 tensor holding a single value.
    pub fn scalar(value: f32) -> Self {
        Self {
            storage: Storage::from_f32(&[value]),
            shape: Shape::scalar(),
        }
    }

    /// Create a tensor from pre-built storage. The storage element count
    /// must match the shape.
    pub fn from_storage(storage: Storage, shape: Shape) -> Result<Self> {
        if storage.numel() != shape.numel() {
            return Err(ArborError::ShapeMismatch {
                expected: vec![shape.numel()],
                got: vec![storage.numel()],
            });
        }
        Ok(Self { storage, shape })
    }

    /// Reinterpret this tensor under a new shape with the same element count.
    /// Shares storage; no data moves.
    pub(crate) fn with_shape(&self, shape: Shape) -> Tensor {
        debug_assert_eq!(self.numel(), shape.numel());
        Tensor {
            storage: self.storage.clone(),
            shape,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn device(&self) -> Device {
        self.storage.device()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Consume the tensor, returning its storage (for pool reclamation).
    pub fn into_storage(self) -> Storage {
        self.storage
    }

    /// The underlying f32 data, if this is an f32 tensor.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        self.storage.as_f32_slice()
    }

    /// The underlying f64 data, if this is an f64 tensor.
    pub fn as_f64_slice(&self) -> Option<&[f64]> {
        self.storage.as_f64_slice()
    }

    /// The underlying i32 data, if this is an i32 tensor.
    pub fn as_i32_slice(&self) -> Option<&[i32]> {
        self.storage.as_i32_slice()
    }

    /// Single f32 element by flat index.
    pub fn get_f32(&self, index: usize) -> Option<f32> {
        self.as_f32_slice()?.get(index).copied()
    }

    /// Copy of the data as a f32 vector.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        self.as_f32_slice()
            .map(<[f32]>::to_vec)
            .ok_or(ArborError::UnsupportedDType(self.dtype()))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, device={})",
            self.shape,
            self.dtype(),
            self.device()
        )
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(data) = self.as_f32_slice() {
            if self.numel() <= 16 {
                write!(f, "tensor({:?}, shape={})", data, self.shape)
            } else {
                write!(
                    f,
                    "tensor([{:.4}, {:.4}, ..., {:.4}], shape={})",
                    data[0],
                    data[1],
                    data[self.numel() - 1],
                    self.shape
                )
            }
        } else {
            write!(f, "tensor(shape={}, dtype={})", self.shape, self.dtype())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        assert_eq!(t.shape().dims(), &[2, 3]);
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.numel(), 6);
        assert_eq!(t.dtype(), DType::F32);
    }

    #[test]
    fn test_zeros_ones() {
        let z = Tensor::zeros(&Shape::new(&[3, 4]), DType::F32);
        assert!(z.as_f32_slice().unwrap().iter().all(|&v| v == 0.0));

        let o = Tensor::ones(&Shape::new(&[2, 2]));
        assert_eq!(o.as_f32_slice().unwrap(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_scalar() {
        let t = Tensor::scalar(2.5);
        assert!(t.shape().is_scalar());
        assert_eq!(t.numel(), 1);
        assert_eq!(t.get_f32(0), Some(2.5));
    }

    #[test]
    fn test_from_storage_mismatch() {
        let s = Storage::from_f32(&[1.0, 2.0]);
        assert!(Tensor::from_storage(s, Shape::new(&[3])).is_err());
    }

    #[test]
    fn test_i32() {
        let t = Tensor::from_i32(&[3, 1, 2], &[3]);
        assert_eq!(t.dtype(), DType::I32);
        assert_eq!(t.as_i32_slice().unwrap(), &[3, 1, 2]);
        assert!(t.as_f32_slice().is_none());
    }

    #[test]
    fn test_display() {
        let t = Tensor::from_f32(&[1.0, 2.0], &[2]);
        assert!(format!("{t}").contains("tensor"));
        assert!(format!("{t:?}").contains("f32"));
    }
}

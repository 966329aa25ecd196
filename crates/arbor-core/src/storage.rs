use std::sync::Arc;

use crate::{ArborError, DType, Device, Result};

/// Shared, reference-counted backing storage for tensor data.
///
/// Storage is a flat byte buffer plus element type. Cloning is cheap (an
/// `Arc` bump); the bytes themselves are immutable once published, which is
/// what lets a node's forward buffer be read concurrently during traversal.
#[derive(Debug, Clone)]
pub struct Storage {
    data: Arc<Vec<u8>>,
    dtype: DType,
    device: Device,
    /// Number of logical elements (not bytes).
    numel: usize,
}

impl Storage {
    /// Allocate zeroed CPU storage for `numel` elements of `dtype`.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        Self {
            data: Arc::new(vec![0u8; dtype.storage_bytes(numel)]),
            dtype,
            device: Device::Cpu,
            numel,
        }
    }

    /// Create storage from raw bytes. The byte count must match the dtype.
    pub fn from_bytes(dtype: DType, numel: usize, bytes: Vec<u8>) -> Result<Self> {
        let expected = dtype.storage_bytes(numel);
        if bytes.len() != expected {
            return Err(ArborError::Storage(format!(
                "expected {} bytes for {} elements of {}, got {}",
                expected,
                numel,
                dtype,
                bytes.len()
            )));
        }
        Ok(Self {
            data: Arc::new(bytes),
            dtype,
            device: Device::Cpu,
            numel,
        })
    }

    /// Create storage from a slice of f32 values.
    pub fn from_f32(data: &[f32]) -> Self {
        Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            dtype: DType::F32,
            device: Device::Cpu,
            numel: data.len(),
        }
    }

    /// Create storage from a slice of f64 values.
    pub fn from_f64(data: &[f64]) -> Self {
        Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            dtype: DType::F64,
            device: Device::Cpu,
            numel: data.len(),
        }
    }

    /// Create storage from a slice of i32 values.
    pub fn from_i32(data: &[i32]) -> Self {
        Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            dtype: DType::I32,
            device: Device::Cpu,
            numel: data.len(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Number of logical elements.
    pub fn numel(&self) -> usize {
        self.numel
    }

    /// Size in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Read-only access to the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Interpret storage as a slice of f32 values.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        if self.dtype != DType::F32 {
            return None;
        }
        Some(bytemuck::cast_slice(&self.data))
    }

    /// Interpret storage as a slice of f64 values.
    pub fn as_f64_slice(&self) -> Option<&[f64]> {
        if self.dtype != DType::F64 {
            return None;
        }
        Some(bytemuck::cast_slice(&self.data))
    }

    /// Interpret storage as a slice of i32 values.
    pub fn as_i32_slice(&self) -> Option<&[i32]> {
        if self.dtype != DType::I32 {
            return None;
        }
        Some(bytemuck::cast_slice(&self.data))
    }

    /// Whether this storage is uniquely owned (no other references).
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    /// Reclaim the underlying byte buffer if this is the last reference.
    ///
    /// Used by the buffer pool to recycle released forward/gradient buffers.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        Arc::try_unwrap(self.data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let s = Storage::zeros(DType::F32, 10);
        assert_eq!(s.dtype(), DType::F32);
        assert_eq!(s.device(), Device::Cpu);
        assert_eq!(s.numel(), 10);
        assert_eq!(s.nbytes(), 40);
        assert!(s.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_f32() {
        let s = Storage::from_f32(&[1.0, 2.0, 3.0]);
        assert_eq!(s.numel(), 3);
        assert_eq!(s.as_f32_slice().unwrap(), &[1.0, 2.0, 3.0]);
        assert!(s.as_i32_slice().is_none());
    }

    #[test]
    fn test_from_bytes_validation() {
        assert!(Storage::from_bytes(DType::F32, 3, vec![0u8; 11]).is_err());
        assert!(Storage::from_bytes(DType::F32, 3, vec![0u8; 12]).is_ok());
    }

    #[test]
    fn test_into_bytes() {
        let s = Storage::from_i32(&[1, 2]);
        let clone = s.clone();
        // two references: cannot reclaim
        assert!(clone.into_bytes().is_none());
        // last reference: bytes come back
        assert_eq!(s.into_bytes().unwrap().len(), 8);
    }
}

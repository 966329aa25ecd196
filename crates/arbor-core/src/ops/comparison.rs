//! Element-wise comparisons.
//!
//! Results are numeric 0/1 masks in f32; comparison nodes are
//! non-differentiable by convention, so no backward kernels exist here.

use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// Element-wise `self < other` as a 0/1 mask.
    pub fn lt(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| f32::from(a < b))
    }

    /// Element-wise `self <= other` as a 0/1 mask.
    pub fn le(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| f32::from(a <= b))
    }

    /// Element-wise `self > other` as a 0/1 mask.
    pub fn gt(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| f32::from(a > b))
    }

    /// Element-wise `self >= other` as a 0/1 mask.
    pub fn ge(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| f32::from(a >= b))
    }

    /// Element-wise `self == other` as a 0/1 mask.
    pub fn eq(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| f32::from(a == b))
    }

    /// Element-wise `self != other` as a 0/1 mask.
    pub fn ne(&self, other: &Tensor) -> Result<Tensor> {
        self.zip(other, |a, b| f32::from(a != b))
    }
}

#[cfg(test)]
mod tests {
    use crate::Tensor;

    #[test]
    fn test_comparisons() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0], &[3]);
        let b = Tensor::from_f32(&[2.0, 2.0, 2.0], &[3]);

        assert_eq!(a.lt(&b).unwrap().as_f32_slice().unwrap(), &[1.0, 0.0, 0.0]);
        assert_eq!(a.le(&b).unwrap().as_f32_slice().unwrap(), &[1.0, 1.0, 0.0]);
        assert_eq!(a.gt(&b).unwrap().as_f32_slice().unwrap(), &[0.0, 0.0, 1.0]);
        assert_eq!(a.ge(&b).unwrap().as_f32_slice().unwrap(), &[0.0, 1.0, 1.0]);
        assert_eq!(a.eq(&b).unwrap().as_f32_slice().unwrap(), &[0.0, 1.0, 0.0]);
        assert_eq!(a.ne(&b).unwrap().as_f32_slice().unwrap(), &[1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_comparison_broadcast() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0], &[3]);
        let zero = Tensor::scalar(0.0);
        let mask = a.gt(&zero).unwrap();
        assert_eq!(mask.shape().dims(), &[3]);
        assert_eq!(mask.as_f32_slice().unwrap(), &[1.0, 1.0, 1.0]);
    }
}

//! Leaf-node initializers.
//!
//! A constant or parameter node carries one of these and invokes it exactly
//! once, at its first forward evaluation, to fill its buffer. The engine
//! treats the fill as opaque; randomness draws from the owning graph's RNG
//! so a seeded graph is reproducible.

use arbor_core::{ArborError, DType, Result, Shape, Tensor};
use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone)]
pub enum Init {
    /// Fill from a flat f32 vector; the length must match the node's shape.
    FromF32(Vec<f32>),
    /// Fill from a flat i32 vector (index tensors).
    FromI32(Vec<i32>),
    /// Fill every element with one value.
    Fill(f32),
    Zeros,
    Ones,
    /// Uniform random values in `[lo, hi)`.
    Uniform { lo: f32, hi: f32 },
    /// Normally distributed random values.
    Normal { mean: f32, std: f32 },
    /// Inverted-dropout mask: 1/keep with probability `keep`, else 0.
    Bernoulli { keep: f32 },
}

/// Initialize from a vector of f32 values.
pub fn from_vec(values: Vec<f32>) -> Init {
    Init::FromF32(values)
}

/// Initialize from a vector of i32 values (for index tensors).
pub fn from_vec_i32(values: Vec<i32>) -> Init {
    Init::FromI32(values)
}

/// Fill with a single value.
pub fn fill(value: f32) -> Init {
    Init::Fill(value)
}

pub fn zeros() -> Init {
    Init::Zeros
}

pub fn ones() -> Init {
    Init::Ones
}

/// Uniform random values in `[lo, hi)`.
pub fn uniform(lo: f32, hi: f32) -> Init {
    Init::Uniform { lo, hi }
}

/// Normally distributed random values.
pub fn normal(mean: f32, std: f32) -> Init {
    Init::Normal { mean, std }
}

impl Init {
    /// Element count carried by data-backed initializers.
    pub(crate) fn data_len(&self) -> Option<usize> {
        match self {
            Init::FromF32(v) => Some(v.len()),
            Init::FromI32(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Whether this initializer can fill `numel` elements.
    pub(crate) fn len_matches(&self, numel: usize) -> bool {
        match self {
            Init::FromF32(v) => v.len() == numel,
            Init::FromI32(v) => v.len() == numel,
            _ => true,
        }
    }

    /// Produce the initial buffer for a leaf of the given shape and dtype.
    pub(crate) fn fill_tensor(
        &self,
        shape: &Shape,
        dtype: DType,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        let t = match self {
            Init::FromF32(v) => {
                if v.len() != shape.numel() {
                    return Err(ArborError::ShapeMismatch {
                        expected: vec![shape.numel()],
                        got: vec![v.len()],
                    });
                }
                Tensor::from_f32(v, shape.dims())
            }
            Init::FromI32(v) => {
                if v.len() != shape.numel() {
                    return Err(ArborError::ShapeMismatch {
                        expected: vec![shape.numel()],
                        got: vec![v.len()],
                    });
                }
                return Tensor::from_i32(v, shape.dims()).cast(dtype);
            }
            Init::Fill(value) => Tensor::full(shape, *value),
            Init::Zeros => return Ok(Tensor::zeros(shape, dtype)),
            Init::Ones => Tensor::ones(shape),
            Init::Uniform { lo, hi } => {
                let data: Vec<f32> =
                    (0..shape.numel()).map(|_| rng.gen_range(*lo..*hi)).collect();
                Tensor::from_f32(&data, shape.dims())
            }
            Init::Normal { mean, std } => {
                let dist = rand_distr::Normal::new(*mean, *std)
                    .map_err(|e| ArborError::Storage(format!("normal init: {e}")))?;
                let data: Vec<f32> = (0..shape.numel()).map(|_| rng.sample(dist)).collect();
                Tensor::from_f32(&data, shape.dims())
            }
            Init::Bernoulli { keep } => {
                let scale = 1.0 / keep;
                let data: Vec<f32> = (0..shape.numel())
                    .map(|_| if rng.gen::<f32>() < *keep { scale } else { 0.0 })
                    .collect();
                Tensor::from_f32(&data, shape.dims())
            }
        };
        t.cast(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_from_vec() {
        let t = from_vec(vec![1.0, 2.0, 3.0])
            .fill_tensor(&Shape::new(&[3]), DType::F32, &mut rng())
            .unwrap();
        assert_eq!(t.as_f32_slice().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_from_vec_len_mismatch() {
        let r = from_vec(vec![1.0]).fill_tensor(&Shape::new(&[3]), DType::F32, &mut rng());
        assert!(r.is_err());
    }

    #[test]
    fn test_fill_and_zeros() {
        let t = fill(2.5)
            .fill_tensor(&Shape::new(&[2, 2]), DType::F32, &mut rng())
            .unwrap();
        assert!(t.as_f32_slice().unwrap().iter().all(|&v| v == 2.5));

        let z = zeros()
            .fill_tensor(&Shape::new(&[4]), DType::I32, &mut rng())
            .unwrap();
        assert_eq!(z.as_i32_slice().unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_uniform_in_range() {
        let t = uniform(-1.0, 1.0)
            .fill_tensor(&Shape::new(&[100]), DType::F32, &mut rng())
            .unwrap();
        assert!(t
            .as_f32_slice()
            .unwrap()
            .iter()
            .all(|&v| (-1.0..1.0).contains(&v)));
    }

    #[test]
    fn test_bernoulli_values() {
        let t = Init::Bernoulli { keep: 0.5 }
            .fill_tensor(&Shape::new(&[200]), DType::F32, &mut rng())
            .unwrap();
        assert!(t
            .as_f32_slice()
            .unwrap()
            .iter()
            .all(|&v| v == 0.0 || v == 2.0));
    }

    #[test]
    fn test_indices() {
        let t = from_vec_i32(vec![0, 2])
            .fill_tensor(&Shape::new(&[2]), DType::I32, &mut rng())
            .unwrap();
        assert_eq!(t.as_i32_slice().unwrap(), &[0, 2]);
    }
}

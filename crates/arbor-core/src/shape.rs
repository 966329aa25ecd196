use smallvec::SmallVec;
use std::fmt;

/// Maximum rank a tensor shape may have.
pub const MAX_RANK: usize = 6;

/// Tensor shape with stack-allocated storage for ≤4 dimensions.
///
/// A rank-0 shape is a scalar with one element. Axis arguments throughout the
/// workspace are signed and may be negative (counted from the end); they are
/// resolved through [`Shape::normalize_axis`] before use.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    /// Create a new shape from dimension sizes.
    ///
    /// # Panics
    /// Panics if `dims` exceeds [`MAX_RANK`].
    pub fn new(dims: &[usize]) -> Self {
        assert!(
            dims.len() <= MAX_RANK,
            "shape rank {} exceeds maximum {}",
            dims.len(),
            MAX_RANK
        );
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Scalar shape (rank 0).
    pub fn scalar() -> Self {
        Self {
            dims: SmallVec::new(),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size of a specific (already normalized) axis.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Whether this is a scalar (rank 0).
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Resolve a possibly-negative axis index into `[0, ndim)`.
    pub fn normalize_axis(&self, axis: isize) -> Option<usize> {
        let ndim = self.ndim() as isize;
        let resolved = if axis < 0 { axis + ndim } else { axis };
        if resolved < 0 || resolved >= ndim {
            None
        } else {
            Some(resolved as usize)
        }
    }

    /// Row-major strides for a contiguous layout.
    pub fn contiguous_strides(&self) -> SmallVec<[usize; 4]> {
        let ndim = self.dims.len();
        if ndim == 0 {
            return SmallVec::new();
        }
        let mut strides = SmallVec::from_elem(0usize, ndim);
        strides[ndim - 1] = 1;
        for i in (0..ndim - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Broadcast this shape with another.
    ///
    /// Axes are right-aligned; a missing leading axis counts as size 1. Each
    /// axis pair must be equal or have one side exactly 1, and the result
    /// takes the larger size. Returns `None` if any axis pair is
    /// incompatible.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let max_ndim = self.ndim().max(other.ndim());
        let mut result: SmallVec<[usize; 4]> = SmallVec::with_capacity(max_ndim);

        for i in 0..max_ndim {
            let a = if i < self.ndim() {
                self.dims[self.ndim() - 1 - i]
            } else {
                1
            };
            let b = if i < other.ndim() {
                other.dims[other.ndim() - 1 - i]
            } else {
                1
            };

            if a == b {
                result.push(a);
            } else if a == 1 {
                result.push(b);
            } else if b == 1 {
                result.push(a);
            } else {
                return None;
            }
        }

        result.reverse();
        Some(Shape { dims: result })
    }

    /// Validate and compute a reshape target. At most one dimension may be
    /// -1 (inferred from the element count).
    pub fn resolve_reshape(&self, target: &[isize]) -> Option<Shape> {
        if target.len() > MAX_RANK {
            return None;
        }
        let numel = self.numel();
        let mut inferred_idx = None;
        let mut known_product: usize = 1;

        for (i, &d) in target.iter().enumerate() {
            if d == -1 {
                if inferred_idx.is_some() {
                    return None;
                }
                inferred_idx = Some(i);
            } else if d <= 0 {
                return None;
            } else {
                known_product = known_product.checked_mul(d as usize)?;
            }
        }

        let mut result: SmallVec<[usize; 4]> = target
            .iter()
            .map(|&d| if d == -1 { 0 } else { d as usize })
            .collect();

        if let Some(idx) = inferred_idx {
            if known_product == 0 || numel % known_product != 0 {
                return None;
            }
            result[idx] = numel / known_product;
        }

        let shape = Shape { dims: result };
        if shape.numel() != numel {
            return None;
        }
        Some(shape)
    }

    /// Shape after permuting axes so that output axis `i` is input axis
    /// `perm[i]`. Returns `None` unless `perm` is a permutation of `0..ndim`.
    pub fn permute(&self, perm: &[usize]) -> Option<Shape> {
        if perm.len() != self.ndim() {
            return None;
        }
        let mut seen = [false; MAX_RANK];
        for &p in perm {
            if p >= self.ndim() || seen[p] {
                return None;
            }
            seen[p] = true;
        }
        Some(Shape {
            dims: perm.iter().map(|&p| self.dims[p]).collect(),
        })
    }

    /// Shape with the last two axes swapped.
    pub fn transpose(&self) -> Option<Shape> {
        if self.ndim() < 2 {
            return None;
        }
        let mut dims = self.dims.clone();
        let n = dims.len();
        dims.swap(n - 2, n - 1);
        Some(Shape { dims })
    }

    /// Shape with `axis` replaced by `size`.
    pub fn with_dim(&self, axis: usize, size: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims[axis] = size;
        Shape { dims }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(&dims)
    }
}

macro_rules! impl_shape_from_array {
    ($($n:expr),*) => {
        $(
            impl From<[usize; $n]> for Shape {
                fn from(dims: [usize; $n]) -> Self {
                    Shape::new(&dims)
                }
            }
        )*
    };
}

impl_shape_from_array!(0, 1, 2, 3, 4, 5, 6);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let s = Shape::scalar();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert!(s.is_scalar());
    }

    #[test]
    fn test_basic() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.dim(1), Some(3));
        assert_eq!(s.dim(3), None);
    }

    #[test]
    fn test_normalize_axis() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.normalize_axis(0), Some(0));
        assert_eq!(s.normalize_axis(2), Some(2));
        assert_eq!(s.normalize_axis(-1), Some(2));
        assert_eq!(s.normalize_axis(-3), Some(0));
        assert_eq!(s.normalize_axis(3), None);
        assert_eq!(s.normalize_axis(-4), None);
    }

    #[test]
    fn test_strides() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.contiguous_strides().as_slice(), &[12, 4, 1]);
    }

    #[test]
    fn test_broadcast() {
        let a = Shape::new(&[3, 1]);
        let b = Shape::new(&[1, 4]);
        assert_eq!(a.broadcast_with(&b).unwrap().dims(), &[3, 4]);

        let a = Shape::new(&[2, 3]);
        let b = Shape::new(&[3]);
        assert_eq!(a.broadcast_with(&b).unwrap().dims(), &[2, 3]);

        let a = Shape::new(&[2, 3]);
        let b = Shape::new(&[4, 3]);
        assert!(a.broadcast_with(&b).is_none());

        // scalars broadcast against anything
        let a = Shape::scalar();
        let b = Shape::new(&[5, 2]);
        assert_eq!(a.broadcast_with(&b).unwrap().dims(), &[5, 2]);
    }

    #[test]
    fn test_broadcast_symmetry() {
        let shapes = [
            Shape::scalar(),
            Shape::new(&[1]),
            Shape::new(&[4]),
            Shape::new(&[2, 1]),
            Shape::new(&[2, 4]),
            Shape::new(&[1, 2, 4]),
        ];
        for a in &shapes {
            for b in &shapes {
                let ab = a.broadcast_with(b);
                let ba = b.broadcast_with(a);
                assert_eq!(ab, ba, "broadcast not symmetric for {a} and {b}");
            }
        }
    }

    #[test]
    fn test_broadcast_associativity() {
        let a = Shape::new(&[2, 1]);
        let b = Shape::new(&[1, 4]);
        let c = Shape::new(&[3, 1, 1]);
        let left = a.broadcast_with(&b).unwrap().broadcast_with(&c).unwrap();
        let right = b.broadcast_with(&c).unwrap().broadcast_with(&a).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.dims(), &[3, 2, 4]);
    }

    #[test]
    fn test_reshape() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.resolve_reshape(&[6, 4]).unwrap().dims(), &[6, 4]);
        assert_eq!(s.resolve_reshape(&[-1, 4]).unwrap().dims(), &[6, 4]);
        assert_eq!(s.resolve_reshape(&[2, -1]).unwrap().dims(), &[2, 12]);
        assert!(s.resolve_reshape(&[-1, -1]).is_none());
        assert!(s.resolve_reshape(&[5, 5]).is_none());
    }

    #[test]
    fn test_permute() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.permute(&[2, 0, 1]).unwrap().dims(), &[4, 2, 3]);
        assert!(s.permute(&[0, 0, 1]).is_none());
        assert!(s.permute(&[0, 1]).is_none());
    }

    #[test]
    fn test_transpose() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.transpose().unwrap().dims(), &[2, 4, 3]);
        assert!(Shape::new(&[5]).transpose().is_none());
    }
}

use std::fmt;

/// Element types supported by Arbor tensors.
///
/// The CPU kernel set is f32-centric; the remaining types exist so that graphs
/// can carry index tensors and casts, and so that promotion has a full table
/// to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 16-bit IEEE 754 half-precision float
    F16,
    /// 16-bit Brain Float (f32 exponent range, reduced mantissa)
    BF16,
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 64-bit IEEE 754 double-precision float
    F64,
    /// 8-bit unsigned integer
    U8,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 => 1,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.element_size() * n
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Whether this dtype is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, DType::U8 | DType::I32 | DType::I64)
    }
}

/// Result element type of a binary operation over `lhs` and `rhs`.
///
/// Identical types pass through. Mixed float widths widen (the half formats
/// have no common sub-f32 representation, so `F16 ⊕ BF16` widens to `F32`).
/// Mixed integer widths widen to the larger signed type. There is no implicit
/// integer↔float promotion: values would silently change representation, so
/// callers must `cast` explicitly first.
pub fn promote(lhs: DType, rhs: DType) -> Option<DType> {
    use DType::*;
    if lhs == rhs {
        return Some(lhs);
    }
    match (lhs, rhs) {
        (F16, BF16) | (BF16, F16) => Some(F32),
        (F64, F16 | BF16 | F32) | (F16 | BF16 | F32, F64) => Some(F64),
        (F32, F16 | BF16) | (F16 | BF16, F32) => Some(F32),
        (I64, U8 | I32) | (U8 | I32, I64) => Some(I64),
        (I32, U8) | (U8, I32) => Some(I32),
        _ => None,
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::U8 => write!(f, "u8"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(DType::F32.element_size(), 4);
        assert_eq!(DType::F64.element_size(), 8);
        assert_eq!(DType::F16.element_size(), 2);
        assert_eq!(DType::U8.element_size(), 1);
        assert_eq!(DType::I64.storage_bytes(3), 24);
    }

    #[test]
    fn test_categories() {
        assert!(DType::F32.is_float());
        assert!(!DType::F32.is_integer());
        assert!(DType::I32.is_integer());
        assert!(DType::BF16.is_float());
    }

    #[test]
    fn test_promotion_identity() {
        for dt in [
            DType::F16,
            DType::BF16,
            DType::F32,
            DType::F64,
            DType::U8,
            DType::I32,
            DType::I64,
        ] {
            assert_eq!(promote(dt, dt), Some(dt));
        }
    }

    #[test]
    fn test_promotion_widening() {
        assert_eq!(promote(DType::F32, DType::F64), Some(DType::F64));
        assert_eq!(promote(DType::F16, DType::F32), Some(DType::F32));
        assert_eq!(promote(DType::F16, DType::BF16), Some(DType::F32));
        assert_eq!(promote(DType::U8, DType::I32), Some(DType::I32));
        assert_eq!(promote(DType::I32, DType::I64), Some(DType::I64));
    }

    #[test]
    fn test_promotion_symmetry() {
        let all = [
            DType::F16,
            DType::BF16,
            DType::F32,
            DType::F64,
            DType::U8,
            DType::I32,
            DType::I64,
        ];
        for a in all {
            for b in all {
                assert_eq!(promote(a, b), promote(b, a));
            }
        }
    }

    #[test]
    fn test_no_int_float_promotion() {
        assert_eq!(promote(DType::I32, DType::F32), None);
        assert_eq!(promote(DType::F64, DType::U8), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", DType::F32), "f32");
        assert_eq!(format!("{}", DType::I64), "i64");
    }
}

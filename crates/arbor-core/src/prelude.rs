//! Convenience re-exports for common arbor-core types.
//!
//! ```rust
//! use arbor_core::prelude::*;
//! ```

pub use crate::ArborError;
pub use crate::DType;
pub use crate::Device;
pub use crate::Result;
pub use crate::Shape;
pub use crate::Storage;
pub use crate::Tensor;

//! # arbor-core
//!
//! Tensor-buffer foundation for the Arbor expression-graph engine.
//!
//! Provides:
//! - `Shape` with broadcasting and negative-axis normalization
//! - `DType` with explicit promotion rules (no silent truncation)
//! - `Storage`: reference-counted byte buffers
//! - `BufferPool`: recycling allocator for large buffers
//! - `Tensor`: a contiguous n-dimensional buffer with shape and dtype
//! - CPU kernels for arithmetic, reductions, comparisons, indexing and pooling

pub mod device;
pub mod dtype;
pub mod error;
pub mod ops;
pub mod pool;
pub mod prelude;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use device::Device;
pub use dtype::DType;
pub use error::ArborError;
pub use pool::{BufferPool, PoolMetrics};
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, ArborError>;

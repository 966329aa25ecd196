//! # arbor-graph
//!
//! Computation-graph engine with reverse-mode automatic differentiation.
//!
//! Every operator factory in [`ops`] records one node in a [`Graph`] and
//! returns a shared [`Expr`] handle instead of computing immediately.
//! [`Graph::evaluate`] then runs one lazy forward pass in creation order
//! over the target's dependency closure, and [`Graph::backward`] propagates
//! gradients in reverse creation order, accumulating contributions from
//! every consumer. Nodes marked via [`ops::checkpoint`] trade memory for
//! recomputation: their forward buffers are released after the last
//! consumer reads them and transparently rebuilt when backward needs them.
//!
//! ```
//! use arbor_graph::{inits, ops, Graph};
//! use arbor_core::DType;
//!
//! let graph = Graph::with_seed(1);
//! let w = graph.param("w", [2, 2], inits::uniform(-0.1, 0.1)).unwrap();
//! let x = graph
//!     .constant([2, 2], DType::F32, inits::from_vec(vec![1.0, 2.0, 3.0, 4.0]))
//!     .unwrap();
//! let loss = ops::sum(&ops::sum(&ops::mul(&w, &x).unwrap(), 0).unwrap(), 1).unwrap();
//!
//! graph.evaluate(&loss).unwrap();
//! graph.backward(&loss).unwrap();
//! assert_eq!(
//!     w.grad().unwrap().as_f32_slice().unwrap(),
//!     &[1.0, 2.0, 3.0, 4.0]
//! );
//! ```

pub mod backward;
pub mod checkpoint;
pub mod expr;
pub mod forward;
pub mod graph;
pub mod inits;
pub mod kind;
pub mod node;
pub mod ops;

pub use expr::{Expr, Expr2};
pub use graph::Graph;
pub use kind::{CmpOp, Kind, ReduceOp};
pub use node::Node;

pub use arbor_core::{ArborError, DType, Device, Result, Shape, Tensor};

//! Differentiable simulation parameters.
//!
//! A [`Parameter`] is a shape-fixed constant of a finite-element simulation.
//! Its reassignments are recorded on an explicit [`Tape`] as
//! [`AssignBlock`]s so that adjoint, tangent-linear and Hessian sweeps see
//! them, and it supplies the vector arithmetic and checkpointing those
//! sweeps need.
//!
//! ```
//! use param_adjoint::{Assignable, Parameter, Tape};
//!
//! let mut tape = Tape::new();
//! let mut c = Parameter::from_vec(vec![1.0, 2.0]);
//! c.assign([3.0, 4.0], Some(&mut tape)).unwrap();
//! assert_eq!(tape.len(), 1);
//! assert_eq!(c.to_list(), vec![3.0, 4.0]);
//! ```

pub mod block;
pub mod checkpoint;
pub mod error;
pub mod float;
pub mod gather;
pub mod parameter;
pub mod source;
pub mod space;
pub mod tape;

#[cfg(feature = "serde")]
mod serde_support;

pub use block::{AssignBlock, Block, BlockState};
pub use checkpoint::Checkpoint;
pub use error::{Error, Result};
pub use float::Float;
pub use gather::{Gather, PartitionedVector};
pub use parameter::{Assignable, Parameter, ParameterOptions};
pub use source::Source;
pub use space::{Cell, Element, Family, FunctionSpace, Mesh, MeshInfo};
pub use tape::{BlockId, BlockVariable, Tape, TapeMark, VarHandle, VarId};

/// Parameter over `f64`.
pub type Parameter64 = Parameter<f64>;
/// Parameter over `f32`.
pub type Parameter32 = Parameter<f32>;

//! Named on-disk checkpoints for [`param_adjoint::Parameter`]s.
//!
//! A checkpoint file stores meshes, function spaces and functions under
//! string names. Parameters are saved against a mesh and loaded back by
//! `(name, mesh_name)`, independently of how their values were partitioned
//! when they were written.

pub mod error;
pub mod file;

pub use error::{CheckpointError, Result};
pub use file::{CheckpointFile, FileMode};

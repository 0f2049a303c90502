//! Error types for parameter assignment and tape bookkeeping.

use thiserror::Error;

use crate::tape::{BlockId, VarId};

#[derive(Error, Debug)]
/// Error variants for parameter and tape operations.
pub enum Error {
    #[error("shape mismatch: expected {expected} values for shape {shape:?}, found {found}")]
    /// A value array could not be reshaped into the parameter's shape.
    ShapeMismatch {
        /// Target shape.
        shape: Vec<usize>,
        /// Element count of the target shape.
        expected: usize,
        /// Element count of the supplied values.
        found: usize,
    },
    #[error("flat buffer too short: need {needed} values from offset {offset}, buffer has {len}")]
    /// A flat buffer ran out before the parameter was filled.
    OutOfBounds {
        /// Offset into the buffer.
        offset: usize,
        /// Values required from `offset`.
        needed: usize,
        /// Buffer length.
        len: usize,
    },
    #[error("parameter has no block variable on this tape")]
    /// The parameter was never registered on the tape.
    NotOnTape,
    #[error("unknown tape variable {0:?}")]
    /// A variable index outside the tape.
    UnknownVariable(VarId),
    #[error("unknown block {0:?}")]
    /// A block index outside the tape.
    UnknownBlock(BlockId),
    #[error("tape variable {0:?} has no checkpoint")]
    /// Recompute reached a variable without a saved value.
    MissingCheckpoint(VarId),
    #[error(transparent)]
    /// Propagated from `ndarray`.
    Shape(#[from] ndarray::ShapeError),
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

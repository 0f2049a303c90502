use std::path::PathBuf;

use param_adjoint::Cell;
use thiserror::Error;

/// Errors raised while reading or writing a checkpoint file.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed checkpoint file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Parameter(#[from] param_adjoint::Error),
    #[error("checkpoint file {0} was opened read-only")]
    ReadOnly(PathBuf),
    #[error("only named parameters can be saved")]
    Unnamed,
    #[error("no mesh named {0:?} in checkpoint")]
    MissingMesh(String),
    #[error("no function named {name:?} on mesh {mesh:?}")]
    MissingFunction { mesh: String, name: String },
    #[error("function {name:?} refers to unknown function space {space:?}")]
    MissingSpace { name: String, space: String },
    #[error("mesh {mesh:?} was saved with cell {saved}, not {given}")]
    CellMismatch { mesh: String, saved: Cell, given: Cell },
    #[error("value cannot be represented in the requested float type")]
    Conversion,
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

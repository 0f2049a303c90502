//! Value snapshots used for recomputation.
//!
//! A [`Checkpoint`] stores a full copy of a parameter's values, never a delta,
//! so any tape position can be rebuilt from it without replaying upstream
//! blocks.

use ndarray::ArrayD;

use crate::float::Float;
use crate::parameter::Parameter;

/// Snapshot of a parameter's values at one tape position.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint<F: Float> {
    values: ArrayD<F>,
}

impl<F: Float> Checkpoint<F> {
    pub(crate) fn new(values: ArrayD<F>) -> Self {
        Checkpoint { values }
    }

    /// The saved values, in the shape they were taken with.
    pub fn values(&self) -> &ArrayD<F> {
        &self.values
    }

    /// Shape of the saved values.
    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    /// Consume the checkpoint, returning its values.
    pub fn into_values(self) -> ArrayD<F> {
        self.values
    }

    /// Rebuild a parameter holding the saved values. The result has no tape identity.
    pub fn to_parameter(&self) -> Parameter<F> {
        Parameter::new(self.values.clone())
    }
}

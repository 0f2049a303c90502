//! Operation records ("blocks") stored on a [`Tape`](crate::Tape).
//!
//! A block knows its dependencies and outputs by [`VarId`] and answers the
//! sweeps with per-component derivative contributions. User code can add
//! its own operations by implementing [`Block`].

use std::fmt::Debug;

use ndarray::ArrayD;

use crate::error::Result;
use crate::float::Float;
use crate::parameter::reshape;
use crate::tape::VarId;

/// Lifecycle of an operation record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// No dependency bound yet.
    Created,
    /// Dependencies bound, the recorded mutation has not committed.
    InputBound,
    /// The mutation committed and its result is attached.
    OutputBound,
}

/// A recorded operation.
///
/// `inputs` passed to every method are the dependency snapshots, in
/// dependency order. Derivative inputs are `None` where no sensitivity
/// reached that position; returning `None` means "no contribution".
pub trait Block<F: Float>: Debug {
    /// Variables this operation reads.
    fn dependencies(&self) -> &[VarId];

    /// Variables this operation produced.
    fn outputs(&self) -> &[VarId];

    /// Attach a produced variable. Called by [`Tape::add_output`](crate::Tape::add_output).
    fn add_output(&mut self, output: VarId);

    /// Contribution to the adjoint of dependency `idx`.
    fn evaluate_adj_component(
        &self,
        inputs: &[ArrayD<F>],
        adj_inputs: &[Option<ArrayD<F>>],
        idx: usize,
    ) -> Option<ArrayD<F>>;

    /// Tangent of output `idx`, whose values have `output_shape`.
    fn evaluate_tlm_component(
        &self,
        inputs: &[ArrayD<F>],
        tlm_inputs: &[Option<ArrayD<F>>],
        output_shape: &[usize],
        idx: usize,
    ) -> Option<ArrayD<F>>;

    /// Second-order contribution to dependency `idx`.
    fn evaluate_hessian_component(
        &self,
        inputs: &[ArrayD<F>],
        hessian_inputs: &[Option<ArrayD<F>>],
        adj_inputs: &[Option<ArrayD<F>>],
        idx: usize,
    ) -> Option<ArrayD<F>>;

    /// Recompute output `idx` from `inputs`, producing values of `output_shape`.
    fn recompute_component(
        &self,
        inputs: &[ArrayD<F>],
        output_shape: &[usize],
        idx: usize,
    ) -> Result<ArrayD<F>>;

    /// Where this record is in its lifecycle.
    fn state(&self) -> BlockState {
        if self.dependencies().is_empty() {
            BlockState::Created
        } else if self.outputs().is_empty() {
            BlockState::InputBound
        } else {
            BlockState::OutputBound
        }
    }
}

/// Record of `parameter <- source`.
///
/// Assignment is the identity map on values, so every derivative rule is a
/// pass-through of the single incoming quantity.
#[derive(Clone, Debug)]
pub struct AssignBlock {
    dependencies: [VarId; 1],
    outputs: Vec<VarId>,
}

impl AssignBlock {
    /// Record an assignment reading `source`.
    pub fn new(source: VarId) -> Self {
        AssignBlock {
            dependencies: [source],
            outputs: Vec::with_capacity(1),
        }
    }

    /// The recorded source variable.
    pub fn source(&self) -> VarId {
        self.dependencies[0]
    }

    /// The committed result, once attached.
    pub fn output(&self) -> Option<VarId> {
        self.outputs.first().copied()
    }
}

/// Lay `value` out in `shape` when the element counts agree.
fn pass_through<F: Float>(value: &Option<ArrayD<F>>, shape: Option<&[usize]>) -> Option<ArrayD<F>> {
    let value = value.as_ref()?;
    match shape {
        Some(shape) if shape != value.shape() => reshape(value.iter().copied(), shape).ok(),
        _ => Some(value.clone()),
    }
}

impl<F: Float> Block<F> for AssignBlock {
    fn dependencies(&self) -> &[VarId] {
        &self.dependencies
    }

    fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    fn add_output(&mut self, output: VarId) {
        debug_assert!(self.outputs.is_empty(), "assignment has a single output");
        self.outputs.push(output);
    }

    fn evaluate_adj_component(
        &self,
        inputs: &[ArrayD<F>],
        adj_inputs: &[Option<ArrayD<F>>],
        idx: usize,
    ) -> Option<ArrayD<F>> {
        pass_through(adj_inputs.first()?, inputs.get(idx).map(|a| a.shape()))
    }

    fn evaluate_tlm_component(
        &self,
        _inputs: &[ArrayD<F>],
        tlm_inputs: &[Option<ArrayD<F>>],
        output_shape: &[usize],
        _idx: usize,
    ) -> Option<ArrayD<F>> {
        pass_through(tlm_inputs.first()?, Some(output_shape))
    }

    fn evaluate_hessian_component(
        &self,
        inputs: &[ArrayD<F>],
        hessian_inputs: &[Option<ArrayD<F>>],
        _adj_inputs: &[Option<ArrayD<F>>],
        idx: usize,
    ) -> Option<ArrayD<F>> {
        pass_through(hessian_inputs.first()?, inputs.get(idx).map(|a| a.shape()))
    }

    fn recompute_component(
        &self,
        inputs: &[ArrayD<F>],
        output_shape: &[usize],
        _idx: usize,
    ) -> Result<ArrayD<F>> {
        let source = inputs.first().map(|a| a.iter().copied().collect::<Vec<_>>());
        reshape(source.unwrap_or_default(), output_shape)
    }
}

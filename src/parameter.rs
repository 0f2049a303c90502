//! Differentiable simulation parameters.
//!
//! A [`Parameter`] is a shape-fixed constant whose reassignments can be
//! recorded on a [`Tape`] as [`AssignBlock`]s. It also provides the vector
//! arithmetic, checkpointing and derivative conversion the tape sweeps
//! consume.

use std::cell::Cell;

use ndarray::{ArrayD, IxDyn};
use tracing::{debug, trace};

use crate::block::AssignBlock;
use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::float::Float;
use crate::gather::Gather;
use crate::source::Source;
use crate::space::{Element, FunctionSpace, Mesh};
use crate::tape::{Tape, VarHandle, VarId};

/// Lay `values` out in `shape`, failing if the element counts differ.
pub(crate) fn reshape<F: Float>(values: impl IntoIterator<Item = F>, shape: &[usize]) -> Result<ArrayD<F>> {
    let flat: Vec<F> = values.into_iter().collect();
    let expected: usize = shape.iter().product();
    if flat.len() != expected {
        return Err(Error::ShapeMismatch {
            shape: shape.to_vec(),
            expected,
            found: flat.len(),
        });
    }
    Ok(ArrayD::from_shape_vec(IxDyn(shape), flat)?)
}

/// Tape-bookkeeping options consumed at construction.
#[derive(Clone, Debug)]
pub struct ParameterOptions {
    /// Optional name, required for saving to a checkpoint file.
    pub name: Option<String>,
    /// Not yet tied to a concrete tape position. Carried for callers; the
    /// tape never consults it.
    pub floating: bool,
    /// Default recording policy for this parameter's assignments.
    /// `false` disables recording regardless of the tape's policy unless
    /// a call overrides it explicitly.
    pub annotate: bool,
    /// Bind the new parameter to an existing tape variable, see [`Tape::handle`].
    pub block_variable: Option<VarHandle>,
}

impl Default for ParameterOptions {
    fn default() -> Self {
        ParameterOptions {
            name: None,
            floating: false,
            annotate: true,
            block_variable: None,
        }
    }
}

/// Capability to take a new value, optionally recording it on a tape.
pub trait Assignable<F: Float> {
    /// Assign `source`. Recording happens when `tape` is supplied and
    /// `annotate` (or, when `None`, the ambient policy) allows it.
    fn assign_with(
        &mut self,
        source: Source<'_, F>,
        tape: Option<&mut Tape<F>>,
        annotate: Option<bool>,
    ) -> Result<()>;

    /// Assign under the ambient recording policy.
    fn assign<'a>(&mut self, source: impl Into<Source<'a, F>>, tape: Option<&mut Tape<F>>) -> Result<()>
    where
        F: 'a,
    {
        self.assign_with(source.into(), tape, None)
    }
}

/// A named, shape-fixed simulation constant eligible for differentiation.
#[derive(Debug)]
pub struct Parameter<F: Float> {
    values: ArrayD<F>,
    name: Option<String>,
    block_variable: Cell<Option<VarHandle>>,
    original_block_variable: Cell<Option<VarHandle>>,
    floating: bool,
    annotate: bool,
}

impl<F: Float> Parameter<F> {
    /// Create a parameter holding `values`. Its shape is fixed from here on.
    pub fn new(values: ArrayD<F>) -> Self {
        Self::with_options(values, ParameterOptions::default())
    }

    /// Create a parameter with explicit tape-bookkeeping options.
    pub fn with_options(values: ArrayD<F>, options: ParameterOptions) -> Self {
        Parameter {
            values,
            name: options.name,
            block_variable: Cell::new(options.block_variable),
            original_block_variable: Cell::new(options.block_variable),
            floating: options.floating,
            annotate: options.annotate,
        }
    }

    /// Zero-dimensional parameter.
    pub fn scalar(value: F) -> Self {
        Self::new(ndarray::arr0(value).into_dyn())
    }

    /// One-dimensional parameter.
    pub fn from_vec(values: Vec<F>) -> Self {
        Self::new(ndarray::Array1::from_vec(values).into_dyn())
    }

    /// Parameter of `shape` filled row-major from `values`.
    pub fn from_shape_vec(shape: &[usize], values: Vec<F>) -> Result<Self> {
        Ok(Self::new(reshape(values, shape)?))
    }

    /// A parameter of this shape holding `values`, or a copy of these values
    /// when `values` is `None`. The result has no tape identity.
    pub fn new_like(&self, values: Option<&[F]>) -> Result<Self> {
        let values = match values {
            Some(v) => reshape(v.iter().copied(), self.shape())?,
            None => self.values.clone(),
        };
        Ok(Parameter::new(values))
    }

    fn with_flat(&self, flat: Vec<F>) -> Result<Self> {
        Ok(Parameter::new(reshape(flat, self.shape())?))
    }

    pub fn values(&self) -> &ArrayD<F> {
        &self.values
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set or clear the name.
    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    /// Value of [`ParameterOptions::floating`].
    pub fn is_floating(&self) -> bool {
        self.floating
    }

    /// Total element count.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Flattened values.
    pub fn to_list(&self) -> Vec<F> {
        self.values.iter().copied().collect()
    }

    /// Tape variable last issued to this parameter, if any. The index is not
    /// checked against a tape; see [`block_variable_on`](Self::block_variable_on).
    pub fn current_block_variable(&self) -> Option<VarId> {
        self.block_variable.get().map(VarHandle::var)
    }

    /// Tape variable the parameter was first registered as.
    pub fn original_block_variable(&self) -> Option<VarId> {
        self.original_block_variable.get().map(VarHandle::var)
    }

    /// Current tape variable if it is live on `tape`.
    pub fn block_variable_on(&self, tape: &Tape<F>) -> Option<VarId> {
        self.block_variable.get().and_then(|h| tape.resolve(h))
    }

    /// Current tape variable, registering the present values as a leaf when
    /// the parameter has no live variable on `tape`.
    pub fn block_variable(&self, tape: &mut Tape<F>) -> VarId {
        if let Some(id) = self.block_variable_on(tape) {
            return id;
        }
        let id = tape.new_variable(&self.values);
        trace!(var = id.index(), name = ?self.name, "parameter registered on tape");
        self.bind(tape, id);
        id
    }

    /// Make `id` the current variable. The original variable moves along
    /// when the old one is no longer live on `tape`.
    fn bind(&self, tape: &Tape<F>, id: VarId) {
        let Some(handle) = tape.handle(id) else {
            return;
        };
        self.block_variable.set(Some(handle));
        let original_live = self
            .original_block_variable
            .get()
            .and_then(|h| tape.resolve(h))
            .is_some();
        if !original_live {
            self.original_block_variable.set(Some(handle));
        }
    }

    fn commit(&mut self, flat: Vec<F>) -> Result<()> {
        self.values = reshape(flat, self.shape())?;
        Ok(())
    }

    // ── Vector arithmetic ──

    /// Element-wise sum.
    pub fn add(&self, other: &Parameter<F>) -> Result<Self> {
        let flat = self.zip_values(other, |a, b| a + b)?;
        self.with_flat(flat)
    }

    /// Scalar multiple.
    pub fn mul(&self, scalar: F) -> Self {
        Parameter::new(self.values.mapv(|v| v * scalar))
    }

    /// Sum of element-wise products.
    pub fn dot(&self, other: &Parameter<F>) -> Result<F> {
        Ok(self
            .zip_values(other, |a, b| a * b)?
            .into_iter()
            .fold(F::zero(), |acc, v| acc + v))
    }

    /// Independent copy with the same shape, values and name, but no tape identity.
    pub fn copy(&self) -> Self {
        Parameter {
            values: self.values.clone(),
            name: self.name.clone(),
            block_variable: Cell::new(None),
            original_block_variable: Cell::new(None),
            floating: self.floating,
            annotate: self.annotate,
        }
    }

    /// `self += other`, committed through the assignment path.
    pub fn iadd(&mut self, other: &Parameter<F>, tape: Option<&mut Tape<F>>) -> Result<()> {
        let sum = self.add(other)?;
        self.assign(sum.values, tape)
    }

    /// `self *= scalar`, committed through the assignment path.
    pub fn imul(&mut self, scalar: F, tape: Option<&mut Tape<F>>) -> Result<()> {
        let scaled = self.mul(scalar);
        self.assign(scaled.values, tape)
    }

    /// Fold `f` over the flattened values.
    pub fn reduce<R>(&self, mut f: impl FnMut(F, R) -> R, r0: R) -> R {
        self.values.iter().fold(r0, |acc, &v| f(v, acc))
    }

    /// Replace every value `v` with `f(v)`, committed through the assignment path.
    pub fn apply_unary(&mut self, f: impl Fn(F) -> F, tape: Option<&mut Tape<F>>) -> Result<()> {
        let mapped = self.values.mapv(f);
        self.assign(mapped, tape)
    }

    /// Replace every value `v` with `f(v, w)` where `w` is the matching value
    /// of `other`, committed through the assignment path.
    pub fn apply_binary(
        &mut self,
        f: impl Fn(F, F) -> F,
        other: &Parameter<F>,
        tape: Option<&mut Tape<F>>,
    ) -> Result<()> {
        let flat = self.zip_values(other, f)?;
        let mapped = reshape(flat, self.shape())?;
        self.assign(mapped, tape)
    }

    /// Fill the parameter from `src[offset..offset + dim()]` through the
    /// assignment path and return the offset just past the consumed values.
    pub fn assign_from_slice(
        &mut self,
        src: &[F],
        offset: usize,
        tape: Option<&mut Tape<F>>,
    ) -> Result<usize> {
        let out_of_bounds = Error::OutOfBounds {
            offset,
            needed: self.dim(),
            len: src.len(),
        };
        let end = match offset.checked_add(self.dim()) {
            Some(end) => end,
            None => return Err(out_of_bounds),
        };
        let chunk = src.get(offset..end).ok_or(out_of_bounds)?;
        let values = reshape(chunk.iter().copied(), self.shape())?;
        self.assign(values, tape)?;
        Ok(end)
    }

    fn zip_values(&self, other: &Parameter<F>, f: impl Fn(F, F) -> F) -> Result<Vec<F>> {
        if other.dim() != self.dim() {
            return Err(Error::ShapeMismatch {
                shape: self.shape().to_vec(),
                expected: self.dim(),
                found: other.dim(),
            });
        }
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| f(a, b))
            .collect())
    }

    // ── Checkpointing and derivative conversion ──

    /// Snapshot of the current values, unaffected by later mutation.
    pub fn create_checkpoint(&self) -> Checkpoint<F> {
        Checkpoint::new(self.values.clone())
    }

    /// Checkpoints are full values, so restoring hands the snapshot back unchanged.
    pub fn restore_at_checkpoint(&self, checkpoint: Checkpoint<F>) -> Checkpoint<F> {
        checkpoint
    }

    /// Turn a raw derivative quantity into a parameter of this shape.
    /// `None` means no contribution and yields zeros.
    pub fn convert_type(&self, value: Option<&dyn Gather<F>>) -> Result<Self> {
        match value {
            None => Ok(Parameter::new(ArrayD::zeros(IxDyn(self.shape())))),
            Some(v) => self.with_flat(v.gather()),
        }
    }

    /// Adjoint accumulated at this parameter's current tape position.
    pub fn get_derivative(&self, tape: &Tape<F>) -> Result<Self> {
        let id = self.block_variable_on(tape).ok_or(Error::NotOnTape)?;
        let var = tape.variable(id).ok_or(Error::UnknownVariable(id))?;
        self.convert_type(var.adj_value().map(|a| a as &dyn Gather<F>))
    }

    /// Overwrite the snapshot at this parameter's original tape position with
    /// `value`'s current values, bypassing the recorded assignment path.
    pub fn adj_update_value(&self, value: &Parameter<F>, tape: &mut Tape<F>) -> Result<()> {
        let id = self
            .original_block_variable
            .get()
            .and_then(|h| tape.resolve(h))
            .ok_or(Error::NotOnTape)?;
        if value.dim() != self.dim() {
            return Err(Error::ShapeMismatch {
                shape: self.shape().to_vec(),
                expected: self.dim(),
                found: value.dim(),
            });
        }
        let var = tape.variable_mut(id).ok_or(Error::UnknownVariable(id))?;
        var.set_checkpoint(value.create_checkpoint());
        Ok(())
    }

    // ── Function spaces ──

    /// The real, degree-zero element carrying this parameter's shape.
    pub fn ufl_element(&self) -> Element {
        Element::real(self.shape())
    }

    /// This parameter's function space reinterpreted on `mesh`.
    pub fn function_space(&self, mesh: &impl Mesh) -> FunctionSpace {
        FunctionSpace::new(mesh, self.ufl_element().reconstruct(mesh.cell()))
    }
}

impl<F: Float> Clone for Parameter<F> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<F: Float> Assignable<F> for Parameter<F> {
    fn assign_with(
        &mut self,
        source: Source<'_, F>,
        tape: Option<&mut Tape<F>>,
        annotate: Option<bool>,
    ) -> Result<()> {
        if source.len() != self.dim() {
            return Err(Error::ShapeMismatch {
                shape: self.shape().to_vec(),
                expected: self.dim(),
                found: source.len(),
            });
        }
        let policy = annotate.or((!self.annotate).then_some(false));
        let mut recorder = tape.filter(|t| t.annotate_tape(policy));

        let pending = match recorder.as_deref_mut() {
            Some(tape) => {
                let dependency = source.dependency(tape);
                let mark = tape.mark();
                let block = tape.add_block(Box::new(AssignBlock::new(dependency)));
                Some((mark, block))
            }
            None => None,
        };

        let committed = self.commit(source.flat_values());

        match (recorder, pending) {
            (Some(tape), Some((mark, block))) => match committed {
                Ok(()) => {
                    let output = tape.add_output(block, &self.values)?;
                    self.bind(tape, output);
                    trace!(block = block.index(), output = output.index(), "assignment recorded");
                    Ok(())
                }
                Err(e) => {
                    debug!(error = %e, "assignment failed, discarding its block");
                    tape.rollback(mark);
                    Err(e)
                }
            },
            _ => {
                if committed.is_ok() && self.block_variable.take().is_some() {
                    trace!(name = ?self.name, "unrecorded assignment detached parameter from tape");
                }
                committed
            }
        }
    }
}

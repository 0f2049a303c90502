//! Block tape for parameter-level sensitivities.
//!
//! Each recorded operation is a [`Block`] whose dependencies and outputs are
//! [`BlockVariable`]s. A block variable holds the snapshot of a value at one
//! tape position together with the adjoint, tangent and Hessian quantities
//! the sweeps accumulate into it.
//!
//! The tape is an explicit context object. Nothing in this crate keeps a
//! process-wide tape: callers that want recording pass `Some(&mut tape)`.
//! Holders that outlive a [`Tape::clear`] or move between tapes keep a
//! [`VarHandle`] instead of a bare [`VarId`].

use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::ArrayD;
use tracing::{debug, trace};

use crate::block::Block;
use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};
use crate::float::Float;

/// Index of a [`BlockVariable`] on a [`Tape`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) u32);

impl VarId {
    /// Position of the variable on its tape.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a [`Block`] on a [`Tape`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Position of the block on its tape.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A [`VarId`] pinned to the tape and slot it was issued for.
///
/// A handle resolves only on the tape that issued it, and only while the
/// variable it names has not been cleared or rolled back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VarHandle {
    tape: u64,
    stamp: u64,
    var: VarId,
}

impl VarHandle {
    /// The variable index, without checking it is still live.
    #[inline]
    pub fn var(self) -> VarId {
        self.var
    }
}

static NEXT_TAPE_ID: AtomicU64 = AtomicU64::new(0);

/// Tape lengths captured by [`Tape::mark`], restored by [`Tape::rollback`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TapeMark {
    blocks: usize,
    variables: usize,
}

/// One tape position: a value snapshot plus the sensitivities flowing through it.
#[derive(Clone, Debug)]
pub struct BlockVariable<F: Float> {
    shape: Vec<usize>,
    checkpoint: Option<Checkpoint<F>>,
    adj_value: Option<ArrayD<F>>,
    tlm_value: Option<ArrayD<F>>,
    hessian_value: Option<ArrayD<F>>,
    creator: Option<BlockId>,
    stamp: u64,
}

impl<F: Float> BlockVariable<F> {
    fn new(values: &ArrayD<F>, creator: Option<BlockId>, stamp: u64) -> Self {
        BlockVariable {
            stamp,
            shape: values.shape().to_vec(),
            checkpoint: Some(Checkpoint::new(values.clone())),
            adj_value: None,
            tlm_value: None,
            hessian_value: None,
            creator,
        }
    }

    /// Shape of the value held at this position.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Snapshot of the value at this position.
    pub fn checkpoint(&self) -> Option<&Checkpoint<F>> {
        self.checkpoint.as_ref()
    }

    /// Replace the snapshot.
    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint<F>) {
        self.checkpoint = Some(checkpoint);
    }

    /// Block that produced this variable, `None` for leaves.
    pub fn creator(&self) -> Option<BlockId> {
        self.creator
    }

    /// Accumulated adjoint, `None` if nothing reached this position.
    pub fn adj_value(&self) -> Option<&ArrayD<F>> {
        self.adj_value.as_ref()
    }

    /// Tangent-linear value.
    pub fn tlm_value(&self) -> Option<&ArrayD<F>> {
        self.tlm_value.as_ref()
    }

    /// Second-order adjoint value.
    pub fn hessian_value(&self) -> Option<&ArrayD<F>> {
        self.hessian_value.as_ref()
    }

    fn reset(&mut self) {
        self.adj_value = None;
        self.tlm_value = None;
        self.hessian_value = None;
    }
}

/// Add `contribution` into `slot`, taking ownership when the slot is empty.
fn accumulate<F: Float>(slot: &mut Option<ArrayD<F>>, contribution: ArrayD<F>) -> Result<()> {
    match slot {
        Some(acc) if acc.len() != contribution.len() => Err(Error::ShapeMismatch {
            shape: acc.shape().to_vec(),
            expected: acc.len(),
            found: contribution.len(),
        }),
        Some(acc) => {
            acc.iter_mut()
                .zip(contribution.iter())
                .for_each(|(a, &c)| *a = *a + c);
            Ok(())
        }
        None => {
            *slot = Some(contribution);
            Ok(())
        }
    }
}

/// Ordered log of recorded [`Block`]s and the [`BlockVariable`]s they connect.
pub struct Tape<F: Float> {
    blocks: Vec<Box<dyn Block<F>>>,
    variables: Vec<BlockVariable<F>>,
    annotating: bool,
    id: u64,
    next_stamp: u64,
}

impl<F: Float> Default for Tape<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> std::fmt::Debug for Tape<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tape")
            .field("blocks", &self.blocks)
            .field("variables", &self.variables.len())
            .field("annotating", &self.annotating)
            .field("id", &self.id)
            .finish()
    }
}

impl<F: Float> Tape<F> {
    /// Create an empty tape with annotation enabled.
    pub fn new() -> Self {
        Self::with_annotation(true)
    }

    /// Create an empty tape with the given ambient annotation policy.
    pub fn with_annotation(annotating: bool) -> Self {
        Tape {
            blocks: Vec::new(),
            variables: Vec::new(),
            annotating,
            id: NEXT_TAPE_ID.fetch_add(1, Ordering::Relaxed),
            next_stamp: 0,
        }
    }

    /// Ambient annotation policy.
    #[inline]
    pub fn is_annotating(&self) -> bool {
        self.annotating
    }

    /// Stop recording until [`continue_annotation`](Self::continue_annotation).
    pub fn pause_annotation(&mut self) {
        self.annotating = false;
    }

    /// Resume recording.
    pub fn continue_annotation(&mut self) {
        self.annotating = true;
    }

    /// Whether an operation should be recorded: an explicit override wins,
    /// otherwise the ambient policy applies.
    #[inline]
    pub fn annotate_tape(&self, annotate: Option<bool>) -> bool {
        annotate.unwrap_or(self.annotating)
    }

    /// Number of recorded blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// `true` if no block has been recorded.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of block variables.
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Iterate over the recorded blocks in tape order.
    pub fn blocks(&self) -> impl Iterator<Item = &dyn Block<F>> + '_ {
        self.blocks.iter().map(|b| b.as_ref())
    }

    /// Look up a block.
    pub fn block(&self, id: BlockId) -> Option<&dyn Block<F>> {
        self.blocks.get(id.index()).map(|b| b.as_ref())
    }

    /// Look up a variable.
    pub fn variable(&self, id: VarId) -> Option<&BlockVariable<F>> {
        self.variables.get(id.index())
    }

    /// Look up a variable mutably.
    pub fn variable_mut(&mut self, id: VarId) -> Option<&mut BlockVariable<F>> {
        self.variables.get_mut(id.index())
    }

    /// Pin `id` to this tape. `None` if no such variable exists.
    pub fn handle(&self, id: VarId) -> Option<VarHandle> {
        self.variables.get(id.index()).map(|v| VarHandle {
            tape: self.id,
            stamp: v.stamp,
            var: id,
        })
    }

    /// The variable `handle` names, if it was issued by this tape and is
    /// still live.
    pub fn resolve(&self, handle: VarHandle) -> Option<VarId> {
        if handle.tape != self.id {
            return None;
        }
        self.variables
            .get(handle.var.index())
            .filter(|v| v.stamp == handle.stamp)
            .map(|_| handle.var)
    }

    fn push_variable(&mut self, values: &ArrayD<F>, creator: Option<BlockId>) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables
            .push(BlockVariable::new(values, creator, self.next_stamp));
        self.next_stamp += 1;
        id
    }

    /// Register a leaf variable holding a snapshot of `values`.
    pub fn new_variable(&mut self, values: &ArrayD<F>) -> VarId {
        self.push_variable(values, None)
    }

    /// Append a block. Its dependencies must already be on this tape.
    pub fn add_block(&mut self, block: Box<dyn Block<F>>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        trace!(block = id.0, deps = block.dependencies().len(), "block registered");
        self.blocks.push(block);
        id
    }

    /// Create the variable produced by `block` and attach it as the block's next output.
    pub fn add_output(&mut self, block: BlockId, values: &ArrayD<F>) -> Result<VarId> {
        let id = VarId(self.variables.len() as u32);
        let target = self
            .blocks
            .get_mut(block.index())
            .ok_or(Error::UnknownBlock(block))?;
        target.add_output(id);
        Ok(self.push_variable(values, Some(block)))
    }

    /// Capture the current tape lengths.
    pub fn mark(&self) -> TapeMark {
        TapeMark {
            blocks: self.blocks.len(),
            variables: self.variables.len(),
        }
    }

    /// Drop every block and variable recorded after `mark`. Handles to the
    /// dropped variables stop resolving.
    pub fn rollback(&mut self, mark: TapeMark) {
        debug!(
            blocks = self.blocks.len().saturating_sub(mark.blocks),
            variables = self.variables.len().saturating_sub(mark.variables),
            "rolling tape back"
        );
        self.blocks.truncate(mark.blocks);
        self.variables.truncate(mark.variables);
    }

    /// Remove all blocks and variables. The annotation policy is kept and
    /// every handle issued so far stops resolving.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.variables.clear();
    }

    /// Forget every adjoint, tangent and Hessian value.
    pub fn reset_variables(&mut self) {
        self.variables.iter_mut().for_each(BlockVariable::reset);
    }

    fn slot(&mut self, id: VarId) -> Result<&mut BlockVariable<F>> {
        self.variables
            .get_mut(id.index())
            .ok_or(Error::UnknownVariable(id))
    }

    /// Set the adjoint seed of `id`, typically the functional's output.
    pub fn seed_adjoint(&mut self, id: VarId, seed: ArrayD<F>) -> Result<()> {
        self.slot(id)?.adj_value = Some(seed);
        Ok(())
    }

    /// Set the tangent direction of `id`, typically a control.
    pub fn seed_tangent(&mut self, id: VarId, seed: ArrayD<F>) -> Result<()> {
        self.slot(id)?.tlm_value = Some(seed);
        Ok(())
    }

    /// Set the second-order seed of `id`.
    pub fn seed_hessian(&mut self, id: VarId, seed: ArrayD<F>) -> Result<()> {
        self.slot(id)?.hessian_value = Some(seed);
        Ok(())
    }

    fn inputs_of(variables: &[BlockVariable<F>], block: &dyn Block<F>) -> Result<Vec<ArrayD<F>>> {
        block
            .dependencies()
            .iter()
            .map(|&dep| {
                variables
                    .get(dep.index())
                    .ok_or(Error::UnknownVariable(dep))?
                    .checkpoint()
                    .map(|c| c.values().clone())
                    .ok_or(Error::MissingCheckpoint(dep))
            })
            .collect()
    }

    fn gather_from(
        variables: &[BlockVariable<F>],
        ids: &[VarId],
        pick: impl Fn(&BlockVariable<F>) -> Option<&ArrayD<F>>,
    ) -> Vec<Option<ArrayD<F>>> {
        ids.iter()
            .map(|id| variables.get(id.index()).and_then(&pick).cloned())
            .collect()
    }

    /// Reverse sweep: push output adjoints back through every block,
    /// accumulating into the dependencies.
    pub fn evaluate_adj(&mut self) -> Result<()> {
        debug!(blocks = self.blocks.len(), "adjoint sweep");
        for block in self.blocks.iter().rev() {
            let adj_inputs =
                Self::gather_from(&self.variables, block.outputs(), BlockVariable::adj_value);
            if adj_inputs.iter().all(Option::is_none) {
                continue;
            }
            let inputs = Self::inputs_of(&self.variables, block.as_ref())?;
            for (idx, &dep) in block.dependencies().iter().enumerate() {
                if let Some(c) = block.evaluate_adj_component(&inputs, &adj_inputs, idx) {
                    let var = self
                        .variables
                        .get_mut(dep.index())
                        .ok_or(Error::UnknownVariable(dep))?;
                    accumulate(&mut var.adj_value, c)?;
                }
            }
        }
        Ok(())
    }

    /// Forward sweep: propagate seeded tangents through every block.
    pub fn evaluate_tlm(&mut self) -> Result<()> {
        debug!(blocks = self.blocks.len(), "tangent-linear sweep");
        for block in self.blocks.iter() {
            let tlm_inputs =
                Self::gather_from(&self.variables, block.dependencies(), BlockVariable::tlm_value);
            if tlm_inputs.iter().all(Option::is_none) {
                continue;
            }
            let inputs = Self::inputs_of(&self.variables, block.as_ref())?;
            for (idx, &out) in block.outputs().iter().enumerate() {
                let var = self
                    .variables
                    .get_mut(out.index())
                    .ok_or(Error::UnknownVariable(out))?;
                if let Some(t) = block.evaluate_tlm_component(&inputs, &tlm_inputs, &var.shape, idx) {
                    accumulate(&mut var.tlm_value, t)?;
                }
            }
        }
        Ok(())
    }

    /// Second-order reverse sweep. Expects adjoints from [`evaluate_adj`](Self::evaluate_adj)
    /// and tangents from [`evaluate_tlm`](Self::evaluate_tlm) to be in place.
    pub fn evaluate_hessian(&mut self) -> Result<()> {
        debug!(blocks = self.blocks.len(), "hessian sweep");
        for block in self.blocks.iter().rev() {
            let hessian_inputs =
                Self::gather_from(&self.variables, block.outputs(), BlockVariable::hessian_value);
            if hessian_inputs.iter().all(Option::is_none) {
                continue;
            }
            let adj_inputs =
                Self::gather_from(&self.variables, block.outputs(), BlockVariable::adj_value);
            let inputs = Self::inputs_of(&self.variables, block.as_ref())?;
            for (idx, &dep) in block.dependencies().iter().enumerate() {
                if let Some(h) =
                    block.evaluate_hessian_component(&inputs, &hessian_inputs, &adj_inputs, idx)
                {
                    let var = self
                        .variables
                        .get_mut(dep.index())
                        .ok_or(Error::UnknownVariable(dep))?;
                    accumulate(&mut var.hessian_value, h)?;
                }
            }
        }
        Ok(())
    }

    /// Replay every block from its recorded inputs, refreshing output snapshots.
    pub fn recompute(&mut self) -> Result<()> {
        debug!(blocks = self.blocks.len(), "recompute sweep");
        for block in self.blocks.iter() {
            let inputs = Self::inputs_of(&self.variables, block.as_ref())?;
            for (idx, &out) in block.outputs().iter().enumerate() {
                let var = self
                    .variables
                    .get_mut(out.index())
                    .ok_or(Error::UnknownVariable(out))?;
                let values = block.recompute_component(&inputs, &var.shape, idx)?;
                var.checkpoint = Some(Checkpoint::new(values));
            }
        }
        Ok(())
    }
}

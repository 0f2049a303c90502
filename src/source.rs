//! The right-hand side of an assignment.

use ndarray::{arr0, Array1, ArrayD};
use tracing::debug;

use crate::float::Float;
use crate::parameter::Parameter;
use crate::tape::{Tape, VarId};

/// Value assigned into a [`Parameter`].
///
/// Plain values are lifted onto the tape as leaf variables when the
/// assignment is recorded; parameters contribute their own block variable.
#[derive(Debug)]
pub enum Source<'a, F: Float> {
    /// A single number.
    Scalar(F),
    /// A plain array. Its element count must match the target's.
    Raw(ArrayD<F>),
    /// Another parameter.
    Parameter(&'a Parameter<F>),
}

impl<'a, F: Float> Source<'a, F> {
    /// Number of values carried.
    pub fn len(&self) -> usize {
        match self {
            Source::Scalar(_) => 1,
            Source::Raw(a) => a.len(),
            Source::Parameter(p) => p.dim(),
        }
    }

    /// `true` for an empty raw array.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattened values in logical order.
    pub fn flat_values(&self) -> Vec<F> {
        match self {
            Source::Scalar(x) => vec![*x],
            Source::Raw(a) => a.iter().copied().collect(),
            Source::Parameter(p) => p.to_list(),
        }
    }

    /// Tape variable standing for this value.
    pub(crate) fn dependency(&self, tape: &mut Tape<F>) -> VarId {
        match self {
            Source::Scalar(x) => {
                debug!(value = %x, "lifting scalar assignment source onto tape");
                tape.new_variable(&arr0(*x).into_dyn())
            }
            Source::Raw(a) => {
                debug!(shape = ?a.shape(), "lifting raw assignment source onto tape");
                tape.new_variable(a)
            }
            Source::Parameter(p) => p.block_variable(tape),
        }
    }
}

impl<'a, F: Float> From<F> for Source<'a, F> {
    fn from(x: F) -> Self {
        Source::Scalar(x)
    }
}

impl<'a, F: Float> From<ArrayD<F>> for Source<'a, F> {
    fn from(a: ArrayD<F>) -> Self {
        Source::Raw(a)
    }
}

impl<'a, F: Float> From<Vec<F>> for Source<'a, F> {
    fn from(v: Vec<F>) -> Self {
        Source::Raw(Array1::from_vec(v).into_dyn())
    }
}

impl<'a, F: Float, const N: usize> From<[F; N]> for Source<'a, F> {
    fn from(v: [F; N]) -> Self {
        Source::from(v.to_vec())
    }
}

impl<'a, F: Float> From<&'a Parameter<F>> for Source<'a, F> {
    fn from(p: &'a Parameter<F>) -> Self {
        Source::Parameter(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn scalar_lifts_to_zero_dim_leaf() {
        let mut tape = Tape::<f64>::new();
        let id = Source::Scalar(2.5).dependency(&mut tape);
        let var = tape.variable(id).unwrap();
        assert!(var.shape().is_empty());
        assert!(var.creator().is_none());
        assert_eq!(var.checkpoint().unwrap().values()[IxDyn(&[])], 2.5);
    }

    #[test]
    fn conversions() {
        let s: Source<'_, f64> = [1.0, 2.0, 3.0].into();
        assert_eq!(s.len(), 3);
        assert_eq!(s.flat_values(), vec![1.0, 2.0, 3.0]);
        let s: Source<'_, f64> = 4.0_f64.into();
        assert_eq!(s.flat_values(), vec![4.0]);
    }
}

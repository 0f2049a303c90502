//! Collapse possibly distributed quantities into a local flat vector.
//!
//! Adjoint and tangent values arriving from a sweep may be partitioned
//! across ranks. [`Gather`] turns any of them into the flat, logically
//! ordered `Vec<F>` that [`Parameter::convert_type`](crate::Parameter::convert_type)
//! reshapes.

use ndarray::ArrayD;

use crate::checkpoint::Checkpoint;
use crate::float::Float;
use crate::parameter::Parameter;

/// A value that can be gathered into one flat local vector.
pub trait Gather<F: Float> {
    /// All values in logical (row-major) order.
    fn gather(&self) -> Vec<F>;
}

impl<F: Float> Gather<F> for [F] {
    fn gather(&self) -> Vec<F> {
        self.to_vec()
    }
}

impl<F: Float> Gather<F> for Vec<F> {
    fn gather(&self) -> Vec<F> {
        self.clone()
    }
}

impl<F: Float> Gather<F> for ArrayD<F> {
    fn gather(&self) -> Vec<F> {
        self.iter().copied().collect()
    }
}

impl<F: Float> Gather<F> for Parameter<F> {
    fn gather(&self) -> Vec<F> {
        self.to_list()
    }
}

impl<F: Float> Gather<F> for Checkpoint<F> {
    fn gather(&self) -> Vec<F> {
        self.values().gather()
    }
}

/// A flat vector split into contiguous per-rank chunks.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionedVector<F: Float> {
    parts: Vec<Vec<F>>,
}

impl<F: Float> PartitionedVector<F> {
    /// Wrap already partitioned chunks; chunk `r` is owned by rank `r`.
    pub fn from_parts(parts: Vec<Vec<F>>) -> Self {
        PartitionedVector { parts }
    }

    /// Split `values` over `nparts` ranks. Ownership ranges are contiguous
    /// and the first `len % nparts` ranks hold one extra entry.
    ///
    /// `nparts == 0` is treated as a single rank.
    pub fn scatter(values: &[F], nparts: usize) -> Self {
        let nparts = nparts.max(1);
        let base = values.len() / nparts;
        let extra = values.len() % nparts;
        let mut parts = Vec::with_capacity(nparts);
        let mut start = 0;
        for rank in 0..nparts {
            let n = base + usize::from(rank < extra);
            parts.push(values[start..start + n].to_vec());
            start += n;
        }
        PartitionedVector { parts }
    }

    /// Number of ranks.
    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    /// Chunk owned by `rank`.
    pub fn local(&self, rank: usize) -> Option<&[F]> {
        self.parts.get(rank).map(Vec::as_slice)
    }

    /// Total number of values across ranks.
    pub fn global_len(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }
}

impl<F: Float> Gather<F> for PartitionedVector<F> {
    #[cfg(not(feature = "parallel"))]
    fn gather(&self) -> Vec<F> {
        let mut out = Vec::with_capacity(self.global_len());
        for part in &self.parts {
            out.extend_from_slice(part);
        }
        out
    }

    #[cfg(feature = "parallel")]
    fn gather(&self) -> Vec<F> {
        use rayon::prelude::*;

        self.parts
            .par_iter()
            .flat_map(|part| part.par_iter().copied())
            .collect()
    }
}

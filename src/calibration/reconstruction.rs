use faer::{mat::from_column_major_slice, MatRef};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::{pseudoinverse, InteractionMatrix};
use crate::{
    error::{AlignmentError, Result},
    modes::ModeSet,
};

/// Default relative threshold of the singular values
pub const RCOND: f64 = 1e-12;

/// Reconstruction matrix
///
/// Truncated pseudo-inverse of an [InteractionMatrix] restricted to a selection
/// of modes and channels, with as many rows as channels and as many columns as modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionMatrix {
    c: Vec<f64>,
    modes: ModeSet,
    channels: Vec<usize>,
    rank: usize,
    singular_values: Vec<f64>,
    cond: f64,
    rcond: f64,
}

impl ReconstructionMatrix {
    /// Computes the reconstruction matrix of the interaction matrix
    ///
    /// `modes2invert` and `channels2invert` restrict the inversion to a subset of the
    /// modes and of the channels of the interaction matrix, all of them are used if `None`.
    /// Singular values smaller than `rcond` times the largest one are discarded.
    pub fn build(
        interaction: &InteractionMatrix,
        modes2invert: Option<&ModeSet>,
        channels2invert: Option<&[usize]>,
        rcond: f64,
    ) -> Result<Self> {
        let sub = interaction.select(modes2invert, channels2invert)?;
        let pinv = pseudoinverse(sub.mat_ref(), rcond).ok_or(AlignmentError::SingularSystem {
            n_rows: sub.n_rows(),
            n_cols: sub.n_cols(),
        })?;
        if pinv.rank < sub.n_rows().min(sub.n_cols()) {
            log::warn!(
                "rank deficient interaction matrix: rank {} for {} modes and {} channels",
                pinv.rank,
                sub.n_rows(),
                sub.n_cols()
            );
        }
        log::info!(
            "reconstruction matrix ({}, {}): rank {}, cond. #: {:6.3E}",
            sub.n_cols(),
            sub.n_rows(),
            pinv.rank,
            pinv.cond
        );
        Ok(Self {
            c: pinv.to_column_major(),
            modes: sub.modes,
            channels: sub.channels,
            rank: pinv.rank,
            singular_values: pinv.singular_values,
            cond: pinv.cond,
            rcond,
        })
    }
    /// Number of channels
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.channels.len()
    }
    /// Number of modes
    #[inline]
    pub fn n_cols(&self) -> usize {
        self.modes.len()
    }
    #[inline]
    pub fn mat_ref(&self) -> MatRef<'_, f64> {
        from_column_major_slice::<f64>(&self.c, self.n_rows(), self.n_cols())
    }
    pub fn modes(&self) -> &ModeSet {
        &self.modes
    }
    /// Channels labels
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }
    /// Number of singular values used in the inversion
    pub fn rank(&self) -> usize {
        self.rank
    }
    /// Singular values of the inverted interaction matrix
    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }
    /// Condition number of the inverted spectrum
    pub fn cond(&self) -> f64 {
        self.cond
    }
    pub fn rcond(&self) -> f64 {
        self.rcond
    }
    /// Checks that the matrix size matches the channels and the modes
    pub fn check(&self) -> Result<()> {
        let expected = self.n_rows() * self.n_cols();
        if self.c.is_empty() || self.c.len() != expected {
            return Err(AlignmentError::command_shape(
                format!("{}x{} reconstruction matrix", self.n_rows(), self.n_cols()),
                expected,
                self.c.len(),
            ));
        }
        if self.rank == 0 || self.rank > self.n_rows().min(self.n_cols()) {
            return Err(AlignmentError::Selection(format!(
                "rank {} of a {}x{} reconstruction matrix",
                self.rank,
                self.n_rows(),
                self.n_cols()
            )));
        }
        Ok(())
    }
    /// Returns the channels command reconstructed from the modal vector
    pub fn reconstruct(&self, modes: &[f64]) -> Result<Vec<f64>> {
        if modes.len() != self.n_cols() {
            return Err(AlignmentError::command_shape(
                format!("modal vector {}", self.modes),
                self.n_cols(),
                modes.len(),
            ));
        }
        let cmd = self.mat_ref() * from_column_major_slice::<f64>(modes, modes.len(), 1);
        Ok((0..cmd.nrows()).map(|i| cmd.read(i, 0)).collect())
    }
}

impl Display for ReconstructionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reconstruction matrix ({}, {}) of {} on channels {:?}; rank: {}, cond: {:6.3E}",
            self.n_rows(),
            self.n_cols(),
            self.modes,
            self.channels,
            self.rank,
            self.cond
        )
    }
}

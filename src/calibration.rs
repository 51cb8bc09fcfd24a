/*!
# Calibration

The calibration measures the [InteractionMatrix] of the system with a [PushPull]
sequence applied to each channel of a [CommandMatrix] and derives the
[ReconstructionMatrix] from its truncated pseudo-inverse.
*/

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::{
    error::{AlignmentError, Result},
    filing::Codec,
    modes::ModeSet,
};

mod command;
mod interaction;
mod pinv;
mod push_pull;
mod reconstruction;
mod template;

pub use command::CommandMatrix;
pub use interaction::{InteractionMatrix, InteractionMatrixBuilder};
pub use pinv::{pseudoinverse, Pinv};
pub use push_pull::{push_pull_redux, PushPull, Sense};
pub use reconstruction::{ReconstructionMatrix, RCOND};
pub use template::Template;

/// Calibration result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub interaction: InteractionMatrix,
    pub reconstruction: ReconstructionMatrix,
    pub command_matrix: CommandMatrix,
    pub amplitudes: Vec<f64>,
    pub template: Template,
    pub n_repetitions: usize,
}

impl Codec for CalibrationResult {}

impl CalibrationResult {
    /// Calibrated modes
    pub fn modes(&self) -> &ModeSet {
        self.interaction.modes()
    }
    /// Calibrated channels labels
    pub fn channels(&self) -> &[usize] {
        self.interaction.channels()
    }
    /// Returns the reconstruction matrix of a subset of the calibrated modes
    ///
    /// The stored reconstruction matrix is returned if `modes` are the modes it was built with,
    /// otherwise a new one is computed from the interaction matrix with the same threshold.
    pub fn reconstruction_for(&self, modes: &ModeSet) -> Result<ReconstructionMatrix> {
        if modes == self.reconstruction.modes() {
            return Ok(self.reconstruction.clone());
        }
        if !modes.is_subset(self.modes()) {
            return Err(AlignmentError::Selection(format!(
                "{modes} are not all calibrated ({})",
                self.modes()
            )));
        }
        log::info!("rebuilding the reconstruction matrix for {modes}");
        ReconstructionMatrix::build(
            &self.interaction,
            Some(modes),
            Some(self.reconstruction.channels()),
            self.reconstruction.rcond(),
        )
    }
    /// Checks that the calibration matches a full command of length `n_dof`
    ///
    /// The matrices sizes are checked too as a loaded calibration may be corrupted.
    pub fn check(&self, n_dof: usize) -> Result<()> {
        self.interaction.check()?;
        self.reconstruction.check()?;
        self.command_matrix.check()?;
        if !self.reconstruction.modes().is_subset(self.modes()) {
            return Err(AlignmentError::Selection(format!(
                "reconstructed modes {} are not all calibrated ({})",
                self.reconstruction.modes(),
                self.modes()
            )));
        }
        if self.command_matrix.n_dof() != n_dof {
            return Err(AlignmentError::command_shape(
                "calibration command matrix",
                n_dof,
                self.command_matrix.n_dof(),
            ));
        }
        if self.amplitudes.len() != self.command_matrix.n_channel() {
            return Err(AlignmentError::command_shape(
                "calibration amplitudes",
                self.command_matrix.n_channel(),
                self.amplitudes.len(),
            ));
        }
        if let Some(label) = self
            .interaction
            .channels()
            .iter()
            .chain(self.reconstruction.channels())
            .find(|&&label| self.command_matrix.position(label).is_none())
        {
            return Err(AlignmentError::Selection(format!(
                "channel #{label} is not in the command matrix"
            )));
        }
        Ok(())
    }
}

impl Display for CalibrationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.interaction)?;
        writeln!(f, "{}", self.reconstruction)?;
        write!(
            f,
            "amplitudes: {:?}, template: {:?} x{}",
            self.amplitudes,
            self.template.offsets(),
            self.n_repetitions
        )
    }
}

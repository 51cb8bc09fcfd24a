use faer::{mat::from_column_major_slice, Mat, MatRef};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, ops::Mul, time::Duration};

use super::ReconstructionMatrix;
use crate::{
    error::{AlignmentError, Result},
    filing::Codec,
    modes::ModeSet,
};

/// Interaction matrix
///
/// The matrix has as many rows as modes and as many columns as calibrated channels.
/// Each column is the modal response to a unit command of the channel.
///
/// ```
/// use optalign::{calibration::InteractionMatrix, ModeSet};
///
/// let im = InteractionMatrix::builder()
///     .c(vec![1., 0., 0., 2.])
///     .modes(ModeSet::new(vec![2, 3])?)
///     .channels(vec![0, 1])
///     .build()?;
/// assert_eq!(im.n_rows(), 2);
/// assert_eq!(im.column(1), &[0., 2.]);
/// # Ok::<(), optalign::AlignmentError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionMatrix {
    pub(crate) c: Vec<f64>,
    pub(crate) modes: ModeSet,
    pub(crate) channels: Vec<usize>,
    pub(crate) runtime: Duration,
}

impl Codec for InteractionMatrix {}

/// Builder for [InteractionMatrix]
#[derive(Debug, Default, Clone)]
pub struct InteractionMatrixBuilder {
    c: Vec<f64>,
    modes: Option<ModeSet>,
    channels: Vec<usize>,
    runtime: Duration,
}

impl InteractionMatrixBuilder {
    /// Sets the matrix column wise
    pub fn c(mut self, c: Vec<f64>) -> Self {
        self.c = c;
        self
    }
    /// Sets the columns
    pub fn columns(mut self, columns: Vec<Vec<f64>>) -> Self {
        self.c = columns.into_iter().flatten().collect();
        self
    }
    /// Sets the modes of the rows
    pub fn modes(mut self, modes: ModeSet) -> Self {
        self.modes = Some(modes);
        self
    }
    /// Sets the channels labels of the columns
    pub fn channels(mut self, channels: Vec<usize>) -> Self {
        self.channels = channels;
        self
    }
    /// Sets the calibration duration
    pub fn runtime(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }
    /// Builds [InteractionMatrix]
    pub fn build(self) -> Result<InteractionMatrix> {
        let Self {
            c,
            modes,
            channels,
            runtime,
        } = self;
        let modes = modes.ok_or_else(|| AlignmentError::Selection("no modes".into()))?;
        let interaction = InteractionMatrix {
            c,
            modes,
            channels,
            runtime,
        };
        interaction.check()?;
        Ok(interaction)
    }
}

impl InteractionMatrix {
    pub fn builder() -> InteractionMatrixBuilder {
        Default::default()
    }
    /// Number of modes
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.modes.len()
    }
    /// Number of channels
    #[inline]
    pub fn n_cols(&self) -> usize {
        self.channels.len()
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
    /// Modal response of the channel at the given position
    pub fn column(&self, k: usize) -> &[f64] {
        let n = self.n_rows();
        &self.c[k * n..(k + 1) * n]
    }
    /// Calibration duration
    pub fn runtime(&self) -> Duration {
        self.runtime
    }
    /// Checks that the matrix size matches the modes and the channels
    pub fn check(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(AlignmentError::Selection("no channels".into()));
        }
        let expected = self.n_rows() * self.n_cols();
        if self.c.len() != expected {
            return Err(AlignmentError::command_shape(
                format!("{}x{} interaction matrix", self.n_rows(), self.n_cols()),
                expected,
                self.c.len(),
            ));
        }
        Ok(())
    }
    /// Returns the sub-matrix of the given modes and channels
    pub fn select(&self, modes: Option<&ModeSet>, channels: Option<&[usize]>) -> Result<Self> {
        let modes = modes.unwrap_or(&self.modes);
        let rows = self.modes.positions(modes)?;
        let channels = channels.unwrap_or(&self.channels);
        let cols = channels
            .iter()
            .map(|label| {
                self.channels
                    .iter()
                    .position(|l| l == label)
                    .ok_or_else(|| {
                        AlignmentError::Selection(format!("channel #{label} is not calibrated"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::builder()
            .c(cols
                .iter()
                .flat_map(|&j| rows.iter().map(move |&i| self.c[j * self.n_rows() + i]))
                .collect())
            .modes(modes.clone())
            .channels(channels.to_vec())
            .runtime(self.runtime)
            .build()
    }
}

impl Display for InteractionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Interaction matrix ({}, {}) in {:.0?}",
            self.n_rows(),
            self.n_cols(),
            self.runtime
        )?;
        write!(f, "{:>6}", "")?;
        for c in &self.channels {
            write!(f, " {:>11}", format!("#{c}"))?;
        }
        for (i, m) in self.modes.iter().enumerate() {
            write!(f, "\n{:>6}", format!("Z{m}"))?;
            for j in 0..self.n_cols() {
                write!(f, " {:>11.3E}", self.c[j * self.n_rows() + i])?;
            }
        }
        Ok(())
    }
}

impl Mul<&ReconstructionMatrix> for &InteractionMatrix {
    type Output = Mat<f64>;
    fn mul(self, rhs: &ReconstructionMatrix) -> Self::Output {
        self.mat_ref() * rhs.mat_ref()
    }
}

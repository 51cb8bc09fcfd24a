//! Modal decomposition of wavefront images

use faer::{mat::from_column_major_slice, Mat};

use crate::{calibration::pseudoinverse, image::Image, modes::ModeSet};

#[derive(Debug, thiserror::Error)]
pub enum DecompositionError {
    #[error("expected a {expected:?} image, found {found:?}")]
    Shape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("pupil mask of length {found} does not match {expected} pixels")]
    PupilShape { expected: usize, found: usize },
    #[error("{n_valid} valid pixels are not enough to fit {n_mode} modes")]
    Underdetermined { n_valid: usize, n_mode: usize },
    #[error("the {n_mode} modes are not independent over the valid pixels (rank {rank})")]
    RankDeficient { rank: usize, n_mode: usize },
    #[error("modes {modes} are not part of the fitted basis {basis:?}")]
    UnknownModes { modes: ModeSet, basis: Vec<usize> },
    #[error("invalid modal basis: {0}")]
    Basis(String),
}

type Result<T> = std::result::Result<T, DecompositionError>;

/// Modal decomposition interface
pub trait Decompose {
    /// Image shape `(rows, columns)` the decomposition applies to
    fn shape(&self) -> (usize, usize);
    /// Modes of the returned modal vector
    fn modes(&self) -> &ModeSet;
    /// Returns the coefficients of the [modes](Decompose::modes) of the image
    ///
    /// The optional `pupil` restricts the fit to the pixels where it is `true`.
    fn decompose(&self, image: &Image, pupil: Option<&[bool]>) -> Result<Vec<f64>>;
}

/// Least-square fit of a modal basis
///
/// All the modes of the basis are fitted together and the coefficients of the
/// selected [ModeSet] are returned.
#[derive(Debug, Clone)]
pub struct ModalFit {
    n_rows: usize,
    n_cols: usize,
    // basis stored mode after mode
    basis: Vec<f64>,
    basis_modes: Vec<usize>,
    modes: ModeSet,
    selection: Vec<usize>,
    support: Vec<bool>,
    rcond: f64,
}

impl ModalFit {
    /// Creates a fit from a given basis
    ///
    /// `basis` is made of `basis_modes.len()` row-major images of size `n_rows x n_cols`,
    /// `basis_modes` are the mode numbers of the basis images
    pub fn new(
        n_rows: usize,
        n_cols: usize,
        basis: Vec<f64>,
        basis_modes: Vec<usize>,
        modes: ModeSet,
    ) -> Result<Self> {
        let n_px = n_rows * n_cols;
        if n_px == 0 || basis_modes.is_empty() || basis.len() != n_px * basis_modes.len() {
            return Err(DecompositionError::Basis(format!(
                "{} values for {} modes of {n_rows}x{n_cols} pixels",
                basis.len(),
                basis_modes.len()
            )));
        }
        let selection = modes
            .iter()
            .map(|m| basis_modes.iter().position(|b| b == m))
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| DecompositionError::UnknownModes {
                modes: modes.clone(),
                basis: basis_modes.clone(),
            })?;
        let support = (0..n_px)
            .map(|i| {
                let mut values = basis.iter().skip(i).step_by(n_px);
                values.clone().all(|x| x.is_finite()) && values.any(|x| *x != 0f64)
            })
            .collect();
        Ok(Self {
            n_rows,
            n_cols,
            basis,
            basis_modes,
            modes,
            selection,
            support,
            rcond: 1e-10,
        })
    }
    /// Zernike modes fit
    ///
    /// Fits the Zernike modes 1 to `n_fit` on a `n_xy x n_xy` grid
    pub fn zernike(n_xy: usize, n_fit: usize, modes: ModeSet) -> Result<Self> {
        let n_fit = n_fit.max(modes.max_mode());
        let n_radial_order = (1u32..)
            .find(|n| (n * (n + 1) / 2) as usize >= n_fit)
            .unwrap_or(1);
        log::debug!(
            "Zernike basis: {n_fit} modes (radial order {n_radial_order}) on {n_xy}x{n_xy} pixels"
        );
        let n_px = n_xy * n_xy;
        let basis: Vec<f64> = zernike::mode_set(n_radial_order, n_xy)
            .into_iter()
            .take(n_px * n_fit)
            .collect();
        Self::new(n_xy, n_xy, basis, (1..=n_fit).collect(), modes)
    }
    /// Sets the relative threshold of the least-square inversion
    pub fn rcond(mut self, rcond: f64) -> Self {
        self.rcond = rcond;
        self
    }
    /// Mode numbers of the basis
    pub fn basis_modes(&self) -> &[usize] {
        &self.basis_modes
    }
    /// Pixels where the basis is defined
    pub fn support(&self) -> &[bool] {
        &self.support
    }
    /// Builds the image corresponding to the coefficients of the basis modes
    pub fn synthesize(&self, coefficients: &[f64]) -> Result<Image> {
        if coefficients.len() != self.basis_modes.len() {
            return Err(DecompositionError::Basis(format!(
                "{} coefficients for {} modes",
                coefficients.len(),
                self.basis_modes.len()
            )));
        }
        let n_px = self.n_rows * self.n_cols;
        let data = self.basis.chunks(n_px).zip(coefficients).fold(
            vec![0f64; n_px],
            |mut a, (mode, &c)| {
                a.iter_mut().zip(mode).for_each(|(a, m)| *a += c * m);
                a
            },
        );
        Image::new(self.n_rows, self.n_cols, data)
            .and_then(|image| image.with_mask(self.support.clone()))
            .map_err(|e| DecompositionError::Basis(e.to_string()))
    }
}

impl Decompose for ModalFit {
    fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }
    fn modes(&self) -> &ModeSet {
        &self.modes
    }
    fn decompose(&self, image: &Image, pupil: Option<&[bool]>) -> Result<Vec<f64>> {
        if image.shape() != self.shape() {
            return Err(DecompositionError::Shape {
                expected: self.shape(),
                found: image.shape(),
            });
        }
        let n_px = image.len();
        if let Some(pupil) = pupil {
            if pupil.len() != n_px {
                return Err(DecompositionError::PupilShape {
                    expected: n_px,
                    found: pupil.len(),
                });
            }
        }
        let valid: Vec<usize> = image
            .valid()
            .zip(&self.support)
            .enumerate()
            .filter(|(i, (v, s))| *v && **s && pupil.map_or(true, |p| p[*i]))
            .map(|(i, _)| i)
            .collect();
        let n_mode = self.basis_modes.len();
        if valid.len() < n_mode {
            return Err(DecompositionError::Underdetermined {
                n_valid: valid.len(),
                n_mode,
            });
        }
        let a = Mat::<f64>::from_fn(valid.len(), n_mode, |i, j| self.basis[j * n_px + valid[i]]);
        let pinv = pseudoinverse(a.as_ref(), self.rcond)
            .ok_or(DecompositionError::RankDeficient { rank: 0, n_mode })?;
        if pinv.rank < n_mode {
            return Err(DecompositionError::RankDeficient {
                rank: pinv.rank,
                n_mode,
            });
        }
        let data = image.data();
        let b: Vec<f64> = valid.iter().map(|&i| data[i]).collect();
        let c = pinv.mat_ref() * from_column_major_slice::<f64>(&b, b.len(), 1);
        Ok(self.selection.iter().map(|&j| c.read(j, 0)).collect())
    }
}

use serde::{Deserialize, Serialize};
use std::ops::Deref;

use crate::error::{AlignmentError, Result};

/// Push-pull template
///
/// The template is the sequence of offsets, in units of the command amplitude,
/// applied to a channel during its calibration.
/// The default template is a single push-pull pair `[+1, -1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Template(Vec<f64>);

impl Default for Template {
    fn default() -> Self {
        Self(vec![1., -1.])
    }
}

impl Template {
    /// Creates a template from the offsets
    ///
    /// A template needs at least 2 different offsets
    pub fn new(offsets: Vec<f64>) -> Result<Self> {
        if let Some(t) = offsets.iter().find(|t| !t.is_finite()) {
            return Err(AlignmentError::Template(format!("non-finite offset {t}")));
        }
        let Some(first) = offsets.first() else {
            return Err(AlignmentError::Template("empty template".into()));
        };
        if offsets.iter().all(|t| t == first) {
            return Err(AlignmentError::Template(format!(
                "{offsets:?} does not perturb the system"
            )));
        }
        Ok(Self(offsets))
    }
    /// Creates a template from successive increments
    ///
    /// `[+1, -2, +1]` moves the channel to `+1`, then to `-1` and back to `0`.
    pub fn from_increments(steps: &[f64]) -> Result<Self> {
        let offsets = steps
            .iter()
            .scan(0f64, |offset, step| {
                *offset += step;
                Some(*offset)
            })
            .collect();
        Self::new(offsets)
    }
    pub fn offsets(&self) -> &[f64] {
        &self.0
    }
    /// Least-square slope weights of the offsets
    ///
    /// The weights sum to zero and `Σ wᵢtᵢ = 1`.
    pub fn weights(&self) -> Vec<f64> {
        let n = self.0.len() as f64;
        let mean = self.0.iter().sum::<f64>() / n;
        let var: f64 = self.0.iter().map(|t| (t - mean).powi(2)).sum();
        self.0.iter().map(|t| (t - mean) / var).collect()
    }
}

impl Deref for Template {
    type Target = [f64];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Vec<f64>> for Template {
    type Error = AlignmentError;
    fn try_from(offsets: Vec<f64>) -> Result<Self> {
        Self::new(offsets)
    }
}

impl From<Template> for Vec<f64> {
    fn from(template: Template) -> Self {
        template.0
    }
}

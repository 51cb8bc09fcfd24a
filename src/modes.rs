use serde::{Deserialize, Serialize};
use std::{fmt::Display, ops::Deref};

use crate::error::{AlignmentError, Result};

/// Ordered selection of Zernike modes
///
/// The modes are given by their Noll index starting from 1 (piston).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct ModeSet(Vec<usize>);

impl ModeSet {
    /// Creates a new mode set
    ///
    /// The set must not be empty, must not repeat a mode and Noll indices start at 1
    pub fn new(modes: Vec<usize>) -> Result<Self> {
        if modes.is_empty() {
            return Err(AlignmentError::Selection("empty mode set".into()));
        }
        if modes.contains(&0) {
            return Err(AlignmentError::Selection(
                "Zernike modes are numbered from 1".into(),
            ));
        }
        for (i, m) in modes.iter().enumerate() {
            if modes[..i].contains(m) {
                return Err(AlignmentError::Selection(format!(
                    "mode Z{m} is selected twice"
                )));
            }
        }
        Ok(Self(modes))
    }
    /// Modes `first..=last`
    pub fn range(first: usize, last: usize) -> Result<Self> {
        Self::new((first..=last).collect())
    }
    /// Returns the position of the mode in the set
    pub fn position(&self, mode: usize) -> Option<usize> {
        self.0.iter().position(|&m| m == mode)
    }
    /// Returns the positions within this set of the modes of another set
    pub fn positions(&self, other: &ModeSet) -> Result<Vec<usize>> {
        other
            .iter()
            .map(|&m| {
                self.position(m).ok_or_else(|| {
                    AlignmentError::Selection(format!("mode Z{m} is not one of {self}"))
                })
            })
            .collect()
    }
    /// Checks that every mode of the set belongs to `other`
    pub fn is_subset(&self, other: &ModeSet) -> bool {
        self.0.iter().all(|m| other.0.contains(m))
    }
    /// Largest Noll index of the set
    pub fn max_mode(&self) -> usize {
        self.0.iter().copied().max().unwrap_or_default()
    }
}

impl Deref for ModeSet {
    type Target = [usize];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Vec<usize>> for ModeSet {
    type Error = AlignmentError;
    fn try_from(modes: Vec<usize>) -> Result<Self> {
        Self::new(modes)
    }
}

impl From<ModeSet> for Vec<usize> {
    fn from(modes: ModeSet) -> Self {
        modes.0
    }
}

impl Display for ModeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let modes: Vec<_> = self.0.iter().map(|m| format!("Z{m}")).collect();
        write!(f, "[{}]", modes.join(","))
    }
}

use serde::{Deserialize, Serialize};

use crate::{
    error::{AlignmentError, Result},
    filing::Codec,
};

/// Command matrix
///
/// Each column is the full command of a calibration channel.
/// Channels are identified by a label: the index of the full command entry
/// for a selection of entries, the column index otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMatrix {
    n_dof: usize,
    c: Vec<f64>,
    labels: Vec<usize>,
}

impl Codec for CommandMatrix {}

impl CommandMatrix {
    /// Creates a command matrix from its columns
    pub fn new(n_dof: usize, c: Vec<f64>) -> Result<Self> {
        if n_dof == 0 || c.is_empty() || c.len() % n_dof != 0 {
            return Err(AlignmentError::command_shape("command matrix", n_dof, c.len()));
        }
        if let Some(k) = c.chunks(n_dof).position(|c| c.iter().all(|x| *x == 0f64)) {
            return Err(AlignmentError::Selection(format!(
                "column #{k} of the command matrix is null"
            )));
        }
        let labels = (0..c.len() / n_dof).collect();
        Ok(Self { n_dof, c, labels })
    }
    /// Selects entries of the full command as channels
    pub fn channels(n_dof: usize, channels: &[usize]) -> Result<Self> {
        if channels.is_empty() {
            return Err(AlignmentError::Selection("no channel selected".into()));
        }
        let mut c = vec![0f64; n_dof * channels.len()];
        for (k, &i) in channels.iter().enumerate() {
            if i >= n_dof {
                return Err(AlignmentError::Selection(format!(
                    "channel #{i} is out of a {n_dof} long full command"
                )));
            }
            if channels[..k].contains(&i) {
                return Err(AlignmentError::Selection(format!(
                    "channel #{i} is selected twice"
                )));
            }
            c[k * n_dof + i] = 1f64;
        }
        Ok(Self {
            n_dof,
            c,
            labels: channels.to_vec(),
        })
    }
    /// Uses every entry of the full command as a channel
    pub fn identity(n_dof: usize) -> Result<Self> {
        Self::channels(n_dof, &(0..n_dof).collect::<Vec<_>>())
    }
    /// Length of the full command
    pub fn n_dof(&self) -> usize {
        self.n_dof
    }
    /// Number of channels
    pub fn n_channel(&self) -> usize {
        self.labels.len()
    }
    /// Channel labels
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
    /// Returns the position of the channel with the given label
    pub fn position(&self, label: usize) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }
    /// Full command of the channel at the given position
    pub fn direction(&self, k: usize) -> &[f64] {
        &self.c[k * self.n_dof..(k + 1) * self.n_dof]
    }
    /// Checks that the matrix size matches the full command and the channels
    pub fn check(&self) -> Result<()> {
        let expected = self.n_dof * self.labels.len();
        if self.n_dof == 0 || self.labels.is_empty() || self.c.len() != expected {
            return Err(AlignmentError::command_shape("command matrix", expected, self.c.len()));
        }
        Ok(())
    }
    /// Expands the channels command into the full command
    ///
    /// `cmd` gives the commands of the channels with the given `labels`,
    /// the other channels are left to zero.
    pub fn expand(&self, labels: &[usize], cmd: &[f64]) -> Result<Vec<f64>> {
        if labels.len() != cmd.len() {
            return Err(AlignmentError::command_shape("channels command", labels.len(), cmd.len()));
        }
        let mut full = vec![0f64; self.n_dof];
        for (&label, &x) in labels.iter().zip(cmd) {
            let k = self.position(label).ok_or_else(|| {
                AlignmentError::Selection(format!("unknown channel #{label}"))
            })?;
            full.iter_mut()
                .zip(self.direction(k))
                .for_each(|(f, d)| *f += x * d);
        }
        Ok(full)
    }
}

/*!
# Alignment configuration

The configuration describes the device topology, the calibration options and the
data paths. It is read from a TOML file:

```toml
[[devices]]
name = "Parabola"
cmd_dof = 6
dof = [2, 3, 4]

[[devices]]
name = "Reference Mirror"
cmd_dof = 6
dof = [3, 4]

[calibration]
modes = [2, 3, 4, 7, 8]
push_pull_template = [1.0, -2.0, 1.0]

[paths]
read = "data"
write = "data/alignment"
```
*/

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    calibration::{CommandMatrix, Template, RCOND},
    device::DeviceLayout,
    error::{AlignmentError, Result},
    filing::{DataRepo, Filing},
    modes::ModeSet,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read configuration file {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("can't write configuration file {1:?}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("failed to parse the configuration")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize the configuration")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Calibration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Zernike modes (Noll index) of the interaction matrix
    pub modes: ModeSet,
    /// Number of Zernike modes fitted to the images
    pub n_fit: usize,
    /// Push-pull template as successive increments
    pub push_pull_template: Vec<f64>,
    /// Entries of the full command used as calibration channels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<usize>>,
    /// Command matrix file, relative to the read path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_matrix: Option<PathBuf>,
    /// Number of averaged frames per measurement
    pub n_frames: usize,
    /// Relative threshold of the singular values of the interaction matrix
    pub rcond: f64,
    pub skip_null_commands: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            modes: ModeSet::new(vec![2, 3, 4, 7, 8]).expect("valid default mode set"),
            n_fit: 10,
            push_pull_template: vec![1., -2., 1.],
            channels: None,
            command_matrix: None,
            n_frames: 15,
            rcond: RCOND,
            skip_null_commands: true,
        }
    }
}

impl CalibrationConfig {
    /// Returns the push-pull template
    pub fn template(&self) -> Result<Template> {
        Template::from_increments(&self.push_pull_template)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Size of the square images
    pub n_xy: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { n_xy: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub read: PathBuf,
    pub write: PathBuf,
    /// Reference geometry, relative to the read path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibrated_parabola: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            read: "data".into(),
            write: Path::new("data").join("alignment"),
            calibrated_parabola: None,
        }
    }
}

/// Alignment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    pub devices: Vec<DeviceLayout>,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Default for AlignmentConfig {
    /// M4 optical tower configuration
    fn default() -> Self {
        Self {
            devices: vec![
                DeviceLayout::new("Parabola", 6).dof(vec![2, 3, 4]),
                DeviceLayout::new("Reference Mirror", 6).dof(vec![3, 4]),
                DeviceLayout::new("M4 Exapode", 6).dof(vec![3, 4]),
            ],
            calibration: Default::default(),
            sensor: Default::default(),
            paths: Default::default(),
        }
    }
}

impl AlignmentConfig {
    /// Loads the configuration from a TOML file
    pub fn from_path(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        log::info!("loading configuration from {path:?}");
        let toml =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(e, path.to_path_buf()))?;
        let config: Self = toml::from_str(&toml)?;
        config.validate()?;
        Ok(config)
    }
    /// Writes the configuration to a TOML file
    pub fn to_path(&self, path: impl AsRef<Path>) -> std::result::Result<(), ConfigError> {
        let path = path.as_ref();
        log::info!("writing configuration to {path:?}");
        fs::write(path, self.to_toml()?).map_err(|e| ConfigError::Write(e, path.to_path_buf()))
    }
    pub fn to_toml(&self) -> std::result::Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
    /// Checks the consistency of the options
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("no device".into()));
        }
        if self.calibration.n_frames == 0 {
            return Err(ConfigError::Invalid("0 frame per measurement".into()));
        }
        if self.calibration.rcond.is_nan() || self.calibration.rcond < 0f64 {
            return Err(ConfigError::Invalid(format!(
                "rcond must be positive, found {}",
                self.calibration.rcond
            )));
        }
        if self.calibration.channels.is_some() && self.calibration.command_matrix.is_some() {
            return Err(ConfigError::Invalid(
                "both channels and command matrix are given".into(),
            ));
        }
        Ok(())
    }
    /// Length of the full command
    pub fn n_dof(&self) -> usize {
        self.devices.iter().map(|d| d.n_dof()).sum()
    }
    pub fn data_repo(&self) -> DataRepo {
        DataRepo::new(&self.paths.read, &self.paths.write)
    }
    /// Returns the command matrix
    ///
    /// The command matrix is loaded from the data repository if a file is given,
    /// or it selects the channels entries of the full command,
    /// or all of them if no channels are given
    pub fn command_matrix(&self) -> Result<CommandMatrix> {
        let n_dof = self.n_dof();
        let cm = match (&self.calibration.command_matrix, &self.calibration.channels) {
            (Some(path), _) => CommandMatrix::from_path(self.data_repo().resolve(path))?,
            (None, Some(channels)) => CommandMatrix::channels(n_dof, channels)?,
            (None, None) => CommandMatrix::identity(n_dof)?,
        };
        if cm.n_dof() != n_dof {
            return Err(AlignmentError::command_shape(
                "command matrix",
                n_dof,
                cm.n_dof(),
            ));
        }
        Ok(cm)
    }
}

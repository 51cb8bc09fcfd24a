use crate::{
    acquisition::AcquisitionError, config::ConfigError, decomposer::DecompositionError,
    filing::FilingError, image::ImageError,
};

/// Error returned by the device and sensor capabilities
pub type CapabilityError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum AlignmentError {
    #[error("{context}: expected a command of length {expected}, found {found}")]
    CommandShape {
        context: String,
        expected: usize,
        found: usize,
    },
    #[error("failed to move device #{device} ({name})")]
    Actuation {
        device: usize,
        name: String,
        #[source]
        source: CapabilityError,
    },
    #[error("failed to read the position of device #{device} ({name})")]
    Readout {
        device: usize,
        name: String,
        #[source]
        source: CapabilityError,
    },
    #[error("device #{device} ({name}) returned {found} values instead of {expected}")]
    DeviceShape {
        device: usize,
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("image acquisition failed")]
    Acquisition(#[from] AcquisitionError),
    #[error("modal decomposition failed")]
    Decomposition(#[from] DecompositionError),
    #[error("singular {n_rows}x{n_cols} interaction matrix: no singular value above the tolerance")]
    SingularSystem { n_rows: usize, n_cols: usize },
    #[error("the alignment is not calibrated")]
    NotCalibrated,
    #[error("invalid selection: {0}")]
    Selection(String),
    #[error("invalid push-pull template: {0}")]
    Template(String),
    #[error("invalid device layout: {0}")]
    Layout(String),
    #[error("calibration of channel #{channel} failed")]
    Channel {
        channel: usize,
        #[source]
        source: Box<AlignmentError>,
    },
    #[error("invalid image")]
    Image(#[from] ImageError),
    #[error("filing error")]
    Filing(#[from] FilingError),
    #[error("configuration error")]
    Config(#[from] ConfigError),
}

impl AlignmentError {
    pub(crate) fn command_shape(context: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::CommandShape {
            context: context.into(),
            expected,
            found,
        }
    }
    /// Returns the innermost error, unwrapping the channel context
    pub fn root(&self) -> &Self {
        match self {
            Self::Channel { source, .. } => source.root(),
            _ => self,
        }
    }
}

pub type Result<T> = std::result::Result<T, AlignmentError>;

//! # Optical alignment
//!
//! Closed-loop alignment of an optical assembly moved by mechanical devices
//! and observed by a wavefront sensor.
//!
//! The alignment proceeds in 2 steps:
//!  1. **[calibration](Alignment::calibrate_alignment)**: each calibration channel is
//!     perturbed following a push-pull [template](calibration::Template), the images
//!     acquired by the sensor are decomposed on Zernike modes and the modal responses
//!     are assembled into the [interaction matrix](calibration::InteractionMatrix) which
//!     truncated pseudo-inverse is the [reconstruction matrix](calibration::ReconstructionMatrix),
//!  2. **[correction](Alignment::correct_alignment)**: the modal error between the measured
//!     and the target coefficients is multiplied by the reconstruction matrix and the
//!     negated command is applied to the devices.
//!
//! The devices are driven through the [Actuator] interface and the sensor through the
//! [Acquisition] interface.
//! All the devices commands are merged into a single full command vector, the
//! [DeviceCommandMapper] splitting the full command into the devices commands.
//!
//! The engine is set from a TOML [configuration](AlignmentConfig) with
//! [Alignment::from_config], a default configuration is written by the `template` binary.
//! Calibrations are saved with [bincode](https://docs.rs/bincode) into tracking number
//! directories of the [data repository](DataRepo).

pub mod acquisition;
pub mod alignment;
pub mod calibration;
pub mod config;
pub mod decomposer;
pub mod device;
pub mod error;
pub mod filing;
pub mod image;
pub mod modes;
pub mod sensor;

pub use acquisition::{Acquisition, AcquisitionError};
pub use alignment::{Alignment, AlignmentBuilder, CalibrationState, Correction};
pub use calibration::{CalibrationResult, Template};
pub use config::{AlignmentConfig, ConfigError};
pub use decomposer::{Decompose, DecompositionError, ModalFit};
pub use device::{Actuator, DeviceCommandMapper, DeviceLayout, Perturbation};
pub use error::{AlignmentError, CapabilityError, Result};
pub use filing::{Codec, DataRepo, Filing, FilingError};
pub use image::{Image, ImageError};
pub use modes::ModeSet;
pub use sensor::ModalSensor;

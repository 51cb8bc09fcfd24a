/*!
# Alignment engine

The engine calibrates the response of the modal sensor to the devices and
corrects the alignment of the devices from the measured modal error.

A correction requires a calibration: [Alignment::calibrate_alignment] measures the
interaction matrix and computes the reconstruction matrix or [Alignment::reload_calibration]
loads a previously [saved](Alignment::save_calibration) calibration.
*/

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use crate::{
    acquisition::Acquisition,
    calibration::{
        CalibrationResult, CommandMatrix, PushPull, ReconstructionMatrix, Sense, Template, RCOND,
    },
    config::AlignmentConfig,
    decomposer::{Decompose, ModalFit},
    device::{Actuator, DeviceCommandMapper, Perturbation},
    error::{AlignmentError, Result},
    filing::DataRepo,
    image::Image,
    modes::ModeSet,
    sensor::ModalSensor,
};

/// Calibration file name in a tracking number directory
pub const CALIBRATION_FILE: &str = "calibration.bin";

/// Engine calibration state
#[derive(Debug, Clone, Default)]
pub enum CalibrationState {
    #[default]
    Uncalibrated,
    Calibrated(Box<CalibrationResult>),
}

/// Alignment correction
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    /// Corrected modes
    pub modes: ModeSet,
    /// Measured minus target modal coefficients
    pub modal_error: Vec<f64>,
    /// Full command
    pub command: Vec<f64>,
    /// Devices share of the full command
    pub device_commands: Vec<Vec<f64>>,
}

impl Display for Correction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "modal error {}:", self.modes)?;
        for (m, e) in self.modes.iter().zip(&self.modal_error) {
            writeln!(f, " Z{m:<3}: {e:+.3E}")?;
        }
        write!(f, "command: {:?}", self.command)
    }
}

/// [Alignment] builder
pub struct AlignmentBuilder<A, D> {
    mapper: DeviceCommandMapper,
    sensor: ModalSensor<A, D>,
    command_matrix: Option<CommandMatrix>,
    template: Template,
    n_frames: usize,
    rcond: f64,
    data_repo: DataRepo,
}

impl<A: Acquisition, D: Decompose> AlignmentBuilder<A, D> {
    /// Sets the command matrix (default: all the entries of the full command)
    pub fn command_matrix(mut self, command_matrix: CommandMatrix) -> Self {
        self.command_matrix = Some(command_matrix);
        self
    }
    /// Sets the default push-pull template (default: `[+1, -1]`)
    pub fn template(mut self, template: Template) -> Self {
        self.template = template;
        self
    }
    /// Sets the number of frames averaged per calibration measurement (default: 15)
    pub fn n_frames(mut self, n_frames: usize) -> Self {
        self.n_frames = n_frames;
        self
    }
    /// Sets the relative threshold of the singular values of the interaction matrix
    pub fn rcond(mut self, rcond: f64) -> Self {
        self.rcond = rcond;
        self
    }
    /// Sets the data repository (default: current directory)
    pub fn data_repo(mut self, data_repo: DataRepo) -> Self {
        self.data_repo = data_repo;
        self
    }
    pub fn build(self) -> Result<Alignment<A, D>> {
        let n_dof = self.mapper.n_dof();
        let command_matrix = match self.command_matrix {
            Some(command_matrix) => command_matrix,
            None => CommandMatrix::identity(n_dof)?,
        };
        if command_matrix.n_dof() != n_dof {
            return Err(AlignmentError::command_shape(
                "command matrix",
                n_dof,
                command_matrix.n_dof(),
            ));
        }
        if self.n_frames == 0 {
            return Err(AlignmentError::Selection("0 frame to acquire".into()));
        }
        Ok(Alignment {
            mapper: self.mapper,
            sensor: self.sensor,
            command_matrix,
            template: self.template,
            n_frames: self.n_frames,
            rcond: self.rcond,
            data_repo: self.data_repo,
            state: CalibrationState::Uncalibrated,
        })
    }
}

/// Alignment engine
pub struct Alignment<A, D = ModalFit> {
    mapper: DeviceCommandMapper,
    sensor: ModalSensor<A, D>,
    command_matrix: CommandMatrix,
    template: Template,
    n_frames: usize,
    rcond: f64,
    data_repo: DataRepo,
    state: CalibrationState,
}

impl<A: Acquisition> Alignment<A, ModalFit> {
    /// Creates the engine from the configuration
    ///
    /// `drivers` are the devices drivers in the order of the configuration devices.
    /// The reference geometry is loaded if the configuration gives one.
    pub fn from_config(
        config: &AlignmentConfig,
        drivers: Vec<Box<dyn Actuator>>,
        acquisition: A,
    ) -> Result<Self> {
        config.validate()?;
        if drivers.len() != config.devices.len() {
            return Err(AlignmentError::Layout(format!(
                "{} drivers for {} devices",
                drivers.len(),
                config.devices.len()
            )));
        }
        let mapper =
            DeviceCommandMapper::new(config.devices.iter().cloned().zip(drivers).collect())?
                .skip_null_commands(config.calibration.skip_null_commands);
        let decomposer = ModalFit::zernike(
            config.sensor.n_xy,
            config.calibration.n_fit,
            config.calibration.modes.clone(),
        )?;
        let mut this = Self::builder(mapper, ModalSensor::new(acquisition, decomposer))
            .command_matrix(config.command_matrix()?)
            .template(config.calibration.template()?)
            .n_frames(config.calibration.n_frames)
            .rcond(config.calibration.rcond)
            .data_repo(config.data_repo())
            .build()?;
        if let Some(path) = &config.paths.calibrated_parabola {
            this.reload_parabola_tn(path)?;
        }
        Ok(this)
    }
}

impl<A: Acquisition, D: Decompose> Alignment<A, D> {
    pub fn builder(
        mapper: DeviceCommandMapper,
        sensor: ModalSensor<A, D>,
    ) -> AlignmentBuilder<A, D> {
        AlignmentBuilder {
            mapper,
            sensor,
            command_matrix: None,
            template: Template::default(),
            n_frames: 15,
            rcond: RCOND,
            data_repo: DataRepo::new(".", "."),
        }
    }
    pub fn state(&self) -> &CalibrationState {
        &self.state
    }
    pub fn is_calibrated(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrated(_))
    }
    /// Current calibration
    pub fn calibration(&self) -> Option<&CalibrationResult> {
        match &self.state {
            CalibrationState::Calibrated(calibration) => Some(calibration),
            CalibrationState::Uncalibrated => None,
        }
    }
    pub fn command_matrix(&self) -> &CommandMatrix {
        &self.command_matrix
    }
    pub fn mapper(&self) -> &DeviceCommandMapper {
        &self.mapper
    }
    pub fn sensor(&self) -> &ModalSensor<A, D> {
        &self.sensor
    }
    pub fn data_repo(&self) -> &DataRepo {
        &self.data_repo
    }
    /// Calibrates the alignment
    ///
    /// Each channel of the command matrix is push-pulled with the command amplitude
    /// given in `cmd_amp` following the `template` (the default one if `None`) repeated
    /// `n_repetitions` times.
    /// On success, the calibration replaces the current one, on failure the current
    /// calibration is left untouched.
    pub fn calibrate_alignment(
        &mut self,
        cmd_amp: &[f64],
        template: Option<Template>,
        n_repetitions: usize,
    ) -> Result<&CalibrationResult> {
        let template = template.unwrap_or_else(|| self.template.clone());
        log::info!(
            "calibrating {} channels with template {:?} x{n_repetitions}",
            self.command_matrix.n_channel(),
            template.offsets()
        );
        let interaction = PushPull::new(&template, n_repetitions, self.n_frames)?.calibrate(
            &mut self.mapper,
            &mut self.sensor,
            &self.command_matrix,
            cmd_amp,
        )?;
        log::info!("{interaction}");
        let reconstruction = ReconstructionMatrix::build(&interaction, None, None, self.rcond)?;
        let calibration = CalibrationResult {
            interaction,
            reconstruction,
            command_matrix: self.command_matrix.clone(),
            amplitudes: cmd_amp.to_vec(),
            template,
            n_repetitions,
        };
        self.state = CalibrationState::Calibrated(Box::new(calibration));
        self.calibration().ok_or(AlignmentError::NotCalibrated)
    }
    /// Computes the correction of the alignment without moving the devices
    ///
    /// The modal error is the difference between the measured coefficients of `modes2correct`
    /// and the target coefficients `zern2correct`.
    /// The full command is the negated reconstruction of the modal error.
    pub fn correction(
        &mut self,
        modes2correct: &ModeSet,
        zern2correct: &[f64],
        n_frames: usize,
    ) -> Result<Correction> {
        let CalibrationState::Calibrated(calibration) = &self.state else {
            return Err(AlignmentError::NotCalibrated);
        };
        if zern2correct.len() != modes2correct.len() {
            return Err(AlignmentError::command_shape(
                format!("target coefficients of {modes2correct}"),
                modes2correct.len(),
                zern2correct.len(),
            ));
        }
        let reconstruction = calibration.reconstruction_for(modes2correct)?;
        let rows = self.sensor.modes().positions(modes2correct)?;
        let measured = self.sensor.sense(n_frames)?;
        let modal_error: Vec<f64> = rows
            .iter()
            .zip(zern2correct)
            .map(|(&i, target)| measured[i] - target)
            .collect();
        let channels_cmd: Vec<f64> = reconstruction
            .reconstruct(&modal_error)?
            .into_iter()
            .map(|x| -x)
            .collect();
        let command = calibration
            .command_matrix
            .expand(reconstruction.channels(), &channels_cmd)?;
        let device_commands = self.mapper.split(&command)?;
        let correction = Correction {
            modes: modes2correct.clone(),
            modal_error,
            command,
            device_commands,
        };
        log::info!("{correction}");
        Ok(correction)
    }
    /// Corrects the alignment
    ///
    /// The [correction](Alignment::correction) is applied to the devices.
    /// If any device fails, all the devices are moved back to their positions
    /// before the correction.
    pub fn correct_alignment(
        &mut self,
        modes2correct: &ModeSet,
        zern2correct: &[f64],
        n_frames: usize,
    ) -> Result<Correction> {
        let correction = self.correction(modes2correct, zern2correct, n_frames)?;
        let mut perturbation = Perturbation::new(&mut self.mapper)?;
        perturbation.set(&correction.command)?;
        perturbation.commit();
        for (name, cmd) in self.mapper.names().zip(&correction.device_commands) {
            log::info!("{name} moved by {cmd:?}");
        }
        Ok(correction)
    }
    /// Reads the positions of the devices degrees of freedom
    pub fn read_positions(&mut self) -> Result<Vec<f64>> {
        let positions = self.mapper.read_all()?;
        for (name, position) in self.mapper.names().zip(self.mapper.split(&positions)?) {
            log::info!("{name}: {position:?}");
        }
        Ok(positions)
    }
    /// Loads the reference geometry
    ///
    /// The valid pixels of the reference image restrict the decomposition pupil.
    /// The path is relative to the data repository read path.
    /// The calibration is left untouched.
    pub fn reload_parabola_tn(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let reference: Image = self.data_repo.load(path.as_ref())?;
        self.sensor.set_reference(reference)?;
        log::info!("reference geometry loaded from {:?}", path.as_ref());
        Ok(())
    }
    /// Saves the calibration into a new tracking number directory
    ///
    /// Returns the path to the calibration file
    pub fn save_calibration(&self, overwrite: bool) -> Result<PathBuf> {
        self.save_calibration_as(&DataRepo::tracking_number(), overwrite)
    }
    /// Saves the calibration into the given tracking number directory
    pub fn save_calibration_as(&self, tracking_number: &str, overwrite: bool) -> Result<PathBuf> {
        let calibration = self.calibration().ok_or(AlignmentError::NotCalibrated)?;
        Ok(self
            .data_repo
            .save_as(calibration, tracking_number, CALIBRATION_FILE, overwrite)?)
    }
    /// Loads a saved calibration
    ///
    /// The path is relative to the data repository read path.
    /// The calibration must match the devices and the sensor modes,
    /// otherwise the current calibration is left untouched.
    pub fn reload_calibration(&mut self, path: impl AsRef<Path>) -> Result<&CalibrationResult> {
        let calibration: CalibrationResult = self.data_repo.load(path.as_ref())?;
        calibration.check(self.mapper.n_dof())?;
        if !calibration.modes().is_subset(self.sensor.modes()) {
            return Err(AlignmentError::Selection(format!(
                "calibrated modes {} are not measured by the sensor ({})",
                calibration.modes(),
                self.sensor.modes()
            )));
        }
        log::info!("calibration loaded from {:?}", path.as_ref());
        self.state = CalibrationState::Calibrated(Box::new(calibration));
        self.calibration().ok_or(AlignmentError::NotCalibrated)
    }
}

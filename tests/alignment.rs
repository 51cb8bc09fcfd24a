use approx::assert_abs_diff_eq;
use optalign::{
    Acquisition, AcquisitionError, Actuator, Alignment, AlignmentError, CapabilityError, DataRepo,
    DecompositionError, DeviceCommandMapper, DeviceLayout, Filing, FilingError, Image, ModalFit,
    ModalSensor, ModeSet,
};
use std::{cell::RefCell, path::Path, rc::Rc};

#[derive(Clone, Default)]
struct Stage {
    position: Rc<RefCell<f64>>,
    fail: Rc<RefCell<bool>>,
}
impl Actuator for Stage {
    fn move_to(&mut self, position: &[f64]) -> Result<(), CapabilityError> {
        if *self.fail.borrow() {
            return Err("stage is stuck".into());
        }
        *self.position.borrow_mut() = position[0];
        Ok(())
    }
    fn position(&mut self) -> Result<Vec<f64>, CapabilityError> {
        Ok(vec![*self.position.borrow()])
    }
}

// piston, x and y tilts on a 6x6 grid
fn fit() -> ModalFit {
    let n = 6;
    let c = (n - 1) as f64 / 2.;
    let mut basis = vec![1f64; n * n];
    basis.extend((0..n * n).map(|i| (i % n) as f64 - c));
    basis.extend((0..n * n).map(|i| (i / n) as f64 - c));
    ModalFit::new(n, n, basis, vec![1, 2, 3], ModeSet::new(vec![2, 3]).unwrap()).unwrap()
}

type Acq = Box<dyn FnMut(usize) -> Result<Vec<Image>, CapabilityError>>;

/// Sensor failure once the acquisition budget is spent
#[derive(Clone, Copy, Default)]
enum Fault {
    #[default]
    MissingFrame,
    WrongShape,
}

/// Optical system with the tilts `A p + bias` of the stages positions `p`
struct System {
    stages: Vec<Stage>,
    a: [[f64; 2]; 2],
    bias: [f64; 2],
    // number of acquisitions before the sensor fails
    budget: Rc<RefCell<Option<usize>>>,
    fault: Rc<RefCell<Fault>>,
    // the stages have no effect on the wavefront
    frozen: Rc<RefCell<bool>>,
}

impl System {
    fn new(a: [[f64; 2]; 2], bias: [f64; 2]) -> Self {
        Self {
            stages: vec![Stage::default(), Stage::default()],
            a,
            bias,
            budget: Default::default(),
            fault: Default::default(),
            frozen: Default::default(),
        }
    }
    fn positions(&self) -> Vec<f64> {
        self.stages.iter().map(|s| *s.position.borrow()).collect()
    }
    fn acquisition(&self) -> Acq {
        let stages = self.stages.clone();
        let (a, bias) = (self.a, self.bias);
        let (budget, fault, frozen) = (
            self.budget.clone(),
            self.fault.clone(),
            self.frozen.clone(),
        );
        let decomposer = fit();
        Box::new(move |n_frames: usize| -> Result<Vec<Image>, CapabilityError> {
            let p: Vec<f64> = if *frozen.borrow() {
                vec![0.; 2]
            } else {
                stages.iter().map(|s| *s.position.borrow()).collect()
            };
            let tilts: Vec<f64> = (0..2)
                .map(|i| a[i][0] * p[0] + a[i][1] * p[1] + bias[i])
                .collect();
            let image = decomposer.synthesize(&[1.5, tilts[0], tilts[1]])?;
            let n = match budget.borrow_mut().as_mut() {
                Some(0) => match *fault.borrow() {
                    Fault::MissingFrame => n_frames - 1,
                    Fault::WrongShape => return Ok(vec![Image::new(4, 9, vec![0.; 36])?; n_frames]),
                },
                Some(k) => {
                    *k -= 1;
                    n_frames
                }
                None => n_frames,
            };
            Ok(vec![image; n])
        })
    }
    fn alignment(&self, data_repo: &Path) -> anyhow::Result<Alignment<Acq>> {
        let mapper = DeviceCommandMapper::new(vec![
            (
                DeviceLayout::new("Parabola", 1),
                Box::new(self.stages[0].clone()) as Box<dyn Actuator>,
            ),
            (
                DeviceLayout::new("Reference Mirror", 1),
                Box::new(self.stages[1].clone()),
            ),
        ])?;
        Ok(
            Alignment::builder(mapper, ModalSensor::new(self.acquisition(), fit()))
                .n_frames(3)
                .data_repo(DataRepo::new(data_repo, data_repo))
                .build()?,
        )
    }
}

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const A: [[f64; 2]; 2] = [[2., 1.], [-1., 3.]];
const A_INV: [[f64; 2]; 2] = [[3. / 7., -1. / 7.], [1. / 7., 2. / 7.]];

#[test]
fn two_devices_alignment() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0.05, -0.02]);
    let mut alignment = system.alignment(dir.path())?;

    let calibration = alignment.calibrate_alignment(&[0.1, 0.1], None, 2)?;
    let rm = calibration.reconstruction.mat_ref();
    for i in 0..2 {
        for j in 0..2 {
            assert_abs_diff_eq!(rm.read(i, j), A_INV[i][j], epsilon = 1e-9);
        }
    }
    assert_eq!(system.positions(), vec![0., 0.]);

    let modes = ModeSet::new(vec![2, 3])?;
    let correction = alignment.correct_alignment(&modes, &[0., 0.], 15)?;
    assert_abs_diff_eq!(correction.modal_error[0], 0.05, epsilon = 1e-9);
    assert_abs_diff_eq!(correction.modal_error[1], -0.02, epsilon = 1e-9);
    let expected: Vec<f64> = A_INV
        .iter()
        .map(|row| -(row[0] * 0.05 - row[1] * 0.02))
        .collect();
    for (k, &x) in expected.iter().enumerate() {
        assert_abs_diff_eq!(correction.command[k], x, epsilon = 1e-9);
        assert_abs_diff_eq!(correction.device_commands[k][0], x, epsilon = 1e-9);
        assert_abs_diff_eq!(system.positions()[k], x, epsilon = 1e-9);
    }
    assert_eq!(alignment.read_positions()?, system.positions());

    // aligned: nothing left to correct
    let correction = alignment.correct_alignment(&modes, &[0., 0.], 15)?;
    correction
        .command
        .iter()
        .for_each(|x| assert_abs_diff_eq!(*x, 0., epsilon = 1e-9));
    Ok(())
}

#[test]
fn fixed_point() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0.03, 0.01]);
    let mut alignment = system.alignment(dir.path())?;
    alignment.calibrate_alignment(&[0.1, 0.1], None, 1)?;
    let modes = ModeSet::new(vec![2, 3])?;
    let correction = alignment.correct_alignment(&modes, &[0.03, 0.01], 1)?;
    correction
        .command
        .iter()
        .for_each(|x| assert_abs_diff_eq!(*x, 0., epsilon = 1e-12));
    Ok(())
}

#[test]
fn wrong_amplitudes() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0., 0.]);
    let mut alignment = system.alignment(dir.path())?;
    assert!(matches!(
        alignment.calibrate_alignment(&[0.1], None, 1),
        Err(AlignmentError::CommandShape { .. })
    ));
    assert!(!alignment.is_calibrated());

    let before = alignment.calibrate_alignment(&[0.1, 0.1], None, 1)?.clone();
    assert!(matches!(
        alignment.calibrate_alignment(&[0.1, 0.1, 0.1], None, 1),
        Err(AlignmentError::CommandShape {
            expected: 2,
            found: 3,
            ..
        })
    ));
    assert_eq!(alignment.calibration(), Some(&before));
    Ok(())
}

#[test]
fn acquisition_shortfall() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0., 0.]);
    let mut alignment = system.alignment(dir.path())?;
    alignment.calibrate_alignment(&[0.1, 0.1], None, 1)?;
    let before = alignment.calibration().cloned();

    // the pull of the 2nd channel is short of frames
    *system.budget.borrow_mut() = Some(3);
    let err = alignment
        .calibrate_alignment(&[0.2, 0.2], None, 1)
        .unwrap_err();
    assert!(matches!(err, AlignmentError::Channel { channel: 1, .. }));
    assert!(matches!(
        err.root(),
        AlignmentError::Acquisition(AcquisitionError::MissingFrames {
            expected: 3,
            found: 2
        })
    ));
    assert_eq!(system.positions(), vec![0., 0.]);
    assert_eq!(alignment.calibration().cloned(), before);
    Ok(())
}

#[test]
fn decomposition_failure() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0.05, -0.02]);
    let mut alignment = system.alignment(dir.path())?;
    alignment.calibrate_alignment(&[0.1, 0.1], None, 1)?;
    let before = alignment.calibration().cloned();

    // the push of the 2nd channel is a wrong size image
    *system.fault.borrow_mut() = Fault::WrongShape;
    *system.budget.borrow_mut() = Some(2);
    let err = alignment
        .calibrate_alignment(&[0.2, 0.2], None, 1)
        .unwrap_err();
    assert!(matches!(err, AlignmentError::Channel { channel: 1, .. }));
    assert!(matches!(
        err.root(),
        AlignmentError::Decomposition(DecompositionError::Shape {
            expected: (6, 6),
            found: (4, 9)
        })
    ));
    assert_eq!(system.positions(), vec![0., 0.]);
    assert_eq!(alignment.calibration().cloned(), before);
    Ok(())
}

#[test]
fn singular_system() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0.05, -0.02]);
    let mut alignment = system.alignment(dir.path())?;
    alignment.calibrate_alignment(&[0.1, 0.1], None, 1)?;
    let before = alignment.calibration().cloned();

    *system.frozen.borrow_mut() = true;
    assert!(matches!(
        alignment.calibrate_alignment(&[0.1, 0.1], None, 1),
        Err(AlignmentError::SingularSystem {
            n_rows: 2,
            n_cols: 2
        })
    ));
    assert_eq!(alignment.calibration().cloned(), before);
    assert_eq!(system.positions(), vec![0., 0.]);
    Ok(())
}

#[test]
fn actuation_failure_restores_devices() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0.05, -0.02]);
    let mut alignment = system.alignment(dir.path())?;
    alignment.calibrate_alignment(&[0.1, 0.1], None, 1)?;

    *system.stages[1].fail.borrow_mut() = true;
    let modes = ModeSet::new(vec![2, 3])?;
    assert!(matches!(
        alignment.correct_alignment(&modes, &[0., 0.], 1),
        Err(AlignmentError::Actuation { device: 1, .. })
    ));
    assert_eq!(system.positions(), vec![0., 0.]);
    Ok(())
}

#[test]
fn reference_geometry() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0.05, -0.02]);
    let mut alignment = system.alignment(dir.path())?;
    alignment.calibrate_alignment(&[0.1, 0.1], None, 1)?;
    let before = alignment.calibration().cloned();

    let err = alignment.reload_parabola_tn("missing/parabola.bin").unwrap_err();
    assert!(matches!(err, AlignmentError::Filing(FilingError::Open(..))));
    assert!(alignment.sensor().reference().is_none());
    assert_eq!(alignment.calibration().cloned(), before);

    let mut mask = vec![true; 36];
    mask[..6].iter_mut().for_each(|m| *m = false);
    let parabola = Image::new(6, 6, vec![0.; 36])?.with_mask(mask)?;
    parabola.to_path(dir.path().join("parabola.bin"))?;
    Image::new(4, 9, vec![0.; 36])?.to_path(dir.path().join("wrong.bin"))?;

    assert!(alignment.reload_parabola_tn("wrong.bin").is_err());
    assert!(alignment.sensor().reference().is_none());
    alignment.reload_parabola_tn("parabola.bin")?;
    assert_eq!(alignment.sensor().reference(), Some(&parabola));
    assert_eq!(alignment.calibration().cloned(), before);

    // the tilts are still measured on the reference pupil
    let modes = ModeSet::new(vec![2, 3])?;
    let correction = alignment.correction(&modes, &[0., 0.], 1)?;
    assert_abs_diff_eq!(correction.modal_error[0], 0.05, epsilon = 1e-9);
    assert_eq!(system.positions(), vec![0., 0.]);
    Ok(())
}

#[test]
fn save_and_reload_calibration() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let system = System::new(A, [0.05, -0.02]);
    let mut alignment = system.alignment(dir.path())?;
    let calibration = alignment.calibrate_alignment(&[0.1, 0.1], None, 1)?.clone();

    let path = alignment.save_calibration_as("20240101_120000", false)?;
    assert!(path.starts_with(dir.path().join("20240101_120000")));
    assert!(matches!(
        alignment.save_calibration_as("20240101_120000", false),
        Err(AlignmentError::Filing(FilingError::Exists(_)))
    ));
    alignment.save_calibration_as("20240101_120000", true)?;

    let other = System::new(A, [0.05, -0.02]);
    let mut reloaded = other.alignment(dir.path())?;
    let loaded = reloaded.reload_calibration("20240101_120000/calibration.bin")?;
    assert_eq!(loaded, &calibration);

    let modes = ModeSet::new(vec![2, 3])?;
    let correction = reloaded.correct_alignment(&modes, &[0., 0.], 1)?;
    assert_abs_diff_eq!(
        other.positions()[0],
        -(A_INV[0][0] * 0.05 - A_INV[0][1] * 0.02),
        epsilon = 1e-9
    );
    assert_eq!(correction.device_commands.len(), 2);
    Ok(())
}

#[test]
fn acquisition_closure() {
    let system = System::new(A, [0., 0.]);
    let mut acquisition = system.acquisition();
    assert_eq!(acquisition.acquire(4).unwrap().len(), 4);
}

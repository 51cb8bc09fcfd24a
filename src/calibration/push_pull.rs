use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use super::{CommandMatrix, InteractionMatrix, Template};
use crate::{
    device::{DeviceCommandMapper, Perturbation},
    error::{AlignmentError, Result},
    modes::ModeSet,
};

/// Modal measurement interface
pub trait Sense {
    /// Modes of the measured modal vector
    fn modes(&self) -> &ModeSet;
    /// Returns the modal vector of the average of `n_frames` frames
    fn sense(&mut self, n_frames: usize) -> Result<Vec<f64>>;
}

/// Push-pull redux
///
/// `responses` are the modal vectors measured at each offset of the `template`
/// repeated `responses.len() / template.len()` times.
/// Returns the least-square slope of the modal vectors versus the offsets scaled by
/// the command `amplitude`, i.e. the [template weights](Template::weights) applied to
/// the responses and divided by the number of repetitions and by `amplitude`.
/// For a `[+1, -1]` template repeated `n` times, it is `Σ (push - pull) / (2 amplitude n)`.
pub fn push_pull_redux(template: &Template, responses: &[Vec<f64>], amplitude: f64) -> Vec<f64> {
    let Some(first) = responses.first() else {
        return vec![];
    };
    let n_repetitions = (responses.len() / template.len()).max(1) as f64;
    let weights = template.weights();
    responses
        .iter()
        .zip(weights.iter().cycle())
        .fold(vec![0f64; first.len()], |mut slope, (y, w)| {
            let w = w / (n_repetitions * amplitude);
            slope.iter_mut().zip(y).for_each(|(s, y)| *s += w * y);
            slope
        })
}

/// Push-pull calibration
#[derive(Debug, Clone)]
pub struct PushPull<'a> {
    template: &'a Template,
    n_repetitions: usize,
    n_frames: usize,
}

impl<'a> PushPull<'a> {
    /// Creates a new push-pull sequence
    ///
    /// The `template` is repeated `n_repetitions` times and `n_frames` frames are acquired
    /// and averaged for each offset.
    pub fn new(template: &'a Template, n_repetitions: usize, n_frames: usize) -> Result<Self> {
        if n_repetitions == 0 {
            return Err(AlignmentError::Template("0 repetition".into()));
        }
        if n_frames == 0 {
            return Err(AlignmentError::Selection("0 frame to acquire".into()));
        }
        Ok(Self {
            template,
            n_repetitions,
            n_frames,
        })
    }
    /// Measures the modal response of a single channel
    ///
    /// The devices are offset along `direction` by the template offsets times
    /// `amplitude` and restored to their initial positions before returning.
    pub fn push_pull<S: Sense>(
        &self,
        perturbation: &mut Perturbation<'_>,
        sensor: &mut S,
        direction: &[f64],
        amplitude: f64,
    ) -> Result<Vec<f64>> {
        let mut responses = Vec::with_capacity(self.template.len() * self.n_repetitions);
        for r in 0..self.n_repetitions {
            log::debug!("repetition #{r}");
            for &t in self.template.iter() {
                let offset: Vec<f64> = direction.iter().map(|d| d * amplitude * t).collect();
                log::debug!("t = {t:+} - full command: {offset:?}");
                perturbation.set(&offset)?;
                responses.push(sensor.sense(self.n_frames)?);
            }
        }
        perturbation.restore()?;
        Ok(push_pull_redux(self.template, &responses, amplitude))
    }
    /// Measures the interaction matrix of the channels of the command matrix
    ///
    /// If any channel fails, the devices are restored to their initial positions
    /// and the calibration is aborted.
    pub fn calibrate<S: Sense>(
        &self,
        mapper: &mut DeviceCommandMapper,
        sensor: &mut S,
        command_matrix: &CommandMatrix,
        amplitudes: &[f64],
    ) -> Result<InteractionMatrix> {
        let n_channel = command_matrix.n_channel();
        if amplitudes.len() != n_channel {
            return Err(AlignmentError::command_shape(
                "command amplitudes",
                n_channel,
                amplitudes.len(),
            ));
        }
        if command_matrix.n_dof() != mapper.n_dof() {
            return Err(AlignmentError::command_shape(
                "command matrix",
                mapper.n_dof(),
                command_matrix.n_dof(),
            ));
        }
        if let Some(k) = amplitudes.iter().position(|a| *a == 0f64 || !a.is_finite()) {
            return Err(AlignmentError::Selection(format!(
                "invalid amplitude {} for channel #{}",
                amplitudes[k],
                command_matrix.labels()[k]
            )));
        }

        let pb = ProgressBar::new(n_channel as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{msg} [{eta_precise}] {bar:30.cyan/blue} {pos:>7}/{len:7}",
        ) {
            pb.set_style(style);
        }
        pb.set_message("Calibrating channels");

        let now = Instant::now();
        let mut perturbation = Perturbation::new(mapper)?;
        let mut columns = Vec::with_capacity(n_channel);
        for (k, (&label, &amplitude)) in command_matrix.labels().iter().zip(amplitudes).enumerate()
        {
            log::info!(
                "channel #{label} ({}/{n_channel}): {:?} x {amplitude}",
                k + 1,
                command_matrix.direction(k)
            );
            let column = self
                .push_pull(
                    &mut perturbation,
                    sensor,
                    command_matrix.direction(k),
                    amplitude,
                )
                .map_err(|e| AlignmentError::Channel {
                    channel: label,
                    source: Box::new(e),
                });
            let column = match column {
                Ok(column) => column,
                Err(e) => {
                    pb.abandon_with_message(format!("Calibration of channel #{label} failed"));
                    return Err(e);
                }
            };
            log::info!("channel #{label} response: {column:?}");
            columns.push(column);
            pb.inc(1);
        }
        pb.finish_with_message(format!("Calibrated {n_channel} channels"));

        InteractionMatrix::builder()
            .columns(columns)
            .modes(sensor.modes().clone())
            .channels(command_matrix.labels().to_vec())
            .runtime(now.elapsed())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{tests::Stage, Actuator, DeviceLayout};
    use approx::assert_abs_diff_eq;
    use std::{cell::RefCell, rc::Rc};

    /// Linear modal sensor `y = A p + b` of the stages positions `p`
    pub struct LinearSensor {
        pub stages: Vec<Stage>,
        pub a: Vec<Vec<f64>>,
        pub bias: Vec<f64>,
        pub modes: ModeSet,
        pub count: Rc<RefCell<usize>>,
    }
    impl Sense for LinearSensor {
        fn modes(&self) -> &ModeSet {
            &self.modes
        }
        fn sense(&mut self, _n_frames: usize) -> Result<Vec<f64>> {
            *self.count.borrow_mut() += 1;
            let p: Vec<f64> = self
                .stages
                .iter()
                .flat_map(|s| s.position.borrow().clone())
                .collect();
            Ok(self
                .a
                .iter()
                .zip(&self.bias)
                .map(|(row, b)| row.iter().zip(&p).map(|(a, p)| a * p).sum::<f64>() + b)
                .collect())
        }
    }

    fn setup() -> (DeviceCommandMapper, LinearSensor) {
        let stages = vec![Stage::new(1), Stage::new(1)];
        let mapper = DeviceCommandMapper::new(vec![
            (
                DeviceLayout::new("A", 1),
                Box::new(stages[0].clone()) as Box<dyn Actuator>,
            ),
            (DeviceLayout::new("B", 1), Box::new(stages[1].clone())),
        ])
        .unwrap();
        let sensor = LinearSensor {
            stages,
            a: vec![vec![2., 1.], vec![-1., 3.]],
            bias: vec![0.7, -0.3],
            modes: ModeSet::new(vec![2, 3]).unwrap(),
            count: Default::default(),
        };
        (mapper, sensor)
    }

    #[test]
    fn redux_push_pull() {
        let responses = vec![vec![3., 1.], vec![1., 1.], vec![3.2, 1.], vec![0.8, 1.]];
        let slope = push_pull_redux(&Template::default(), &responses, 0.5);
        // Σ(push - pull) / (2 x 0.5 x 2)
        assert_abs_diff_eq!(slope[0], (2. + 2.4) / 2., epsilon = 1e-12);
        assert_abs_diff_eq!(slope[1], 0., epsilon = 1e-12);
    }

    #[test]
    fn redux_antisymmetry() {
        let responses = vec![vec![3., -1.], vec![1., 2.], vec![5., 5.]];
        let template = Template::new(vec![1., -1., 0.]).unwrap();
        let negated = Template::new(vec![-1., 1., 0.]).unwrap();
        let slope = push_pull_redux(&template, &responses, 0.1);
        let neg_slope = push_pull_redux(&negated, &responses, 0.1);
        slope
            .iter()
            .zip(&neg_slope)
            .for_each(|(s, n)| assert_abs_diff_eq!(*s, -n, epsilon = 1e-12));
    }

    #[test]
    fn calibrate_linear_system() {
        let (mut mapper, mut sensor) = setup();
        mapper.apply(&[0.2, -0.1]).unwrap();
        let template = Template::default();
        let pp = PushPull::new(&template, 2, 1).unwrap();
        let cm = CommandMatrix::identity(2).unwrap();
        let im = pp
            .calibrate(&mut mapper, &mut sensor, &cm, &[0.1, 0.1])
            .unwrap();
        assert_abs_diff_eq!(im.column(0)[0], 2., epsilon = 1e-10);
        assert_abs_diff_eq!(im.column(0)[1], -1., epsilon = 1e-10);
        assert_abs_diff_eq!(im.column(1)[0], 1., epsilon = 1e-10);
        assert_abs_diff_eq!(im.column(1)[1], 3., epsilon = 1e-10);
        assert_eq!(*sensor.count.borrow(), 2 * 2 * 2);
        // devices back to their initial positions
        assert_eq!(mapper.read_all().unwrap(), vec![0.2, -0.1]);
    }

    #[test]
    fn template_independent_response() {
        let (mut mapper, mut sensor) = setup();
        let cm = CommandMatrix::identity(2).unwrap();
        let template = Template::default();
        let im = PushPull::new(&template, 1, 1)
            .unwrap()
            .calibrate(&mut mapper, &mut sensor, &cm, &[0.1, 0.2])
            .unwrap();
        for offsets in [vec![-1., 1.], vec![1., -1., 0.5, 0.]] {
            let template = Template::new(offsets).unwrap();
            let other = PushPull::new(&template, 1, 1)
                .unwrap()
                .calibrate(&mut mapper, &mut sensor, &cm, &[-0.1, 0.2])
                .unwrap();
            // a linear system response does not depend on the probing sequence
            im.c.iter()
                .zip(&other.c)
                .for_each(|(a, b)| assert_abs_diff_eq!(*a, b, epsilon = 1e-9));
        }
    }

    #[test]
    fn amplitudes_length() {
        let (mut mapper, mut sensor) = setup();
        let cm = CommandMatrix::identity(2).unwrap();
        let template = Template::default();
        let result = PushPull::new(&template, 1, 1)
            .unwrap()
            .calibrate(&mut mapper, &mut sensor, &cm, &[0.1]);
        assert!(matches!(
            result,
            Err(AlignmentError::CommandShape {
                expected: 2,
                found: 1,
                ..
            })
        ));
        assert_eq!(*sensor.count.borrow(), 0);
    }
}

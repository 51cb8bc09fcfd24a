//! Modal wavefront sensor

use crate::{
    acquisition::{acquire_average, Acquisition},
    calibration::Sense,
    decomposer::{Decompose, DecompositionError},
    error::Result,
    image::Image,
    modes::ModeSet,
};

/// Image acquisition followed by a modal decomposition
///
/// If a reference geometry is set, its valid pixels restrict the decomposition pupil.
pub struct ModalSensor<A, D> {
    acquisition: A,
    decomposer: D,
    reference: Option<Image>,
}

impl<A: Acquisition, D: Decompose> ModalSensor<A, D> {
    pub fn new(acquisition: A, decomposer: D) -> Self {
        Self {
            acquisition,
            decomposer,
            reference: None,
        }
    }
    /// Sets the reference geometry
    ///
    /// The reference is rejected and the previous one is kept if its shape
    /// does not match the decomposition.
    pub fn set_reference(&mut self, reference: Image) -> Result<Option<Image>> {
        if reference.shape() != self.decomposer.shape() {
            return Err(DecompositionError::Shape {
                expected: self.decomposer.shape(),
                found: reference.shape(),
            }
            .into());
        }
        log::info!(
            "reference geometry: {} valid pixels",
            reference.valid().filter(|v| *v).count()
        );
        Ok(self.reference.replace(reference))
    }
    pub fn reference(&self) -> Option<&Image> {
        self.reference.as_ref()
    }
    pub fn decomposer(&self) -> &D {
        &self.decomposer
    }
    pub fn acquisition_mut(&mut self) -> &mut A {
        &mut self.acquisition
    }
    /// Decomposes an image on the sensor modes
    pub fn decompose(&self, image: &Image) -> Result<Vec<f64>> {
        let pupil: Option<Vec<bool>> = self.reference.as_ref().map(|r| r.valid().collect());
        Ok(self.decomposer.decompose(image, pupil.as_deref())?)
    }
}

impl<A: Acquisition, D: Decompose> Sense for ModalSensor<A, D> {
    fn modes(&self) -> &ModeSet {
        self.decomposer.modes()
    }
    fn sense(&mut self, n_frames: usize) -> Result<Vec<f64>> {
        let image = acquire_average(&mut self.acquisition, n_frames)?;
        self.decompose(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decomposer::ModalFit, error::CapabilityError, AlignmentError};
    use approx::assert_abs_diff_eq;

    fn fit() -> ModalFit {
        let n = 4;
        let mut b = vec![1f64; n * n];
        b.extend((0..n * n).map(|i| (i % n) as f64 - 1.5));
        ModalFit::new(4, 4, b, vec![1, 2], ModeSet::new(vec![2]).unwrap()).unwrap()
    }

    #[test]
    fn sense_average() {
        let image = fit().synthesize(&[3., 0.25]).unwrap();
        let acquisition = move |n: usize| -> std::result::Result<Vec<Image>, CapabilityError> {
            Ok(vec![image.clone(); n])
        };
        let mut sensor = ModalSensor::new(acquisition, fit());
        let y = sensor.sense(5).unwrap();
        assert_abs_diff_eq!(y[0], 0.25, epsilon = 1e-10);
    }

    #[test]
    fn reference_shape() {
        let acquisition =
            |_: usize| -> std::result::Result<Vec<Image>, CapabilityError> { Ok(vec![]) };
        let mut sensor = ModalSensor::new(acquisition, fit());
        let reference = Image::new(2, 8, vec![0.; 16]).unwrap();
        assert!(sensor.set_reference(reference).is_err());
        assert!(sensor.reference().is_none());
        assert!(matches!(
            sensor.sense(1),
            Err(AlignmentError::Acquisition(_))
        ));
    }
}

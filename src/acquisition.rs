//! Image acquisition capability

use crate::{
    error::CapabilityError,
    image::{Image, ImageError},
};

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("the sensor failed to acquire {n_frames} frames")]
    Sensor {
        n_frames: usize,
        #[source]
        source: CapabilityError,
    },
    #[error("requested {expected} frames, the sensor returned {found}")]
    MissingFrames { expected: usize, found: usize },
    #[error("cannot average the acquired frames")]
    Frames(#[from] ImageError),
}

/// Image acquisition interface
///
/// Acquiring must block until the frames of the settled system are read out.
pub trait Acquisition {
    fn acquire(&mut self, n_frames: usize) -> Result<Vec<Image>, CapabilityError>;
}

impl<F> Acquisition for F
where
    F: FnMut(usize) -> Result<Vec<Image>, CapabilityError>,
{
    fn acquire(&mut self, n_frames: usize) -> Result<Vec<Image>, CapabilityError> {
        self(n_frames)
    }
}

/// Acquires `n_frames` frames and returns their average
///
/// Fewer frames than requested is an error, the average is never computed from a partial stack.
pub fn acquire_average<A: Acquisition + ?Sized>(
    acquisition: &mut A,
    n_frames: usize,
) -> Result<Image, AcquisitionError> {
    let frames = acquisition
        .acquire(n_frames)
        .map_err(|source| AcquisitionError::Sensor { n_frames, source })?;
    if frames.len() < n_frames || frames.is_empty() {
        return Err(AcquisitionError::MissingFrames {
            expected: n_frames,
            found: frames.len(),
        });
    }
    log::debug!("averaging {} frames", frames.len());
    Ok(Image::average(&frames[..n_frames.max(1)])?)
}

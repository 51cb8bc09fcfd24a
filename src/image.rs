//! Masked detector frames

use serde::{Deserialize, Serialize};

use crate::filing::Codec;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("{n_rows}x{n_cols} image expects {expected} values, found {found}")]
    DataLength {
        n_rows: usize,
        n_cols: usize,
        expected: usize,
        found: usize,
    },
    #[error("image mask of length {found} does not match {expected} pixels")]
    MaskLength { expected: usize, found: usize },
    #[error("cannot average frames of shapes {expected:?} and {found:?}")]
    Shape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("no frame to average")]
    Empty,
}

/// Row-major image with a validity mask
///
/// A pixel is used only if its mask entry is `true` and its value is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f64>,
    mask: Vec<bool>,
}

impl Codec for Image {}

impl Image {
    /// Creates a fully valid image
    pub fn new(n_rows: usize, n_cols: usize, data: Vec<f64>) -> Result<Self, ImageError> {
        let expected = n_rows * n_cols;
        if data.len() != expected {
            return Err(ImageError::DataLength {
                n_rows,
                n_cols,
                expected,
                found: data.len(),
            });
        }
        Ok(Self {
            n_rows,
            n_cols,
            data,
            mask: vec![true; expected],
        })
    }
    /// Sets the validity mask
    pub fn with_mask(mut self, mask: Vec<bool>) -> Result<Self, ImageError> {
        if mask.len() != self.data.len() {
            return Err(ImageError::MaskLength {
                expected: self.data.len(),
                found: mask.len(),
            });
        }
        self.mask = mask;
        Ok(self)
    }
    /// Returns `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn data(&self) -> &[f64] {
        &self.data
    }
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }
    /// Iterator over the pixels validity, combining the mask with the finiteness of the data
    pub fn valid(&self) -> impl Iterator<Item = bool> + '_ {
        self.mask
            .iter()
            .zip(&self.data)
            .map(|(&m, x)| m && x.is_finite())
    }
    /// Number of valid pixels
    pub fn area(&self) -> usize {
        self.valid().filter(|&v| v).count()
    }
    /// Averages a stack of frames
    ///
    /// The mask of the average is the intersection of the frames masks.
    pub fn average(frames: &[Image]) -> Result<Image, ImageError> {
        let Some(first) = frames.first() else {
            return Err(ImageError::Empty);
        };
        let shape = first.shape();
        let mut data = vec![0f64; first.len()];
        let mut mask = vec![true; first.len()];
        for frame in frames {
            if frame.shape() != shape {
                return Err(ImageError::Shape {
                    expected: shape,
                    found: frame.shape(),
                });
            }
            data.iter_mut()
                .zip(&frame.data)
                .for_each(|(a, x)| *a += *x);
            mask.iter_mut()
                .zip(frame.valid())
                .for_each(|(m, v)| *m &= v);
        }
        let n = frames.len() as f64;
        data.iter_mut().for_each(|a| *a /= n);
        Ok(Image {
            n_rows: shape.0,
            n_cols: shape.1,
            data,
            mask,
        })
    }
}

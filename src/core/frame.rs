//! Grayscale frame buffers.
//!
//! A frame is an immutable single-channel pixel buffer. Its length is
//! validated against its dimensions once, at construction, so every
//! comparison downstream can assume `pixels.len() == width * height`.

use thiserror::Error;

/// Errors raised while building a frame from a raw buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("buffer holds {actual} bytes, expected {expected} for the given dimensions")]
    SizeMismatch { expected: usize, actual: usize },
}

/// One sampled grayscale image.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Box<[u8]>,
}

impl Frame {
    /// Wrap a row-major 8-bit luminance buffer.
    pub fn new(width: u32, height: u32, pixels: impl Into<Box<[u8]>>) -> Result<Self, FrameError> {
        let pixels = pixels.into();
        let expected = width as usize * height as usize;

        if expected == 0 {
            return Err(FrameError::Empty { width, height });
        }
        if pixels.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A frame with every pixel set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self, FrameError> {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

// Pixel dumps are useless in logs.
impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Mean over all pixels of the absolute per-pixel intensity difference.
///
/// Both frames must have the same dimensions; the caller checks this.
/// Every pixel is visited, no sampling.
pub fn mean_absolute_difference(current: &Frame, previous: &Frame) -> f64 {
    debug_assert_eq!(current.dimensions(), previous.dimensions());

    let total: u64 = current
        .pixels()
        .iter()
        .zip(previous.pixels())
        .map(|(a, b)| u64::from(a.abs_diff(*b)))
        .sum();

    total as f64 / current.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_wrong_length() {
        let err = Frame::new(4, 4, vec![0u8; 15]).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn test_frame_rejects_zero_area() {
        assert!(matches!(
            Frame::new(0, 10, Vec::new()),
            Err(FrameError::Empty { .. })
        ));
    }

    #[test]
    fn test_mean_absolute_difference() {
        let a = Frame::new(2, 2, vec![0, 10, 20, 30]).unwrap();
        let b = Frame::new(2, 2, vec![10, 10, 0, 34]).unwrap();

        // |0-10| + 0 + |20-0| + |30-34| = 34, over 4 pixels
        assert!((mean_absolute_difference(&a, &b) - 8.5).abs() < 1e-12);
        assert_eq!(mean_absolute_difference(&a, &b), mean_absolute_difference(&b, &a));
    }

    #[test]
    fn test_identical_frames_have_zero_difference() {
        let a = Frame::filled(8, 6, 123).unwrap();
        assert_eq!(mean_absolute_difference(&a, &a.clone()), 0.0);
    }

    #[test]
    fn test_full_range_difference() {
        let black = Frame::filled(3, 3, 0).unwrap();
        let white = Frame::filled(3, 3, 255).unwrap();
        assert_eq!(mean_absolute_difference(&black, &white), 255.0);
    }
}

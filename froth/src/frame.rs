//! # Luminance frames

use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use std::time::Duration;

/// RGBA colour structure.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct RGBA {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl RGBA {
    /// Convert from a slice containing `[r, g, b]` elements.
    pub fn from_rgb_slice(rgb: &[u8]) -> Self {
        Self {
            r: rgb[0],
            g: rgb[1],
            b: rgb[2],
            a: 255,
        }
    }

    /// Luminance of the colour using BT.601 weights.
    pub fn luma(&self) -> u8 {
        (0.299 * self.r as f32 + 0.587 * self.g as f32 + 0.114 * self.b as f32)
            .round()
            .clamp(0.0, 255.0) as u8
    }
}

/// Immutable grid of luminance samples with its capture time.
///
/// Samples are stored in row-major order. The timestamp is relative to the start of the stream
/// and is expected to be monotonic, although consumers do not rely on it.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: usize,
    height: usize,
    index: u64,
    timestamp: Duration,
}

impl Frame {
    /// Create a new frame.
    ///
    /// # Arguments
    ///
    /// * `index` - sequence number of the frame within the stream.
    /// * `timestamp` - capture time, relative to the start of the stream.
    /// * `width` - width of the frame.
    /// * `height` - height of the frame.
    /// * `data` - row-major luminance samples, `width * height` of them.
    pub fn new(
        index: u64,
        timestamp: Duration,
        width: usize,
        height: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidFrame("empty frame"));
        }

        if data.len() != width * height {
            return Err(Error::InvalidFrame("buffer size does not match dimensions"));
        }

        Ok(Self {
            data,
            width,
            height,
            index,
            timestamp,
        })
    }

    /// Create a frame from colour pixels, converting them to luminance.
    pub fn from_rgba(index: u64, timestamp: Duration, width: usize, pixels: &[RGBA]) -> Result<Self> {
        if width == 0 || pixels.len() % width != 0 {
            return Err(Error::InvalidFrame("pixel count is not a multiple of width"));
        }

        let data = pixels.iter().map(RGBA::luma).collect();
        Self::new(index, timestamp, width, pixels.len() / width, data)
    }

    /// Get width and height of the frame.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Get the luminance samples in row-major order.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get luminance at coordinates.
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Check that both frames have the same dimensions.
    pub fn check_dim(&self, other: &Frame) -> Result<()> {
        if self.dim() != other.dim() {
            Err(Error::DimensionMismatch(self.dim(), other.dim()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_buffer() {
        assert!(matches!(
            Frame::new(0, Duration::ZERO, 4, 4, vec![0; 15]),
            Err(Error::InvalidFrame(_))
        ));
        assert!(matches!(
            Frame::new(0, Duration::ZERO, 0, 4, vec![]),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn rgba_to_luma() {
        let px = [
            RGBA::from_rgb_slice(&[255, 255, 255]),
            RGBA::from_rgb_slice(&[0, 0, 0]),
            RGBA::from_rgb_slice(&[255, 0, 0]),
            RGBA::from_rgb_slice(&[0, 255, 0]),
        ];
        let frame = Frame::from_rgba(3, Duration::from_millis(40), 2, &px).unwrap();
        assert_eq!(frame.dim(), (2, 2));
        assert_eq!(frame.index(), 3);
        assert_eq!(frame.get(0, 0), 255);
        assert_eq!(frame.get(1, 0), 0);
        assert_eq!(frame.get(0, 1), 76);
        assert_eq!(frame.get(1, 1), 150);
    }

    #[test]
    fn dimension_check() {
        let a = Frame::new(0, Duration::ZERO, 2, 2, vec![0; 4]).unwrap();
        let b = Frame::new(1, Duration::ZERO, 4, 1, vec![0; 4]).unwrap();
        assert!(matches!(
            a.check_dim(&b),
            Err(Error::DimensionMismatch((2, 2), (4, 1)))
        ));
        assert!(a.check_dim(&a).is_ok());
    }
}

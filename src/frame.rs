//! Captured image buffers.
//!
//! `CapturedImage` is the unit exchanged between the capture pipeline and the
//! image consumer. Output layout is fixed for the lifetime of the crate:
//!
//! - packed 8-bit BGRA, 4 bytes per pixel
//! - single plane, `row_pitch == width * PIXEL_PITCH`
//!
//! Buffers are moved across the exchange, never shared. There is no `Clone`:
//! once the pipeline pushes an image it cannot touch it again.
//!
//! ```compile_fail
//! use picam_capture::{CapturedImage, ImageConsumer};
//!
//! fn push_then_touch(consumer: &mut dyn ImageConsumer) {
//!     let mut image = CapturedImage::new();
//!     consumer.push_captured_image(image, true);
//!     let _ = image.fill_blank(16, 16);
//! }
//! ```

use anyhow::{bail, Result};
use std::time::Instant;

/// Bytes per output pixel (packed BGRA).
pub const PIXEL_PITCH: u32 = 4;

/// Largest width or height an image may take.
pub const MAX_DIMENSION: u32 = 16_384;

/// Mutable image record handed between pipeline and consumer.
#[derive(Debug, Default)]
pub struct CapturedImage {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per row. Always `width * PIXEL_PITCH` after a fill.
    pub row_pitch: u32,
    /// Bytes per pixel. Always `PIXEL_PITCH`.
    pub pixel_pitch: u32,
    /// Monotonic instant the pixels were written by a successful capture.
    pub frame_timestamp: Option<Instant>,

    data: Vec<u8>,
    /// Bumped every time the backing allocation is replaced.
    generation: u64,
}

impl CapturedImage {
    pub fn new() -> Self {
        Self {
            pixel_pitch: PIXEL_PITCH,
            ..Self::default()
        }
    }

    /// Allocate a zeroed buffer sized for `width` x `height`.
    pub fn with_geometry(width: u32, height: u32) -> Result<Self> {
        let mut image = Self::new();
        image.ensure_geometry(width, height)?;
        Ok(image)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty()
    }

    /// Number of times the backing allocation has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Make the backing storage match `width` x `height`.
    ///
    /// Storage whose pitch and height already match is reused as-is. Otherwise
    /// the old allocation is dropped and a new one is created. Returns `true`
    /// when a reallocation happened. Geometry above `MAX_DIMENSION` on either
    /// axis is rejected and leaves the image untouched.
    pub fn ensure_geometry(&mut self, width: u32, height: u32) -> Result<bool> {
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            bail!(
                "image geometry {}x{} exceeds the {} pixel limit",
                width,
                height,
                MAX_DIMENSION
            );
        }
        // Bounded above, so this cannot overflow.
        let row_pitch = width * PIXEL_PITCH;
        let reuse =
            self.is_allocated() && self.row_pitch == row_pitch && self.height == height;

        self.width = width;
        self.height = height;
        self.row_pitch = row_pitch;
        self.pixel_pitch = PIXEL_PITCH;

        if reuse {
            return Ok(false);
        }

        // Assigning drops the previous Vec, releasing its allocation exactly once.
        self.data = vec![0u8; row_pitch as usize * height as usize];
        self.generation += 1;
        Ok(true)
    }

    /// Zero-fill the image as a placeholder frame.
    ///
    /// An empty buffer is first allocated for `width` x `height`; a buffer that
    /// already holds storage keeps its own geometry.
    pub fn fill_blank(&mut self, width: u32, height: u32) -> Result<()> {
        if !self.is_allocated() {
            self.ensure_geometry(width, height)?;
        }
        self.data.fill(0);
        Ok(())
    }

    /// Byte length implied by the current pitch and height.
    pub fn byte_len(&self) -> usize {
        self.row_pitch as usize * self.height as usize
    }

    pub(crate) fn mark_captured(&mut self) {
        self.frame_timestamp = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_geometry_reuses_allocation() -> Result<()> {
        let mut image = CapturedImage::new();
        assert!(image.ensure_geometry(64, 48)?);
        let ptr = image.data().as_ptr();
        let generation = image.generation();

        assert!(!image.ensure_geometry(64, 48)?);
        assert_eq!(image.data().as_ptr(), ptr);
        assert_eq!(image.generation(), generation);
        Ok(())
    }

    #[test]
    fn geometry_change_reallocates_once() -> Result<()> {
        let mut image = CapturedImage::with_geometry(64, 48)?;
        let generation = image.generation();

        assert!(image.ensure_geometry(32, 24)?);
        assert_eq!(image.generation(), generation + 1);
        assert_eq!(image.row_pitch, 32 * PIXEL_PITCH);
        assert_eq!(image.data().len(), 32 * 4 * 24);

        assert!(!image.ensure_geometry(32, 24)?);
        assert_eq!(image.generation(), generation + 1);
        Ok(())
    }

    #[test]
    fn fill_blank_allocates_empty_buffer() -> Result<()> {
        let mut image = CapturedImage::new();
        image.fill_blank(8, 4)?;
        assert_eq!(image.row_pitch, 32);
        assert_eq!(image.height, 4);
        assert_eq!(image.pixel_pitch, PIXEL_PITCH);
        assert!(image.data().iter().all(|&b| b == 0));
        assert!(image.frame_timestamp.is_none());
        Ok(())
    }

    #[test]
    fn fill_blank_keeps_existing_storage() -> Result<()> {
        let mut image = CapturedImage::with_geometry(4, 4)?;
        image.data_mut().fill(0xAB);
        let ptr = image.data().as_ptr();

        image.fill_blank(100, 100)?;
        assert_eq!(image.data().as_ptr(), ptr);
        assert_eq!(image.width, 4);
        assert!(image.data().iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn oversized_geometry_is_rejected_without_touching_image() -> Result<()> {
        let mut image = CapturedImage::with_geometry(8, 8)?;
        let generation = image.generation();

        assert!(image.ensure_geometry(1 << 30, 1).is_err());
        assert!(image.ensure_geometry(8, MAX_DIMENSION + 1).is_err());
        assert!(image.fill_blank(u32::MAX, u32::MAX).is_ok());
        assert!(CapturedImage::new().fill_blank(1 << 30, 1).is_err());
        assert!(CapturedImage::with_geometry(u32::MAX, 2).is_err());

        assert_eq!((image.width, image.height), (8, 8));
        assert_eq!(image.generation(), generation);
        Ok(())
    }

    #[test]
    fn largest_width_keeps_pitch_invariant() -> Result<()> {
        let mut image = CapturedImage::new();
        image.ensure_geometry(MAX_DIMENSION, 1)?;
        assert_eq!(image.row_pitch, MAX_DIMENSION * PIXEL_PITCH);
        assert_eq!(image.data().len(), image.byte_len());
        Ok(())
    }
}

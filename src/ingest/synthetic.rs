//! Synthetic (`stub://`) frame source.
//!
//! Produces a moving YUYV test pattern and pushes it through the same
//! conversion session the camera path uses, so tests exercise the full
//! convert-and-deliver path without a device.

use anyhow::{bail, Result};

use super::convert::{ConversionSession, PackedFrame, ScaleKey, SoftwareScaler, SourceLayout};
use super::{FrameReader, ReadOutcome};
use crate::config::CaptureConfig;
use crate::frame::{CapturedImage, MAX_DIMENSION};

/// Geometry negotiated when the caller gives no size hint.
pub const SYNTHETIC_DEFAULT_WIDTH: u32 = 1280;
pub const SYNTHETIC_DEFAULT_HEIGHT: u32 = 720;

pub struct SyntheticReader {
    width: u32,
    height: u32,
    frame_count: u64,
    /// Simulated scene state, advanced every 50 frames.
    scene_state: u8,
    scaler: ConversionSession<SoftwareScaler>,
}

impl SyntheticReader {
    /// "Open" a synthetic device. Size hints are honoured when both are set,
    /// rounded down to an even width as a YUYV sensor would.
    pub fn open(name: &str, config: &CaptureConfig) -> Result<Self> {
        config.validate()?;
        let (width, height) = if config.width > 0 && config.height > 0 {
            ((config.width & !1).max(2), config.height)
        } else {
            (SYNTHETIC_DEFAULT_WIDTH, SYNTHETIC_DEFAULT_HEIGHT)
        };

        log::info!(
            "CameraSource: connected to {} ({}x{}, synthetic)",
            name,
            width,
            height
        );
        Ok(Self {
            width,
            height,
            frame_count: 0,
            scene_state: 0,
            scaler: ConversionSession::new(),
        })
    }

    /// Simulate the sensor renegotiating its output size. Empty or oversized
    /// geometry is refused and the current size is kept.
    pub fn renegotiate(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            bail!("cannot renegotiate synthetic source to {}x{}", width, height);
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    /// Converters built so far; stays at one while the geometry is stable.
    pub fn scaler_builds(&self) -> u64 {
        self.scaler.builds()
    }

    fn generate_frame(&mut self) -> PackedFrame {
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let stride = SourceLayout::Yuyv422.row_bytes(self.width);
        let mut data = vec![0u8; stride * self.height as usize];
        let shift = self.frame_count as usize + self.scene_state as usize;
        for (y, row) in data.chunks_exact_mut(stride).enumerate() {
            for (x, yuyv) in row.chunks_exact_mut(4).enumerate() {
                let luma = 16 + ((x + y + shift) % 220) as u8;
                yuyv.copy_from_slice(&[luma, 128, luma, 128]);
            }
        }

        PackedFrame {
            layout: SourceLayout::Yuyv422,
            width: self.width,
            height: self.height,
            stride,
            data,
        }
    }
}

impl FrameReader for SyntheticReader {
    fn read_frame(&mut self, image: &mut CapturedImage) -> Result<ReadOutcome> {
        if self.width == 0 || self.height == 0 {
            bail!("synthetic source has empty geometry");
        }
        self.frame_count += 1;
        let frame = self.generate_frame();

        self.scaler.configure(ScaleKey::same_size(
            frame.width,
            frame.height,
            frame.layout,
        ))?;
        self.scaler.convert(&frame, image)?;
        image.mark_captured();
        Ok(ReadOutcome::Frame)
    }

    fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PIXEL_PITCH;

    fn config(width: u32, height: u32) -> CaptureConfig {
        CaptureConfig {
            width,
            height,
            framerate: 30,
        }
    }

    #[test]
    fn unspecified_size_negotiates_default() -> Result<()> {
        let reader = SyntheticReader::open("stub://test", &config(0, 0))?;
        assert_eq!(reader.geometry(), (1280, 720));
        Ok(())
    }

    #[test]
    fn synthetic_source_produces_bgra_frames() -> Result<()> {
        let mut reader = SyntheticReader::open("stub://test", &config(64, 48))?;
        let mut image = CapturedImage::new();

        assert_eq!(reader.read_frame(&mut image)?, ReadOutcome::Frame);
        assert_eq!(image.width, 64);
        assert_eq!(image.height, 48);
        assert_eq!(image.row_pitch, 64 * PIXEL_PITCH);
        assert_eq!(image.data().len(), 64 * 4 * 48);
        assert!(image.frame_timestamp.is_some());
        assert!(image.data().chunks_exact(4).all(|px| px[3] == 0xFF));
        Ok(())
    }

    #[test]
    fn stable_geometry_reuses_scaler_and_buffer() -> Result<()> {
        let mut reader = SyntheticReader::open("stub://test", &config(32, 16))?;
        let mut image = CapturedImage::new();

        reader.read_frame(&mut image)?;
        let generation = image.generation();
        reader.read_frame(&mut image)?;
        reader.read_frame(&mut image)?;

        assert_eq!(reader.scaler_builds(), 1);
        assert_eq!(image.generation(), generation);
        Ok(())
    }

    #[test]
    fn renegotiation_resizes_image() -> Result<()> {
        let mut reader = SyntheticReader::open("stub://test", &config(32, 16))?;
        let mut image = CapturedImage::new();
        reader.read_frame(&mut image)?;
        let generation = image.generation();

        reader.renegotiate(16, 8)?;
        reader.read_frame(&mut image)?;

        assert_eq!(reader.geometry(), (16, 8));
        assert_eq!((image.width, image.height), (16, 8));
        assert_eq!(image.generation(), generation + 1);
        assert_eq!(reader.scaler_builds(), 2);
        assert_eq!(reader.frames_generated(), 2);
        Ok(())
    }

    #[test]
    fn empty_renegotiation_is_refused_and_reads_continue() -> Result<()> {
        let mut reader = SyntheticReader::open("stub://test", &config(32, 16))?;
        let mut image = CapturedImage::new();

        assert!(reader.renegotiate(0, 8).is_err());
        assert!(reader.renegotiate(8, 0).is_err());
        assert!(reader.renegotiate(MAX_DIMENSION + 2, 8).is_err());
        assert_eq!(reader.geometry(), (32, 16));

        assert_eq!(reader.read_frame(&mut image)?, ReadOutcome::Frame);
        assert_eq!((image.width, image.height), (32, 16));
        Ok(())
    }

    #[test]
    fn oversized_hint_fails_open() {
        assert!(SyntheticReader::open("stub://big", &config(1 << 30, 1)).is_err());
        assert!(SyntheticReader::open("stub://half", &config(640, 0)).is_err());
    }
}

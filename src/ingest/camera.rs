//! V4L2 camera frame source using FFmpeg.
//!
//! Composes a device session, a decode session and a libswscale conversion
//! session into one `FrameReader`. All three are owned here and released
//! when the reader drops, on every exit path.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::convert::{ConversionSession, FfmpegScaler, ScaleKey};
use super::decode::DecodeSession;
use super::device::DeviceSession;
use super::{FrameReader, ReadOutcome};
use crate::config::CaptureConfig;
use crate::frame::CapturedImage;

pub(crate) fn is_eagain(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == libc::EAGAIN)
}

/// Log a failed FFmpeg call and wrap it for propagation.
pub(crate) fn ffmpeg_failure(call: &str, err: ffmpeg::Error) -> anyhow::Error {
    log::error!("CameraSource: {} failed: {}", call, err);
    anyhow::Error::new(err).context(format!("{call} failed"))
}

pub(crate) struct CameraReader {
    device_path: String,
    scaler: ConversionSession<FfmpegScaler>,
    decoder: DecodeSession,
    device: DeviceSession,
    decoded: ffmpeg::frame::Video,
    width: u32,
    height: u32,
}

impl CameraReader {
    pub(crate) fn open(device_path: &str, config: &CaptureConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut device = DeviceSession::new();
        device
            .open(device_path, config)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let decoder = DecodeSession::open(device.parameters())
            .with_context(|| format!("open decoder for {}", device_path))?;

        let (width, height) = (decoder.width(), decoder.height());
        log::info!(
            "CameraSource: capturing from {} ({}x{})",
            device_path,
            width,
            height
        );

        Ok(Self {
            device_path: device_path.to_string(),
            scaler: ConversionSession::new(),
            decoder,
            device,
            decoded: ffmpeg::frame::Video::empty(),
            width,
            height,
        })
    }
}

impl FrameReader for CameraReader {
    fn read_frame(&mut self, image: &mut CapturedImage) -> Result<ReadOutcome> {
        let mut packet = ffmpeg::Packet::empty();
        if !self.device.read_packet(&mut packet)? {
            return Ok(ReadOutcome::Timeout);
        }

        if Some(packet.stream()) != self.device.index() {
            return Ok(ReadOutcome::Timeout);
        }

        if !self.decoder.decode(&packet, &mut self.decoded)? {
            return Ok(ReadOutcome::Timeout);
        }

        self.width = self.decoded.width();
        self.height = self.decoded.height();

        self.scaler.configure(ScaleKey::same_size(
            self.width,
            self.height,
            self.decoded.format(),
        ))?;
        self.scaler.convert(&self.decoded, image)?;
        image.mark_captured();
        Ok(ReadOutcome::Frame)
    }

    fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for CameraReader {
    fn drop(&mut self) {
        if self.device.is_open() {
            self.device.close();
            log::debug!("CameraSource: released {}", self.device_path);
        }
    }
}

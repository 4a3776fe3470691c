//! V4L2 device session.
//!
//! Opens a camera through FFmpeg's `v4l2` input format, applies the size and
//! rate hints as demuxer options and locates the best video stream. The open
//! input and the stream index live in one `Option`, so a stream index can only
//! exist while the device is open.

use anyhow::{anyhow, bail, Result};
use ffmpeg_next as ffmpeg;

use super::camera::{ffmpeg_failure, is_eagain};
use crate::config::CaptureConfig;

const INPUT_FORMAT: &str = "v4l2";

struct OpenDevice {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
}

pub(crate) struct DeviceSession {
    state: Option<OpenDevice>,
}

impl DeviceSession {
    pub(crate) fn new() -> Self {
        Self { state: None }
    }

    /// Open `device` with advisory `config` hints.
    ///
    /// On failure the session stays closed.
    pub(crate) fn open(&mut self, device: &str, config: &CaptureConfig) -> Result<()> {
        self.close();

        let mut options = ffmpeg::Dictionary::new();
        if config.has_size_hint() {
            options.set("video_size", &format!("{}x{}", config.width, config.height));
        }
        if config.framerate > 0 {
            options.set("framerate", &config.framerate.to_string());
        }

        let Some(input_format) =
            ffmpeg::device::input::video().find(|format| format.name() == INPUT_FORMAT)
        else {
            log::error!("CameraSource: {} input format not found", INPUT_FORMAT);
            bail!("{} input format not available", INPUT_FORMAT);
        };

        // open_with also probes stream info before returning.
        let context = ffmpeg::format::open_with(
            &device,
            &ffmpeg::format::format::Format::Input(input_format),
            options,
        )
        .map_err(|err| ffmpeg_failure("avformat_open_input", err))?;
        let input = match context {
            ffmpeg::format::context::Context::Input(input) => input,
            ffmpeg::format::context::Context::Output(_) => {
                bail!("{} opened as an output context", device)
            }
        };

        let stream_index = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .map(|stream| stream.index())
            .ok_or_else(|| {
                log::error!("CameraSource: no video stream found on {}", device);
                anyhow!("no video stream found on {}", device)
            })?;

        self.state = Some(OpenDevice {
            input,
            stream_index,
        });
        Ok(())
    }

    /// Release the device. No-op when already closed.
    pub(crate) fn close(&mut self) {
        self.state = None;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub(crate) fn index(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.stream_index)
    }

    /// Codec parameters of the negotiated stream, if open.
    pub(crate) fn parameters(&self) -> Option<ffmpeg::codec::Parameters> {
        let state = self.state.as_ref()?;
        state
            .input
            .stream(state.stream_index)
            .map(|stream| stream.parameters())
    }

    /// Read the next packet into `packet`.
    ///
    /// Returns `Ok(false)` when the device has nothing ready (EAGAIN).
    pub(crate) fn read_packet(&mut self, packet: &mut ffmpeg::Packet) -> Result<bool> {
        let Some(state) = self.state.as_mut() else {
            bail!("device session is closed");
        };
        match packet.read(&mut state.input) {
            Ok(()) => Ok(true),
            Err(err) if is_eagain(&err) => Ok(false),
            Err(err) => Err(ffmpeg_failure("av_read_frame", err)),
        }
    }
}

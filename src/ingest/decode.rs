//! Decoder bound to one device stream.
//!
//! A `DecodeSession` is opened once against the stream's codec parameters and
//! never rebound. Decoding follows send-packet/receive-frame: one packet may
//! not yield a frame yet, which is reported as `false`, not as an error.

use anyhow::{bail, Result};
use ffmpeg_next as ffmpeg;

use super::camera::{ffmpeg_failure, is_eagain};

pub(crate) struct DecodeSession {
    decoder: ffmpeg::codec::decoder::Video,
}

impl DecodeSession {
    pub(crate) fn open(parameters: Option<ffmpeg::codec::Parameters>) -> Result<Self> {
        let Some(parameters) = parameters else {
            log::error!("CameraSource: no codec parameters to open a decoder with");
            bail!("no codec parameters to open a decoder with");
        };

        let context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .map_err(|err| ffmpeg_failure("avcodec_parameters_to_context", err))?;
        let decoder = context.decoder().video().map_err(|err| {
            log::error!("CameraSource: failed to open decoder: {}", err);
            anyhow::Error::new(err).context("open ffmpeg video decoder")
        })?;

        Ok(Self { decoder })
    }

    pub(crate) fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub(crate) fn height(&self) -> u32 {
        self.decoder.height()
    }

    /// Feed one packet and try to drain one frame into `frame`.
    ///
    /// Returns `Ok(false)` when the decoder needs more input first.
    pub(crate) fn decode(
        &mut self,
        packet: &ffmpeg::Packet,
        frame: &mut ffmpeg::frame::Video,
    ) -> Result<bool> {
        self.decoder
            .send_packet(packet)
            .map_err(|err| ffmpeg_failure("avcodec_send_packet", err))?;

        match self.decoder.receive_frame(frame) {
            Ok(()) => Ok(true),
            Err(err) if is_eagain(&err) => Ok(false),
            Err(err) => Err(ffmpeg_failure("avcodec_receive_frame", err)),
        }
    }
}

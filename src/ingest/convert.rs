//! Pixel-format and geometry conversion into the packed BGRA output layout.
//!
//! `ConversionSession` owns at most one converter, keyed by source geometry,
//! source format and destination geometry. `configure` is cheap to call for
//! every frame: a converter is only rebuilt when its key changes, and a stale
//! converter is dropped before the replacement is built.

use anyhow::{bail, Context, Result};
use std::fmt;

use crate::frame::{CapturedImage, PIXEL_PITCH};

/// Everything a converter is specialised for. The destination format is
/// always packed BGRA and is not part of the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleKey<F> {
    pub src_width: u32,
    pub src_height: u32,
    pub src_format: F,
    pub dst_width: u32,
    pub dst_height: u32,
}

impl<F> ScaleKey<F> {
    /// Key for a same-size conversion, the common camera case.
    pub fn same_size(width: u32, height: u32, src_format: F) -> Self {
        Self {
            src_width: width,
            src_height: height,
            src_format,
            dst_width: width,
            dst_height: height,
        }
    }
}

/// A conversion engine producing packed BGRA rows.
pub trait ScaleEngine: Sized {
    type Format: Copy + Eq + fmt::Debug;
    type Source;

    /// Construct a converter for `key`. Fails for unsupported combinations.
    fn build(key: &ScaleKey<Self::Format>) -> Result<Self>;

    /// Convert `src` into `dst`, whose rows start `dst_stride` bytes apart.
    /// Returns the number of output lines written.
    fn scale(&mut self, src: &Self::Source, dst: &mut [u8], dst_stride: usize) -> Result<usize>;
}

pub struct ConversionSession<E: ScaleEngine> {
    current: Option<(ScaleKey<E::Format>, E)>,
    builds: u64,
}

impl<E: ScaleEngine> Default for ConversionSession<E> {
    fn default() -> Self {
        Self {
            current: None,
            builds: 0,
        }
    }
}

impl<E: ScaleEngine> ConversionSession<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the held converter matches `key`, rebuilding only on change.
    pub fn configure(&mut self, key: ScaleKey<E::Format>) -> Result<()> {
        if matches!(&self.current, Some((held, _)) if *held == key) {
            return Ok(());
        }

        self.current = None;
        let engine = E::build(&key).map_err(|err| {
            log::error!("CameraSource: failed to configure scaler for {:?}: {:#}", key, err);
            err
        })?;
        self.builds += 1;
        log::debug!(
            "CameraSource: scaler configured {:?} {}x{} -> BGRA {}x{}",
            key.src_format,
            key.src_width,
            key.src_height,
            key.dst_width,
            key.dst_height
        );
        self.current = Some((key, engine));
        Ok(())
    }

    /// Key of the converter currently held, if any.
    pub fn key(&self) -> Option<&ScaleKey<E::Format>> {
        self.current.as_ref().map(|(key, _)| key)
    }

    /// How many converters have been constructed over the session lifetime.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Convert `src` into `image`, resizing the image to the destination geometry.
    pub fn convert(&mut self, src: &E::Source, image: &mut CapturedImage) -> Result<()> {
        let Some((key, engine)) = self.current.as_mut() else {
            bail!("scaler used before configure");
        };

        image.ensure_geometry(key.dst_width, key.dst_height)?;
        let stride = image.row_pitch as usize;
        let lines = engine.scale(src, image.data_mut(), stride)?;
        if lines == 0 {
            log::error!("CameraSource: scaler produced no output lines");
            bail!("scaler produced no output lines");
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Software engine for packed sources
// ----------------------------------------------------------------------------

/// Packed source layouts understood by `SoftwareScaler`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceLayout {
    Rgb24,
    Yuyv422,
    Bgra,
}

impl SourceLayout {
    /// Bytes needed for one row of `width` pixels.
    pub fn row_bytes(self, width: u32) -> usize {
        let width = width as usize;
        match self {
            SourceLayout::Rgb24 => width * 3,
            SourceLayout::Yuyv422 => width * 2,
            SourceLayout::Bgra => width * 4,
        }
    }
}

/// A single-plane frame in one of the `SourceLayout`s.
#[derive(Clone, Debug)]
pub struct PackedFrame {
    pub layout: SourceLayout,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: Vec<u8>,
}

/// Format converter for packed sources. Does not rescale.
pub struct SoftwareScaler {
    key: ScaleKey<SourceLayout>,
}

impl ScaleEngine for SoftwareScaler {
    type Format = SourceLayout;
    type Source = PackedFrame;

    fn build(key: &ScaleKey<SourceLayout>) -> Result<Self> {
        if key.src_width == 0 || key.src_height == 0 {
            bail!("empty source geometry {}x{}", key.src_width, key.src_height);
        }
        if key.src_width != key.dst_width || key.src_height != key.dst_height {
            bail!(
                "software scaler cannot resize {}x{} to {}x{}",
                key.src_width,
                key.src_height,
                key.dst_width,
                key.dst_height
            );
        }
        if key.src_format == SourceLayout::Yuyv422 && key.src_width % 2 != 0 {
            bail!("YUYV source width {} is not even", key.src_width);
        }
        Ok(Self { key: *key })
    }

    fn scale(&mut self, src: &PackedFrame, dst: &mut [u8], dst_stride: usize) -> Result<usize> {
        if src.layout != self.key.src_format
            || src.width != self.key.src_width
            || src.height != self.key.src_height
        {
            bail!(
                "source {:?} {}x{} does not match scaler {:?}",
                src.layout,
                src.width,
                src.height,
                self.key
            );
        }

        let width = src.width as usize;
        let src_row = src.layout.row_bytes(src.width);
        let dst_row = width * PIXEL_PITCH as usize;

        for y in 0..src.height as usize {
            let input = src
                .data
                .get(y * src.stride..y * src.stride + src_row)
                .context("source row is out of bounds")?;
            let output = dst
                .get_mut(y * dst_stride..y * dst_stride + dst_row)
                .context("destination row is out of bounds")?;
            convert_row(src.layout, input, output);
        }

        Ok(src.height as usize)
    }
}

fn convert_row(layout: SourceLayout, input: &[u8], output: &mut [u8]) {
    match layout {
        SourceLayout::Bgra => output.copy_from_slice(input),
        SourceLayout::Rgb24 => {
            for (rgb, bgra) in input.chunks_exact(3).zip(output.chunks_exact_mut(4)) {
                bgra.copy_from_slice(&[rgb[2], rgb[1], rgb[0], 0xFF]);
            }
        }
        SourceLayout::Yuyv422 => {
            for (yuyv, pair) in input.chunks_exact(4).zip(output.chunks_exact_mut(8)) {
                let (u, v) = (yuyv[1], yuyv[3]);
                pair[..4].copy_from_slice(&yuv_to_bgra(yuyv[0], u, v));
                pair[4..].copy_from_slice(&yuv_to_bgra(yuyv[2], u, v));
            }
        }
    }
}

/// BT.601 limited-range YUV to BGRA.
fn yuv_to_bgra(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = 298 * (i32::from(y) - 16);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    let r = clamp(c + 409 * e);
    let g = clamp(c - 100 * d - 208 * e);
    let b = clamp(c + 516 * d);
    [b, g, r, 0xFF]
}

// ----------------------------------------------------------------------------
// FFmpeg engine (libswscale)
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-ffmpeg")]
pub(crate) use ffmpeg_engine::FfmpegScaler;

#[cfg(feature = "camera-ffmpeg")]
mod ffmpeg_engine {
    use anyhow::{Context, Result};
    use ffmpeg_next as ffmpeg;

    use super::{ScaleEngine, ScaleKey};
    use crate::frame::PIXEL_PITCH;

    pub(crate) struct FfmpegScaler {
        context: ffmpeg::software::scaling::context::Context,
        output: ffmpeg::frame::Video,
    }

    impl ScaleEngine for FfmpegScaler {
        type Format = ffmpeg::util::format::pixel::Pixel;
        type Source = ffmpeg::frame::Video;

        fn build(key: &ScaleKey<Self::Format>) -> Result<Self> {
            let context = ffmpeg::software::scaling::context::Context::get(
                key.src_format,
                key.src_width,
                key.src_height,
                ffmpeg::util::format::pixel::Pixel::BGRA,
                key.dst_width,
                key.dst_height,
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .context("create ffmpeg scaler")?;
            Ok(Self {
                context,
                output: ffmpeg::frame::Video::empty(),
            })
        }

        fn scale(
            &mut self,
            src: &ffmpeg::frame::Video,
            dst: &mut [u8],
            dst_stride: usize,
        ) -> Result<usize> {
            self.context
                .run(src, &mut self.output)
                .context("sws_scale failed")?;

            let height = self.output.height() as usize;
            let row_bytes = self.output.width() as usize * PIXEL_PITCH as usize;
            let stride = self.output.stride(0);
            let data = self.output.data(0);

            for row in 0..height {
                let input = data
                    .get(row * stride..row * stride + row_bytes)
                    .context("scaled frame row is out of bounds")?;
                dst.get_mut(row * dst_stride..row * dst_stride + row_bytes)
                    .context("destination row is out of bounds")?
                    .copy_from_slice(input);
            }
            Ok(height)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuyv_frame(width: u32, height: u32) -> PackedFrame {
        let stride = SourceLayout::Yuyv422.row_bytes(width);
        PackedFrame {
            layout: SourceLayout::Yuyv422,
            width,
            height,
            stride,
            // Y=235, U=V=128 is limited-range white.
            data: [235u8, 128, 235, 128].repeat(stride / 4 * height as usize),
        }
    }

    #[test]
    fn configure_twice_keeps_converter() -> Result<()> {
        let mut session = ConversionSession::<SoftwareScaler>::new();
        let key = ScaleKey::same_size(4, 2, SourceLayout::Yuyv422);

        session.configure(key)?;
        session.configure(key)?;

        assert_eq!(session.builds(), 1);
        assert_eq!(session.key(), Some(&key));
        Ok(())
    }

    #[test]
    fn key_change_rebuilds_converter() -> Result<()> {
        let mut session = ConversionSession::<SoftwareScaler>::new();
        session.configure(ScaleKey::same_size(4, 2, SourceLayout::Yuyv422))?;
        session.configure(ScaleKey::same_size(4, 2, SourceLayout::Rgb24))?;
        session.configure(ScaleKey::same_size(8, 2, SourceLayout::Rgb24))?;

        assert_eq!(session.builds(), 3);
        Ok(())
    }

    #[test]
    fn unsupported_key_leaves_session_empty() -> Result<()> {
        let mut session = ConversionSession::<SoftwareScaler>::new();
        session.configure(ScaleKey::same_size(4, 2, SourceLayout::Rgb24))?;

        let resize = ScaleKey {
            src_width: 4,
            src_height: 2,
            src_format: SourceLayout::Rgb24,
            dst_width: 8,
            dst_height: 4,
        };
        assert!(session.configure(resize).is_err());
        assert!(session.key().is_none());

        let mut image = CapturedImage::new();
        let frame = yuyv_frame(4, 2);
        assert!(session.convert(&frame, &mut image).is_err());
        Ok(())
    }

    #[test]
    fn yuyv_white_converts_to_bgra_white() -> Result<()> {
        let mut session = ConversionSession::<SoftwareScaler>::new();
        session.configure(ScaleKey::same_size(4, 2, SourceLayout::Yuyv422))?;

        let mut image = CapturedImage::new();
        session.convert(&yuyv_frame(4, 2), &mut image)?;

        assert_eq!(image.row_pitch, 16);
        assert_eq!(image.height, 2);
        assert!(image.data().chunks_exact(4).all(|px| px == [255, 255, 255, 255]));
        Ok(())
    }

    #[test]
    fn rgb_swaps_channel_order() -> Result<()> {
        let mut session = ConversionSession::<SoftwareScaler>::new();
        session.configure(ScaleKey::same_size(1, 1, SourceLayout::Rgb24))?;

        let frame = PackedFrame {
            layout: SourceLayout::Rgb24,
            width: 1,
            height: 1,
            stride: 3,
            data: vec![10, 20, 30],
        };
        let mut image = CapturedImage::new();
        session.convert(&frame, &mut image)?;
        assert_eq!(image.data(), &[30, 20, 10, 255]);
        Ok(())
    }

    #[test]
    fn odd_yuyv_width_is_rejected() {
        assert!(SoftwareScaler::build(&ScaleKey::same_size(3, 2, SourceLayout::Yuyv422)).is_err());
    }
}

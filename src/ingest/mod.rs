//! Frame sources.
//!
//! This module provides the sources that fill `CapturedImage`s:
//! - V4L2 camera devices decoded through FFmpeg (feature: camera-ffmpeg)
//! - Synthetic `stub://` source (testing, demos)
//!
//! Every source implements `FrameReader`, the seam the frame pacer drives.
//! A source is responsible for:
//! - Producing pixels in the packed BGRA output layout
//! - Resizing the target image when the stream geometry changes
//! - Reporting "nothing ready yet" as `ReadOutcome::Timeout`, not as an error
//!
//! A source MUST NOT keep a reference to an image after `read_frame` returns.

use anyhow::Result;

use crate::frame::CapturedImage;

#[cfg(feature = "camera-ffmpeg")]
pub(crate) mod camera;
pub mod convert;
#[cfg(feature = "camera-ffmpeg")]
pub(crate) mod decode;
#[cfg(feature = "camera-ffmpeg")]
pub(crate) mod device;
pub mod synthetic;

#[cfg(feature = "camera-ffmpeg")]
pub(crate) use camera::CameraReader;
pub use convert::{
    ConversionSession, PackedFrame, ScaleEngine, ScaleKey, SoftwareScaler, SourceLayout,
};
pub use synthetic::SyntheticReader;

/// Result of one non-failing read attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The image holds a freshly captured frame.
    Frame,
    /// No frame was ready this tick. The image is untouched.
    Timeout,
}

/// A source the frame pacer can pull frames from.
pub trait FrameReader {
    /// Try to fill `image` with the next frame.
    ///
    /// Hard read, decode or conversion failures are returned as `Err` and end
    /// the capture session.
    fn read_frame(&mut self, image: &mut CapturedImage) -> Result<ReadOutcome>;

    /// Current stream geometry as (width, height).
    fn geometry(&self) -> (u32, u32);
}

impl<R: FrameReader + ?Sized> FrameReader for Box<R> {
    fn read_frame(&mut self, image: &mut CapturedImage) -> Result<ReadOutcome> {
        (**self).read_frame(image)
    }

    fn geometry(&self) -> (u32, u32) {
        (**self).geometry()
    }
}

//! Capture facade.
//!
//! This is the surface the owning platform layer talks to:
//! - `initialize()` probes whether the default camera node exists
//! - `display_names()` lists candidate device nodes, never empty
//! - `create_display()` builds a fully initialised `CaptureDisplay` or fails
//!
//! `create_display` is a runtime factory over the available backends:
//! `stub://` names select the synthetic source, everything else the V4L2
//! camera (feature: camera-ffmpeg). A half-open display is never returned.

use anyhow::Result;
use std::path::Path;

use crate::config::CaptureConfig;
use crate::exchange::ImageConsumer;
use crate::frame::CapturedImage;
#[cfg(feature = "camera-ffmpeg")]
use crate::ingest::CameraReader;
use crate::ingest::{FrameReader, SyntheticReader};
use crate::pacer::{CaptureStats, FramePacer};
use crate::CaptureStatus;

/// Device node used when the caller does not name one.
pub const DEFAULT_DEVICE: &str = "/dev/video0";
/// Prefix selecting the synthetic backend.
pub const SYNTHETIC_SCHEME: &str = "stub://";

const DEVICE_PREFIX: &str = "/dev/video";
const DEVICE_SLOTS: u32 = 8;

/// Numbered device nodes `<prefix>0 .. <prefix>N`.
#[derive(Clone, Debug)]
pub struct DeviceCatalog {
    prefix: String,
    slots: u32,
}

impl DeviceCatalog {
    /// The system catalog, `/dev/video0` through `/dev/video7`.
    pub fn system() -> Self {
        Self::with_prefix(DEVICE_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            slots: DEVICE_SLOTS,
        }
    }

    pub fn default_device(&self) -> String {
        format!("{}0", self.prefix)
    }

    /// Whether the default device node exists.
    pub fn is_reachable(&self) -> bool {
        Path::new(&self.default_device()).exists()
    }

    /// Existing device nodes, or just the default when none exist.
    pub fn names(&self) -> Vec<String> {
        let mut devices: Vec<String> = (0..self.slots)
            .map(|idx| format!("{}{}", self.prefix, idx))
            .filter(|path| Path::new(path).exists())
            .collect();
        if devices.is_empty() {
            devices.push(self.default_device());
        }
        devices
    }

    /// Map an empty device argument to the default device.
    pub fn resolve(&self, device: &str) -> String {
        if device.is_empty() {
            self.default_device()
        } else {
            device.to_string()
        }
    }

    /// Create a ready capture display for `device` (empty = default device).
    pub fn create_display(&self, device: &str, config: &CaptureConfig) -> Result<CaptureDisplay> {
        let resolved = self.resolve(device);
        CaptureDisplay::open(&resolved, config).map_err(|err| {
            log::error!("Display: failed to initialise capture on {}: {:#}", resolved, err);
            err
        })
    }
}

/// Capability check used before any session is attempted.
pub fn initialize() -> bool {
    DeviceCatalog::system().is_reachable()
}

/// Candidate device names for the platform layer to offer.
pub fn display_names() -> Vec<String> {
    DeviceCatalog::system().names()
}

/// Create a ready capture display for `device` (empty = default device).
pub fn create_display(device: &str, config: &CaptureConfig) -> Result<CaptureDisplay> {
    DeviceCatalog::system().create_display(device, config)
}

enum Backend {
    Synthetic(SyntheticReader),
    #[cfg(feature = "camera-ffmpeg")]
    Camera(CameraReader),
}

impl Backend {
    fn open(device: &str, config: &CaptureConfig) -> Result<Self> {
        if device.starts_with(SYNTHETIC_SCHEME) {
            return Ok(Backend::Synthetic(SyntheticReader::open(device, config)?));
        }

        #[cfg(feature = "camera-ffmpeg")]
        {
            Ok(Backend::Camera(CameraReader::open(device, config)?))
        }
        #[cfg(not(feature = "camera-ffmpeg"))]
        {
            anyhow::bail!("capturing from {} requires the camera-ffmpeg feature", device)
        }
    }

    fn reader(&self) -> &dyn FrameReader {
        match self {
            Backend::Synthetic(reader) => reader,
            #[cfg(feature = "camera-ffmpeg")]
            Backend::Camera(reader) => reader,
        }
    }

    fn reader_mut(&mut self) -> &mut dyn FrameReader {
        match self {
            Backend::Synthetic(reader) => reader,
            #[cfg(feature = "camera-ffmpeg")]
            Backend::Camera(reader) => reader,
        }
    }
}

/// An open capture session: a frame source plus its pacer.
pub struct CaptureDisplay {
    device: String,
    backend: Backend,
    pacer: FramePacer,
}

impl std::fmt::Debug for CaptureDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDisplay")
            .field("device", &self.device)
            .field("geometry", &self.backend.reader().geometry())
            .field("delay", &self.pacer.delay())
            .finish_non_exhaustive()
    }
}

impl CaptureDisplay {
    fn open(device: &str, config: &CaptureConfig) -> Result<Self> {
        config.validate()?;
        let backend = Backend::open(device, config)?;
        Ok(Self {
            device: device.to_string(),
            backend,
            pacer: FramePacer::new(config.framerate),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.backend, Backend::Synthetic(_))
    }

    /// Current stream width. Tracks the last decoded frame.
    pub fn width(&self) -> u32 {
        self.backend.reader().geometry().0
    }

    /// Current stream height. Tracks the last decoded frame.
    pub fn height(&self) -> u32 {
        self.backend.reader().geometry().1
    }

    /// Run the paced capture loop against `consumer`.
    pub fn capture<C>(&mut self, consumer: &mut C) -> Result<CaptureStatus>
    where
        C: ImageConsumer + ?Sized,
    {
        log::info!("Display: starting capture on {}", self.device);
        self.pacer.run(self.backend.reader_mut(), consumer)
    }

    /// A new image sized for the current stream geometry.
    pub fn alloc_img(&self) -> Result<CapturedImage> {
        CapturedImage::with_geometry(self.width(), self.height())
    }

    /// Blank `image`, allocating it at the stream geometry if empty.
    pub fn dummy_img(&self, image: &mut CapturedImage) -> Result<()> {
        image.fill_blank(self.width(), self.height())
    }

    /// Frames are delivered raw, so any downstream codec can consume them.
    pub fn is_codec_supported(&self, _codec: &str, _config: &CaptureConfig) -> bool {
        true
    }

    pub fn stats(&self) -> &CaptureStats {
        self.pacer.stats()
    }
}

//! V4L2 camera capture backend.
//!
//! This crate acquires frames from a camera device node, decodes them,
//! converts them to packed BGRA and delivers them to an image consumer at a
//! fixed cadence.
//!
//! # Architecture
//!
//! - `ingest`: frame sources. The camera source composes a device session,
//!   a decode session and a conversion session (feature `camera-ffmpeg`).
//!   A synthetic `stub://` source shares the conversion path.
//! - `pacer`: the fixed-cadence loop with drift resynchronisation.
//! - `exchange`: the pull-free / push-filled contract with the consumer.
//! - `frame`: `CapturedImage`, the buffer moved across that contract.
//! - `display`: the facade (`initialize`, `display_names`, `create_display`).
//! - `config`: capture hints and the layered settings loader.
//!
//! # Outcomes
//!
//! A capture loop ends in exactly one of:
//!
//! 1. `Ok(CaptureStatus::Ok)`: the consumer declined a pushed image.
//! 2. `Ok(CaptureStatus::Interrupted)`: the consumer refused a free image.
//! 3. `Err(_)`: a read, decode or conversion step failed. The session is
//!    done; reopening is the caller's decision.
//!
//! A source with nothing ready is not an outcome: the pacer pushes the image
//! back flagged as a repeat and keeps going.

pub mod config;
pub mod display;
pub mod exchange;
pub mod frame;
pub mod ingest;
pub mod pacer;

pub use config::{CaptureConfig, CaptureSettings};
pub use display::{
    create_display, display_names, initialize, CaptureDisplay, DeviceCatalog, DEFAULT_DEVICE,
    SYNTHETIC_SCHEME,
};
pub use exchange::{
    image_exchange, CallbackConsumer, ConsumerEnd, DeliveredImage, ImageConsumer, PipelineEnd,
};
pub use frame::{CapturedImage, MAX_DIMENSION, PIXEL_PITCH};
pub use ingest::{FrameReader, ReadOutcome};
pub use pacer::{CaptureStats, FramePacer, DEFAULT_FRAMERATE};

/// How a capture loop that did not fail came to an end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureStatus {
    /// The consumer declined further frames.
    Ok,
    /// The consumer refused to hand out a free image.
    Interrupted,
}

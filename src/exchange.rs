//! Buffer exchange between the capture pipeline and an image consumer.
//!
//! The pipeline pulls a free image, fills it, and pushes it back tagged as new
//! content or as a repeat of the previous frame. Both calls are synchronous and
//! may block. A refused pull or push is the only cancellation mechanism.

use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, Sender, SyncSender};
use std::time::Duration;

use crate::frame::CapturedImage;

/// Consumer side of the pull/push contract.
pub trait ImageConsumer {
    /// Hand the pipeline a free image. `None` refuses and ends the capture loop.
    fn pull_free_image(&mut self) -> Option<CapturedImage>;

    /// Accept a filled image. `is_new` is false when the pixels repeat the
    /// previous frame. Returning `false` asks the pipeline to stop.
    fn push_captured_image(&mut self, image: CapturedImage, is_new: bool) -> bool;
}

impl<T: ImageConsumer + ?Sized> ImageConsumer for &mut T {
    fn pull_free_image(&mut self) -> Option<CapturedImage> {
        (**self).pull_free_image()
    }

    fn push_captured_image(&mut self, image: CapturedImage, is_new: bool) -> bool {
        (**self).push_captured_image(image, is_new)
    }
}

/// Adapts a pair of closures to `ImageConsumer`.
pub struct CallbackConsumer<P, Q> {
    pull: P,
    push: Q,
}

impl<P, Q> CallbackConsumer<P, Q>
where
    P: FnMut() -> Option<CapturedImage>,
    Q: FnMut(CapturedImage, bool) -> bool,
{
    pub fn new(pull: P, push: Q) -> Self {
        Self { pull, push }
    }
}

impl<P, Q> ImageConsumer for CallbackConsumer<P, Q>
where
    P: FnMut() -> Option<CapturedImage>,
    Q: FnMut(CapturedImage, bool) -> bool,
{
    fn pull_free_image(&mut self) -> Option<CapturedImage> {
        (self.pull)()
    }

    fn push_captured_image(&mut self, image: CapturedImage, is_new: bool) -> bool {
        (self.push)(image, is_new)
    }
}

/// A filled image as seen by the consumer.
#[derive(Debug)]
pub struct DeliveredImage {
    pub image: CapturedImage,
    pub is_new: bool,
}

/// Pipeline half of a channel-backed exchange.
pub struct PipelineEnd {
    free_rx: Receiver<CapturedImage>,
    filled_tx: SyncSender<DeliveredImage>,
}

/// Consumer half of a channel-backed exchange.
///
/// Dropping it stops the pipeline at its next pull or push.
pub struct ConsumerEnd {
    free_tx: Sender<CapturedImage>,
    filled_rx: Receiver<DeliveredImage>,
}

/// Build an exchange seeded with `pool_size` empty images.
///
/// Images are allocated lazily by the pipeline on first fill.
pub fn image_exchange(pool_size: usize) -> (PipelineEnd, ConsumerEnd) {
    let (free_tx, free_rx) = mpsc::channel();
    let (filled_tx, filled_rx) = mpsc::sync_channel(pool_size.max(1));

    for _ in 0..pool_size {
        // The receiver is alive in this scope, so the send cannot fail.
        let _ = free_tx.send(CapturedImage::new());
    }

    (
        PipelineEnd { free_rx, filled_tx },
        ConsumerEnd { free_tx, filled_rx },
    )
}

impl ImageConsumer for PipelineEnd {
    fn pull_free_image(&mut self) -> Option<CapturedImage> {
        self.free_rx.recv().ok()
    }

    fn push_captured_image(&mut self, image: CapturedImage, is_new: bool) -> bool {
        self.filled_tx.send(DeliveredImage { image, is_new }).is_ok()
    }
}

impl ConsumerEnd {
    /// Block until the pipeline delivers an image or goes away.
    pub fn recv(&self) -> Option<DeliveredImage> {
        self.filled_rx.recv().ok()
    }

    /// Like `recv` but gives up after `timeout`.
    ///
    /// Returns `Ok(None)` on timeout and `Err` once the pipeline is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<DeliveredImage>, RecvError> {
        match self.filled_rx.recv_timeout(timeout) {
            Ok(delivered) => Ok(Some(delivered)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RecvError),
        }
    }

    /// Return an image to the free pool. `false` once the pipeline is gone.
    pub fn recycle(&self, image: CapturedImage) -> bool {
        self.free_tx.send(image).is_ok()
    }
}

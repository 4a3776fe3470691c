//! Fixed-cadence capture loop.
//!
//! The pacer sleeps to each scheduled tick, pulls a free image from the
//! consumer, asks the frame reader to fill it and pushes it back. Oversleep
//! is measured for diagnostics only. When a tick is missed entirely the
//! schedule is resynchronised to `now + delay` so at most one catch-up tick
//! ever fires.

use anyhow::Result;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::exchange::ImageConsumer;
use crate::ingest::{FrameReader, ReadOutcome};
use crate::CaptureStatus;

/// Frame rate used when the configuration leaves it unspecified.
pub const DEFAULT_FRAMERATE: u32 = 30;

/// Inter-frame delay for `framerate`; zero means `DEFAULT_FRAMERATE`.
pub fn frame_delay(framerate: u32) -> Duration {
    let fps = if framerate == 0 {
        DEFAULT_FRAMERATE
    } else {
        framerate
    };
    Duration::from_nanos(1_000_000_000 / u64::from(fps))
}

/// Advance `next_tick` by one `delay`, resynchronising to `now + delay` if the
/// advanced tick is still in the past.
pub fn schedule_next(next_tick: Instant, now: Instant, delay: Duration) -> Instant {
    let advanced = next_tick + delay;
    if advanced < now {
        now + delay
    } else {
        advanced
    }
}

/// How far past its scheduled tick the loop actually woke up.
pub fn sleep_overshoot(scheduled: Instant, woke: Instant) -> Duration {
    woke.saturating_duration_since(scheduled)
}

/// Counters for one pacer.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CaptureStats {
    /// Images pushed as new content.
    pub frames_new: u64,
    /// Images pushed as repeats after a transient-empty read.
    pub frames_repeated: u64,
    /// Worst sleep overshoot observed.
    #[serde(with = "duration_micros")]
    pub max_overshoot: Duration,
    /// Overshoot of the most recent sleep.
    #[serde(with = "duration_micros")]
    pub last_overshoot: Duration,
}

mod duration_micros {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros() as u64)
    }
}

pub struct FramePacer {
    delay: Duration,
    stats: CaptureStats,
}

impl FramePacer {
    pub fn new(framerate: u32) -> Self {
        Self {
            delay: frame_delay(framerate),
            stats: CaptureStats::default(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Run the capture loop until the consumer stops it or the reader fails.
    ///
    /// Returns `CaptureStatus::Interrupted` when the consumer refuses a pull,
    /// `CaptureStatus::Ok` when it declines a push, and `Err` on a hard read
    /// failure.
    pub fn run<R, C>(&mut self, reader: &mut R, consumer: &mut C) -> Result<CaptureStatus>
    where
        R: FrameReader + ?Sized,
        C: ImageConsumer + ?Sized,
    {
        let mut next_tick = Instant::now();
        log::debug!("FramePacer: running at {:?} per frame", self.delay);

        loop {
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
                self.record_overshoot(sleep_overshoot(next_tick, Instant::now()));
            }
            next_tick = schedule_next(next_tick, now, self.delay);

            let Some(mut image) = consumer.pull_free_image() else {
                log::debug!("FramePacer: consumer refused a free image");
                return Ok(CaptureStatus::Interrupted);
            };

            let is_new = match reader.read_frame(&mut image) {
                Ok(ReadOutcome::Frame) => {
                    self.stats.frames_new += 1;
                    true
                }
                Ok(ReadOutcome::Timeout) => {
                    self.stats.frames_repeated += 1;
                    false
                }
                Err(err) => {
                    log::error!("FramePacer: capture failed: {:#}", err);
                    return Err(err);
                }
            };

            if !consumer.push_captured_image(image, is_new) {
                log::debug!("FramePacer: consumer stopped the capture");
                return Ok(CaptureStatus::Ok);
            }
        }
    }

    fn record_overshoot(&mut self, overshoot: Duration) {
        log::trace!("FramePacer: sleep overshoot {:?}", overshoot);
        self.stats.last_overshoot = overshoot;
        self.stats.max_overshoot = self.stats.max_overshoot.max(overshoot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::CallbackConsumer;
    use crate::frame::CapturedImage;
    use anyhow::bail;

    struct Scripted(Vec<Result<ReadOutcome>>);

    impl FrameReader for Scripted {
        fn read_frame(&mut self, image: &mut CapturedImage) -> Result<ReadOutcome> {
            let next = self.0.remove(0);
            if let Ok(ReadOutcome::Frame) = next {
                image.ensure_geometry(4, 4)?;
                image.mark_captured();
            }
            next
        }

        fn geometry(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    #[test]
    fn zero_framerate_defaults_to_thirty() {
        assert_eq!(frame_delay(0), Duration::from_nanos(1_000_000_000 / 30));
        assert_eq!(frame_delay(0), frame_delay(30));
        assert_eq!(frame_delay(60), Duration::from_nanos(16_666_666));
    }

    #[test]
    fn on_time_tick_advances_by_delay() {
        let start = Instant::now();
        let delay = Duration::from_millis(33);
        assert_eq!(schedule_next(start, start, delay), start + delay);
    }

    #[test]
    fn late_tick_resynchronises() {
        let start = Instant::now();
        let delay = Duration::from_millis(10);
        let now = start + Duration::from_millis(35);

        let next = schedule_next(start, now, delay);
        assert_eq!(next, now + delay);
        assert!(next > now);
    }

    #[test]
    fn slightly_late_tick_keeps_cadence() {
        let start = Instant::now();
        let delay = Duration::from_millis(10);
        let now = start + Duration::from_millis(4);
        assert_eq!(schedule_next(start, now, delay), start + delay);
    }

    #[test]
    fn overshoot_never_negative() {
        let scheduled = Instant::now();
        let early = scheduled;
        let late = scheduled + Duration::from_millis(3);
        assert_eq!(sleep_overshoot(scheduled, early), Duration::ZERO);
        assert_eq!(sleep_overshoot(scheduled, late), Duration::from_millis(3));
        assert_eq!(sleep_overshoot(late, scheduled), Duration::ZERO);
    }

    #[test]
    fn refused_pull_interrupts() -> Result<()> {
        let mut pacer = FramePacer::new(1000);
        let mut reader = Scripted(Vec::new());
        let mut consumer =
            CallbackConsumer::new(|| None::<CapturedImage>, |_: CapturedImage, _: bool| true);

        assert_eq!(pacer.run(&mut reader, &mut consumer)?, CaptureStatus::Interrupted);
        Ok(())
    }

    #[test]
    fn read_error_ends_loop_with_error() {
        let mut pacer = FramePacer::new(1000);
        let mut reader = Scripted(vec![Ok(ReadOutcome::Frame), Err(anyhow::anyhow!("boom"))]);
        let mut pushes = 0;
        let mut consumer = CallbackConsumer::new(
            || Some(CapturedImage::new()),
            |_: CapturedImage, _: bool| {
                pushes += 1;
                true
            },
        );

        let result = pacer.run(&mut reader, &mut consumer);
        drop(consumer);
        assert!(result.is_err());
        assert_eq!(pushes, 1);
        assert_eq!(pacer.stats().frames_new, 1);
    }

    #[test]
    fn repeat_frames_are_counted() -> Result<()> {
        let mut pacer = FramePacer::new(1000);
        let mut reader = Scripted(vec![
            Ok(ReadOutcome::Timeout),
            Ok(ReadOutcome::Frame),
            Ok(ReadOutcome::Timeout),
        ]);
        let mut flags = Vec::new();
        let mut consumer = CallbackConsumer::new(
            || Some(CapturedImage::new()),
            |_: CapturedImage, is_new: bool| {
                flags.push(is_new);
                flags.len() < 3
            },
        );

        let status = pacer.run(&mut reader, &mut consumer)?;
        drop(consumer);
        assert_eq!(status, CaptureStatus::Ok);
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(pacer.stats().frames_new, 1);
        assert_eq!(pacer.stats().frames_repeated, 2);
        Ok(())
    }

    #[test]
    fn slow_reader_does_not_burst() -> Result<()> {
        struct Slow(u32);
        impl FrameReader for Slow {
            fn read_frame(&mut self, image: &mut CapturedImage) -> Result<ReadOutcome> {
                self.0 += 1;
                if self.0 > 10 {
                    bail!("reader ran too long");
                }
                image.ensure_geometry(2, 2)?;
                std::thread::sleep(Duration::from_millis(30));
                Ok(ReadOutcome::Frame)
            }
            fn geometry(&self) -> (u32, u32) {
                (2, 2)
            }
        }

        // 100 fps with a 30 ms reader: every tick is missed and the schedule
        // resyncs, so pushes stay spaced by the read time instead of bursting.
        let mut pacer = FramePacer::new(100);
        let mut reader = Slow(0);
        let mut stamps = Vec::new();
        let mut consumer = CallbackConsumer::new(
            || Some(CapturedImage::new()),
            |_: CapturedImage, _: bool| {
                stamps.push(Instant::now());
                stamps.len() < 4
            },
        );

        pacer.run(&mut reader, &mut consumer)?;
        drop(consumer);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(30));
        }
        Ok(())
    }
}

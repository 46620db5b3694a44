//! Gapless scheduling of inbound audio and barge-in handling.
//!
//! The scheduler decides *when* each decoded buffer starts; a [`PlaybackSink`]
//! owns the output device and its clock and actually renders the samples.
//! Buffers are laid back to back on the sink's clock: each start is the later
//! of "now" and the end of the previously scheduled buffer, so buffers never
//! overlap and never start in the past.

use crate::audio::{OUTPUT_SAMPLE_RATE, decode_pcm16_base64, sample_rate_from_mime};
use crate::error::{DecodeError, PlaybackError, SessionError};
use crate::inbound::InboundAudio;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::{debug, info, warn};

/// Sample rates accepted for inbound audio.
pub const SUPPORTED_SAMPLE_RATES: RangeInclusive<u32> = 8_000..=192_000;

/// Identifies one scheduled buffer on its sink.
pub type BufferId = u64;

/// An output device with its own monotonic clock, in seconds.
///
/// Implementations must not block: `start` and `stop` only enqueue work for
/// the device's real-time callback.
pub trait PlaybackSink: Send {
    /// Acquires the output device. Called once per session before scheduling.
    fn open(&mut self) -> Result<(), PlaybackError>;

    /// Current position of the output clock.
    fn now(&self) -> f64;

    /// Plays `samples` (mono, at `sample_rate`) starting at clock time `start_at`.
    ///
    /// An error means the buffer will never play.
    fn start(
        &mut self,
        id: BufferId,
        samples: Vec<f32>,
        sample_rate: u32,
        start_at: f64,
    ) -> Result<(), PlaybackError>;

    /// Silences a buffer immediately, whether playing or still pending.
    fn stop(&mut self, id: BufferId);

    /// Buffers that have played to their natural end since the last call.
    fn drain_finished(&mut self) -> Vec<BufferId>;

    /// Releases the output device.
    fn close(&mut self);
}

/// Where and for how long a buffer was placed on the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Owns the playback queue: the active buffers and `next_start_time`.
pub struct AudioPlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    active: BTreeMap<BufferId, ScheduledBuffer>,
    next_start_time: f64,
    next_id: BufferId,
    open: bool,
}

impl AudioPlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink,
            active: BTreeMap::new(),
            next_start_time: 0.0,
            next_id: 0,
            open: false,
        }
    }

    /// Opens the output device. Idempotent.
    pub fn open(&mut self) -> Result<(), PlaybackError> {
        if !self.open {
            self.sink.open()?;
            self.open = true;
            info!("Playback opened");
        }
        Ok(())
    }

    /// Decodes a frame and schedules it right after everything already queued.
    ///
    /// A malformed frame, or one the sink refuses, is rejected without
    /// touching the queue.
    pub fn enqueue(&mut self, audio: &InboundAudio) -> Result<ScheduledBuffer, SessionError> {
        let sample_rate = if audio.mime_type.is_empty() {
            OUTPUT_SAMPLE_RATE
        } else if audio.mime_type.starts_with("audio/pcm") {
            sample_rate_from_mime(&audio.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE)
        } else {
            return Err(DecodeError::MimeType(audio.mime_type.clone()).into());
        };
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(DecodeError::SampleRate(sample_rate).into());
        }
        let samples = decode_pcm16_base64(&audio.data)?;
        self.schedule(samples, sample_rate).map_err(SessionError::from)
    }

    /// Places already-decoded samples on the clock.
    pub fn schedule(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<ScheduledBuffer, PlaybackError> {
        if sample_rate == 0 {
            return Err(PlaybackError("sample rate must be positive".into()));
        }
        self.reap();
        let duration = samples.len() as f64 / sample_rate as f64;
        let start_at = self.next_start_time.max(self.sink.now());
        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = self.sink.start(id, samples, sample_rate, start_at) {
            warn!(id, error = %e, "Sink refused playback buffer");
            return Err(e);
        }
        self.next_start_time = start_at + duration;
        let buffer = ScheduledBuffer {
            id,
            start_at,
            duration,
        };
        self.active.insert(id, buffer);
        debug!(id, start_at, duration, "Scheduled playback buffer");
        Ok(buffer)
    }

    /// Forgets buffers that finished playing on their own.
    pub fn reap(&mut self) {
        for id in self.sink.drain_finished() {
            self.active.remove(&id);
        }
    }

    /// Barge-in: stops every buffer now and restarts scheduling from zero.
    pub fn interrupt(&mut self) {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.sink.stop(id);
        }
        // Completion notices for the stopped buffers are stale now.
        self.sink.drain_finished();
        self.next_start_time = 0.0;
        if stopped > 0 {
            info!(stopped, "Playback interrupted");
        }
    }

    /// Stops everything and releases the device. Idempotent.
    pub fn close(&mut self) {
        self.interrupt();
        if self.open {
            self.sink.close();
            self.open = false;
            info!("Playback closed");
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn now(&self) -> f64 {
        self.sink.now()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared view into a [`FakeSink`] for assertions.
    #[derive(Debug, Default)]
    pub struct FakeSinkState {
        pub now: f64,
        pub started: Vec<(BufferId, f64, usize)>,
        pub stopped: Vec<BufferId>,
        pub finished: Vec<BufferId>,
        pub opened: usize,
        pub closed: usize,
        /// Refuse the next `start` calls, as a full device queue would.
        pub refuse: usize,
    }

    /// A sink with a hand-driven clock.
    #[derive(Clone, Default)]
    pub struct FakeSink(pub Arc<Mutex<FakeSinkState>>);

    impl FakeSink {
        pub fn set_now(&self, now: f64) {
            self.0.lock().unwrap().now = now;
        }

        pub fn finish(&self, id: BufferId) {
            self.0.lock().unwrap().finished.push(id);
        }
    }

    impl PlaybackSink for FakeSink {
        fn open(&mut self) -> Result<(), PlaybackError> {
            self.0.lock().unwrap().opened += 1;
            Ok(())
        }

        fn now(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn start(
            &mut self,
            id: BufferId,
            samples: Vec<f32>,
            _sample_rate: u32,
            start_at: f64,
        ) -> Result<(), PlaybackError> {
            let mut state = self.0.lock().unwrap();
            if state.refuse > 0 {
                state.refuse -= 1;
                return Err(PlaybackError("queue full".into()));
            }
            state.started.push((id, start_at, samples.len()));
            Ok(())
        }

        fn stop(&mut self, id: BufferId) {
            self.0.lock().unwrap().stopped.push(id);
        }

        fn drain_finished(&mut self) -> Vec<BufferId> {
            std::mem::take(&mut self.0.lock().unwrap().finished)
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }
}

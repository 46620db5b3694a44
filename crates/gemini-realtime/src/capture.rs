//! Microphone capture into fixed-size outbound frames.
//!
//! The graph is source → gain → fixed-size block processor. The source is a
//! [`CaptureBackend`] (a real device in the service, a fake in tests); the
//! gain stage and block processor are the [`FrameAssembler`], which the
//! backend drives from its real-time callback.

use crate::audio::{INPUT_SAMPLE_RATE, convert_f32_to_i16};
use crate::error::CaptureError;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// 32 ms of 16 kHz audio.
pub const DEFAULT_FRAME_SAMPLES: usize = 512;

/// One block of PCM16 mono microphone audio at [`INPUT_SAMPLE_RATE`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundAudioFrame {
    pub samples: Vec<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    /// Samples per outbound frame.
    pub frame_samples: usize,
    /// Linear gain applied before quantization.
    pub gain: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_samples: DEFAULT_FRAME_SAMPLES,
            gain: 1.0,
        }
    }
}

impl CaptureConfig {
    pub fn frame_duration_ms(&self) -> f64 {
        self.frame_samples as f64 * 1000.0 / INPUT_SAMPLE_RATE as f64
    }
}

/// Gain stage plus fixed-size block processor.
///
/// Runs on the audio thread, so it never blocks: a frame that does not fit in
/// the outbound queue is dropped.
pub struct FrameAssembler {
    config: CaptureConfig,
    pending: Vec<f32>,
    tx: mpsc::Sender<OutboundAudioFrame>,
    dropped: u64,
}

impl FrameAssembler {
    pub fn new(mut config: CaptureConfig, tx: mpsc::Sender<OutboundAudioFrame>) -> Self {
        config.frame_samples = config.frame_samples.max(1);
        Self {
            pending: Vec::with_capacity(config.frame_samples * 2),
            config,
            tx,
            dropped: 0,
        }
    }

    /// Accepts mono samples at [`INPUT_SAMPLE_RATE`] and emits every complete frame.
    pub fn push(&mut self, samples: &[f32]) {
        let gain = self.config.gain;
        self.pending.extend(samples.iter().map(|s| s * gain));
        while self.pending.len() >= self.config.frame_samples {
            let block: Vec<f32> = self.pending.drain(..self.config.frame_samples).collect();
            let frame = OutboundAudioFrame {
                samples: convert_f32_to_i16(&block),
            };
            if self.tx.try_send(frame).is_err() {
                self.dropped += 1;
                debug!(dropped = self.dropped, "Outbound audio queue full, dropping frame");
            }
        }
    }

    /// Frames that could not be queued.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// A live capture stream. Dropping or closing it releases the device.
pub trait CaptureStream: Send {
    fn close(self: Box<Self>);
}

/// Opens the microphone and feeds an assembler until the stream is closed.
pub trait CaptureBackend: Send {
    fn open(&mut self, assembler: FrameAssembler) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// Owns the capture resources; armed between `start()` and `stop()`.
pub struct AudioCaptureGraph {
    backend: Box<dyn CaptureBackend>,
    config: CaptureConfig,
    frames_tx: mpsc::Sender<OutboundAudioFrame>,
    stream: Option<Box<dyn CaptureStream>>,
}

impl AudioCaptureGraph {
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        config: CaptureConfig,
        frames_tx: mpsc::Sender<OutboundAudioFrame>,
    ) -> Self {
        Self {
            backend,
            config,
            frames_tx,
            stream: None,
        }
    }

    /// Arms capture. A no-op while already armed.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            debug!("Capture already armed");
            return Ok(());
        }
        let assembler = FrameAssembler::new(self.config, self.frames_tx.clone());
        self.stream = Some(self.backend.open(assembler)?);
        info!(
            frame_ms = self.config.frame_duration_ms(),
            "Microphone capture started"
        );
        Ok(())
    }

    /// Disarms capture and releases the device. Safe to call in any state.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
            info!("Microphone capture stopped");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for AudioCaptureGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct FakeMicState {
        pub opened: usize,
        pub released: usize,
        pub deny: bool,
        /// The assembler handed to the most recent open.
        pub assembler: Option<FrameAssembler>,
    }

    /// A microphone that records what was asked of it.
    #[derive(Clone, Default)]
    pub struct FakeMic(pub Arc<Mutex<FakeMicState>>);

    impl FakeMic {
        pub fn denied() -> Self {
            let mic = Self::default();
            mic.0.lock().unwrap().deny = true;
            mic
        }

        /// Simulates the device callback delivering samples.
        pub fn speak(&self, samples: &[f32]) {
            if let Some(assembler) = self.0.lock().unwrap().assembler.as_mut() {
                assembler.push(samples);
            }
        }
    }

    struct FakeStream(Arc<Mutex<FakeMicState>>);

    impl CaptureStream for FakeStream {
        fn close(self: Box<Self>) {
            let mut state = self.0.lock().unwrap();
            state.released += 1;
            state.assembler = None;
        }
    }

    impl CaptureBackend for FakeMic {
        fn open(
            &mut self,
            assembler: FrameAssembler,
        ) -> Result<Box<dyn CaptureStream>, CaptureError> {
            let mut state = self.0.lock().unwrap();
            if state.deny {
                return Err(CaptureError::Permission("denied by user".into()));
            }
            state.opened += 1;
            state.assembler = Some(assembler);
            Ok(Box::new(FakeStream(self.0.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeMic;
    use super::*;

    fn graph(mic: &FakeMic) -> (AudioCaptureGraph, mpsc::Receiver<OutboundAudioFrame>) {
        let (tx, rx) = mpsc::channel(4);
        let config = CaptureConfig {
            frame_samples: 4,
            gain: 2.0,
        };
        (AudioCaptureGraph::new(Box::new(mic.clone()), config, tx), rx)
    }

    #[test]
    fn test_assembler_emits_fixed_size_frames_with_gain() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut assembler = FrameAssembler::new(
            CaptureConfig {
                frame_samples: 3,
                gain: 0.5,
            },
            tx,
        );
        assembler.push(&[1.0, 1.0]);
        assert!(rx.try_recv().is_err());
        assembler.push(&[1.0, 0.0, 0.0, 0.0, -1.0]);

        let first = rx.try_recv().unwrap();
        let half = (0.5 * i16::MAX as f32) as i16;
        assert_eq!(first.samples, vec![half, half, half]);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.samples, vec![0, 0, 0]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_assembler_drops_when_queue_full() {
        let (tx, _rx) = mpsc::channel(1);
        let mut assembler = FrameAssembler::new(
            CaptureConfig {
                frame_samples: 1,
                gain: 1.0,
            },
            tx,
        );
        assembler.push(&[0.1, 0.2, 0.3]);
        assert_eq!(assembler.dropped(), 2);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mic = FakeMic::default();
        let (mut graph, mut rx) = graph(&mic);
        graph.start().unwrap();
        graph.start().unwrap();
        assert!(graph.is_armed());
        assert_eq!(mic.0.lock().unwrap().opened, 1);

        mic.speak(&[0.25; 4]);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.samples.len(), 4);
        assert_eq!(frame.samples[0], (0.5 * i16::MAX as f32) as i16);
    }

    #[test]
    fn test_stop_releases_once() {
        let mic = FakeMic::default();
        let (mut graph, _rx) = graph(&mic);
        graph.stop();
        graph.start().unwrap();
        graph.stop();
        graph.stop();
        drop(graph);
        assert_eq!(mic.0.lock().unwrap().released, 1);
    }

    #[test]
    fn test_permission_denied() {
        let mic = FakeMic::denied();
        let (mut graph, _rx) = graph(&mic);
        let err = graph.start().unwrap_err();
        assert!(matches!(err, CaptureError::Permission(_)));
        assert!(!graph.is_armed());
        graph.stop();
    }
}

//! Microphone capture using cpal.
//!
//! Captures at the device's native rate and channel count, downmixes to mono
//! and resamples to the live input rate before handing samples to the
//! session's [`FrameAssembler`].

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use gemini_realtime::audio::{INPUT_SAMPLE_RATE, create_resampler};
use gemini_realtime::{CaptureBackend, CaptureError, CaptureStream, FrameAssembler};
use rubato::{FastFixedIn, Resampler};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

const RESAMPLER_CHUNK: usize = 480;

/// The default input device.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CaptureBackend for CpalMicrophone {
    fn open(&mut self, assembler: FrameAssembler) -> Result<Box<dyn CaptureStream>, CaptureError> {
        // `cpal::Stream` is not `Send` on every platform, so it lives and
        // dies on its own thread.
        let (init_tx, init_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match build_input_stream(assembler) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));
                // Returns on stop or when the handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                info!("audio capture stopped");
            })
            .map_err(|e| CaptureError::Device(format!("failed to spawn capture thread: {e}")))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalCaptureStream {
                stop_tx,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(CaptureError::Device("capture thread exited during init".into())),
        }
    }
}

struct CpalCaptureStream {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCaptureStream {
    fn close(mut self: Box<Self>) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

fn build_input_stream(assembler: FrameAssembler) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::Permission("no default input device".into()))?;
    let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    let default_cfg = device
        .default_input_config()
        .map_err(|e| CaptureError::Permission(format!("no default input config: {e}")))?;
    let native_rate = default_cfg.sample_rate().0;
    let native_channels = default_cfg.channels();
    info!(
        "native input config: {}Hz, {} channels",
        native_rate, native_channels
    );

    let mut processor = InputProcessor::new(native_rate, native_channels, assembler)?;
    let cfg: cpal::StreamConfig = default_cfg.config();
    let err_fn = |err| error!("audio input stream error: {err}");

    let stream = match default_cfg.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &cfg,
            move |data: &[f32], _: &cpal::InputCallbackInfo| processor.push(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &cfg,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&x| x as f32 / i16::MAX as f32).collect();
                processor.push(&samples);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &cfg,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data
                    .iter()
                    .map(|&x| (x as f32 / u16::MAX as f32) * 2.0 - 1.0)
                    .collect();
                processor.push(&samples);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Permission(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    }
    .map_err(|e| CaptureError::Permission(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CaptureError::Device(format!("failed to start input stream: {e}")))?;
    info!(
        "audio capture started: native {}Hz -> target {}Hz",
        native_rate, INPUT_SAMPLE_RATE
    );
    Ok(stream)
}

/// Downmix and resample stage between the device callback and the assembler.
pub struct InputProcessor {
    channels: usize,
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    assembler: FrameAssembler,
}

impl InputProcessor {
    pub fn new(
        native_rate: u32,
        channels: u16,
        assembler: FrameAssembler,
    ) -> Result<Self, CaptureError> {
        if channels == 0 {
            return Err(CaptureError::Device("input device reports 0 channels".into()));
        }
        let resampler = if native_rate == INPUT_SAMPLE_RATE {
            None
        } else {
            debug!(
                "will resample from {}Hz to {}Hz",
                native_rate, INPUT_SAMPLE_RATE
            );
            Some(
                create_resampler(native_rate as f64, INPUT_SAMPLE_RATE as f64, RESAMPLER_CHUNK)
                    .map_err(|e| CaptureError::Device(format!("failed to create resampler: {e}")))?,
            )
        };
        Ok(Self {
            channels: channels as usize,
            resampler,
            pending: Vec::with_capacity(RESAMPLER_CHUNK * 2),
            assembler,
        })
    }

    /// Accepts interleaved samples at the device rate.
    pub fn push(&mut self, interleaved: &[f32]) {
        let mono = downmix(interleaved, self.channels);
        let Some(resampler) = self.resampler.as_mut() else {
            self.assembler.push(&mono);
            return;
        };
        self.pending.extend_from_slice(&mono);
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(out) => self.assembler.push(&out[0]),
                Err(e) => debug!("resampler error, dropping chunk: {e}"),
            }
        }
    }
}

/// Averages interleaved channels into one.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use gemini_realtime::{CaptureConfig, OutboundAudioFrame};
    use tokio::sync::mpsc;

    fn assembler(capacity: usize) -> (FrameAssembler, mpsc::Receiver<OutboundAudioFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (FrameAssembler::new(CaptureConfig::default(), tx), rx)
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix(&[0.2, 0.4, 1.0, 0.0], 2);
        assert_eq!(mono.len(), 2);
        assert_abs_diff_eq!(mono[0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(mono[1], 0.5, epsilon = 1e-6);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_native_rate_passes_through() {
        let (assembler, mut rx) = assembler(8);
        let mut processor = InputProcessor::new(INPUT_SAMPLE_RATE, 1, assembler).unwrap();
        processor.push(&[0.0; 1024]);
        assert_eq!(rx.try_recv().unwrap().samples.len(), 512);
        assert_eq!(rx.try_recv().unwrap().samples.len(), 512);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stereo_48k_becomes_16k_frames() {
        let (assembler, mut rx) = assembler(64);
        let mut processor = InputProcessor::new(48_000, 2, assembler).unwrap();
        // One second of stereo audio, delivered in device-sized callbacks.
        let second = vec![0.1f32; 48_000 * 2];
        for callback in second.chunks(960) {
            processor.push(callback);
        }
        let mut frames = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame.samples.len(), 512);
            frames += 1;
        }
        // 16000 samples / 512 per frame, minus resampler latency.
        assert!((29..=31).contains(&frames), "got {frames} frames");
    }

    #[test]
    fn test_zero_channels_rejected() {
        let (assembler, _rx) = assembler(1);
        assert!(matches!(
            InputProcessor::new(48_000, 0, assembler),
            Err(CaptureError::Device(_))
        ));
    }
}

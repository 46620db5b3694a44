//! Speaker output via cpal.
//!
//! The device callback owns a [`Mixer`]: it renders every voice that overlaps
//! the current block and advances a frame counter that serves as the output
//! clock. The control task talks to it through two lock-free queues, one for
//! start/stop commands and one for "finished" notices.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use gemini_realtime::audio::create_resampler;
use gemini_realtime::{BufferId, PlaybackError, PlaybackSink};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rubato::Resampler;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

const COMMAND_CAPACITY: usize = 256;
const FINISHED_CAPACITY: usize = 256;
const RESAMPLER_CHUNK: usize = 1024;

/// Work for the device callback.
pub enum VoiceCommand {
    Start {
        id: BufferId,
        samples: Vec<f32>,
        start_frame: u64,
    },
    Stop(BufferId),
}

struct Voice {
    id: BufferId,
    samples: Vec<f32>,
    start_frame: u64,
    position: usize,
}

/// Sums scheduled voices into the output on the audio thread.
pub struct Mixer {
    voices: Vec<Voice>,
    commands: HeapCons<VoiceCommand>,
    finished: HeapProd<BufferId>,
    clock: Arc<AtomicU64>,
}

impl Mixer {
    pub fn new(
        commands: HeapCons<VoiceCommand>,
        finished: HeapProd<BufferId>,
        clock: Arc<AtomicU64>,
    ) -> Self {
        Self {
            voices: Vec::new(),
            commands,
            finished,
            clock,
        }
    }

    /// Fills one interleaved block and advances the clock by its frame count.
    ///
    /// A voice that arrives after its start frame joins mid-buffer, so it
    /// still ends where it was scheduled to.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let first_frame = self.clock.load(Ordering::Acquire);
        while let Some(command) = self.commands.try_pop() {
            match command {
                VoiceCommand::Start {
                    id,
                    samples,
                    start_frame,
                } => {
                    let late = first_frame.saturating_sub(start_frame) as usize;
                    self.voices.push(Voice {
                        id,
                        position: late.min(samples.len()),
                        samples,
                        start_frame,
                    });
                }
                VoiceCommand::Stop(id) => self.voices.retain(|v| v.id != id),
            }
        }

        let channels = channels.max(1);
        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let now = first_frame + offset as u64;
            let mut sample = 0.0;
            for voice in &mut self.voices {
                if now >= voice.start_frame && voice.position < voice.samples.len() {
                    sample += voice.samples[voice.position];
                    voice.position += 1;
                }
            }
            frame.fill(sample.clamp(-1.0, 1.0));
        }
        let frames = (out.len() / channels) as u64;
        self.clock.store(first_frame + frames, Ordering::Release);

        let finished = &mut self.finished;
        self.voices.retain(|voice| {
            if voice.position < voice.samples.len() {
                return true;
            }
            let _ = finished.try_push(voice.id);
            false
        });
    }
}

struct Device {
    commands: HeapProd<VoiceCommand>,
    finished: HeapCons<BufferId>,
    sample_rate: u32,
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

/// The default output device as a [`PlaybackSink`].
#[derive(Default)]
pub struct CpalPlaybackSink {
    clock: Arc<AtomicU64>,
    device: Option<Device>,
}

impl CpalPlaybackSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn open(&mut self) -> Result<(), PlaybackError> {
        if self.device.is_some() {
            return Ok(());
        }
        let (commands_tx, commands_rx) = HeapRb::<VoiceCommand>::new(COMMAND_CAPACITY).split();
        let (finished_tx, finished_rx) = HeapRb::<BufferId>::new(FINISHED_CAPACITY).split();
        self.clock.store(0, Ordering::Release);
        let mixer = Mixer::new(commands_rx, finished_tx, self.clock.clone());

        // `cpal::Stream` is not `Send` on every platform.
        let (init_tx, init_rx) = std_mpsc::channel::<Result<u32, PlaybackError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("speaker-playback".into())
            .spawn(move || {
                let (stream, sample_rate) = match build_output_stream(mixer) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(sample_rate));
                let _ = stop_rx.recv();
                drop(stream);
                info!("audio playback stopped");
            })
            .map_err(|e| PlaybackError(format!("failed to spawn playback thread: {e}")))?;

        let sample_rate = match init_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => return Err(PlaybackError("playback thread exited during init".into())),
        };
        self.device = Some(Device {
            commands: commands_tx,
            finished: finished_rx,
            sample_rate,
            stop_tx,
            thread: Some(thread),
        });
        Ok(())
    }

    fn now(&self) -> f64 {
        match &self.device {
            Some(device) => self.clock.load(Ordering::Acquire) as f64 / device.sample_rate as f64,
            None => 0.0,
        }
    }

    fn start(
        &mut self,
        id: BufferId,
        samples: Vec<f32>,
        sample_rate: u32,
        start_at: f64,
    ) -> Result<(), PlaybackError> {
        let Some(device) = self.device.as_mut() else {
            return Err(PlaybackError("playback is not open".into()));
        };
        if sample_rate == 0 {
            return Err(PlaybackError("sample rate must be positive".into()));
        }
        let samples = resample(samples, sample_rate, device.sample_rate);
        let start_frame = (start_at * device.sample_rate as f64).round() as u64;
        device
            .commands
            .try_push(VoiceCommand::Start {
                id,
                samples,
                start_frame,
            })
            .map_err(|_| PlaybackError("playback command queue full".into()))
    }

    fn stop(&mut self, id: BufferId) {
        if let Some(device) = self.device.as_mut() {
            if device.commands.try_push(VoiceCommand::Stop(id)).is_err() {
                warn!(id, "playback command queue full, cannot stop buffer");
            }
        }
    }

    fn drain_finished(&mut self) -> Vec<BufferId> {
        match self.device.as_mut() {
            Some(device) => device.finished.pop_iter().collect(),
            None => Vec::new(),
        }
    }

    fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            let _ = device.stop_tx.send(());
            if let Some(thread) = device.thread.take() {
                if thread.join().is_err() {
                    warn!("playback thread panicked");
                }
            }
        }
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream(mut mixer: Mixer) -> Result<(cpal::Stream, u32), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError("no default output device".into()))?;
    let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");

    let default_cfg = device
        .default_output_config()
        .map_err(|e| PlaybackError(format!("no default output config: {e}")))?;
    let sample_rate = default_cfg.sample_rate().0;
    let channels = default_cfg.channels() as usize;
    let cfg: cpal::StreamConfig = default_cfg.config();
    let err_fn = |err| error!("audio output stream error: {err}");

    let stream = match default_cfg.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &cfg,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.render(data, channels),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &cfg,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    mixer.render(&mut scratch, channels);
                    for (out, sample) in data.iter_mut().zip(&scratch) {
                        *out = (sample * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(PlaybackError(format!("unsupported sample format: {other:?}")));
        }
    }
    .map_err(|e| PlaybackError(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| PlaybackError(format!("failed to start output stream: {e}")))?;
    info!("audio playback started: {}Hz, {} channels", sample_rate, channels);
    Ok((stream, sample_rate))
}

/// Converts mono samples between rates, keeping the duration exact.
pub fn resample(samples: Vec<f32>, from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples;
    }
    if from == 0 || to == 0 {
        warn!(from, to, "cannot resample with a zero rate");
        return Vec::new();
    }
    let expected = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let mut resampler = match create_resampler(from as f64, to as f64, RESAMPLER_CHUNK) {
        Ok(r) => r,
        Err(e) => {
            warn!("failed to create playback resampler: {e}");
            return samples;
        }
    };

    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay);
    let mut chunks = samples.chunks_exact(RESAMPLER_CHUNK);
    for chunk in &mut chunks {
        match resampler.process(&[chunk], None) {
            Ok(res) => out.extend_from_slice(&res[0]),
            Err(e) => debug!("resampler error, dropping chunk: {e}"),
        }
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        if let Ok(res) = resampler.process_partial(Some(&[rest][..]), None) {
            out.extend_from_slice(&res[0]);
        }
    }
    // Flush the filter tail until the delayed output is complete.
    while out.len() < expected + delay {
        match resampler.process_partial::<&[f32]>(None, None) {
            Ok(res) if !res[0].is_empty() => out.extend_from_slice(&res[0]),
            _ => break,
        }
    }

    let mut out = out.split_off(delay.min(out.len()));
    out.resize(expected, 0.0);
    out
}

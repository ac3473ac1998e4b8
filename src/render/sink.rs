//! Audio sinks. The renderer writes adapted f32 samples into a sink and reads
//! back how much is still queued, which is what the audio clock is built on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use log::{debug, error, info, warn};

use crate::config::{AudioConfig, AudioOutput};
use crate::error::AudioError;
use crate::models::AudioStreamInfo;
use crate::render::device::DeviceManager;
use crate::render::ring::SampleRing;

const WRITE_POLL: Duration = Duration::from_millis(2);

/// Sample rate and channel count a sink consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputSpec {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    /// Playback time of `samples` interleaved samples
    pub fn duration_of(&self, samples: usize) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = samples / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

pub trait AudioSink: Send {
    fn name(&self) -> String;

    fn spec(&self) -> OutputSpec;

    /// Queue interleaved samples, waiting at most `timeout` for room. Returns the number taken,
    /// always a whole number of frames and possibly zero.
    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<usize, AudioError>;

    /// Audio written but not yet played
    fn queued(&self) -> Duration;

    fn set_paused(&mut self, paused: bool);

    /// Drop everything queued
    fn flush(&mut self);

    fn underruns(&self) -> u64;

    /// The stream ran dry on purpose; the next short read is not an underrun
    fn mark_drained(&mut self) {}
}

/// How an engine turns its audio config into a sink; `open_sink` unless a host supplies its own
pub type SinkOpener =
    Arc<dyn Fn(&AudioConfig, &AudioStreamInfo) -> Result<Box<dyn AudioSink>, AudioError> + Send + Sync>;

/// Open the sink selected by `config`. Null sinks adopt the stream's own format.
pub fn open_sink(config: &AudioConfig, stream: &AudioStreamInfo) -> Result<Box<dyn AudioSink>, AudioError> {
    let buffer = Duration::from_millis(config.buffer_ms);
    match config.output {
        AudioOutput::Null => Ok(Box::new(NullSink::new(
            OutputSpec::new(stream.sample_rate, stream.channels),
            buffer,
        ))),
        AudioOutput::Device => {
            let sink = CpalSink::open(
                config.preferred_device.clone(),
                buffer,
                Duration::from_millis(config.device_timeout_ms),
            )?;
            Ok(Box::new(sink))
        }
    }
}

/// Sink without hardware: consumes queued audio at real-time rate
#[derive(Debug)]
pub struct NullSink {
    spec: OutputSpec,
    capacity_frames: f64,
    queued_frames: f64,
    last_tick: Instant,
    paused: bool,
    primed: bool,
    underruns: u64,
}

impl NullSink {
    pub fn new(spec: OutputSpec, buffer: Duration) -> Self {
        Self {
            spec,
            capacity_frames: (buffer.as_secs_f64() * spec.sample_rate as f64).max(1.0),
            queued_frames: 0.0,
            last_tick: Instant::now(),
            paused: true,
            primed: false,
            underruns: 0,
        }
    }

    fn consumed_since_tick(&self, now: Instant) -> f64 {
        if self.paused {
            0.0
        } else {
            now.duration_since(self.last_tick).as_secs_f64() * self.spec.sample_rate as f64
        }
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let consumed = self.consumed_since_tick(now);
        if consumed > self.queued_frames && self.primed {
            self.underruns += 1;
            self.primed = false;
        }
        self.queued_frames = (self.queued_frames - consumed).max(0.0);
        self.last_tick = now;
    }
}

impl AudioSink for NullSink {
    fn name(&self) -> String {
        "null".to_string()
    }

    fn spec(&self) -> OutputSpec {
        self.spec
    }

    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<usize, AudioError> {
        let channels = self.spec.channels.max(1) as usize;
        let frames = samples.len() / channels;
        let deadline = Instant::now() + timeout;
        loop {
            self.advance();
            let room = (self.capacity_frames - self.queued_frames).floor().max(0.0) as usize;
            let accepted = room.min(frames);
            if accepted > 0 || frames == 0 {
                if accepted > 0 {
                    self.queued_frames += accepted as f64;
                    self.primed = true;
                }
                return Ok(accepted * channels);
            }
            let now = Instant::now();
            if self.paused || now >= deadline {
                return Ok(0);
            }
            thread::sleep(WRITE_POLL.min(deadline - now));
        }
    }

    fn queued(&self) -> Duration {
        let rate = self.spec.sample_rate as f64;
        if rate <= 0.0 {
            return Duration::ZERO;
        }
        let remaining = (self.queued_frames - self.consumed_since_tick(Instant::now())).max(0.0);
        Duration::from_secs_f64(remaining / rate)
    }

    fn set_paused(&mut self, paused: bool) {
        if paused == self.paused {
            return;
        }
        self.advance();
        self.paused = paused;
        self.last_tick = Instant::now();
    }

    fn flush(&mut self) {
        self.queued_frames = 0.0;
        self.primed = false;
        self.last_tick = Instant::now();
    }

    fn underruns(&self) -> u64 {
        self.underruns
    }

    fn mark_drained(&mut self) {
        self.advance();
        self.primed = false;
    }
}

struct DeviceShared {
    paused: AtomicBool,
    shutdown: AtomicBool,
    stream_error: Mutex<Option<String>>,
}

struct DeviceReady {
    spec: OutputSpec,
    ring: Arc<SampleRing>,
    name: String,
}

/// Sink on a cpal output stream.
///
/// cpal streams are not `Send`, so a dedicated "np-device" thread builds and
/// owns the stream; the sink talks to it through the shared ring and flags.
pub struct CpalSink {
    name: String,
    spec: OutputSpec,
    ring: Arc<SampleRing>,
    shared: Arc<DeviceShared>,
    device_thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Acquire the output device, waiting at most `timeout` for it to come up
    pub fn open(preferred: Option<String>, buffer: Duration, timeout: Duration) -> Result<Self, AudioError> {
        let shared = Arc::new(DeviceShared {
            paused: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            stream_error: Mutex::new(None),
        });
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("np-device".to_string())
            .spawn(move || run_device_thread(preferred, buffer, thread_shared, ready_tx))
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to spawn device thread: {}", e)))?;

        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(ready)) => {
                info!(
                    "Audio output '{}' ready: {} Hz, {} channels",
                    ready.name, ready.spec.sample_rate, ready.spec.channels
                );
                Ok(Self {
                    name: ready.name,
                    spec: ready.spec,
                    ring: ready.ring,
                    shared,
                    device_thread: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // The thread may be stuck inside the driver; it exits on its own once it returns.
                shared.shutdown.store(true, Ordering::Release);
                Err(AudioError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(AudioError::InitializationFailed("device thread exited".to_string()))
            }
        }
    }

    fn check_stream(&self) -> Result<(), AudioError> {
        let error = self.shared.stream_error.lock().unwrap_or_else(|e| e.into_inner());
        match error.as_ref() {
            Some(message) => Err(AudioError::StreamError(message.clone())),
            None => Ok(()),
        }
    }
}

impl AudioSink for CpalSink {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn spec(&self) -> OutputSpec {
        self.spec
    }

    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<usize, AudioError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_stream()?;
            let written = self.ring.write(samples);
            if written > 0 || samples.is_empty() {
                return Ok(written);
            }
            let now = Instant::now();
            if self.shared.paused.load(Ordering::Acquire) || now >= deadline {
                return Ok(0);
            }
            thread::sleep(WRITE_POLL.min(deadline - now));
        }
    }

    fn queued(&self) -> Duration {
        self.ring.buffered_duration()
    }

    fn set_paused(&mut self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
    }

    fn flush(&mut self) {
        self.ring.clear();
    }

    fn underruns(&self) -> u64 {
        self.ring.underruns()
    }

    fn mark_drained(&mut self) {
        self.ring.mark_drained();
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shared.paused.store(true, Ordering::Release);
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.device_thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("Audio device thread panicked");
            }
        }
    }
}

fn run_device_thread(
    preferred: Option<String>,
    buffer: Duration,
    shared: Arc<DeviceShared>,
    ready_tx: mpsc::Sender<Result<DeviceReady, AudioError>>,
) {
    raise_thread_priority();

    let (stream, ready) = match build_device_stream(preferred.as_deref(), buffer, &shared) {
        Ok(built) => built,
        Err(e) => {
            warn!("Audio device initialization failed: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(ready)).is_err() || shared.shutdown.load(Ordering::Acquire) {
        debug!("Audio device opened after the caller gave up; closing it");
        return;
    }

    while !shared.shutdown.load(Ordering::Acquire) {
        thread::park_timeout(Duration::from_millis(50));
    }
    if let Err(e) = stream.pause() {
        debug!("Pausing output stream on shutdown failed: {}", e);
    }
    drop(stream);
    debug!("Audio device thread exiting");
}

fn build_device_stream(
    preferred: Option<&str>,
    buffer: Duration,
    shared: &Arc<DeviceShared>,
) -> Result<(Stream, DeviceReady), AudioError> {
    let manager = DeviceManager::new();
    let device = manager.select(preferred)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = DeviceManager::output_config(&device)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();

    let spec = OutputSpec::new(config.sample_rate.0, config.channels);
    let ring = Arc::new(SampleRing::with_duration(buffer, spec.channels, spec.sample_rate));

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, &ring, shared)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, &ring, shared)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, &ring, shared)?,
        other => {
            return Err(AudioError::UnsupportedFormat {
                format: format!("{:?}", other),
            })
        }
    };
    stream
        .play()
        .map_err(|e| AudioError::StreamError(format!("Failed to start output stream: {}", e)))?;

    Ok((stream, DeviceReady { spec, ring, name }))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    ring: &Arc<SampleRing>,
    shared: &Arc<DeviceShared>,
) -> Result<Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let ring = Arc::clone(ring);
    let data_shared = Arc::clone(shared);
    let error_shared = Arc::clone(shared);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if data_shared.paused.load(Ordering::Acquire) {
                    data.fill(<T as cpal::Sample>::EQUILIBRIUM);
                    return;
                }
                scratch.resize(data.len(), 0.0);
                let read = ring.read(&mut scratch);
                for (i, sample) in data.iter_mut().enumerate() {
                    let value = if i < read { scratch[i] } else { 0.0 };
                    *sample = <T as cpal::Sample>::from_sample(value);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                let mut slot = error_shared.stream_error.lock().unwrap_or_else(|e| e.into_inner());
                slot.get_or_insert_with(|| err.to_string());
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(format!("Failed to build output stream: {}", e)))
}

#[cfg(target_os = "macos")]
fn raise_thread_priority() {
    unsafe {
        let thread = libc::pthread_self();
        let mut policy: libc::c_int = 0;
        let mut param: libc::sched_param = std::mem::zeroed();
        if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
            param.sched_priority = 63;
            let _ = libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param);
        }
    }
}

#[cfg(not(target_os = "macos"))]
fn raise_thread_priority() {}

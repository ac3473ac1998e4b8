use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Interleaved sample ring shared between the audio renderer and the device callback
#[derive(Debug)]
pub struct SampleRing {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    channels: u16,
    sample_rate: u32,
    /// Set once data has been written since the last flush; an empty read while primed is an underrun
    primed: AtomicBool,
    underruns: AtomicU64,
}

impl SampleRing {
    /// Create a ring holding `capacity_frames` frames
    pub fn new(capacity_frames: usize, channels: u16, sample_rate: u32) -> Self {
        let capacity = capacity_frames.max(1) * channels.max(1) as usize;
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            channels: channels.max(1),
            sample_rate,
            primed: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        }
    }

    /// Ring sized to hold `buffer` worth of audio
    pub fn with_duration(buffer: Duration, channels: u16, sample_rate: u32) -> Self {
        let frames = (buffer.as_secs_f64() * sample_rate as f64).ceil() as usize;
        Self::new(frames, channels, sample_rate)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples available for reading
    pub fn available_read(&self) -> usize {
        self.lock().len()
    }

    /// Room left, rounded down to whole frames
    pub fn available_write(&self) -> usize {
        let free = self.capacity - self.lock().len();
        free - free % self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Append as many whole frames as fit. Returns the number of samples taken.
    pub fn write(&self, data: &[f32]) -> usize {
        let mut samples = self.lock();
        let free = self.capacity - samples.len();
        let ch = self.channels as usize;
        let to_write = data.len().min(free - free % ch);
        samples.extend(&data[..to_write]);
        if to_write > 0 {
            self.primed.store(true, Ordering::Release);
        }
        to_write
    }

    /// Fill `out` from the front of the ring. Returns the number of samples read.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let mut samples = self.lock();
        let to_read = out.len().min(samples.len());
        for (slot, sample) in out.iter_mut().zip(samples.drain(..to_read)) {
            *slot = sample;
        }
        if to_read < out.len() && self.primed.swap(false, Ordering::AcqRel) {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        to_read
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.primed.store(false, Ordering::Release);
    }

    /// Mark the stream as drained on purpose so the final short read is not an underrun
    pub fn mark_drained(&self) {
        self.primed.store(false, Ordering::Release);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Get the current fill level (0.0 to 1.0)
    pub fn fill_level(&self) -> f32 {
        self.available_read() as f32 / self.capacity as f32
    }

    /// Duration of the audio waiting in the ring
    pub fn buffered_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.available_read() / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

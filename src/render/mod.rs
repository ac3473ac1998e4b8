//! Audio and video presentation threads and the pieces they share.

pub mod audio;
pub mod device;
pub mod frame_queue;
pub mod resampler;
pub mod ring;
pub mod sink;
pub mod video;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::AudioError;

pub use self::audio::AudioRenderer;
pub use self::device::{DeviceInfo, DeviceManager};
pub use self::frame_queue::{FrameQueue, PushRejected, QueueItem};
pub use self::resampler::{FormatAdapter, LinearResampler};
pub use self::ring::SampleRing;
pub use self::sink::{open_sink, AudioSink, CpalSink, NullSink, OutputSpec, SinkOpener};
pub use self::video::{convert_frame, Surface, SurfaceSlot, VideoRenderer};

/// How long a renderer waits on its queue before re-checking the transport
pub(crate) const RENDER_POLL: Duration = Duration::from_millis(10);

/// Reports from renderer threads to the control thread
#[derive(Debug)]
pub enum RenderNotice {
    /// The audio sink is open and the renderer is waiting for start
    AudioReady { output: OutputSpec },
    AudioEnded { serial: u64 },
    VideoEnded { serial: u64 },
    /// The sink failed to open or stopped working
    DeviceLost(AudioError),
}

pub type RenderObserver = Arc<dyn Fn(RenderNotice) + Send + Sync>;

#[derive(Debug)]
struct TransportState {
    paused: bool,
    stopped: bool,
}

/// Run/pause/stop gate shared by the renderer threads
#[derive(Debug)]
pub struct Transport {
    state: Mutex<TransportState>,
    changed: Condvar,
}

impl Transport {
    pub fn new(paused: bool) -> Self {
        Self {
            state: Mutex::new(TransportState { paused, stopped: false }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
        self.changed.notify_all();
    }

    pub fn stop(&self) {
        self.lock().stopped = true;
        self.changed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Block while paused. Returns false once stopped.
    pub fn wait_while_paused(&self) -> bool {
        let mut state = self.lock();
        while state.paused && !state.stopped {
            state = self.changed.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        !state.stopped
    }

    /// Sleep up to `timeout`, waking early on any pause or stop change. Returns false once stopped.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let state = self.lock();
        if state.stopped {
            return false;
        }
        let (state, _) = self
            .changed
            .wait_timeout(state, timeout)
            .unwrap_or_else(|e| e.into_inner());
        !state.stopped
    }
}

/// Counters written by the pipeline threads and read by `stats()`
#[derive(Debug, Default)]
pub struct RenderStats {
    pub frames_presented: AtomicU64,
    pub frames_dropped_late: AtomicU64,
    pub frames_corrupt_skipped: AtomicU64,
    pub audio_underruns: AtomicU64,
    pub audio_queue_len: AtomicUsize,
    pub video_queue_len: AtomicUsize,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Relaxed)
    }

    pub fn dropped_late(&self) -> u64 {
        self.frames_dropped_late.load(Ordering::Relaxed)
    }

    pub fn corrupt_skipped(&self) -> u64 {
        self.frames_corrupt_skipped.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.audio_underruns.load(Ordering::Relaxed)
    }
}

//! Playback clocks and video presentation timing.
//!
//! Three clocks are kept: audio (driven by samples handed to the output),
//! video (driven by presented frames) and external (wall time). Every clock
//! carries the serial it was set under; after a seek bumps the serial, a
//! clock is unreadable until it is set again for the new serial.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::SyncConfig;
use crate::models::SyncMaster;

/// Frames ahead of the master by less than this are presented immediately
const PRESENT_TOLERANCE: f64 = 0.001;

/// How the video renderer should treat a frame right now
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameTiming {
    /// Due now
    Present,
    /// Not due yet; re-evaluate after at most this long
    Wait(Duration),
    /// Too late to be worth showing
    Drop,
    /// Belongs to a serial that a seek has invalidated
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Clock {
    pts: f64,
    pts_drift: f64,
    last_updated: f64,
    serial: u64,
}

impl Clock {
    fn new(serial: u64) -> Self {
        Self {
            pts: 0.0,
            pts_drift: 0.0,
            last_updated: 0.0,
            serial,
        }
    }

    fn set_at(&mut self, pts: f64, serial: u64, time: f64) {
        self.pts = pts;
        self.last_updated = time;
        self.pts_drift = pts - time;
        self.serial = serial;
    }

    fn get(&self, time: f64, current_serial: u64, paused: bool) -> Option<f64> {
        if self.serial != current_serial {
            return None;
        }
        if paused {
            Some(self.pts)
        } else {
            Some(self.pts_drift + time)
        }
    }
}

#[derive(Debug)]
struct ClockState {
    audio: Clock,
    video: Clock,
    external: Clock,
    serial: u64,
    paused: bool,
    preferred: SyncMaster,
    has_audio: bool,
    duration: Option<f64>,
    frame_drop: bool,
    drop_threshold: f64,
    nosync_threshold: f64,
}

impl ClockState {
    fn master(&self) -> SyncMaster {
        if self.preferred == SyncMaster::Audio && self.has_audio {
            SyncMaster::Audio
        } else {
            SyncMaster::External
        }
    }

    fn master_at(&self, time: f64) -> Option<f64> {
        let reading = match self.master() {
            SyncMaster::Audio => self.audio.get(time, self.serial, self.paused),
            SyncMaster::External => None,
        };
        reading.or_else(|| self.external.get(time, self.serial, self.paused))
    }

    /// Resync the external clock to `source` when it is unset or too far off
    fn sync_external_to(&mut self, source: Clock, time: f64) {
        let Some(source_value) = source.get(time, self.serial, self.paused) else {
            return;
        };
        let external = self.external.get(time, self.serial, self.paused);
        let far = match external {
            Some(value) => (value - source_value).abs() > self.nosync_threshold,
            None => true,
        };
        if far {
            self.external.set_at(source_value, self.serial, time);
        }
    }

    fn clamp(&self, value: f64) -> f64 {
        let upper = self.duration.unwrap_or(f64::INFINITY);
        value.max(0.0).min(upper)
    }
}

/// Shared clock set for one session
#[derive(Debug, Clone)]
pub struct ClockSync {
    inner: Arc<Mutex<ClockState>>,
    epoch: Instant,
}

impl ClockSync {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockState {
                audio: Clock::new(0),
                video: Clock::new(0),
                external: Clock::new(0),
                serial: 0,
                paused: true,
                preferred: config.master,
                has_audio: false,
                duration: None,
                frame_drop: config.frame_drop,
                drop_threshold: config.drop_threshold_ms as f64 / 1000.0,
                nosync_threshold: config.nosync_threshold_ms as f64 / 1000.0,
            })),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Describe the opened media. Chooses the master clock.
    pub fn configure(&self, has_audio: bool, duration: Option<Duration>) {
        let mut state = self.lock();
        state.has_audio = has_audio;
        state.duration = duration.filter(|d| !d.is_zero()).map(|d| d.as_secs_f64());
    }

    pub fn master(&self) -> SyncMaster {
        self.lock().master()
    }

    pub fn serial(&self) -> u64 {
        self.lock().serial
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Start a new serial with every clock at `base`. Returns the new serial.
    pub fn reset(&self, base: Duration) -> u64 {
        let time = self.now();
        let mut state = self.lock();
        state.serial += 1;
        let serial = state.serial;
        let base = state.clamp(base.as_secs_f64());
        state.audio.set_at(base, serial, time);
        state.video.set_at(base, serial, time);
        state.external.set_at(base, serial, time);
        serial
    }

    /// Freeze or resume every clock
    pub fn set_paused(&self, paused: bool) {
        let time = self.now();
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.paused == paused {
            return;
        }
        let serial = state.serial;
        let was_paused = state.paused;
        for clock in [&mut state.audio, &mut state.video, &mut state.external] {
            if clock.serial != serial {
                continue;
            }
            // Freeze at the current reading, or re-anchor the drift on resume
            let value = clock.get(time, serial, was_paused).unwrap_or(clock.pts);
            clock.set_at(value, serial, time);
        }
        state.paused = paused;
    }

    /// Record that audio with presentation time `pts` is playing now
    pub fn update_audio(&self, pts: Duration, serial: u64) {
        let time = self.now();
        let mut state = self.lock();
        if serial != state.serial || state.paused {
            return;
        }
        state.audio.set_at(pts.as_secs_f64(), serial, time);
        let audio = state.audio;
        state.sync_external_to(audio, time);
    }

    /// Record that the video frame with `pts` was just presented
    pub fn update_video(&self, pts: Duration, serial: u64) {
        let time = self.now();
        let mut state = self.lock();
        if serial != state.serial {
            return;
        }
        state.video.set_at(pts.as_secs_f64(), serial, time);
        if !state.paused {
            let video = state.video;
            state.sync_external_to(video, time);
        }
    }

    /// Master clock reading, clamped to the media duration
    pub fn current_media_time(&self) -> Duration {
        let time = self.now();
        let state = self.lock();
        let value = state.master_at(time).unwrap_or(0.0);
        Duration::from_secs_f64(state.clamp(value))
    }

    pub fn current_media_time_ms(&self) -> i64 {
        self.current_media_time().as_millis() as i64
    }

    /// Video clock minus master clock, in milliseconds
    pub fn av_diff_ms(&self) -> Option<f64> {
        let time = self.now();
        let state = self.lock();
        let master = state.master_at(time)?;
        let video = state.video.get(time, state.serial, state.paused)?;
        Some((video - master) * 1000.0)
    }

    pub fn presentation_delay_for(&self, pts: Duration, serial: u64) -> FrameTiming {
        self.presentation_delay_at(pts, serial, self.now())
    }

    fn presentation_delay_at(&self, pts: Duration, serial: u64, time: f64) -> FrameTiming {
        let state = self.lock();
        if serial != state.serial {
            return FrameTiming::Stale;
        }
        let Some(master) = state.master_at(time) else {
            return FrameTiming::Present;
        };
        let diff = pts.as_secs_f64() - master;
        if diff.is_nan() || diff.abs() > state.nosync_threshold {
            return FrameTiming::Present;
        }
        if diff < -state.drop_threshold && state.frame_drop {
            return FrameTiming::Drop;
        }
        if diff > PRESENT_TOLERANCE {
            FrameTiming::Wait(Duration::from_secs_f64(diff))
        } else {
            FrameTiming::Present
        }
    }
}

use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};

use crate::models::PlayerState;

/// Environment variable selecting the log level
pub const LOG_LEVEL_ENV: &str = "NPLAY_LOG_LEVEL";

const DEFAULT_MAX_EVENTS: usize = 1000;

/// Initialize logging with the player's line format.
///
/// Safe to call more than once; later calls leave the first logger in place.
pub fn init_logging() {
    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());

    let mut builder = env_logger::Builder::new();

    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{}] [{}:{}] {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        )
    });

    builder.filter_level(parse_level(&log_level));

    if builder.try_init().is_ok() {
        info!("Player logging initialized with level: {}", log_level);
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

/// Playback event recorded for diagnostics
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: PlaybackEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEventType {
    StateChanged,
    SourceOpened,
    SeekRequested,
    SeekCompleted,
    SurfaceChanged,
    FrameDropped,
    CorruptFrame,
    DecodeError,
    DeviceError,
    TeardownError,
    Completed,
}

impl PlaybackEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackEventType::StateChanged => "STATE_CHANGED",
            PlaybackEventType::SourceOpened => "SOURCE_OPENED",
            PlaybackEventType::SeekRequested => "SEEK_REQUESTED",
            PlaybackEventType::SeekCompleted => "SEEK_COMPLETED",
            PlaybackEventType::SurfaceChanged => "SURFACE_CHANGED",
            PlaybackEventType::FrameDropped => "FRAME_DROPPED",
            PlaybackEventType::CorruptFrame => "CORRUPT_FRAME",
            PlaybackEventType::DecodeError => "DECODE_ERROR",
            PlaybackEventType::DeviceError => "DEVICE_ERROR",
            PlaybackEventType::TeardownError => "TEARDOWN_ERROR",
            PlaybackEventType::Completed => "COMPLETED",
        }
    }
}

/// Bounded history of playback events, mirrored to the `log` facade
#[derive(Clone)]
pub struct PlaybackLogger {
    events: Arc<Mutex<VecDeque<PlaybackEvent>>>,
    max_events: usize,
}

impl PlaybackLogger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(64)))),
            max_events: max_events.max(1),
        }
    }

    /// Record an event
    pub fn log_event(&self, event_type: PlaybackEventType, details: String, duration: Option<Duration>) {
        match event_type {
            PlaybackEventType::StateChanged
            | PlaybackEventType::SourceOpened
            | PlaybackEventType::SurfaceChanged
            | PlaybackEventType::Completed => {
                info!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::SeekRequested | PlaybackEventType::SeekCompleted => {
                debug!("[{}] {} (took: {:?})", event_type.as_str(), details, duration);
            }
            PlaybackEventType::FrameDropped => {
                trace!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::CorruptFrame | PlaybackEventType::TeardownError => {
                warn!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::DecodeError | PlaybackEventType::DeviceError => {
                error!("[{}] {}", event_type.as_str(), details);
            }
        }

        let event = PlaybackEvent {
            timestamp: Utc::now(),
            event_type,
            duration,
            details,
        };

        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_state_change(&self, from: PlayerState, to: PlayerState, cause: &str) {
        self.log_event(
            PlaybackEventType::StateChanged,
            format!("{} -> {} ({})", from, to, cause),
            None,
        );
    }

    pub fn log_seek_requested(&self, target: Duration, serial: u64) {
        self.log_event(
            PlaybackEventType::SeekRequested,
            format!("Seek to {:.3}s (serial {})", target.as_secs_f64(), serial),
            None,
        );
    }

    pub fn log_seek_completed(&self, position: Duration, serial: u64, took: Duration) {
        self.log_event(
            PlaybackEventType::SeekCompleted,
            format!("Resynced at {:.3}s (serial {})", position.as_secs_f64(), serial),
            Some(took),
        );
    }

    pub fn log_surface_changed(&self, attached: bool) {
        let details = if attached {
            "Output surface attached".to_string()
        } else {
            "Output surface detached".to_string()
        };
        self.log_event(PlaybackEventType::SurfaceChanged, details, None);
    }

    pub fn log_teardown_error(&self, component: &str, error: &str) {
        self.log_event(
            PlaybackEventType::TeardownError,
            format!("{} teardown: {}", component, error),
            None,
        );
    }

    /// Get the most recent `count` events, oldest first
    pub fn recent_events(&self, count: usize) -> Vec<PlaybackEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn events_of_type(&self, event_type: PlaybackEventType) -> Vec<PlaybackEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear event history
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for PlaybackLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: &'static str,
}

impl OperationTimer {
    pub fn new(operation_name: &'static str) -> Self {
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!(
                "Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name,
                duration.as_millis(),
                threshold.as_millis()
            );
        } else {
            debug!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}

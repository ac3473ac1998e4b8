use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::ErrorKind;
use crate::models::{MediaInfo, PlayerState};

/// The one playback context of an engine. Written only by the control thread;
/// the handle reads it for `state()`, `duration_ms()` and `stats()`.
#[derive(Debug)]
pub struct Session {
    pub state: PlayerState,
    pub locator: Option<String>,
    pub media: Option<MediaInfo>,
    /// The current source got as far as `Prepared`
    pub reached_prepared: bool,
    pub last_error: Option<(ErrorKind, String)>,
    /// Playback ran to the end; the next start rewinds
    pub completed: bool,
    /// Passes left including the current one, `None` loops forever
    pub loops_remaining: Option<u32>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: PlayerState::Idle,
            locator: None,
            media: None,
            reached_prepared: false,
            last_error: None,
            completed: false,
            loops_remaining: Some(1),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.media.as_ref().and_then(|media| media.duration)
    }

    /// Duration in milliseconds once the source has been prepared, 0 when the container does not say
    pub fn duration_ms(&self) -> Option<i64> {
        let prepared = self.state.is_prepared() || (self.state == PlayerState::Stopped && self.reached_prepared);
        if prepared {
            Some(self.media.as_ref().map(|media| media.duration_ms()).unwrap_or(0))
        } else {
            None
        }
    }

    /// Clamp a seek request to `[0, duration]`; unknown durations only clamp below
    pub fn clamp_position(&self, ms: i64) -> Duration {
        let ms = ms.max(0) as u64;
        let target = Duration::from_millis(ms);
        match self.duration() {
            Some(duration) if !duration.is_zero() => target.min(duration),
            _ => target,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

pub fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(duration: Option<Duration>) -> Session {
        let mut session = Session::new();
        session.state = PlayerState::Prepared;
        session.reached_prepared = true;
        session.media = Some(MediaInfo {
            locator: "testsrc:".to_string(),
            container: "testsrc".to_string(),
            duration,
            audio: None,
            video: None,
        });
        session
    }

    #[test]
    fn test_duration_only_after_open() {
        let mut session = Session::new();
        assert_eq!(session.duration_ms(), None);
        session.state = PlayerState::Preparing;
        assert_eq!(session.duration_ms(), None);

        let session = opened(Some(Duration::from_millis(5000)));
        assert_eq!(session.duration_ms(), Some(5000));

        let mut failed = Session::new();
        failed.state = PlayerState::Stopped;
        assert_eq!(failed.duration_ms(), None);

        // Opened but stopped before the output came up
        let mut no_output = opened(Some(Duration::from_millis(5000)));
        no_output.reached_prepared = false;
        no_output.state = PlayerState::Stopped;
        assert_eq!(no_output.duration_ms(), None);

        let mut stopped_later = opened(Some(Duration::from_millis(5000)));
        stopped_later.state = PlayerState::Stopped;
        assert_eq!(stopped_later.duration_ms(), Some(5000));
    }

    #[test]
    fn test_clamp_position() {
        let session = opened(Some(Duration::from_millis(5000)));
        assert_eq!(session.clamp_position(-10), Duration::ZERO);
        assert_eq!(session.clamp_position(2000), Duration::from_millis(2000));
        assert_eq!(session.clamp_position(9000), Duration::from_millis(5000));

        let live = opened(None);
        assert_eq!(live.clamp_position(9000), Duration::from_millis(9000));
        assert_eq!(live.duration_ms(), Some(0));
    }
}

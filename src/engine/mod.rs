//! The bridge-facing playback engine.
//!
//! `PlaybackEngine` is a thin handle: every command is forwarded to the
//! control thread, which validates it against the transition table and
//! replies with the verdict. Completion of asynchronous work (prepare, seek,
//! end of playback, failures) is reported through subscribed event receivers.

pub mod control;
pub mod decode;
pub mod session;
pub mod state;

use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::channel::{CommandQueue, EventBus, EventReceiver};
use crate::clock::ClockSync;
use crate::config::EngineConfig;
use crate::error::{ErrorKind, PlayerError};
use crate::logging::PlaybackLogger;
use crate::models::{Command, MediaInfo, PlaybackStats, PlayerState};
use crate::render::{open_sink, RenderStats, SinkOpener, Surface};
use crate::runtime;

use control::{ControlMessage, Controller};
use session::{Session, SharedSession};

pub struct PlaybackEngine {
    config: EngineConfig,
    queue: Arc<CommandQueue<ControlMessage>>,
    session: SharedSession,
    events: Arc<EventBus>,
    clock: ClockSync,
    stats: Arc<RenderStats>,
    logger: PlaybackLogger,
    control_thread: Mutex<Option<JoinHandle<()>>>,
    release_lock: Mutex<()>,
}

impl PlaybackEngine {
    pub fn new(config: EngineConfig) -> Result<Self, PlayerError> {
        Self::with_sink_opener(config, Arc::new(open_sink))
    }

    /// Engine whose audio renderer opens its output through `sink_opener`
    pub fn with_sink_opener(config: EngineConfig, sink_opener: SinkOpener) -> Result<Self, PlayerError> {
        config.validate()?;
        let runtime = runtime::initialize();
        debug!("Runtime initialized at {}", runtime.initialized_at());

        let queue = Arc::new(CommandQueue::new(config.queues.command_capacity));
        let session: SharedSession = Arc::new(Mutex::new(Session::new()));
        let events = Arc::new(EventBus::new());
        let clock = ClockSync::new(&config.sync);
        let stats = Arc::new(RenderStats::new());
        let logger = PlaybackLogger::new();

        let controller = Controller::new(
            config.clone(),
            Arc::clone(&session),
            Arc::clone(&queue),
            Arc::clone(&events),
            clock.clone(),
            Arc::clone(&stats),
            logger.clone(),
            sink_opener,
        );
        let control_thread = controller.spawn()?;
        info!("Playback engine created");

        Ok(Self {
            config,
            queue,
            session,
            events,
            clock,
            stats,
            logger,
            control_thread: Mutex::new(Some(control_thread)),
            release_lock: Mutex::new(()),
        })
    }

    pub fn with_defaults() -> Result<Self, PlayerError> {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Hand a command to the control thread and wait for its verdict
    fn submit(&self, command: Command) -> Result<(), PlayerError> {
        let kind = command.kind();
        let released = || PlayerError::IllegalState {
            command: kind,
            state: PlayerState::Released,
        };
        let (reply, verdict) = sync_channel(1);
        self.queue
            .push(ControlMessage::Command { command, reply })
            .map_err(|_| released())?;
        verdict.recv().unwrap_or_else(|_| Err(released()))
    }

    pub fn set_data_source(&self, locator: &str) -> Result<(), PlayerError> {
        self.submit(Command::SetDataSource(locator.to_string()))
    }

    /// Attach a surface, or detach with `None`. Once this returns the previous
    /// surface receives no further blits.
    pub fn set_surface(&self, surface: Option<Box<dyn Surface>>) -> Result<(), PlayerError> {
        self.submit(Command::SetSurface(surface))
    }

    /// Begin opening the source. Completion arrives as `Event::Prepared` or `Event::Error`.
    pub fn prepare(&self) -> Result<(), PlayerError> {
        self.submit(Command::Prepare)
    }

    pub fn start(&self) -> Result<(), PlayerError> {
        self.submit(Command::Start)
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.submit(Command::Pause)
    }

    /// Reposition to `ms`, clamped to the media. Completion arrives as `Event::SeekComplete`.
    pub fn seek_to(&self, ms: i64) -> Result<(), PlayerError> {
        self.submit(Command::SeekTo(ms))
    }

    pub fn duration_ms(&self) -> Result<i64, PlayerError> {
        let session = session::lock(&self.session);
        session
            .duration_ms()
            .ok_or(PlayerError::DurationUnavailable { state: session.state })
    }

    /// Media time of the master clock; 0 until a source is being prepared
    pub fn current_position_ms(&self) -> Result<i64, PlayerError> {
        match self.state() {
            PlayerState::Released => Err(PlayerError::ChannelClosed),
            PlayerState::Idle | PlayerState::Initialized => Ok(0),
            _ => Ok(self.clock.current_media_time_ms()),
        }
    }

    /// Streams and duration of the opened source, once known
    pub fn media_info(&self) -> Option<MediaInfo> {
        session::lock(&self.session).media.clone()
    }

    pub fn state(&self) -> PlayerState {
        session::lock(&self.session).state
    }

    /// The error that last stopped playback, cleared by the next `prepare`
    pub fn last_error(&self) -> Option<(ErrorKind, String)> {
        session::lock(&self.session).last_error.clone()
    }

    /// New receiver for every event published from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn stats(&self) -> PlaybackStats {
        let (state, duration_ms) = {
            let session = session::lock(&self.session);
            (session.state, session.duration_ms())
        };
        let position_ms = match state {
            PlayerState::Idle | PlayerState::Initialized | PlayerState::Released => 0,
            _ => self.clock.current_media_time_ms(),
        };
        PlaybackStats {
            state,
            position_ms,
            duration_ms,
            master: self.clock.master(),
            av_diff_ms: self.clock.av_diff_ms(),
            serial: self.clock.serial(),
            frames_presented: self.stats.presented(),
            frames_dropped_late: self.stats.dropped_late(),
            frames_corrupt_skipped: self.stats.corrupt_skipped(),
            audio_underruns: self.stats.underruns(),
            audio_queue_len: self.stats.audio_queue_len.load(std::sync::atomic::Ordering::Relaxed),
            video_queue_len: self.stats.video_queue_len.load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    pub fn logger(&self) -> &PlaybackLogger {
        &self.logger
    }

    /// Stop every worker, drop the surface and move to `Released`.
    /// Safe to call repeatedly and from any thread; never fails.
    ///
    /// All engine threads are joined before this returns. The one exception is
    /// an audio device thread that never answered within `audio.device_timeout_ms`:
    /// it is detached and may outlive the engine until the driver call returns.
    pub fn release(&self) {
        let _guard = self.release_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.queue.is_closed() {
            if let Err(e) = self.submit(Command::Release) {
                debug!("Release found the control thread gone: {}", e);
            }
        }

        let handle = self
            .control_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Control thread panicked during release");
                self.logger.log_teardown_error("control", "thread panicked");
                // The session never saw the release
                session::lock(&self.session).state = PlayerState::Released;
                self.queue.close();
                self.events.close();
            } else {
                info!("Playback engine released");
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioConfig;
    use crate::error::AudioError;
    use crate::models::{AudioStreamInfo, CommandKind, Event};
    use crate::render::AudioSink;

    fn engine() -> PlaybackEngine {
        PlaybackEngine::new(EngineConfig::headless()).unwrap()
    }

    #[test]
    fn test_new_engine_is_idle() {
        let engine = engine();
        assert_eq!(engine.state(), PlayerState::Idle);
        assert_eq!(engine.current_position_ms().unwrap(), 0);
        assert!(matches!(
            engine.duration_ms(),
            Err(PlayerError::DurationUnavailable { state: PlayerState::Idle })
        ));
        assert!(runtime::is_initialized());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::headless();
        config.queues.video_frames = 0;
        assert!(matches!(PlaybackEngine::new(config), Err(PlayerError::Config(_))));
    }

    #[test]
    fn test_commands_are_validated_synchronously() {
        let engine = engine();
        match engine.start() {
            Err(PlayerError::IllegalState { command, state }) => {
                assert_eq!(command, CommandKind::Start);
                assert_eq!(state, PlayerState::Idle);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            engine.set_data_source("   "),
            Err(PlayerError::InvalidOperation { .. })
        ));
        engine.set_data_source("testsrc:duration=1000").unwrap();
        assert_eq!(engine.state(), PlayerState::Initialized);
        // Replacing the locator before prepare is allowed
        engine.set_data_source("testsrc:duration=2000").unwrap();
        assert_eq!(engine.state(), PlayerState::Initialized);
    }

    #[test]
    fn test_prepare_reports_duration() {
        let engine = engine();
        let mut events = engine.subscribe();
        engine.set_data_source("testsrc:duration=1500").unwrap();
        engine.prepare().unwrap();

        assert_eq!(events.blocking_recv(), Some(Event::Prepared { duration_ms: 1500 }));
        assert_eq!(engine.state(), PlayerState::Prepared);
        assert_eq!(engine.duration_ms().unwrap(), 1500);
        let info = engine.media_info().unwrap();
        assert!(info.has_audio() && info.has_video());
    }

    #[test]
    fn test_prepare_failure_stops_session() {
        let engine = engine();
        let mut events = engine.subscribe();
        engine.set_data_source("/definitely/not/here.wav").unwrap();
        engine.prepare().unwrap();

        match events.blocking_recv() {
            Some(Event::Error { kind, .. }) => assert_eq!(kind, ErrorKind::SourceUnreadable),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.state(), PlayerState::Stopped);
        assert!(engine.duration_ms().is_err());
        assert_eq!(engine.last_error().map(|(kind, _)| kind), Some(ErrorKind::SourceUnreadable));
    }

    #[test]
    fn test_sink_failure_leaves_duration_unavailable() {
        let failing: SinkOpener = Arc::new(
            |_: &AudioConfig, _: &AudioStreamInfo| -> Result<Box<dyn AudioSink>, AudioError> {
                Err(AudioError::DeviceNotFound {
                    device: "missing".to_string(),
                })
            },
        );
        let engine = PlaybackEngine::with_sink_opener(EngineConfig::headless(), failing).unwrap();
        let mut events = engine.subscribe();
        engine.set_data_source("testsrc:duration=5000").unwrap();
        engine.prepare().unwrap();

        match events.blocking_recv() {
            Some(Event::Error { kind, .. }) => assert_eq!(kind, ErrorKind::DeviceUnavailable),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.state(), PlayerState::Stopped);
        assert!(matches!(
            engine.duration_ms(),
            Err(PlayerError::DurationUnavailable { state: PlayerState::Stopped })
        ));
        assert_eq!(engine.last_error().map(|(kind, _)| kind), Some(ErrorKind::DeviceUnavailable));
    }

    #[test]
    fn test_release_is_idempotent_and_final() {
        let engine = engine();
        let mut events = engine.subscribe();
        engine.set_data_source("testsrc:").unwrap();
        engine.release();
        engine.release();

        assert_eq!(engine.state(), PlayerState::Released);
        assert_eq!(events.blocking_recv(), None);
        assert!(matches!(
            engine.prepare(),
            Err(PlayerError::IllegalState { command: CommandKind::Prepare, state: PlayerState::Released })
        ));
        assert!(matches!(engine.current_position_ms(), Err(PlayerError::ChannelClosed)));
    }

    #[test]
    fn test_stats_snapshot() {
        let engine = engine();
        let stats = engine.stats();
        assert_eq!(stats.state, PlayerState::Idle);
        assert_eq!(stats.position_ms, 0);
        assert_eq!(stats.duration_ms, None);
        assert_eq!(stats.frames_presented, 0);
    }
}

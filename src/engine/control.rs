//! The control thread. It is the only writer of the session state: every
//! bridge command, decode notice and renderer notice is handled here, in
//! arrival order.

use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::channel::{CommandQueue, EventBus};
use crate::clock::ClockSync;
use crate::config::EngineConfig;
use crate::engine::decode::{DecodeNotice, DecodeShared, DecodeWorker};
use crate::engine::session::{self, SharedSession};
use crate::engine::state::check_command;
use crate::error::{DecodeError, ErrorKind, PlayerError};
use crate::logging::{PlaybackEventType, PlaybackLogger};
use crate::models::{Command, CommandKind, Event, MediaInfo, PlayerState};
use crate::render::{
    AudioRenderer, FrameQueue, RenderNotice, RenderStats, SinkOpener, SurfaceSlot, Transport, VideoRenderer,
};
use crate::runtime;

pub type Reply = SyncSender<Result<(), PlayerError>>;

/// Everything the control thread receives
pub enum ControlMessage {
    Command { command: Command, reply: Reply },
    Decode(DecodeNotice),
    Render(RenderNotice),
}

struct PendingSeek {
    serial: u64,
    requested_at: Instant,
    /// Internal rewinds (looping, restart after completion) complete silently
    announce: bool,
}

/// Threads and queues of one prepared source
struct Pipeline {
    decode: Arc<DecodeShared>,
    audio_queue: Arc<FrameQueue>,
    video_queue: Arc<FrameQueue>,
    transport: Arc<Transport>,
    decode_thread: Option<JoinHandle<()>>,
    audio_thread: Option<JoinHandle<()>>,
    video_thread: Option<JoinHandle<()>>,
    has_audio: bool,
    has_video: bool,
    audio_ended: Option<u64>,
    video_ended: Option<u64>,
    pending_seek: Option<PendingSeek>,
}

pub struct Controller {
    pub config: EngineConfig,
    pub session: SharedSession,
    pub queue: Arc<CommandQueue<ControlMessage>>,
    pub events: Arc<EventBus>,
    pub clock: ClockSync,
    pub surface: Arc<SurfaceSlot>,
    pub stats: Arc<RenderStats>,
    pub logger: PlaybackLogger,
    pub sink_opener: SinkOpener,
    pipeline: Option<Pipeline>,
}

impl Controller {
    pub fn new(
        config: EngineConfig,
        session: SharedSession,
        queue: Arc<CommandQueue<ControlMessage>>,
        events: Arc<EventBus>,
        clock: ClockSync,
        stats: Arc<RenderStats>,
        logger: PlaybackLogger,
        sink_opener: SinkOpener,
    ) -> Self {
        Self {
            config,
            session,
            queue,
            events,
            clock,
            surface: Arc::new(SurfaceSlot::new()),
            stats,
            logger,
            sink_opener,
            pipeline: None,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("np-control".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        debug!("Control thread started");
        while let Some(message) = self.queue.pop() {
            match message {
                ControlMessage::Command { command, reply } => {
                    let releasing = matches!(command, Command::Release);
                    let result = self.handle_command(command);
                    if let Err(e) = &result {
                        debug!("Command rejected: {}", e);
                    }
                    let _ = reply.send(result);
                    if releasing {
                        break;
                    }
                }
                ControlMessage::Decode(notice) => self.on_decode(notice),
                ControlMessage::Render(notice) => self.on_render(notice),
            }
        }

        // Anything that slipped in behind the release is refused
        self.queue.close();
        for message in self.queue.drain() {
            if let ControlMessage::Command { command, reply } = message {
                let _ = reply.send(Err(PlayerError::IllegalState {
                    command: command.kind(),
                    state: PlayerState::Released,
                }));
            }
        }
        debug!("Control thread exiting");
    }

    fn state(&self) -> PlayerState {
        session::lock(&self.session).state
    }

    fn set_state(&self, to: PlayerState, cause: &str) {
        let from = {
            let mut session = session::lock(&self.session);
            std::mem::replace(&mut session.state, to)
        };
        if from != to {
            self.logger.log_state_change(from, to, cause);
        }
    }

    fn handle_command(&mut self, command: Command) -> Result<(), PlayerError> {
        check_command(command.kind(), self.state())?;

        match command {
            Command::SetDataSource(locator) => self.set_data_source(locator),
            Command::SetSurface(surface) => {
                let attached = surface.is_some();
                // Returns only once no blit is using the old surface
                drop(self.surface.replace(surface));
                self.logger.log_surface_changed(attached);
                Ok(())
            }
            Command::Prepare => self.prepare(),
            Command::Start => self.start(),
            Command::Pause => self.pause(),
            Command::SeekTo(ms) => self.seek(ms),
            Command::Release => {
                self.release();
                Ok(())
            }
        }
    }

    fn set_data_source(&mut self, locator: String) -> Result<(), PlayerError> {
        let locator = locator.trim().to_string();
        if locator.is_empty() {
            return Err(PlayerError::InvalidOperation {
                command: CommandKind::SetDataSource,
                reason: "the locator is empty".to_string(),
            });
        }
        info!("Data source set to '{}'", locator);
        session::lock(&self.session).locator = Some(locator);
        self.set_state(PlayerState::Initialized, "setDataSource");
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), PlayerError> {
        let locator = session::lock(&self.session).locator.clone().ok_or_else(|| PlayerError::InvalidOperation {
            command: CommandKind::Prepare,
            reason: "no data source".to_string(),
        })?;

        let start = self.config.playback.start_position_ms.map(Duration::from_millis);
        let serial = self.clock.reset(start.unwrap_or(Duration::ZERO));
        let decode = Arc::new(DecodeShared::new());
        let audio_queue = Arc::new(FrameQueue::new("audio", self.config.queues.audio_frames, serial));
        let video_queue = Arc::new(FrameQueue::new("video", self.config.queues.video_frames, serial));

        let queue = Arc::clone(&self.queue);
        let worker = DecodeWorker {
            locator,
            openers: runtime::initialize().openers(),
            shared: Arc::clone(&decode),
            audio: Arc::clone(&audio_queue),
            video: Arc::clone(&video_queue),
            serial,
            start_position: start,
            accurate_seek: self.config.playback.accurate_seek,
            stats: Arc::clone(&self.stats),
            logger: self.logger.clone(),
            observer: Arc::new(move |notice| {
                let _ = queue.push_notice(ControlMessage::Decode(notice));
            }),
        };
        let decode_thread = worker.spawn()?;

        self.pipeline = Some(Pipeline {
            decode,
            audio_queue,
            video_queue,
            transport: Arc::new(Transport::new(true)),
            decode_thread: Some(decode_thread),
            audio_thread: None,
            video_thread: None,
            has_audio: false,
            has_video: false,
            audio_ended: None,
            video_ended: None,
            pending_seek: None,
        });
        {
            let mut session = session::lock(&self.session);
            session.loops_remaining = loops_for(self.config.playback.loop_count);
            session.completed = false;
            session.media = None;
            session.reached_prepared = false;
            session.last_error = None;
        }
        self.set_state(PlayerState::Preparing, "prepare");
        Ok(())
    }

    fn start(&mut self) -> Result<(), PlayerError> {
        let completed = session::lock(&self.session).completed;
        if completed {
            self.reposition(Duration::ZERO, false);
            let mut session = session::lock(&self.session);
            session.completed = false;
            session.loops_remaining = loops_for(self.config.playback.loop_count);
        }
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Err(PlayerError::IllegalState {
                command: CommandKind::Start,
                state: self.state(),
            });
        };
        self.clock.set_paused(false);
        pipeline.transport.set_paused(false);
        self.set_state(PlayerState::Started, "start");
        self.check_completion();
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        if let Some(pipeline) = self.pipeline.as_ref() {
            pipeline.transport.set_paused(true);
        }
        self.clock.set_paused(true);
        self.set_state(PlayerState::Paused, "pause");
        Ok(())
    }

    fn seek(&mut self, ms: i64) -> Result<(), PlayerError> {
        let target = {
            let mut session = session::lock(&self.session);
            let target = session.clamp_position(ms);
            session.completed = false;
            target
        };
        if target.as_millis() as i64 != ms {
            debug!("Seek to {} ms clamped to {:?}", ms, target);
        }
        self.reposition(target, true);
        Ok(())
    }

    /// Flush the pipeline and restart decoding at `target` under a new serial
    fn reposition(&mut self, target: Duration, announce: bool) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        let serial = self.clock.reset(target);
        pipeline.audio_queue.flush(serial);
        pipeline.video_queue.flush(serial);
        pipeline.decode.request_seek(target, serial);
        pipeline.audio_ended = None;
        pipeline.video_ended = None;
        pipeline.pending_seek = Some(PendingSeek {
            serial,
            requested_at: Instant::now(),
            announce,
        });
        self.logger.log_seek_requested(target, serial);
    }

    fn on_decode(&mut self, notice: DecodeNotice) {
        if self.pipeline.is_none() {
            return;
        }
        match notice {
            DecodeNotice::Opened(Ok(info)) => self.on_opened(info),
            DecodeNotice::Opened(Err(DecodeError::Cancelled)) => {}
            DecodeNotice::Opened(Err(e)) => self.fail(e.kind(), e.to_string()),
            DecodeNotice::SeekDone { serial, position } => {
                let Some(pipeline) = self.pipeline.as_mut() else {
                    return;
                };
                // Superseded seeks complete silently
                if pipeline.pending_seek.as_ref().map(|p| p.serial) != Some(serial) {
                    return;
                }
                let Some(pending) = pipeline.pending_seek.take() else {
                    return;
                };
                self.logger
                    .log_seek_completed(position, serial, pending.requested_at.elapsed());
                if pending.announce {
                    self.events.publish(Event::SeekComplete {
                        position_ms: position.as_millis() as i64,
                    });
                }
            }
            DecodeNotice::Fatal(e) => {
                if self.state().is_prepared() || self.state() == PlayerState::Preparing {
                    self.fail(e.kind(), e.to_string());
                }
            }
        }
    }

    fn on_opened(&mut self, info: MediaInfo) {
        if self.state() != PlayerState::Preparing {
            return;
        }
        if !info.has_audio() && !info.has_video() {
            let e = DecodeError::UnsupportedFormat {
                format: format!("{}: no audio or video stream", info.container),
            };
            self.fail(e.kind(), e.to_string());
            return;
        }

        info!("Opened {}", info.format_description());
        self.clock.configure(info.has_audio(), info.duration);
        session::lock(&self.session).media = Some(info.clone());

        if let Err(e) = self.spawn_renderers(&info) {
            self.fail(ErrorKind::DeviceUnavailable, format!("Failed to start renderer: {}", e));
            return;
        }
        if !info.has_audio() {
            self.finish_prepare();
        }
    }

    fn spawn_renderers(&mut self, info: &MediaInfo) -> std::io::Result<()> {
        let queue = Arc::clone(&self.queue);
        let observer: crate::render::RenderObserver = Arc::new(move |notice| {
            let _ = queue.push_notice(ControlMessage::Render(notice));
        });
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(());
        };
        pipeline.has_audio = info.has_audio();
        pipeline.has_video = info.has_video();

        if let Some(stream) = info.audio.clone() {
            let audio_config = self.config.audio.clone();
            let sink_opener = Arc::clone(&self.sink_opener);
            let renderer = AudioRenderer {
                queue: Arc::clone(&pipeline.audio_queue),
                clock: self.clock.clone(),
                transport: Arc::clone(&pipeline.transport),
                stats: Arc::clone(&self.stats),
                observer: Arc::clone(&observer),
                volume: self.config.audio.volume,
            };
            pipeline.audio_thread = Some(renderer.spawn(Box::new(move || sink_opener(&audio_config, &stream)))?);
        }
        if info.has_video() {
            let renderer = VideoRenderer {
                queue: Arc::clone(&pipeline.video_queue),
                clock: self.clock.clone(),
                transport: Arc::clone(&pipeline.transport),
                surface: Arc::clone(&self.surface),
                stats: Arc::clone(&self.stats),
                logger: self.logger.clone(),
                observer,
            };
            pipeline.video_thread = Some(renderer.spawn()?);
        }
        Ok(())
    }

    fn finish_prepare(&mut self) {
        let duration_ms = {
            let mut session = session::lock(&self.session);
            session.reached_prepared = true;
            session.media.as_ref().map(|media| media.duration_ms()).unwrap_or(0)
        };
        self.set_state(PlayerState::Prepared, "source opened");
        self.events.publish(Event::Prepared { duration_ms });
    }

    fn on_render(&mut self, notice: RenderNotice) {
        if self.pipeline.is_none() {
            return;
        }
        match notice {
            RenderNotice::AudioReady { output } => {
                debug!("Audio output ready at {} Hz, {} channels", output.sample_rate, output.channels);
                if self.state() == PlayerState::Preparing {
                    self.finish_prepare();
                }
            }
            RenderNotice::DeviceLost(e) => {
                self.logger.log_event(PlaybackEventType::DeviceError, e.to_string(), None);
                self.fail(ErrorKind::DeviceUnavailable, e.user_message());
            }
            RenderNotice::AudioEnded { serial } => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.audio_ended = Some(serial);
                }
                self.check_completion();
            }
            RenderNotice::VideoEnded { serial } => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.video_ended = Some(serial);
                }
                self.check_completion();
            }
        }
    }

    /// Loop or complete once every present stream has ended for the current serial
    fn check_completion(&mut self) {
        if self.state() != PlayerState::Started {
            return;
        }
        let serial = self.clock.serial();
        let Some(pipeline) = self.pipeline.as_ref() else {
            return;
        };
        let audio_done = !pipeline.has_audio || pipeline.audio_ended == Some(serial);
        let video_done = !pipeline.has_video || pipeline.video_ended == Some(serial);
        if !(audio_done && video_done) {
            return;
        }

        let another_pass = {
            let mut session = session::lock(&self.session);
            match session.loops_remaining {
                None => true,
                Some(n) if n > 1 => {
                    session.loops_remaining = Some(n - 1);
                    true
                }
                Some(_) => false,
            }
        };

        if another_pass {
            debug!("End of stream reached, looping");
            self.reposition(Duration::ZERO, false);
            return;
        }

        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.transport.set_paused(true);
            pipeline.audio_ended = None;
            pipeline.video_ended = None;
        }
        self.clock.set_paused(true);
        let duration = {
            let mut session = session::lock(&self.session);
            session.completed = true;
            session.duration()
        };
        if let Some(duration) = duration {
            // Park the clock exactly at the end
            self.clock.reset(duration);
        }
        self.set_state(PlayerState::Paused, "playback complete");
        self.logger
            .log_event(PlaybackEventType::Completed, "Playback complete".to_string(), None);
        self.events.publish(Event::PlaybackComplete);
    }

    /// Surface a fatal error once and stop the session
    fn fail(&mut self, kind: ErrorKind, message: String) {
        warn!("Playback failed ({}): {}", kind, message);
        session::lock(&self.session).last_error = Some((kind, message.clone()));
        self.teardown();
        self.set_state(PlayerState::Stopped, "error");
        self.events.publish(Event::Error { kind, message });
    }

    /// Stop and join every pipeline thread. Never fails; problems are logged.
    fn teardown(&mut self) {
        let Some(mut pipeline) = self.pipeline.take() else {
            return;
        };
        pipeline.decode.cancel();
        pipeline.transport.stop();
        pipeline.audio_queue.abort();
        pipeline.video_queue.abort();
        self.clock.set_paused(true);

        let threads = [
            ("decode", pipeline.decode_thread.take()),
            ("audio renderer", pipeline.audio_thread.take()),
            ("video renderer", pipeline.video_thread.take()),
        ];
        for (component, handle) in threads {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    self.logger.log_teardown_error(component, "thread panicked");
                }
            }
        }
        debug!("Pipeline torn down");
    }

    fn release(&mut self) {
        self.teardown();
        if self.surface.replace(None).is_some() {
            self.logger.log_surface_changed(false);
        }
        self.set_state(PlayerState::Released, "release");
        self.events.close();
    }
}

fn loops_for(loop_count: u32) -> Option<u32> {
    if loop_count == 0 {
        None
    } else {
        Some(loop_count)
    }
}

//! The decode thread: opens the source, then feeds the renderer queues until
//! cancelled, repositioning whenever the control thread asks for a seek.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::error::DecodeError;
use crate::logging::{OperationTimer, PlaybackEventType, PlaybackLogger};
use crate::models::{MediaInfo, MediaType};
use crate::render::{FrameQueue, PushRejected, QueueItem, RenderStats};
use crate::source::{self, FrameSource, SourceOpener};

/// Consecutive corrupt frames tolerated before decoding is declared failed
pub const MAX_CONSECUTIVE_CORRUPT: u32 = 300;

/// Opening slower than this is logged as a warning
const SLOW_OPEN: Duration = Duration::from_millis(500);

/// Idle wait at end of stream before re-checking for a seek or cancel
const EOS_IDLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub target: Duration,
    pub serial: u64,
}

/// Reports from the decode thread to the control thread
#[derive(Debug)]
pub enum DecodeNotice {
    Opened(Result<MediaInfo, DecodeError>),
    SeekDone { serial: u64, position: Duration },
    Fatal(DecodeError),
}

pub type DecodeObserver = Arc<dyn Fn(DecodeNotice) + Send + Sync>;

/// Cancel flag and seek mailbox shared between the control and decode threads
#[derive(Debug, Default)]
pub struct DecodeShared {
    cancel: AtomicBool,
    seek: Mutex<Option<SeekRequest>>,
    wake: Condvar,
}

impl DecodeShared {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<SeekRequest>> {
        self.seek.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace any seek not yet picked up; only the latest request is honoured
    pub fn request_seek(&self, target: Duration, serial: u64) {
        let previous = self.lock().replace(SeekRequest { target, serial });
        if let Some(previous) = previous {
            debug!("Seek to {:?} superseded by {:?}", previous.target, target);
        }
        self.wake.notify_all();
    }

    pub fn take_seek(&self) -> Option<SeekRequest> {
        self.lock().take()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
        let _guard = self.lock();
        self.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn wait_for_work(&self, timeout: Duration) {
        let guard = self.lock();
        if guard.is_some() || self.is_cancelled() {
            return;
        }
        let _ = self.wake.wait_timeout(guard, timeout);
    }
}

pub struct DecodeWorker {
    pub locator: String,
    pub openers: Vec<Arc<dyn SourceOpener>>,
    pub shared: Arc<DecodeShared>,
    pub audio: Arc<FrameQueue>,
    pub video: Arc<FrameQueue>,
    pub serial: u64,
    pub start_position: Option<Duration>,
    pub accurate_seek: bool,
    pub stats: Arc<RenderStats>,
    pub logger: PlaybackLogger,
    pub observer: DecodeObserver,
}

impl DecodeWorker {
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("np-decode".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        let timer = OperationTimer::new("source open");
        let mut source = match source::open_with(&self.openers, &self.locator, &self.shared.cancel) {
            Ok(source) => source,
            Err(e) => {
                (self.observer)(DecodeNotice::Opened(Err(e)));
                return;
            }
        };
        if self.shared.is_cancelled() {
            (self.observer)(DecodeNotice::Opened(Err(DecodeError::Cancelled)));
            return;
        }

        let took = timer.finish_with_threshold(SLOW_OPEN);
        let info = source.info().clone();
        self.logger.log_event(
            PlaybackEventType::SourceOpened,
            format!("{} ({})", self.locator, info.format_description()),
            Some(took),
        );

        let mut drop_until = None;
        if let Some(start) = self.start_position.filter(|start| !start.is_zero()) {
            let start = info.duration.map_or(start, |duration| start.min(duration));
            match source.seek(start) {
                Ok(_) if self.accurate_seek => drop_until = Some(start),
                Ok(_) => {}
                Err(e) => warn!("Could not start at {:?}: {}", start, e),
            }
        }

        let has_audio = info.has_audio();
        let has_video = info.has_video();
        (self.observer)(DecodeNotice::Opened(Ok(info)));

        if let Err(e) = self.pump(source.as_mut(), has_audio, has_video, drop_until) {
            if !matches!(e, DecodeError::Cancelled) {
                self.logger.log_event(PlaybackEventType::DecodeError, e.to_string(), None);
                (self.observer)(DecodeNotice::Fatal(e));
            }
        }
        debug!("Decode thread exiting");
    }

    /// Feed the queues until cancelled or a fatal error
    fn pump(
        &self,
        source: &mut dyn FrameSource,
        has_audio: bool,
        has_video: bool,
        mut drop_until: Option<Duration>,
    ) -> Result<(), DecodeError> {
        let mut serial = self.serial;
        let mut corrupt_run = 0u32;
        let mut at_end = false;

        loop {
            if self.shared.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }

            if let Some(request) = self.shared.take_seek() {
                let resumed = source.seek(request.target)?;
                debug!(
                    "Seek to {:?} resumes decoding at {:?} (serial {})",
                    request.target, resumed, request.serial
                );
                serial = request.serial;
                drop_until = self.accurate_seek.then_some(request.target);
                corrupt_run = 0;
                at_end = false;
                (self.observer)(DecodeNotice::SeekDone {
                    serial,
                    position: request.target,
                });
                continue;
            }

            if at_end {
                self.shared.wait_for_work(EOS_IDLE);
                continue;
            }

            match source.next_frame() {
                Ok(Some(mut frame)) => {
                    corrupt_run = 0;
                    if drop_until.map_or(false, |limit| frame.end_pts() <= limit) {
                        continue;
                    }
                    frame.serial = serial;
                    let queue = match frame.media_type() {
                        MediaType::Audio if has_audio => &self.audio,
                        MediaType::Video if has_video => &self.video,
                        _ => continue,
                    };
                    if queue.push(QueueItem::Frame(frame)) == Err(PushRejected::Aborted) {
                        return Err(DecodeError::Cancelled);
                    }
                }
                Ok(None) => {
                    debug!("End of stream (serial {})", serial);
                    at_end = true;
                    let queues = [(has_audio, &self.audio), (has_video, &self.video)];
                    for (_, queue) in queues.iter().filter(|(present, _)| *present) {
                        if queue.push(QueueItem::EndOfStream { serial }) == Err(PushRejected::Aborted) {
                            return Err(DecodeError::Cancelled);
                        }
                    }
                }
                Err(DecodeError::CorruptFrame(reason)) => {
                    corrupt_run += 1;
                    RenderStats::bump(&self.stats.frames_corrupt_skipped);
                    self.logger
                        .log_event(PlaybackEventType::CorruptFrame, format!("Skipped: {}", reason), None);
                    if corrupt_run >= MAX_CONSECUTIVE_CORRUPT {
                        return Err(DecodeError::DecodeFailed(format!(
                            "{} consecutive corrupt frames, last: {}",
                            corrupt_run, reason
                        )));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TestPatternOpener;
    use std::time::Instant;

    struct Rig {
        shared: Arc<DecodeShared>,
        audio: Arc<FrameQueue>,
        video: Arc<FrameQueue>,
        stats: Arc<RenderStats>,
        notices: Arc<Mutex<Vec<DecodeNotice>>>,
    }

    fn start(locator: &str, start_position: Option<Duration>) -> (Rig, JoinHandle<()>) {
        let shared = Arc::new(DecodeShared::new());
        let audio = Arc::new(FrameQueue::new("audio", 4, 1));
        let video = Arc::new(FrameQueue::new("video", 4, 1));
        let stats = Arc::new(RenderStats::new());
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);

        let worker = DecodeWorker {
            locator: locator.to_string(),
            openers: vec![Arc::new(TestPatternOpener)],
            shared: Arc::clone(&shared),
            audio: Arc::clone(&audio),
            video: Arc::clone(&video),
            serial: 1,
            start_position,
            accurate_seek: true,
            stats: Arc::clone(&stats),
            logger: PlaybackLogger::new(),
            observer: Arc::new(move |notice| sink.lock().unwrap().push(notice)),
        };
        let handle = worker.spawn().unwrap();
        (
            Rig {
                shared,
                audio,
                video,
                stats,
                notices,
            },
            handle,
        )
    }

    fn stop(rig: &Rig, handle: JoinHandle<()>) {
        rig.shared.cancel();
        rig.audio.abort();
        rig.video.abort();
        handle.join().unwrap();
    }

    fn wait_for<F: Fn(&[DecodeNotice]) -> bool>(rig: &Rig, check: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if check(&rig.notices.lock().unwrap()) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_open_reports_info_and_fills_queues() {
        let (rig, handle) = start("testsrc:duration=2000", None);
        assert!(wait_for(&rig, |n| matches!(n.first(), Some(DecodeNotice::Opened(Ok(_))))));

        // Decoding stalls once either queue is full
        thread::sleep(Duration::from_millis(50));
        assert!(rig.audio.len() == 4 || rig.video.len() == 4);
        assert!(!rig.audio.is_empty() && !rig.video.is_empty());
        stop(&rig, handle);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let (rig, handle) = start("testsrc:duration=abc", None);
        handle.join().unwrap();
        let notices = rig.notices.lock().unwrap();
        assert!(matches!(
            notices.as_slice(),
            [DecodeNotice::Opened(Err(DecodeError::UnsupportedFormat { .. }))]
        ));
    }

    #[test]
    fn test_seek_switches_serial_and_drops_early_frames() {
        let (rig, handle) = start("testsrc:duration=5000&video=0", None);
        assert!(wait_for(&rig, |n| !n.is_empty()));

        rig.audio.flush(2);
        rig.shared.request_seek(Duration::from_millis(2500), 2);
        assert!(wait_for(&rig, |n| n
            .iter()
            .any(|n| matches!(n, DecodeNotice::SeekDone { serial: 2, .. }))));

        match rig.audio.pop_timeout(Duration::from_secs(1)) {
            Some(QueueItem::Frame(frame)) => {
                assert_eq!(frame.serial, 2);
                assert!(frame.end_pts() > Duration::from_millis(2500));
            }
            other => panic!("unexpected {:?}", other),
        }
        stop(&rig, handle);
    }

    #[test]
    fn test_end_of_stream_marks_every_present_queue() {
        let (rig, handle) = start("testsrc:duration=40&fps=25", None);
        let mut ends = 0;
        for queue in [&rig.audio, &rig.video] {
            while let Some(item) = queue.pop_timeout(Duration::from_millis(500)) {
                if let QueueItem::EndOfStream { serial } = item {
                    assert_eq!(serial, 1);
                    ends += 1;
                    break;
                }
            }
        }
        assert_eq!(ends, 2);
        stop(&rig, handle);
    }

    #[test]
    fn test_start_position_skips_ahead() {
        let (rig, handle) = start("testsrc:duration=5000&video=0", Some(Duration::from_millis(3000)));
        match rig.audio.pop_timeout(Duration::from_secs(1)) {
            Some(QueueItem::Frame(frame)) => assert!(frame.end_pts() > Duration::from_millis(3000)),
            other => panic!("unexpected {:?}", other),
        }
        stop(&rig, handle);
    }

    #[test]
    fn test_corrupt_frames_are_skipped_then_escalate() {
        let (rig, handle) = start("testsrc:duration=20000&fail_after=100&video=0", None);
        let consumer = {
            let audio = Arc::clone(&rig.audio);
            thread::spawn(move || while audio.pop_timeout(Duration::from_millis(200)).is_some() {})
        };

        assert!(wait_for(&rig, |n| n.iter().any(|n| matches!(n, DecodeNotice::Fatal(DecodeError::DecodeFailed(_))))));
        assert!(rig.stats.corrupt_skipped() >= MAX_CONSECUTIVE_CORRUPT as u64);
        handle.join().unwrap();
        consumer.join().unwrap();
    }
}

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};

use crate::clock::ClockSync;
use crate::error::AudioError;
use crate::models::FramePayload;
use crate::render::resampler::FormatAdapter;
use crate::render::sink::{AudioSink, OutputSpec};
use crate::render::{FrameQueue, QueueItem, RenderNotice, RenderObserver, RenderStats, Transport, RENDER_POLL};

/// Opens the sink on the render thread so device start-up never blocks the caller
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioSink>, AudioError> + Send>;

/// Sleep between checks while waiting for the sink to play out
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Adapted samples of one frame, partly written
struct PendingAudio {
    samples: Vec<f32>,
    offset: usize,
    pts: Duration,
    serial: u64,
}

/// Everything the audio render thread needs
pub struct AudioRenderer {
    pub queue: Arc<FrameQueue>,
    pub clock: ClockSync,
    pub transport: Arc<Transport>,
    pub stats: Arc<RenderStats>,
    pub observer: RenderObserver,
    pub volume: f32,
}

impl AudioRenderer {
    pub fn spawn(self, open_sink: SinkFactory) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("np-audio".to_string())
            .spawn(move || self.run(open_sink))
    }

    fn run(self, open_sink: SinkFactory) {
        let mut sink = match open_sink() {
            Ok(sink) => sink,
            Err(e) => {
                error!("Failed to open audio output: {}", e);
                (self.observer)(RenderNotice::DeviceLost(e));
                return;
            }
        };
        sink.set_paused(true);
        let output = sink.spec();
        info!("Audio renderer using '{}' sink", sink.name());
        (self.observer)(RenderNotice::AudioReady { output });

        if let Err(e) = self.render(sink.as_mut(), output) {
            error!("Audio output failed: {}", e);
            (self.observer)(RenderNotice::DeviceLost(e));
        }
        sink.set_paused(true);
        sink.flush();
        debug!("Audio renderer exiting");
    }

    /// Returns once the transport stops, or with the sink's error
    fn render(&self, sink: &mut dyn AudioSink, output: OutputSpec) -> Result<(), AudioError> {
        let mut adapter = FormatAdapter::new(output, self.volume);
        let mut serial = self.clock.serial();
        let mut pending: Option<PendingAudio> = None;
        let mut draining: Option<u64> = None;
        let mut written_until: Option<Duration> = None;

        loop {
            if self.transport.is_paused() {
                sink.set_paused(true);
                if !self.transport.wait_while_paused() {
                    return Ok(());
                }
                sink.set_paused(false);
            }
            if self.transport.is_stopped() {
                return Ok(());
            }

            let current = self.clock.serial();
            if current != serial {
                sink.flush();
                adapter.reset();
                pending = None;
                draining = None;
                written_until = None;
                serial = current;
            }
            self.stats.audio_underruns.store(sink.underruns(), Ordering::Relaxed);

            if let Some(chunk) = pending.as_mut() {
                chunk.offset += sink.write(&chunk.samples[chunk.offset..], RENDER_POLL)?;
                let end = chunk.pts + output.duration_of(chunk.offset);
                self.clock.update_audio(end.saturating_sub(sink.queued()), chunk.serial);
                written_until = Some(end);
                if chunk.offset >= chunk.samples.len() {
                    pending = None;
                }
                continue;
            }

            if let Some(ended) = draining {
                let queued = sink.queued();
                if let Some(end) = written_until {
                    self.clock.update_audio(end.saturating_sub(queued), ended);
                }
                if queued.is_zero() {
                    sink.mark_drained();
                    debug!("Audio reached end of stream (serial {})", ended);
                    (self.observer)(RenderNotice::AudioEnded { serial: ended });
                    draining = None;
                    // Nothing more arrives for this serial until a seek
                    self.transport.sleep(RENDER_POLL);
                } else {
                    self.transport.sleep(DRAIN_POLL);
                }
                continue;
            }

            let Some(item) = self.queue.pop_timeout(RENDER_POLL) else {
                continue;
            };
            self.stats.audio_queue_len.store(self.queue.len(), Ordering::Relaxed);

            match item {
                QueueItem::EndOfStream { serial: ended } if ended == serial => draining = Some(ended),
                QueueItem::EndOfStream { .. } => {}
                QueueItem::Frame(frame) if frame.serial == serial => {
                    if let FramePayload::Audio(audio) = &frame.payload {
                        pending = Some(PendingAudio {
                            samples: adapter.process(audio),
                            offset: 0,
                            pts: frame.pts,
                            serial,
                        });
                    }
                }
                QueueItem::Frame(_) => {}
            }
        }
    }
}

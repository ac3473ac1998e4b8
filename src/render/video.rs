use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::clock::{ClockSync, FrameTiming};
use crate::error::SurfaceError;
use crate::logging::{PlaybackEventType, PlaybackLogger};
use crate::models::{DecodedFrame, FramePayload, PixelFormat, VideoFrame};
use crate::render::{FrameQueue, QueueItem, RenderNotice, RenderObserver, RenderStats, Transport, RENDER_POLL};

/// Longest single sleep while waiting for a frame to come due
const MAX_FRAME_WAIT: Duration = Duration::from_millis(10);

/// Host-provided render target for decoded video
pub trait Surface: Send {
    /// Pixel layout the surface wants; frames are converted to it before `blit`
    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }

    fn blit(&mut self, frame: &VideoFrame, pts: Duration) -> Result<(), SurfaceError>;
}

/// The currently attached surface, swappable from the control thread while the renderer runs
#[derive(Default)]
pub struct SurfaceSlot {
    surface: Mutex<Option<Box<dyn Surface>>>,
}

impl SurfaceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Surface>>> {
        self.surface.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Swap in a new surface (or none). Waits for an in-progress blit to finish,
    /// so the old surface is never touched after this returns.
    pub fn replace(&self, surface: Option<Box<dyn Surface>>) -> Option<Box<dyn Surface>> {
        std::mem::replace(&mut *self.lock(), surface)
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `f` against the attached surface, `None` when nothing is attached
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut dyn Surface) -> R) -> Option<R> {
        let mut guard = self.lock();
        guard.as_mut().map(|surface| f(surface.as_mut()))
    }
}

/// Convert between RGBA and planar YUV 4:2:0 (BT.601, limited range)
pub fn convert_frame(frame: &VideoFrame, target: PixelFormat) -> VideoFrame {
    let data = match (frame.format, target) {
        (PixelFormat::Yuv420p, PixelFormat::Rgba8) => yuv420p_to_rgba(&frame.data, frame.width, frame.height),
        (PixelFormat::Rgba8, PixelFormat::Yuv420p) => rgba_to_yuv420p(&frame.data, frame.width, frame.height),
        _ => frame.data.clone(),
    };
    VideoFrame {
        width: frame.width,
        height: frame.height,
        format: target,
        data,
        duration: frame.duration,
        keyframe: frame.keyframe,
    }
}

fn yuv420p_to_rgba(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
    let mut out = vec![0u8; w * h * 4];
    if data.len() < w * h + 2 * cw * ch {
        return out;
    }
    let (y_plane, rest) = data.split_at(w * h);
    let (u_plane, v_plane) = rest.split_at(cw * ch);

    for row in 0..h {
        for col in 0..w {
            let c = (row / 2) * cw + col / 2;
            let y = (y_plane[row * w + col] as f32 - 16.0) * 1.164;
            let u = u_plane[c] as f32 - 128.0;
            let v = v_plane[c] as f32 - 128.0;
            let px = (row * w + col) * 4;
            out[px] = clamp_u8(y + 1.596 * v);
            out[px + 1] = clamp_u8(y - 0.392 * u - 0.813 * v);
            out[px + 2] = clamp_u8(y + 2.017 * u);
            out[px + 3] = 255;
        }
    }
    out
}

fn rgba_to_yuv420p(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
    let mut out = vec![0u8; w * h + 2 * cw * ch];
    if data.len() < w * h * 4 {
        return out;
    }
    let rgb = |row: usize, col: usize| {
        let px = (row * w + col) * 4;
        (data[px] as f32, data[px + 1] as f32, data[px + 2] as f32)
    };

    for row in 0..h {
        for col in 0..w {
            let (r, g, b) = rgb(row, col);
            out[row * w + col] = clamp_u8(16.0 + 0.257 * r + 0.504 * g + 0.098 * b);
        }
    }
    let (u_base, v_base) = (w * h, w * h + cw * ch);
    for crow in 0..ch {
        for ccol in 0..cw {
            // Chroma from the top-left pixel of each 2x2 block
            let (r, g, b) = rgb((crow * 2).min(h - 1), (ccol * 2).min(w - 1));
            out[u_base + crow * cw + ccol] = clamp_u8(128.0 - 0.148 * r - 0.291 * g + 0.439 * b);
            out[v_base + crow * cw + ccol] = clamp_u8(128.0 + 0.439 * r - 0.368 * g - 0.071 * b);
        }
    }
    out
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Everything the video render thread needs
pub struct VideoRenderer {
    pub queue: Arc<FrameQueue>,
    pub clock: ClockSync,
    pub transport: Arc<Transport>,
    pub surface: Arc<SurfaceSlot>,
    pub stats: Arc<RenderStats>,
    pub logger: PlaybackLogger,
    pub observer: RenderObserver,
}

impl VideoRenderer {
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("np-video".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        debug!("Video renderer started");
        let mut pending: Option<DecodedFrame> = None;

        while self.transport.wait_while_paused() {
            let item = match pending.take() {
                Some(frame) => QueueItem::Frame(frame),
                None => match self.queue.pop_timeout(RENDER_POLL) {
                    Some(item) => item,
                    None => continue,
                },
            };
            self.stats
                .video_queue_len
                .store(self.queue.len(), std::sync::atomic::Ordering::Relaxed);

            match item {
                QueueItem::EndOfStream { serial } => {
                    if serial == self.clock.serial() {
                        debug!("Video reached end of stream (serial {})", serial);
                        (self.observer)(RenderNotice::VideoEnded { serial });
                    }
                }
                QueueItem::Frame(frame) => match self.clock.presentation_delay_for(frame.pts, frame.serial) {
                    FrameTiming::Stale => {}
                    FrameTiming::Drop => {
                        RenderStats::bump(&self.stats.frames_dropped_late);
                        self.logger.log_event(
                            PlaybackEventType::FrameDropped,
                            format!("Late video frame at {:.3}s", frame.pts.as_secs_f64()),
                            None,
                        );
                    }
                    FrameTiming::Wait(delay) => {
                        pending = Some(frame);
                        if !self.transport.sleep(delay.min(MAX_FRAME_WAIT)) {
                            break;
                        }
                    }
                    FrameTiming::Present => self.present(frame),
                },
            }
        }
        debug!("Video renderer exiting");
    }

    fn present(&self, frame: DecodedFrame) {
        let FramePayload::Video(video) = &frame.payload else {
            return;
        };

        let outcome = self.surface.with_surface(|surface| {
            let wanted = surface.pixel_format();
            if wanted == video.format {
                surface.blit(video, frame.pts)
            } else {
                surface.blit(&convert_frame(video, wanted), frame.pts)
            }
        });

        match outcome {
            Some(Ok(())) => RenderStats::bump(&self.stats.frames_presented),
            Some(Err(SurfaceError::Lost(reason))) => {
                warn!("Surface lost, detaching it: {}", reason);
                self.surface.replace(None);
            }
            Some(Err(SurfaceError::Rejected(reason))) => {
                debug!("Surface rejected frame at {:?}: {}", frame.pts, reason);
            }
            None => {}
        }
        self.clock.update_video(frame.pts, frame.serial);
    }
}

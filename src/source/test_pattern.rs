//! Synthetic media: a sine tone and a moving bar pattern with exact timestamps.
//!
//! Locator form: `testsrc:key=value&key=value`. Recognised keys:
//!
//! | key | default | meaning |
//! |---|---|---|
//! | `duration` | 5000 | length in ms |
//! | `fps` | 25 | video frame rate |
//! | `rate` | 48000 | audio sample rate |
//! | `channels` | 2 | audio channels |
//! | `width`, `height` | 64, 48 | picture size |
//! | `pix` | `yuv420p` | `yuv420p` or `rgba` |
//! | `audio`, `video` | 1 | `0` disables the stream |
//! | `open_delay` | 0 | ms spent "probing" (honours cancellation) |
//! | `seek_delay` | 0 | ms every seek takes |
//! | `corrupt_every` | 0 | every Nth frame fails with a corrupt-frame error |
//! | `fail_after` | none | every frame from this pts (ms) on is corrupt |
//!
//! Keyframes fall on whole seconds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceOpener};
use crate::error::DecodeError;
use crate::models::{
    AudioFrame, AudioStreamInfo, DecodedFrame, MediaInfo, PixelFormat, VideoFrame, VideoStreamInfo,
};

const SCHEME: &str = "testsrc:";
const AUDIO_CHUNK: u64 = 1024;
const TONE_HZ: f32 = 440.0;

pub struct TestPatternOpener;

impl SourceOpener for TestPatternOpener {
    fn name(&self) -> &'static str {
        "testsrc"
    }

    fn can_open(&self, locator: &str) -> bool {
        locator.starts_with(SCHEME)
    }

    fn open(&self, locator: &str, cancel: &AtomicBool) -> Result<Box<dyn FrameSource>, DecodeError> {
        Ok(Box::new(TestPatternSource::open(locator, cancel)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PatternParams {
    duration_ms: u64,
    fps: u32,
    rate: u32,
    channels: u16,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    audio: bool,
    video: bool,
    open_delay_ms: u64,
    seek_delay_ms: u64,
    corrupt_every: u64,
    fail_after_ms: Option<u64>,
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            duration_ms: 5000,
            fps: 25,
            rate: 48_000,
            channels: 2,
            width: 64,
            height: 48,
            pixel_format: PixelFormat::Yuv420p,
            audio: true,
            video: true,
            open_delay_ms: 0,
            seek_delay_ms: 0,
            corrupt_every: 0,
            fail_after_ms: None,
        }
    }
}

impl PatternParams {
    fn parse(locator: &str) -> Result<Self, DecodeError> {
        let query = locator.strip_prefix(SCHEME).unwrap_or(locator);
        let mut params = Self::default();

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| bad_param(pair, "expected key=value"))?;
            match key {
                "duration" => params.duration_ms = number(key, value)?,
                "fps" => params.fps = number(key, value)?,
                "rate" => params.rate = number(key, value)?,
                "channels" => params.channels = number(key, value)?,
                "width" => params.width = number(key, value)?,
                "height" => params.height = number(key, value)?,
                "audio" => params.audio = number::<u8>(key, value)? != 0,
                "video" => params.video = number::<u8>(key, value)? != 0,
                "open_delay" => params.open_delay_ms = number(key, value)?,
                "seek_delay" => params.seek_delay_ms = number(key, value)?,
                "corrupt_every" => params.corrupt_every = number(key, value)?,
                "fail_after" => params.fail_after_ms = Some(number(key, value)?),
                "pix" => {
                    params.pixel_format = match value {
                        "yuv420p" => PixelFormat::Yuv420p,
                        "rgba" => PixelFormat::Rgba8,
                        _ => return Err(bad_param(pair, "pix must be yuv420p or rgba")),
                    }
                }
                _ => return Err(bad_param(pair, "unknown key")),
            }
        }

        if params.duration_ms == 0 {
            return Err(bad_param("duration", "must be greater than 0"));
        }
        if !params.audio && !params.video {
            return Err(DecodeError::UnsupportedFormat {
                format: "testsrc with no streams".to_string(),
            });
        }
        if params.audio && (params.rate == 0 || params.channels == 0) {
            return Err(bad_param("rate/channels", "must be greater than 0"));
        }
        if params.video && (params.fps == 0 || params.width == 0 || params.height == 0) {
            return Err(bad_param("fps/width/height", "must be greater than 0"));
        }
        params.totals()?;

        Ok(params)
    }

    /// Audio samples and video frames in the whole stream. Counts must leave
    /// room for nanosecond timestamps.
    fn totals(&self) -> Result<(u64, u64), DecodeError> {
        let too_long = || bad_param("duration", "too long for the requested rate");
        let total_samples = if self.audio {
            self.duration_ms.checked_mul(self.rate as u64).ok_or_else(too_long)? / 1000
        } else {
            0
        };
        let total_video_frames = if self.video {
            self.duration_ms
                .checked_mul(self.fps as u64)
                .and_then(|n| n.checked_add(999))
                .ok_or_else(too_long)?
                / 1000
        } else {
            0
        };
        if total_samples.max(total_video_frames).checked_mul(1_000_000_000).is_none() {
            return Err(too_long());
        }
        Ok((total_samples, total_video_frames))
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DecodeError> {
    value
        .parse()
        .map_err(|_| bad_param(key, &format!("'{}' is not a valid number", value)))
}

fn bad_param(param: &str, reason: &str) -> DecodeError {
    DecodeError::UnsupportedFormat {
        format: format!("testsrc parameter '{}': {}", param, reason),
    }
}

/// Generates frames on demand, interleaved by presentation time
pub struct TestPatternSource {
    params: PatternParams,
    info: MediaInfo,
    total_samples: u64,
    total_video_frames: u64,
    next_sample: u64,
    next_video: u64,
    produced: u64,
}

impl TestPatternSource {
    pub fn open(locator: &str, cancel: &AtomicBool) -> Result<Self, DecodeError> {
        let params = PatternParams::parse(locator)?;

        // Simulated probe time, polled so a release can interrupt it
        let deadline = Instant::now() + Duration::from_millis(params.open_delay_ms);
        while Instant::now() < deadline {
            if cancel.load(Ordering::Acquire) {
                return Err(DecodeError::Cancelled);
            }
            thread::sleep(Duration::from_millis(5));
        }
        if cancel.load(Ordering::Acquire) {
            return Err(DecodeError::Cancelled);
        }

        let (total_samples, total_video_frames) = params.totals()?;

        let info = MediaInfo {
            locator: locator.to_string(),
            container: "testsrc".to_string(),
            duration: Some(Duration::from_millis(params.duration_ms)),
            audio: params.audio.then(|| AudioStreamInfo {
                codec: "pcm_f32".to_string(),
                sample_rate: params.rate,
                channels: params.channels,
            }),
            video: params.video.then(|| VideoStreamInfo {
                codec: match params.pixel_format {
                    PixelFormat::Yuv420p => "rawvideo_yuv420p".to_string(),
                    PixelFormat::Rgba8 => "rawvideo_rgba".to_string(),
                },
                width: params.width,
                height: params.height,
                frame_rate: params.fps as f64,
            }),
        };

        Ok(Self {
            params,
            info,
            total_samples,
            total_video_frames,
            next_sample: 0,
            next_video: 0,
            produced: 0,
        })
    }

    fn audio_pts(&self, sample: u64) -> Duration {
        Duration::from_nanos(sample * 1_000_000_000 / self.params.rate as u64)
    }

    fn video_pts(&self, index: u64) -> Duration {
        Duration::from_nanos(index * 1_000_000_000 / self.params.fps as u64)
    }

    fn audio_frame(&mut self) -> DecodedFrame {
        let start = self.next_sample;
        let count = AUDIO_CHUNK.min(self.total_samples - start);
        self.next_sample += count;

        let channels = self.params.channels as usize;
        let rate = self.params.rate as f32;
        let mut samples = Vec::with_capacity(count as usize * channels);
        for n in start..start + count {
            let phase = (n as f32 * TONE_HZ / rate).fract();
            let value = (2.0 * std::f32::consts::PI * phase).sin() * 0.2;
            samples.extend(std::iter::repeat(value).take(channels));
        }

        DecodedFrame::audio(
            self.audio_pts(start),
            AudioFrame::new(samples, self.params.channels, self.params.rate),
        )
    }

    fn video_frame(&mut self) -> DecodedFrame {
        let index = self.next_video;
        self.next_video += 1;

        let (w, h) = (self.params.width as usize, self.params.height as usize);
        let bar = (index as usize * 2) % w;
        let luma = |x: usize, y: usize| -> u8 {
            if x == bar {
                235
            } else {
                (16 + (x * 3 + y * 2 + index as usize) % 200) as u8
            }
        };

        let data = match self.params.pixel_format {
            PixelFormat::Yuv420p => {
                let mut data = Vec::with_capacity(PixelFormat::Yuv420p.buffer_len(w as u32, h as u32));
                for y in 0..h {
                    for x in 0..w {
                        data.push(luma(x, y));
                    }
                }
                let chroma = ((w + 1) / 2) * ((h + 1) / 2);
                data.extend(std::iter::repeat(128u8).take(chroma * 2));
                data
            }
            PixelFormat::Rgba8 => {
                let mut data = Vec::with_capacity(w * h * 4);
                for y in 0..h {
                    for x in 0..w {
                        let v = luma(x, y);
                        data.extend_from_slice(&[v, v, v, 255]);
                    }
                }
                data
            }
        };

        let end = self
            .video_pts(index + 1)
            .min(Duration::from_millis(self.params.duration_ms));
        let pts = self.video_pts(index);

        DecodedFrame::video(
            pts,
            VideoFrame {
                width: self.params.width,
                height: self.params.height,
                format: self.params.pixel_format,
                data,
                duration: end.saturating_sub(pts),
                keyframe: index % self.params.fps as u64 == 0,
            },
        )
    }
}

impl FrameSource for TestPatternSource {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, DecodeError> {
        let audio_left = self.next_sample < self.total_samples;
        let video_left = self.next_video < self.total_video_frames;

        let frame = match (audio_left, video_left) {
            (false, false) => return Ok(None),
            (true, false) => self.audio_frame(),
            (false, true) => self.video_frame(),
            (true, true) => {
                if self.audio_pts(self.next_sample) <= self.video_pts(self.next_video) {
                    self.audio_frame()
                } else {
                    self.video_frame()
                }
            }
        };

        self.produced += 1;
        if let Some(fail_after) = self.params.fail_after_ms {
            if frame.pts >= Duration::from_millis(fail_after) {
                return Err(DecodeError::CorruptFrame(format!("synthetic damage at {:?}", frame.pts)));
            }
        }
        if self.params.corrupt_every > 0 && self.produced % self.params.corrupt_every == 0 {
            return Err(DecodeError::CorruptFrame(format!("synthetic damage at {:?}", frame.pts)));
        }

        Ok(Some(frame))
    }

    fn seek(&mut self, target: Duration) -> Result<Duration, DecodeError> {
        if self.params.seek_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.params.seek_delay_ms));
        }
        let target = target.min(Duration::from_millis(self.params.duration_ms));

        // With video present decoding restarts at the keyframe on or before the target
        let resume = if self.params.video {
            Duration::from_secs(target.as_secs())
        } else {
            target
        };

        if self.params.audio {
            let sample = (resume.as_nanos() * self.params.rate as u128 / 1_000_000_000) as u64;
            self.next_sample = sample.min(self.total_samples);
        }
        if self.params.video {
            self.next_video = (resume.as_secs() * self.params.fps as u64).min(self.total_video_frames);
        }

        Ok(resume)
    }
}

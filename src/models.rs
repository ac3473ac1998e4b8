use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ErrorKind;
use crate::render::Surface;

/// Lifecycle state of a playback session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlayerState {
    Idle,
    Initialized,
    Preparing,
    Prepared,
    Started,
    Paused,
    Stopped,
    Released,
}

impl PlayerState {
    pub const ALL: [PlayerState; 8] = [
        PlayerState::Idle,
        PlayerState::Initialized,
        PlayerState::Preparing,
        PlayerState::Prepared,
        PlayerState::Started,
        PlayerState::Paused,
        PlayerState::Stopped,
        PlayerState::Released,
    ];

    /// Get a human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "Idle",
            PlayerState::Initialized => "Initialized",
            PlayerState::Preparing => "Preparing",
            PlayerState::Prepared => "Prepared",
            PlayerState::Started => "Started",
            PlayerState::Paused => "Paused",
            PlayerState::Stopped => "Stopped",
            PlayerState::Released => "Released",
        }
    }

    /// States in which the source is open and its duration is known
    pub fn is_prepared(&self) -> bool {
        matches!(self, PlayerState::Prepared | PlayerState::Started | PlayerState::Paused)
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Command names without their payloads, used in errors and logs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetDataSource,
    SetSurface,
    Prepare,
    Start,
    Pause,
    SeekTo,
    Release,
}

impl CommandKind {
    pub const ALL: [CommandKind; 7] = [
        CommandKind::SetDataSource,
        CommandKind::SetSurface,
        CommandKind::Prepare,
        CommandKind::Start,
        CommandKind::Pause,
        CommandKind::SeekTo,
        CommandKind::Release,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::SetDataSource => "setDataSource",
            CommandKind::SetSurface => "setSurface",
            CommandKind::Prepare => "prepare",
            CommandKind::Start => "start",
            CommandKind::Pause => "pause",
            CommandKind::SeekTo => "seekTo",
            CommandKind::Release => "release",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A control request carried to the engine's control thread
pub enum Command {
    SetDataSource(String),
    SetSurface(Option<Box<dyn Surface>>),
    Prepare,
    Start,
    Pause,
    SeekTo(i64),
    Release,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetDataSource(_) => CommandKind::SetDataSource,
            Command::SetSurface(_) => CommandKind::SetSurface,
            Command::Prepare => CommandKind::Prepare,
            Command::Start => CommandKind::Start,
            Command::Pause => CommandKind::Pause,
            Command::SeekTo(_) => CommandKind::SeekTo,
            Command::Release => CommandKind::Release,
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::SetDataSource(locator) => f.debug_tuple("SetDataSource").field(locator).finish(),
            Command::SetSurface(surface) => f
                .debug_tuple("SetSurface")
                .field(&surface.as_ref().map(|_| "<surface>"))
                .finish(),
            Command::SeekTo(ms) => f.debug_tuple("SeekTo").field(ms).finish(),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// Notification delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Prepared { duration_ms: i64 },
    Error { kind: ErrorKind, message: String },
    PlaybackComplete,
    SeekComplete { position_ms: i64 },
}

/// Which clock drives presentation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncMaster {
    Audio,
    External,
}

impl SyncMaster {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMaster::Audio => "audio",
            SyncMaster::External => "external",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
}

/// Interleaved f32 PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Get the number of samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate > 0 {
            Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGBA
    Rgba8,
    /// Planar Y, U, V with 2x2 chroma subsampling
    Yuv420p,
}

impl PixelFormat {
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Rgba8 => w * h * 4,
            PixelFormat::Yuv420p => {
                let chroma = ((w + 1) / 2) * ((h + 1) / 2);
                w * h + 2 * chroma
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub duration: Duration,
    pub keyframe: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Audio(AudioFrame),
    Video(VideoFrame),
}

/// A decoded, timestamped frame. Produced by a source, consumed once by a renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub pts: Duration,
    pub serial: u64,
    pub payload: FramePayload,
}

impl DecodedFrame {
    pub fn audio(pts: Duration, frame: AudioFrame) -> Self {
        Self {
            pts,
            serial: 0,
            payload: FramePayload::Audio(frame),
        }
    }

    pub fn video(pts: Duration, frame: VideoFrame) -> Self {
        Self {
            pts,
            serial: 0,
            payload: FramePayload::Video(frame),
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self.payload {
            FramePayload::Audio(_) => MediaType::Audio,
            FramePayload::Video(_) => MediaType::Video,
        }
    }

    pub fn duration(&self) -> Duration {
        match &self.payload {
            FramePayload::Audio(frame) => frame.duration(),
            FramePayload::Video(frame) => frame.duration,
        }
    }

    pub fn end_pts(&self) -> Duration {
        self.pts + self.duration()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

/// What a source learned while probing the container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub locator: String,
    pub container: String,
    pub duration: Option<Duration>,
    pub audio: Option<AudioStreamInfo>,
    pub video: Option<VideoStreamInfo>,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Duration in milliseconds; 0 when the container does not declare one
    pub fn duration_ms(&self) -> i64 {
        self.duration.map(|d| d.as_millis() as i64).unwrap_or(0)
    }

    pub fn format_description(&self) -> String {
        let mut parts = vec![self.container.clone()];
        if let Some(audio) = &self.audio {
            parts.push(format!("{} {}Hz {}ch", audio.codec, audio.sample_rate, audio.channels));
        }
        if let Some(video) = &self.video {
            parts.push(format!(
                "{} {}x{} @{:.2}fps",
                video.codec, video.width, video.height, video.frame_rate
            ));
        }
        parts.join(", ")
    }
}

/// Point-in-time view of a running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStats {
    pub state: PlayerState,
    pub position_ms: i64,
    pub duration_ms: Option<i64>,
    pub master: SyncMaster,
    /// Video clock minus master clock, when both are valid
    pub av_diff_ms: Option<f64>,
    pub serial: u64,
    pub frames_presented: u64,
    pub frames_dropped_late: u64,
    pub frames_corrupt_skipped: u64,
    pub audio_underruns: u64,
    pub audio_queue_len: usize,
    pub video_queue_len: usize,
}

impl PlaybackStats {
    /// Single-line status in the style of ffplay's console output
    pub fn status_line(&self) -> String {
        let av = match self.av_diff_ms {
            Some(diff) => format!("{:+7.3}", diff / 1000.0),
            None => "    n/a".to_string(),
        };
        format!(
            "{:>8} {} A-V:{} aq={:2} vq={:2} drop={} corrupt={} blits={} underruns={}",
            format_ms(self.position_ms),
            self.state,
            av,
            self.audio_queue_len,
            self.video_queue_len,
            self.frames_dropped_late,
            self.frames_corrupt_skipped,
            self.frames_presented,
            self.audio_underruns,
        )
    }
}

/// Format milliseconds as MM:SS.mmm
pub fn format_ms(ms: i64) -> String {
    let ms = ms.max(0);
    let total_seconds = ms / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}.{:03}", minutes, seconds, ms % 1000)
}

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::{has_scheme, FrameSource, SourceOpener};
use crate::error::DecodeError;
use crate::models::{AudioFrame, AudioStreamInfo, DecodedFrame, MediaInfo};

/// Opens local files (plain paths or `file://` URIs)
pub struct SymphoniaOpener;

impl SourceOpener for SymphoniaOpener {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn can_open(&self, locator: &str) -> bool {
        locator.starts_with("file://") || !has_scheme(locator)
    }

    fn open(&self, locator: &str, cancel: &AtomicBool) -> Result<Box<dyn FrameSource>, DecodeError> {
        Ok(Box::new(SymphoniaSource::open(locator, cancel)?))
    }
}

/// Container demuxer and audio decoder backed by symphonia
pub struct SymphoniaSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    info: MediaInfo,
}

impl SymphoniaSource {
    pub fn open(locator: &str, cancel: &AtomicBool) -> Result<Self, DecodeError> {
        let path = Path::new(locator.strip_prefix("file://").unwrap_or(locator));
        let unreadable = |reason: String| DecodeError::SourceUnreadable {
            locator: locator.to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
        if !file.metadata().map_err(|e| unreadable(e.to_string()))?.is_file() {
            return Err(unreadable("not a regular file".to_string()));
        }

        let media_source = MediaSourceStream::new(Box::new(file), Default::default());

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());
        let mut hint = Hint::new();
        if let Some(ext) = &extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, media_source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat {
                format: format!("{} ({})", extension.as_deref().unwrap_or("unknown"), e),
            })?;

        if cancel.load(Ordering::Acquire) {
            return Err(DecodeError::Cancelled);
        }

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
            .ok_or_else(|| DecodeError::UnsupportedFormat {
                format: "no decodable audio stream".to_string(),
            })?;

        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat {
                format: format!("codec not supported: {}", e),
            })?;

        let sample_rate = params.sample_rate.unwrap_or(44_100);
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let time_base = params.time_base;

        let duration = match (params.n_frames, time_base) {
            (Some(n_frames), Some(tb)) => Some(time_to_duration(tb.calc_time(n_frames))),
            (Some(n_frames), None) => Some(Duration::from_secs_f64(n_frames as f64 / sample_rate as f64)),
            _ => None,
        };

        let codec = symphonia::default::get_codecs()
            .get_codec(params.codec)
            .map(|descriptor| descriptor.short_name.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        // This backend only decodes audio; other tracks are skipped
        let skipped = format_reader
            .tracks()
            .iter()
            .filter(|t| t.id != track_id)
            .count();
        if skipped > 0 {
            debug!("'{}' has {} other track(s) that will be ignored", locator, skipped);
        }

        let info = MediaInfo {
            locator: locator.to_string(),
            container: extension.unwrap_or_else(|| "unknown".to_string()),
            duration,
            audio: Some(AudioStreamInfo {
                codec,
                sample_rate,
                channels,
            }),
            video: None,
        };

        info!("Opened {} ({})", locator, info.format_description());

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            time_base,
            sample_rate,
            info,
        })
    }

    fn ts_to_duration(&self, ts: u64) -> Duration {
        match self.time_base {
            Some(tb) => time_to_duration(tb.calc_time(ts)),
            None if self.sample_rate > 0 => Duration::from_secs_f64(ts as f64 / self.sample_rate as f64),
            None => Duration::ZERO,
        }
    }
}

fn time_to_duration(time: Time) -> Duration {
    Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac.clamp(0.0, 1.0))
}

fn is_end_of_stream(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

impl FrameSource for SymphoniaSource {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, DecodeError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(ref err) if is_end_of_stream(err) => return Ok(None),
                Err(err) => {
                    return Err(DecodeError::DecodeFailed(format!("Failed to read packet: {}", err)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let pts = self.ts_to_duration(packet.ts());

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);

                    let frame = AudioFrame::new(
                        buffer.samples().to_vec(),
                        spec.channels.count() as u16,
                        spec.rate,
                    );
                    return Ok(Some(DecodedFrame::audio(pts, frame)));
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    return Err(DecodeError::CorruptFrame(format!("packet at {:?}: {}", pts, msg)));
                }
                Err(ref err) if is_end_of_stream(err) => return Ok(None),
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(err) => {
                    return Err(DecodeError::DecodeFailed(format!("Failed to decode packet: {}", err)));
                }
            }
        }
    }

    fn seek(&mut self, target: Duration) -> Result<Duration, DecodeError> {
        let time = Time::new(target.as_secs(), target.subsec_nanos() as f64 / 1e9);

        let seeked = self
            .format_reader
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecodeError::SeekError(format!("Seek failed: {}", e)))?;

        // Decoder state is invalid after a jump
        self.decoder.reset();

        Ok(self.ts_to_duration(seeked.actual_ts).min(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::write_test_wav;
    use crate::models::FramePayload;
    use tempfile::TempDir;

    #[test]
    fn test_open_wav_reports_duration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 1, 1000);

        let cancel = AtomicBool::new(false);
        let source = SymphoniaSource::open(path.to_str().unwrap(), &cancel).unwrap();
        let info = source.info();

        assert_eq!(info.duration_ms(), 1000);
        assert_eq!(info.container, "wav");
        let audio = info.audio.as_ref().unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.channels, 1);
        assert!(!info.has_video());
    }

    #[test]
    fn test_decode_all_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 2, 500);

        let cancel = AtomicBool::new(false);
        let locator = format!("file://{}", path.display());
        let mut source = SymphoniaSource::open(&locator, &cancel).unwrap();

        let mut total_frames = 0;
        let mut last_pts = None;
        while let Some(frame) = source.next_frame().unwrap() {
            if let Some(previous) = last_pts {
                assert!(frame.pts >= previous);
            }
            last_pts = Some(frame.pts);
            match frame.payload {
                FramePayload::Audio(audio) => {
                    assert_eq!(audio.channels, 2);
                    total_frames += audio.frames();
                }
                _ => panic!("wav should only yield audio"),
            }
        }
        assert_eq!(total_frames, 4000);
    }

    #[test]
    fn test_seek_lands_at_or_before_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8000, 1, 2000);

        let cancel = AtomicBool::new(false);
        let mut source = SymphoniaSource::open(path.to_str().unwrap(), &cancel).unwrap();

        let target = Duration::from_millis(1500);
        let landed = source.seek(target).unwrap();
        assert!(landed <= target);

        let frame = source.next_frame().unwrap().unwrap();
        assert!(frame.pts <= target + Duration::from_millis(200));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.wav");
        let cancel = AtomicBool::new(false);

        match SymphoniaSource::open(path.to_str().unwrap(), &cancel) {
            Err(DecodeError::SourceUnreadable { .. }) => {}
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("missing file opened"),
        }
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, vec![0x5Au8; 4096]).unwrap();
        let cancel = AtomicBool::new(false);

        match SymphoniaSource::open(path.to_str().unwrap(), &cancel) {
            Err(DecodeError::UnsupportedFormat { .. }) => {}
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("garbage opened"),
        }
    }

    #[test]
    fn test_opener_accepts_paths_not_other_schemes() {
        let opener = SymphoniaOpener;
        assert!(opener.can_open("/music/a.flac"));
        assert!(opener.can_open("file:///music/a.flac"));
        assert!(!opener.can_open("testsrc:duration=100"));
    }
}

//! Sample-rate and channel-layout conversion between decoded audio and the
//! output device.
//!
//! `LinearResampler` keeps one frame of history and its fractional phase
//! across calls, so chunked input resamples without clicks at the chunk
//! boundaries. `FormatAdapter` wraps it together with channel remapping and
//! volume, and is what the audio renderer runs every frame through.

use crate::models::AudioFrame;
use crate::render::sink::OutputSpec;

/// Streaming linear-interpolation resampler for interleaved f32 audio
#[derive(Debug, Clone)]
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    /// Source frames consumed per output frame
    step: f64,
    /// Read position in source frames, relative to `history`
    phase: f64,
    /// Last source frame of the previous call
    history: Vec<f32>,
}

impl LinearResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Self {
        Self {
            src_rate,
            dst_rate,
            channels,
            step: step_for(src_rate, dst_rate),
            phase: 0.0,
            history: Vec::new(),
        }
    }

    /// Forget the phase and history, e.g. after a seek
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.history.clear();
    }

    pub fn config(&self) -> (u32, u32, usize) {
        (self.src_rate, self.dst_rate, self.channels)
    }

    pub fn is_passthrough(&self) -> bool {
        self.src_rate == self.dst_rate
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let ch = self.channels;
        if ch == 0 || self.src_rate == 0 || self.dst_rate == 0 {
            return Vec::new();
        }
        let in_frames = input.len() / ch;
        if in_frames == 0 {
            return Vec::new();
        }

        let mut work = Vec::with_capacity((in_frames + 1) * ch);
        if self.history.len() == ch {
            work.extend_from_slice(&self.history);
        } else {
            work.resize(ch, 0.0);
        }
        work.extend_from_slice(&input[..in_frames * ch]);
        let total_frames = work.len() / ch;
        let last = (total_frames - 1) as f64;

        let estimate = (in_frames as f64 / self.step).ceil() as usize + 2;
        let mut out = Vec::with_capacity(estimate * ch);
        while self.phase + 1.0 <= last {
            let index = self.phase as usize;
            let frac = (self.phase - index as f64) as f32;
            let (a, b) = (&work[index * ch..(index + 1) * ch], &work[(index + 1) * ch..(index + 2) * ch]);
            out.extend(a.iter().zip(b).map(|(s0, s1)| s0 + (s1 - s0) * frac));
            self.phase += self.step;
        }

        self.history.clear();
        self.history.extend_from_slice(&work[(total_frames - 1) * ch..]);
        self.phase = (self.phase - last).max(0.0);
        out
    }
}

fn step_for(src_rate: u32, dst_rate: u32) -> f64 {
    if dst_rate == 0 {
        0.0
    } else {
        src_rate as f64 / dst_rate as f64
    }
}

/// Converts decoded frames to the sink's sample rate, channel count and volume
#[derive(Debug)]
pub struct FormatAdapter {
    output: OutputSpec,
    volume: f32,
    resampler: Option<LinearResampler>,
}

impl FormatAdapter {
    pub fn new(output: OutputSpec, volume: f32) -> Self {
        Self {
            output,
            volume: volume.clamp(0.0, 1.0),
            resampler: None,
        }
    }

    pub fn output(&self) -> OutputSpec {
        self.output
    }

    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Samples ready for the sink, interleaved in the output layout
    pub fn process(&mut self, frame: &AudioFrame) -> Vec<f32> {
        let out_channels = self.output.channels as usize;
        let mut samples = remap_channels(&frame.samples, frame.channels as usize, out_channels);

        if frame.sample_rate != self.output.sample_rate {
            let stale = self
                .resampler
                .as_ref()
                .map(|r| r.config() != (frame.sample_rate, self.output.sample_rate, out_channels))
                .unwrap_or(true);
            if stale {
                self.resampler = Some(LinearResampler::new(
                    frame.sample_rate,
                    self.output.sample_rate,
                    out_channels,
                ));
            }
            if let Some(resampler) = self.resampler.as_mut() {
                samples = resampler.process(&samples);
            }
        }

        if self.volume < 1.0 {
            for sample in samples.iter_mut() {
                *sample *= self.volume;
            }
        }
        samples
    }
}

/// Mono fans out to every output channel, stereo folds down to mono by averaging,
/// anything else truncates or pads with silence.
fn remap_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        match (from, to) {
            (1, _) => out.extend(std::iter::repeat(frame[0]).take(to)),
            (_, 1) => out.push(frame.iter().sum::<f32>() / from as f32),
            _ => {
                let keep = from.min(to);
                out.extend_from_slice(&frame[..keep]);
                out.extend(std::iter::repeat(0.0).take(to - keep));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, frames: usize, channels: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|n| {
                let s = (2.0 * std::f32::consts::PI * freq * n as f32 / rate as f32).sin();
                std::iter::repeat(s).take(channels)
            })
            .collect()
    }

    #[test]
    fn test_resample_length_44k1_to_48k() {
        let input = sine(1000.0, 44_100, 4410, 1);
        let mut resampler = LinearResampler::new(44_100, 48_000, 1);
        let out = resampler.process(&input);

        let expected = (4410.0_f64 * 48_000.0 / 44_100.0).round() as isize;
        assert!((out.len() as isize - expected).abs() <= 2, "got {}", out.len());
    }

    #[test]
    fn test_chunked_input_matches_one_shot() {
        let input = sine(440.0, 44_100, 10_000, 2);

        let mut one_shot = LinearResampler::new(44_100, 48_000, 2);
        let whole = one_shot.process(&input);

        let mut streaming = LinearResampler::new(44_100, 48_000, 2);
        let mut chunked = Vec::new();
        for piece in input.chunks(777 * 2) {
            chunked.extend(streaming.process(piece));
        }

        assert!((whole.len() as isize - chunked.len() as isize).abs() <= 4);
        let common = whole.len().min(chunked.len());
        for k in (0..common).step_by(common / 10) {
            assert!((whole[k] - chunked[k]).abs() < 1e-3, "mismatch at {}", k);
        }
    }

    #[test]
    fn test_reset_clears_history() {
        let mut resampler = LinearResampler::new(48_000, 44_100, 1);
        resampler.process(&[1.0; 480]);
        resampler.reset();
        let out = resampler.process(&[1.0; 480]);
        // First output frame interpolates from the silent lead-in again
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_adapter_passthrough() {
        let mut adapter = FormatAdapter::new(OutputSpec::new(48_000, 2), 1.0);
        let frame = AudioFrame::new(vec![0.1, 0.2, 0.3, 0.4], 2, 48_000);
        assert_eq!(adapter.process(&frame), frame.samples);
    }

    #[test]
    fn test_adapter_mono_to_stereo_with_volume() {
        let mut adapter = FormatAdapter::new(OutputSpec::new(48_000, 2), 0.5);
        let frame = AudioFrame::new(vec![0.8, -0.4], 1, 48_000);
        assert_eq!(adapter.process(&frame), vec![0.4, 0.4, -0.2, -0.2]);
    }

    #[test]
    fn test_adapter_stereo_to_mono() {
        let mut adapter = FormatAdapter::new(OutputSpec::new(48_000, 1), 1.0);
        let frame = AudioFrame::new(vec![0.2, 0.4, -1.0, 1.0], 2, 48_000);
        let out = adapter.process(&frame);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn test_adapter_resamples_to_device_rate() {
        let mut adapter = FormatAdapter::new(OutputSpec::new(48_000, 2), 1.0);
        let frame = AudioFrame::new(sine(440.0, 24_000, 2400, 2), 2, 24_000);
        let out = adapter.process(&frame);
        let frames = out.len() / 2;
        assert!((frames as isize - 4800).abs() <= 3, "got {} frames", frames);
    }
}

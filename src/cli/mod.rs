use clap::Parser;
use std::path::PathBuf;

use crate::config::{AudioOutput, EngineConfig};

pub mod status;
pub use status::StatusDisplay;

/// Native media player
#[derive(Debug, Parser)]
#[command(name = "nplay")]
#[command(about = "Play a media file or synthetic test source with audio/video sync")]
#[command(version = "0.1.0")]
pub struct CliApp {
    /// File path, file:// URI or testsrc: locator
    #[arg(required_unless_present = "list_devices")]
    pub locator: Option<String>,

    /// Discard audio instead of opening an output device
    #[arg(long)]
    pub null_audio: bool,

    /// Seek after prepare (milliseconds, "90s" or "1:30")
    #[arg(long, value_parser = parse_position_ms)]
    pub seek: Option<i64>,

    /// Configuration file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of passes; 0 loops forever
    #[arg(long = "loop")]
    pub loop_count: Option<u32>,

    /// Interval between status lines in milliseconds; 0 disables them
    #[arg(long, default_value_t = 500)]
    pub status_interval: u64,

    /// List audio output devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Fold command line overrides into the loaded configuration
    pub fn apply_overrides(&self, config: &mut EngineConfig) {
        if self.null_audio {
            config.audio.output = AudioOutput::Null;
        }
        if let Some(loop_count) = self.loop_count {
            config.playback.loop_count = loop_count;
        }
    }

    /// The locator with a leading `~` expanded for plain paths
    pub fn resolved_locator(&self) -> Option<String> {
        self.locator.as_deref().map(|locator| {
            if locator == "~" || locator.starts_with("~/") {
                Self::expand_path(locator).to_string_lossy().into_owned()
            } else {
                locator.to_string()
            }
        })
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home_dir) = dirs::home_dir() {
                home_dir.join(rest)
            } else {
                PathBuf::from(path)
            }
        } else if path == "~" {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
        } else {
            PathBuf::from(path)
        }
    }
}

/// Parse a position: plain milliseconds, seconds with an `s` suffix, or `MM:SS[.fff]`
pub fn parse_position_ms(input: &str) -> Result<i64, ParseError> {
    let trimmed = input.trim();
    let invalid = || ParseError::InvalidTimeFormat {
        input: input.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid());
    }

    let seconds = if let Some((minutes, seconds)) = trimmed.split_once(':') {
        let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
        let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
        if !(0.0..60.0).contains(&seconds) {
            return Err(invalid());
        }
        minutes as f64 * 60.0 + seconds
    } else if let Some(seconds) = trimmed.strip_suffix('s') {
        seconds.parse::<f64>().map_err(|_| invalid())?
    } else {
        let ms: i64 = trimmed.parse().map_err(|_| invalid())?;
        if ms < 0 {
            return Err(invalid());
        }
        return Ok(ms);
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(invalid());
    }
    Ok((seconds * 1000.0).round() as i64)
}

/// Command line parsing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid time format: {input} (expected milliseconds, '90s' or '1:30')")]
    InvalidTimeFormat { input: String },
}

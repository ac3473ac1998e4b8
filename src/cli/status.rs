use crate::error::PlayerError;
use crate::models::{format_ms, Event, MediaInfo, PlaybackStats};
use crate::render::DeviceInfo;

/// Console output for the `nplay` binary
pub struct StatusDisplay;

impl StatusDisplay {
    /// One line describing an engine event
    pub fn format_event(event: &Event) -> String {
        match event {
            Event::Prepared { duration_ms } if *duration_ms > 0 => {
                format!("Prepared, duration {}", format_ms(*duration_ms))
            }
            Event::Prepared { .. } => "Prepared, duration unknown".to_string(),
            Event::SeekComplete { position_ms } => format!("Seek complete at {}", format_ms(*position_ms)),
            Event::PlaybackComplete => "Playback complete".to_string(),
            Event::Error { kind, message } => format!("Error ({}): {}", kind, message),
        }
    }

    pub fn display_event(event: &Event) {
        println!("{}", Self::format_event(event));
    }

    /// Overwrite the current terminal line with the status snapshot
    pub fn display_status_line(stats: &PlaybackStats) {
        use std::io::Write;
        let duration = stats
            .duration_ms
            .filter(|ms| *ms > 0)
            .map(format_ms)
            .unwrap_or_else(|| "--:--.---".to_string());
        print!("\r{} / {}", stats.status_line(), duration);
        let _ = std::io::stdout().flush();
    }

    pub fn display_media(info: &MediaInfo) {
        println!("┌─ Media ─────────────────────────────────────────────────┐");
        println!("│ Source: {}", Self::truncate(&info.locator, 48));
        println!("│ Format: {}", Self::truncate(&info.format_description(), 48));
        println!("└─────────────────────────────────────────────────────────┘");
    }

    /// Display error message with recovery suggestions
    pub fn display_error(error: &PlayerError) {
        eprintln!("Error: {}", error.user_message());
        for suggestion in error.recovery_suggestions() {
            eprintln!("  - {}", suggestion);
        }
    }

    pub fn format_device(device: &DeviceInfo) -> String {
        let marker = if device.is_default { "* " } else { "  " };
        match (device.sample_rate, device.channels) {
            (Some(rate), Some(channels)) => {
                let format = device
                    .sample_format
                    .map(|format| format!(", {:?}", format))
                    .unwrap_or_default();
                format!("{}{} ({} Hz, {} ch{})", marker, device.name, rate, channels, format)
            }
            _ => format!("{}{} (no default output config)", marker, device.name),
        }
    }

    pub fn display_devices(host: &str, devices: &[DeviceInfo]) {
        println!("Audio host: {}", host);
        if devices.is_empty() {
            println!("  No output devices found");
        }
        for device in devices {
            println!("{}", Self::format_device(device));
        }
    }

    /// Truncate string to fit display width
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}

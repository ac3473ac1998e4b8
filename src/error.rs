use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CommandKind, PlayerState};

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Illegal state: cannot {command} while {state}")]
    IllegalState { command: CommandKind, state: PlayerState },

    #[error("Invalid operation: {command}: {reason}")]
    InvalidOperation { command: CommandKind, reason: String },

    #[error("Duration is not available while {state}")]
    DurationUnavailable { state: PlayerState },

    #[error("Engine control channel is closed")]
    ChannelClosed,
}

impl PlayerError {
    /// Classify the error into the kind reported to hosts
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::Audio(_) => ErrorKind::DeviceUnavailable,
            PlayerError::File(_) => ErrorKind::SourceUnreadable,
            PlayerError::Decode(err) => err.kind(),
            PlayerError::Config(_) => ErrorKind::InvalidOperationError,
            PlayerError::IllegalState { .. } => ErrorKind::IllegalStateError,
            PlayerError::InvalidOperation { .. } => ErrorKind::InvalidOperationError,
            PlayerError::DurationUnavailable { .. } => ErrorKind::IllegalStateError,
            PlayerError::ChannelClosed => ErrorKind::IllegalStateError,
        }
    }

    /// Get user-friendly error message with suggested solutions
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Audio(err) => err.user_message(),
            PlayerError::File(err) => Self::format_file_error(err),
            PlayerError::Decode(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::IllegalState { command, state } => {
                format!("'{}' is not allowed while the player is {}", command, state)
            }
            PlayerError::InvalidOperation { command, reason } => {
                format!("'{}' cannot be performed: {}", command, reason)
            }
            PlayerError::DurationUnavailable { state } => {
                format!("Duration is unknown until the source is prepared (player is {})", state)
            }
            PlayerError::ChannelClosed => "The player has been released".to_string(),
        }
    }

    /// Get suggested recovery actions for the error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlayerError::Audio(err) => err.recovery_suggestions(),
            PlayerError::File(_) => vec!["Check that the media path is correct and readable".to_string()],
            PlayerError::Decode(err) => err.recovery_suggestions(),
            PlayerError::Config(err) => err.recovery_suggestions(),
            PlayerError::IllegalState { .. } | PlayerError::DurationUnavailable { .. } => vec![
                "Wait for the Prepared event before issuing transport commands".to_string(),
            ],
            PlayerError::InvalidOperation { .. } => vec![
                "Release this player and create a new one for a different source".to_string(),
            ],
            PlayerError::ChannelClosed => vec!["Create a new player instance".to_string()],
        }
    }

    /// Check if this error allows for automatic recovery
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Audio(err) => err.is_recoverable(),
            PlayerError::File(_) => false, // File errors usually require user intervention
            PlayerError::Decode(err) => err.is_recoverable(),
            PlayerError::Config(err) => err.is_recoverable(),
            PlayerError::IllegalState { .. } => true, // Caller can retry in a valid state
            PlayerError::InvalidOperation { .. } => false,
            PlayerError::DurationUnavailable { .. } => true,
            PlayerError::ChannelClosed => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Audio(AudioError::BufferUnderrun) => ErrorSeverity::Warning,
            PlayerError::Audio(AudioError::DeviceNotFound { .. }) => ErrorSeverity::Error,
            PlayerError::Audio(_) => ErrorSeverity::Critical,
            PlayerError::File(_) => ErrorSeverity::Error,
            PlayerError::Decode(DecodeError::CorruptFrame(_)) => ErrorSeverity::Warning,
            PlayerError::Decode(DecodeError::Cancelled) => ErrorSeverity::Info,
            PlayerError::Decode(_) => ErrorSeverity::Error,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::IllegalState { .. } => ErrorSeverity::Warning,
            PlayerError::InvalidOperation { .. } => ErrorSeverity::Warning,
            PlayerError::DurationUnavailable { .. } => ErrorSeverity::Info,
            PlayerError::ChannelClosed => ErrorSeverity::Info,
        }
    }

    fn format_file_error(err: &std::io::Error) -> String {
        match err.kind() {
            std::io::ErrorKind::NotFound => "File or directory not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "Permission denied - cannot access file".to_string(),
            std::io::ErrorKind::InvalidData => "File contains invalid or corrupted data".to_string(),
            std::io::ErrorKind::UnexpectedEof => "File appears to be truncated or corrupted".to_string(),
            _ => format!("File system error: {}", err),
        }
    }
}

/// Error categories surfaced to hosts through `Event::Error` and `PlayerError::kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SourceUnreadable,
    UnsupportedFormat,
    IllegalStateError,
    DeviceUnavailable,
    DecodeFailure,
    InvalidOperationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnreadable => "SourceUnreadable",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::IllegalStateError => "IllegalStateError",
            ErrorKind::DeviceUnavailable => "DeviceUnavailable",
            ErrorKind::DecodeFailure => "DecodeFailure",
            ErrorKind::InvalidOperationError => "InvalidOperationError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Audio output errors
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Buffer underrun")]
    BufferUnderrun,

    #[error("Audio initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Audio device did not become ready within {waited_ms} ms")]
    Timeout { waited_ms: u64 },
}

impl AudioError {
    pub fn user_message(&self) -> String {
        match self {
            AudioError::DeviceNotFound { device } => {
                format!("Audio device '{}' is not available or has been disconnected", device)
            }
            AudioError::UnsupportedFormat { format } => {
                format!("Output sample format '{}' is not supported", format)
            }
            AudioError::StreamError(msg) => {
                format!("Audio playback interrupted: {}", msg)
            }
            AudioError::BufferUnderrun => {
                "Audio buffer underrun detected - playback may stutter".to_string()
            }
            AudioError::InitializationFailed(msg) => {
                format!("Failed to initialize audio output: {}", msg)
            }
            AudioError::Timeout { waited_ms } => {
                format!("The audio device did not respond within {} ms", waited_ms)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            AudioError::DeviceNotFound { .. } => vec![
                "Check that your audio device is connected and powered on".to_string(),
                "Remove 'preferred_device' from the configuration to use the default device".to_string(),
            ],
            AudioError::UnsupportedFormat { .. } => vec![
                "Try selecting a different audio device".to_string(),
            ],
            AudioError::StreamError(_) => vec![
                "Check audio device connections".to_string(),
                "Release the player and prepare the source again".to_string(),
            ],
            AudioError::BufferUnderrun => vec![
                "This is usually temporary - playback should recover automatically".to_string(),
                "Consider increasing 'audio.buffer_ms' in the configuration".to_string(),
            ],
            AudioError::InitializationFailed(_) | AudioError::Timeout { .. } => vec![
                "Check that no other applications are using exclusive audio access".to_string(),
                "Use the null audio output for headless playback".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            AudioError::DeviceNotFound { .. } => true,  // Can fall back to default device
            AudioError::UnsupportedFormat { .. } => false,
            AudioError::StreamError(_) => true,
            AudioError::BufferUnderrun => true,  // Usually recovers automatically
            AudioError::InitializationFailed(_) => true,  // Can retry initialization
            AudioError::Timeout { .. } => true,
        }
    }
}

/// Source open and decode errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Cannot read source '{locator}': {reason}")]
    SourceUnreadable { locator: String, reason: String },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("Seek error: {0}")]
    SeekError(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Source open was cancelled")]
    Cancelled,
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::SourceUnreadable { .. } | DecodeError::Cancelled => ErrorKind::SourceUnreadable,
            DecodeError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            DecodeError::CorruptFrame(_) | DecodeError::SeekError(_) | DecodeError::DecodeFailed(_) => {
                ErrorKind::DecodeFailure
            }
        }
    }

    /// Single bad frames are skipped by the decode loop
    pub fn is_transient(&self) -> bool {
        matches!(self, DecodeError::CorruptFrame(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            DecodeError::SourceUnreadable { locator, reason } => {
                format!("Cannot open '{}': {}", locator, reason)
            }
            DecodeError::UnsupportedFormat { format } => {
                format!("Media format '{}' is not supported by this player", format)
            }
            DecodeError::CorruptFrame(msg) => {
                format!("Skipped a damaged frame: {}", msg)
            }
            DecodeError::SeekError(msg) => {
                format!("Cannot seek in this media: {}", msg)
            }
            DecodeError::DecodeFailed(msg) => {
                format!("Failed to decode media data: {}", msg)
            }
            DecodeError::Cancelled => "Opening the source was cancelled".to_string(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            DecodeError::SourceUnreadable { .. } => vec![
                "Check that the path or URI is correct".to_string(),
                "Check file permissions".to_string(),
            ],
            DecodeError::UnsupportedFormat { .. } => vec![
                "Convert the media to a supported container and codec".to_string(),
                "Check if the file extension matches the actual format".to_string(),
            ],
            DecodeError::CorruptFrame(_) => vec![
                "Playback continues past isolated damaged frames".to_string(),
            ],
            DecodeError::SeekError(_) => vec![
                "Some formats don't support seeking".to_string(),
                "Play from the beginning instead of seeking".to_string(),
            ],
            DecodeError::DecodeFailed(_) => vec![
                "Check if the file is completely downloaded".to_string(),
                "Verify the file is not corrupted".to_string(),
            ],
            DecodeError::Cancelled => Vec::new(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            DecodeError::SourceUnreadable { .. } => false,
            DecodeError::UnsupportedFormat { .. } => false, // Requires different file
            DecodeError::CorruptFrame(_) => true, // Frame is skipped
            DecodeError::SeekError(_) => true, // Can continue without seeking
            DecodeError::DecodeFailed(_) => false,
            DecodeError::Cancelled => false,
        }
    }
}

/// Errors reported by output surfaces
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Surface lost: {0}")]
    Lost(String),

    #[error("Surface rejected frame: {0}")]
    Rejected(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
            ConfigError::InvalidValue { field, reason } => {
                format!("Configuration value '{}' is invalid: {}", field, reason)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec![
                "Check that you have write permissions to your home directory".to_string(),
                "Try creating the directory manually: ~/.config/native-player/".to_string(),
            ],
            ConfigError::IoError(_) => vec![
                "Check file permissions for the configuration directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
            ConfigError::SerializationError(_) => vec![
                "Try resetting configuration to defaults".to_string(),
            ],
            ConfigError::DeserializationError(_) => vec![
                "Delete the configuration file to reset to defaults".to_string(),
                "Check the configuration file format manually".to_string(),
            ],
            ConfigError::InvalidValue { field, .. } => vec![
                format!("Correct or remove '{}' in the configuration file", field),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            ConfigError::ConfigDirNotFound => true, // Can use defaults
            ConfigError::IoError(_) => true,
            ConfigError::SerializationError(_) => true,
            ConfigError::DeserializationError(_) => true, // Can use defaults
            ConfigError::InvalidValue { .. } => false,
        }
    }
}

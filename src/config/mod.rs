use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::SyncMaster;

/// Engine configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub queues: QueueConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub master: SyncMaster,
    pub frame_drop: bool,
    /// Video frames later than this behind the master are dropped
    pub drop_threshold_ms: u64,
    /// Clock differences beyond this are treated as discontinuities
    pub nosync_threshold_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            master: SyncMaster::Audio,
            frame_drop: true,
            drop_threshold_ms: 100,
            nosync_threshold_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub audio_frames: usize,
    pub video_frames: usize,
    pub command_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            audio_frames: 9,
            video_frames: 3,
            command_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioOutput {
    /// System output device through cpal
    Device,
    /// Virtual wall-clock paced sink, no hardware
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub output: AudioOutput,
    pub preferred_device: Option<String>,
    pub device_timeout_ms: u64,
    pub buffer_ms: u64,
    pub volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output: AudioOutput::Device,
            preferred_device: None,
            device_timeout_ms: 2000,
            buffer_ms: 200,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// 1 plays once, 0 loops forever, n plays n times
    pub loop_count: u32,
    pub start_position_ms: Option<u64>,
    /// Discard decoded frames that end before a seek target
    pub accurate_seek: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            loop_count: 1,
            start_position_ms: None,
            accurate_seek: true,
        }
    }
}

impl EngineConfig {
    /// Configuration for headless use: null audio output, everything else default
    pub fn headless() -> Self {
        let mut config = Self::default();
        config.audio.output = AudioOutput::Null;
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.audio_frames == 0 {
            return Err(invalid("queues.audio_frames", "must be at least 1"));
        }
        if self.queues.video_frames == 0 {
            return Err(invalid("queues.video_frames", "must be at least 1"));
        }
        if self.queues.command_capacity == 0 {
            return Err(invalid("queues.command_capacity", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(invalid("audio.volume", "must be between 0.0 and 1.0"));
        }
        if self.audio.buffer_ms == 0 {
            return Err(invalid("audio.buffer_ms", "must be greater than 0"));
        }
        if self.audio.device_timeout_ms == 0 {
            return Err(invalid("audio.device_timeout_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn drop_threshold(&self) -> Duration {
        Duration::from_millis(self.sync.drop_threshold_ms)
    }

    pub fn nosync_threshold(&self) -> Duration {
        Duration::from_millis(self.sync.nosync_threshold_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.audio.device_timeout_ms)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config(&config_path).unwrap_or_default();

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Use an explicit file instead of the per-user location
    pub fn with_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let config = Self::load_config(&config_path)?;
        config.validate()?;

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut candidate = self.config.clone();
        updater(&mut candidate);
        candidate.validate()?;
        self.config = candidate;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = EngineConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("native-player");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&config_content)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}

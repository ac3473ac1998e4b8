use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use native_player::cli::{CliApp, StatusDisplay};
use native_player::config::{AudioOutput, ConfigManager, EngineConfig};
use native_player::error::{ErrorKind, ErrorSeverity, PlayerError};
use native_player::logging::init_logging;
use native_player::models::Event;
use native_player::render::DeviceManager;
use native_player::PlaybackEngine;

/// How often the event loop checks for Ctrl-C
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// How one playback run ended
#[derive(Debug)]
enum Outcome {
    Completed,
    Interrupted,
    Failed { kind: ErrorKind, message: String },
}

/// Drives one engine from the command line
struct AppController {
    cli: CliApp,
    config: EngineConfig,
    shutdown: Arc<AtomicBool>,
}

impl AppController {
    fn new(cli: CliApp) -> Self {
        let loaded = match &cli.config {
            Some(path) => ConfigManager::with_path(path),
            None => ConfigManager::new(),
        };
        let mut config = match loaded {
            Ok(manager) => manager.get_config().clone(),
            Err(e) => {
                warn!("Using default configuration: {}", e);
                eprintln!("Warning: {}", e.user_message());
                EngineConfig::default()
            }
        };
        cli.apply_overrides(&mut config);

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            println!("\nReceived interrupt signal. Shutting down gracefully...");
            flag.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }

        Self { cli, config, shutdown }
    }

    /// Play the locator, falling back to the null sink once if the device is unusable
    async fn run(&mut self, locator: &str) -> Result<Outcome, PlayerError> {
        let outcome = self.play(locator).await?;
        match outcome {
            Outcome::Failed {
                kind: ErrorKind::DeviceUnavailable,
                ref message,
            } if self.config.audio.output == AudioOutput::Device => {
                warn!("Audio device failed ({}), retrying without audio output", message);
                println!("🔄 Audio output unavailable, continuing with the null sink");
                self.config.audio.output = AudioOutput::Null;
                self.play(locator).await
            }
            other => Ok(other),
        }
    }

    async fn play(&self, locator: &str) -> Result<Outcome, PlayerError> {
        let engine = PlaybackEngine::new(self.config.clone())?;
        let mut events = engine.subscribe();
        engine.set_data_source(locator)?;
        engine.prepare()?;

        let mut shutdown_poll = tokio::time::interval(SHUTDOWN_POLL);
        let status_every = Duration::from_millis(self.cli.status_interval.max(1));
        let mut status = tokio::time::interval(status_every);
        let show_status = self.cli.status_interval > 0;
        let mut status_shown = false;

        let outcome = loop {
            tokio::select! {
                biased;

                event = events.recv() => {
                    let Some(event) = event else {
                        break Outcome::Interrupted;
                    };
                    if status_shown {
                        println!();
                        status_shown = false;
                    }
                    StatusDisplay::display_event(&event);
                    match event {
                        Event::Prepared { .. } => {
                            if let Some(info) = engine.media_info() {
                                StatusDisplay::display_media(&info);
                            }
                            engine.start()?;
                            if let Some(ms) = self.cli.seek {
                                engine.seek_to(ms)?;
                            }
                        }
                        Event::PlaybackComplete => break Outcome::Completed,
                        Event::Error { kind, message } => break Outcome::Failed { kind, message },
                        Event::SeekComplete { .. } => {}
                    }
                }

                _ = shutdown_poll.tick() => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break Outcome::Interrupted;
                    }
                }

                _ = status.tick(), if show_status => {
                    if engine.state().is_prepared() {
                        StatusDisplay::display_status_line(&engine.stats());
                        status_shown = true;
                    }
                }
            }
        };
        if status_shown {
            println!();
        }

        engine.release();
        info!("Run finished: {:?}", outcome);
        Ok(outcome)
    }
}

fn list_devices() {
    let manager = DeviceManager::new();
    match manager.list_devices() {
        Ok(devices) => StatusDisplay::display_devices(manager.host_name(), &devices),
        Err(e) => StatusDisplay::display_error(&PlayerError::Audio(e)),
    }
}

fn report(error: &PlayerError) {
    match error.severity() {
        ErrorSeverity::Info => info!("{}", error),
        ErrorSeverity::Warning => warn!("{}", error),
        ErrorSeverity::Error | ErrorSeverity::Critical => error!("{}", error),
    }
    StatusDisplay::display_error(error);
}

#[tokio::main]
async fn main() {
    let cli = CliApp::parse_args();
    init_logging();

    if cli.list_devices {
        list_devices();
        return;
    }

    let Some(locator) = cli.resolved_locator() else {
        eprintln!("Error: no locator given");
        std::process::exit(2);
    };

    let mut app = AppController::new(cli);
    match app.run(&locator).await {
        Ok(Outcome::Completed) | Ok(Outcome::Interrupted) => {
            info!("Application shutdown complete");
        }
        Ok(Outcome::Failed { kind, message }) => {
            error!("Playback failed ({}): {}", kind, message);
            std::process::exit(1);
        }
        Err(e) => {
            report(&e);
            std::process::exit(1);
        }
    }
}

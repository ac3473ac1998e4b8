//! Process-wide, one-time player initialisation.
//!
//! `initialize` must run before the first engine is created; `PlaybackEngine::new`
//! calls it, so hosts only need it when they want to register extra source
//! openers up front. It is idempotent and thread-safe. The registry lives for
//! the rest of the process; there is no global teardown, each engine releases
//! its own resources.

use std::sync::{Arc, OnceLock, RwLock};

use chrono::{DateTime, Utc};
use log::info;

use crate::source::{SourceOpener, SymphoniaOpener, TestPatternOpener};

pub struct Runtime {
    openers: RwLock<Vec<Arc<dyn SourceOpener>>>,
    initialized_at: DateTime<Utc>,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialise the process-wide state on first call; later calls return the same instance
pub fn initialize() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let openers: Vec<Arc<dyn SourceOpener>> =
            vec![Arc::new(TestPatternOpener), Arc::new(SymphoniaOpener)];
        info!(
            "Player runtime initialized with openers: {}",
            openers.iter().map(|o| o.name()).collect::<Vec<_>>().join(", ")
        );
        Runtime {
            openers: RwLock::new(openers),
            initialized_at: Utc::now(),
        }
    })
}

pub fn is_initialized() -> bool {
    RUNTIME.get().is_some()
}

/// Add an opener ahead of the built-in ones
pub fn register_opener(opener: Arc<dyn SourceOpener>) {
    initialize().register(opener);
}

impl Runtime {
    pub fn register(&self, opener: Arc<dyn SourceOpener>) {
        info!("Registering source opener '{}'", opener.name());
        let mut openers = self.openers.write().unwrap_or_else(|e| e.into_inner());
        openers.insert(0, opener);
    }

    /// Snapshot of the registered openers, highest priority first
    pub fn openers(&self) -> Vec<Arc<dyn SourceOpener>> {
        self.openers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn initialized_at(&self) -> DateTime<Utc> {
        self.initialized_at
    }
}

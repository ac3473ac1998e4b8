pub mod channel;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod render;
pub mod runtime;
pub mod source;

#[cfg(test)]
mod integration_tests;

pub use engine::PlaybackEngine;
pub use error::*;
pub use models::*;

//! Demux + decode capability behind a small trait, plus the openers that
//! turn a locator into a concrete source.

pub mod container;
pub mod test_pattern;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::error::DecodeError;
use crate::models::{DecodedFrame, MediaInfo};

pub use self::container::{SymphoniaOpener, SymphoniaSource};
pub use self::test_pattern::{TestPatternOpener, TestPatternSource};

/// Produces decoded, timestamped frames from one media container
pub trait FrameSource: Send {
    fn info(&self) -> &MediaInfo;

    /// Next frame in decode order, `Ok(None)` at end of stream
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, DecodeError>;

    /// Reposition to the nearest keyframe at or before `target`. Returns where decoding resumes.
    fn seek(&mut self, target: Duration) -> Result<Duration, DecodeError>;
}

/// Recognises locators and opens sources for them
pub trait SourceOpener: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_open(&self, locator: &str) -> bool;

    /// Open and probe. Long-running openers should poll `cancel` and bail out with
    /// `DecodeError::Cancelled`.
    fn open(&self, locator: &str, cancel: &AtomicBool) -> Result<Box<dyn FrameSource>, DecodeError>;
}

/// Open `locator` with the first opener that accepts it
pub fn open_with(
    openers: &[Arc<dyn SourceOpener>],
    locator: &str,
    cancel: &AtomicBool,
) -> Result<Box<dyn FrameSource>, DecodeError> {
    let opener = openers
        .iter()
        .find(|opener| opener.can_open(locator))
        .ok_or_else(|| DecodeError::SourceUnreadable {
            locator: locator.to_string(),
            reason: "no source opener accepts this locator".to_string(),
        })?;

    debug!("Opening '{}' with the {} opener", locator, opener.name());
    opener.open(locator, cancel)
}

/// True for `scheme:` style locators (but not Windows drive letters)
pub(crate) fn has_scheme(locator: &str) -> bool {
    match locator.find(':') {
        Some(idx) if idx > 1 => locator[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

//! The capability a platform media writer has to provide.
//!
//! A [`Sink`] owns the output container. The session writer only ever talks
//! to it from its own worker thread, so implementations need to be `Send`
//! but not `Sync`.

use std::{fmt, path::Path};

use crate::{InputSettings, MediaTime, TrackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SinkStatus {
    #[default]
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

impl SinkStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Writing => "writing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Error reported by a sink, shaped after an `NSError`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{domain}/{code}: {message}")]
pub struct SinkError {
    pub domain: String,
    pub code: i64,
    pub message: String,
}

impl SinkError {
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }
}

/// Final state of a sink once `finish_writing` has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishOutcome {
    pub status: SinkStatus,
    pub error: Option<SinkError>,
}

impl FinishOutcome {
    pub fn completed() -> Self {
        Self {
            status: SinkStatus::Completed,
            error: None,
        }
    }

    pub fn failed(error: Option<SinkError>) -> Self {
        Self {
            status: SinkStatus::Failed,
            error,
        }
    }
}

pub type FinishCallback = Box<dyn FnOnce(FinishOutcome) + Send + 'static>;

/// A timestamped media sample accepted by a sink.
pub trait SampleBuffer {
    fn presentation_time(&self) -> MediaTime;
}

pub trait Sink: Send + 'static {
    type Buffer: SampleBuffer + Send + 'static;

    fn output_path(&self) -> &Path;

    fn status(&self) -> SinkStatus;

    fn error(&self) -> Option<SinkError>;

    /// Registers a track. Only called while the sink is [`SinkStatus::Unknown`].
    fn add_input(&mut self, settings: InputSettings, real_time: bool) -> Result<(), SinkError>;

    fn is_ready_for_more_media_data(&self, track: TrackKind) -> bool;

    /// Returns whether the sink transitioned to [`SinkStatus::Writing`].
    fn start_writing(&mut self) -> bool;

    /// Opens the timed session; sample times before `at` are trimmed.
    fn start_session(&mut self, at: MediaTime);

    /// Returns `false` if the sample was not accepted.
    fn append(&mut self, track: TrackKind, buffer: Self::Buffer) -> bool;

    /// Marks every input finished and closes the container. `done` runs
    /// exactly once, on whatever thread the sink completes on.
    fn finish_writing(&mut self, done: FinishCallback);
}

//! A [`Sink`] that keeps everything in memory.
//!
//! Behaves like the platform writer as far as the session writer can
//! observe: inputs are only accepted before writing starts, one input per
//! kind, video is refused for audio-only containers, and finishing settles
//! asynchronously on another thread. A [`MemorySinkHandle`] shares the
//! sink's state so callers can inspect it and toggle readiness or inject
//! failures from outside the writer.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::*;

use crate::{
    FileType, FinishCallback, FinishOutcome, InputSettings, MediaTime, SampleBuffer, Sink,
    SinkError, SinkStatus, TrackKind,
};

const ERROR_DOMAIN: &str = "MemorySink";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySample {
    pub pts: MediaTime,
    pub data: Vec<u8>,
}

impl MemorySample {
    pub fn new(pts: MediaTime, data: impl Into<Vec<u8>>) -> Self {
        Self {
            pts,
            data: data.into(),
        }
    }
}

impl SampleBuffer for MemorySample {
    fn presentation_time(&self) -> MediaTime {
        self.pts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedInput {
    pub settings: InputSettings,
    pub real_time: bool,
    pub ready: bool,
    pub finished: bool,
}

#[derive(Debug, Default)]
pub struct MemorySinkState {
    pub status: SinkStatus,
    pub error: Option<SinkError>,
    pub inputs: Vec<RecordedInput>,
    pub session_start: Option<MediaTime>,
    pub samples: Vec<(TrackKind, MemorySample)>,
    pub finish_requests: usize,
    fail_start: Option<SinkError>,
    fail_finish: Option<SinkError>,
    reject: Option<SinkError>,
    finish_delay: Duration,
}

impl MemorySinkState {
    fn input(&self, track: TrackKind) -> Option<&RecordedInput> {
        self.inputs.iter().find(|i| i.settings.kind() == track)
    }

    fn input_mut(&mut self, track: TrackKind) -> Option<&mut RecordedInput> {
        self.inputs.iter_mut().find(|i| i.settings.kind() == track)
    }

    pub fn samples_for(&self, track: TrackKind) -> Vec<&MemorySample> {
        self.samples
            .iter()
            .filter(|(t, _)| *t == track)
            .map(|(_, s)| s)
            .collect()
    }

    pub fn has_input(&self, track: TrackKind) -> bool {
        self.input(track).is_some()
    }

    pub fn is_input_finished(&self, track: TrackKind) -> bool {
        self.input(track).is_some_and(|i| i.finished)
    }
}

#[derive(Debug, Clone)]
pub struct MemorySinkHandle {
    path: PathBuf,
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySinkHandle {
    pub fn output_path(&self) -> &Path {
        &self.path
    }

    /// Locks the shared state for inspection.
    pub fn state(&self) -> MutexGuard<'_, MemorySinkState> {
        lock(&self.state)
    }

    pub fn set_ready(&self, track: TrackKind, ready: bool) {
        if let Some(input) = self.state().input_mut(track) {
            input.ready = ready;
        }
    }

    /// The next `add_input` is refused with `error`.
    pub fn reject_next_input(&self, error: SinkError) {
        self.state().reject = Some(error);
    }

    pub fn fail_start(&self, error: SinkError) {
        self.state().fail_start = Some(error);
    }

    pub fn fail_finish(&self, error: SinkError) {
        self.state().fail_finish = Some(error);
    }

    /// Holds the completion back, like a container that takes a while to finalize.
    pub fn set_finish_delay(&self, delay: Duration) {
        self.state().finish_delay = delay;
    }

    /// Puts a writing sink into the failed state, as if encoding broke down.
    pub fn fail_now(&self, error: SinkError) {
        let mut state = self.state();
        state.status = SinkStatus::Failed;
        state.error = Some(error);
    }
}

pub struct MemorySink {
    path: PathBuf,
    file_type: FileType,
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new(path: &Path, file_type: FileType) -> (Self, MemorySinkHandle) {
        let state = Arc::new(Mutex::new(MemorySinkState::default()));

        let sink = Self {
            path: path.to_path_buf(),
            file_type,
            state: state.clone(),
        };
        let handle = MemorySinkHandle {
            path: path.to_path_buf(),
            state,
        };

        (sink, handle)
    }

    /// Opener for [`MediaFileWriter`](crate::MediaFileWriter) that hands the
    /// sink's handle back over `handle_tx`.
    pub fn opener(
        handle_tx: flume::Sender<MemorySinkHandle>,
    ) -> impl FnOnce(&Path, FileType) -> Result<Self, SinkError> + Send + 'static {
        move |path: &Path, file_type: FileType| {
            let (sink, handle) = Self::new(path, file_type);
            let _ = handle_tx.send(handle);
            Ok(sink)
        }
    }
}

impl Sink for MemorySink {
    type Buffer = MemorySample;

    fn output_path(&self) -> &Path {
        &self.path
    }

    fn status(&self) -> SinkStatus {
        lock(&self.state).status
    }

    fn error(&self) -> Option<SinkError> {
        lock(&self.state).error.clone()
    }

    fn add_input(&mut self, settings: InputSettings, real_time: bool) -> Result<(), SinkError> {
        let mut state = lock(&self.state);

        if let Some(error) = state.reject.take() {
            return Err(error);
        }

        if state.status != SinkStatus::Unknown {
            return Err(SinkError::new(
                ERROR_DOMAIN,
                -1,
                "inputs can't be added after writing started",
            ));
        }

        if state.has_input(settings.kind()) {
            return Err(SinkError::new(
                ERROR_DOMAIN,
                -2,
                format!("{} input already added", settings.kind()),
            ));
        }

        if settings.kind() == TrackKind::Video && !self.file_type.supports_video() {
            return Err(SinkError::new(
                ERROR_DOMAIN,
                -3,
                format!("{} containers can't hold video", self.file_type),
            ));
        }

        state.inputs.push(RecordedInput {
            settings,
            real_time,
            ready: true,
            finished: false,
        });

        Ok(())
    }

    fn is_ready_for_more_media_data(&self, track: TrackKind) -> bool {
        let state = lock(&self.state);
        state.status == SinkStatus::Writing
            && state.input(track).is_some_and(|i| i.ready && !i.finished)
    }

    fn start_writing(&mut self) -> bool {
        let mut state = lock(&self.state);

        if let Some(error) = state.fail_start.take() {
            state.status = SinkStatus::Failed;
            state.error = Some(error);
            return false;
        }

        state.status = SinkStatus::Writing;
        true
    }

    fn start_session(&mut self, at: MediaTime) {
        lock(&self.state).session_start = Some(at);
    }

    fn append(&mut self, track: TrackKind, buffer: MemorySample) -> bool {
        let mut state = lock(&self.state);

        if state.status != SinkStatus::Writing || state.session_start.is_none() {
            return false;
        }

        state.samples.push((track, buffer));
        true
    }

    fn finish_writing(&mut self, done: FinishCallback) {
        let (delay, failure) = {
            let mut state = lock(&self.state);
            state.finish_requests += 1;
            for input in state.inputs.iter_mut() {
                input.finished = true;
            }
            (state.finish_delay, state.fail_finish.take())
        };

        let state = self.state.clone();
        std::thread::spawn(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            let outcome = {
                let mut state = lock(&state);
                match failure {
                    Some(error) => {
                        state.status = SinkStatus::Failed;
                        state.error = Some(error.clone());
                        FinishOutcome::failed(Some(error))
                    }
                    None => {
                        state.status = SinkStatus::Completed;
                        FinishOutcome::completed()
                    }
                }
            };

            trace!(status = %outcome.status, "Memory sink settled");
            done(outcome);
        });
    }
}

fn lock(state: &Mutex<MemorySinkState>) -> MutexGuard<'_, MemorySinkState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

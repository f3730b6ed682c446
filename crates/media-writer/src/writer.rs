use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::watch;
use tracing::*;

use crate::{
    AudioSettings, FileType, InputSettings, MediaTime, SampleBuffer, Sink, SinkError, SinkStatus,
    TrackKind, VideoSettings, WriterConfig,
};

#[derive(thiserror::Error, Debug)]
pub enum WriterError {
    #[error("SpawnWorker/{0}")]
    SpawnWorker(std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddInputError {
    #[error("NoSink")]
    NoSink,
    #[error("NotIdle/{0}")]
    NotIdle(SinkStatus),
    #[error("Duplicate/{0}")]
    Duplicate(TrackKind),
    #[error("Invalid/{0}")]
    Invalid(&'static str),
    #[error("Rejected/{0}")]
    Rejected(SinkError),
    #[error("WriterClosed")]
    Closed,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("NoSink")]
    NoSink,
    #[error("AlreadyStarted")]
    AlreadyStarted,
    #[error("NotIdle/{0}")]
    NotIdle(SinkStatus),
    #[error("Failed/{0:?}")]
    Failed(Option<SinkError>),
    #[error("WriterClosed")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub video_appended: u64,
    pub video_dropped: u64,
    pub audio_appended: u64,
    pub audio_dropped: u64,
}

impl WriterStats {
    fn record(&mut self, track: TrackKind, appended: bool) {
        let counter = match (track, appended) {
            (TrackKind::Video, true) => &mut self.video_appended,
            (TrackKind::Video, false) => &mut self.video_dropped,
            (TrackKind::Audio, true) => &mut self.audio_appended,
            (TrackKind::Audio, false) => &mut self.audio_dropped,
        };

        *counter += 1;
    }

    pub fn appended(&self, track: TrackKind) -> u64 {
        match track {
            TrackKind::Video => self.video_appended,
            TrackKind::Audio => self.audio_appended,
        }
    }

    pub fn dropped(&self, track: TrackKind) -> u64 {
        match track {
            TrackKind::Video => self.video_dropped,
            TrackKind::Audio => self.audio_dropped,
        }
    }
}

/// State of a session as last reported by its sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterSnapshot {
    pub status: SinkStatus,
    pub error: Option<SinkError>,
    pub session_start: Option<MediaTime>,
    pub stats: WriterStats,
}

type CompletionHandler = Box<dyn FnOnce(Option<PathBuf>) + Send + 'static>;

enum Command<S: Sink> {
    AddInput(InputSettings, flume::Sender<Result<(), AddInputError>>),
    Start(flume::Sender<Result<(), StartError>>),
    Append(TrackKind, S::Buffer),
    Finish(CompletionHandler),
    Flush(flume::Sender<()>),
}

/// Records one media file through a [`Sink`].
///
/// Every operation runs on a dedicated worker thread in submission order.
/// Control calls (`add_*_input`, `start`) wait for their result; `append`
/// and `finish` only enqueue.
pub struct MediaFileWriter<S: Sink> {
    commands: flume::Sender<Command<S>>,
    state: Arc<watch::Sender<WriterSnapshot>>,
    output_path: PathBuf,
    file_type: FileType,
    expects_media_data_in_real_time: bool,
}

impl<S: Sink> MediaFileWriter<S> {
    /// Opens a session at a timestamp-named path inside `config.output_dir`.
    ///
    /// If `open` fails the writer still exists but has no sink: every
    /// control call fails and [`last_error`](Self::last_error) reports why.
    pub fn new<F>(config: &WriterConfig, open: F) -> Result<Self, WriterError>
    where
        F: FnOnce(&Path, FileType) -> Result<S, SinkError> + Send + 'static,
    {
        Self::with_output_path(
            config.output_path(),
            config.file_type,
            config.expects_media_data_in_real_time,
            open,
        )
    }

    pub fn with_output_path<F>(
        output_path: PathBuf,
        file_type: FileType,
        expects_media_data_in_real_time: bool,
        open: F,
    ) -> Result<Self, WriterError>
    where
        F: FnOnce(&Path, FileType) -> Result<S, SinkError> + Send + 'static,
    {
        let (commands, command_rx) = flume::unbounded();
        let (ready_tx, ready_rx) = flume::bounded(1);
        let state = Arc::new(watch::Sender::new(WriterSnapshot::default()));

        let worker_state = state.clone();
        let worker_path = output_path.clone();

        std::thread::Builder::new()
            .name("media-file-writer".to_string())
            .spawn(move || {
                let worker = Worker::open(
                    &worker_path,
                    file_type,
                    expects_media_data_in_real_time,
                    open,
                    worker_state,
                );
                worker.publish();
                let _ = ready_tx.send(());

                worker.run(command_rx);
            })
            .map_err(WriterError::SpawnWorker)?;

        let _ = ready_rx.recv();

        Ok(Self {
            commands,
            state,
            output_path,
            file_type,
            expects_media_data_in_real_time,
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn expects_media_data_in_real_time(&self) -> bool {
        self.expects_media_data_in_real_time
    }

    pub fn try_add_video_input(&self, settings: VideoSettings) -> Result<(), AddInputError> {
        self.try_add_input(settings.into())
    }

    pub fn try_add_audio_input(&self, settings: AudioSettings) -> Result<(), AddInputError> {
        self.try_add_input(settings.into())
    }

    fn try_add_input(&self, settings: InputSettings) -> Result<(), AddInputError> {
        self.request(|reply| Command::AddInput(settings, reply))
            .unwrap_or(Err(AddInputError::Closed))
    }

    pub fn add_video_input(&self, settings: VideoSettings) -> bool {
        self.try_add_video_input(settings).is_ok()
    }

    pub fn add_audio_input(&self, settings: AudioSettings) -> bool {
        self.try_add_audio_input(settings).is_ok()
    }

    /// H.264 at 480x640.
    pub fn add_default_video_input(&self) -> bool {
        self.add_video_input(VideoSettings::default())
    }

    /// AAC, mono, 44.1 kHz.
    pub fn add_default_audio_input(&self) -> bool {
        self.add_audio_input(AudioSettings::default())
    }

    pub fn try_start(&self) -> Result<(), StartError> {
        self.request(Command::Start).unwrap_or(Err(StartError::Closed))
    }

    pub fn start(&self) -> bool {
        self.try_start().is_ok()
    }

    /// Queues a sample for `track`. Samples arriving while the track's input
    /// is not ready are dropped.
    pub fn append(&self, buffer: S::Buffer, track: TrackKind) {
        let _ = self.commands.send(Command::Append(track, buffer));
    }

    pub fn append_video(&self, buffer: S::Buffer) {
        self.append(buffer, TrackKind::Video);
    }

    pub fn append_audio(&self, buffer: S::Buffer) {
        self.append(buffer, TrackKind::Audio);
    }

    /// Closes the file. `on_complete` receives the output path once the sink
    /// settles, whether it completed or failed; check [`status`](Self::status)
    /// and [`last_error`](Self::last_error) for the outcome. It is never
    /// called if the session was not writing when the request ran, or if a
    /// finish is already in flight.
    pub fn finish(&self, on_complete: impl FnOnce(Option<PathBuf>) + Send + 'static) {
        let _ = self.commands.send(Command::Finish(Box::new(on_complete)));
    }

    /// Waits until everything submitted so far has run.
    pub fn flush(&self) {
        self.request(Command::Flush);
    }

    pub fn status(&self) -> SinkStatus {
        self.state.borrow().status
    }

    pub fn last_error(&self) -> Option<SinkError> {
        self.state.borrow().error.clone()
    }

    pub fn session_start(&self) -> Option<MediaTime> {
        self.state.borrow().session_start
    }

    pub fn stats(&self) -> WriterStats {
        self.state.borrow().stats
    }

    pub fn snapshot(&self) -> WriterSnapshot {
        self.state.borrow().clone()
    }

    /// Notified whenever status, error or session anchor change.
    pub fn subscribe(&self) -> watch::Receiver<WriterSnapshot> {
        self.state.subscribe()
    }

    /// Resolves once the sink reaches a terminal status.
    pub async fn settled(&self) -> WriterSnapshot {
        let mut rx = self.state.subscribe();

        match rx.wait_for(|s| s.status.is_terminal()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    fn request<T>(&self, command: impl FnOnce(flume::Sender<T>) -> Command<S>) -> Option<T> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.commands.send(command(reply_tx)).ok()?;
        reply_rx.recv().ok()
    }
}

struct Worker<S: Sink> {
    sink: Option<S>,
    open_error: Option<SinkError>,
    real_time: bool,
    video: Option<VideoSettings>,
    audio: Option<AudioSettings>,
    session_start: Option<MediaTime>,
    finishing: bool,
    stats: WriterStats,
    state: Arc<watch::Sender<WriterSnapshot>>,
}

impl<S: Sink> Worker<S> {
    fn open<F>(
        path: &Path,
        file_type: FileType,
        real_time: bool,
        open: F,
        state: Arc<watch::Sender<WriterSnapshot>>,
    ) -> Self
    where
        F: FnOnce(&Path, FileType) -> Result<S, SinkError>,
    {
        if let Some(parent) = path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(dir = %parent.display(), "Failed to create output directory: {e}");
        }

        let (sink, open_error) = match open(path, file_type) {
            Ok(sink) => {
                info!(path = %path.display(), %file_type, real_time, "Opened media file writer");
                (Some(sink), None)
            }
            Err(e) => {
                error!(path = %path.display(), %file_type, "Failed to create media sink: {e}");
                (None, Some(e))
            }
        };

        Self {
            sink,
            open_error,
            real_time,
            video: None,
            audio: None,
            session_start: None,
            finishing: false,
            stats: WriterStats::default(),
            state,
        }
    }

    fn run(mut self, commands: flume::Receiver<Command<S>>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::AddInput(settings, reply) => {
                    let result = self.add_input(settings);
                    self.publish();
                    let _ = reply.send(result);
                }
                Command::Start(reply) => {
                    let result = self.start();
                    self.publish();
                    let _ = reply.send(result);
                }
                Command::Append(track, buffer) => {
                    self.append(track, buffer);
                    self.publish();
                }
                Command::Finish(on_complete) => {
                    self.finish(on_complete);
                    self.publish();
                }
                Command::Flush(reply) => {
                    let _ = reply.send(());
                }
            }
        }

        if !self.finishing
            && let Some(sink) = &self.sink
            && sink.status() == SinkStatus::Writing
        {
            warn!(
                path = %sink.output_path().display(),
                "Media file writer dropped while writing, output is incomplete"
            );
        }

        trace!("Media file writer queue closed");
    }

    fn add_input(&mut self, settings: InputSettings) -> Result<(), AddInputError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(AddInputError::NoSink);
        };

        let status = sink.status();
        if status != SinkStatus::Unknown {
            debug!(%status, track = %settings.kind(), "Input rejected, writer not idle");
            return Err(AddInputError::NotIdle(status));
        }

        let occupied = match settings.kind() {
            TrackKind::Video => self.video.is_some(),
            TrackKind::Audio => self.audio.is_some(),
        };
        if occupied {
            return Err(AddInputError::Duplicate(settings.kind()));
        }

        settings.validate().map_err(AddInputError::Invalid)?;

        sink.add_input(settings, self.real_time).map_err(|e| {
            warn!(track = %settings.kind(), "Sink rejected input: {e}");
            AddInputError::Rejected(e)
        })?;

        match settings {
            InputSettings::Video(video) => {
                info!(
                    codec = ?video.codec,
                    width = video.width,
                    height = video.height,
                    bit_rate = video.average_bit_rate,
                    "Added video input"
                );
                self.video = Some(video);
            }
            InputSettings::Audio(audio) => {
                info!(
                    format = ?audio.format,
                    channels = audio.channels,
                    sample_rate = audio.sample_rate,
                    bit_rate = audio.bit_rate,
                    "Added audio input"
                );
                self.audio = Some(audio);
            }
        }

        Ok(())
    }

    fn start(&mut self) -> Result<(), StartError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(StartError::NoSink);
        };

        match sink.status() {
            SinkStatus::Unknown => {}
            SinkStatus::Writing => return Err(StartError::AlreadyStarted),
            status => return Err(StartError::NotIdle(status)),
        }

        if !sink.start_writing() {
            let error = sink.error();
            error!("Failed to start writing: {error:?}");
            return Err(StartError::Failed(error));
        }

        info!(
            has_video = self.video.is_some(),
            has_audio = self.audio.is_some(),
            "Started writing"
        );

        Ok(())
    }

    fn append(&mut self, track: TrackKind, buffer: S::Buffer) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let has_input = match track {
            TrackKind::Video => self.video.is_some(),
            TrackKind::Audio => self.audio.is_some(),
        };

        if !has_input || self.finishing || sink.status() != SinkStatus::Writing {
            return;
        }

        if !sink.is_ready_for_more_media_data(track) {
            trace!(%track, "Input not ready for more media data, dropping sample");
            self.stats.record(track, false);
            return;
        }

        if self.session_start.is_none() {
            let pts = buffer.presentation_time();
            if !pts.is_valid() {
                warn!(%track, "Sample without a valid timestamp can't start the session");
                self.stats.record(track, false);
                return;
            }

            debug!(%track, %pts, "Starting session at source time");
            sink.start_session(pts);
            self.session_start = Some(pts);
        }

        let appended = sink.append(track, buffer);
        if !appended {
            debug!(%track, status = %sink.status(), "Sink did not accept sample");
        }

        self.stats.record(track, appended);
    }

    fn finish(&mut self, on_complete: CompletionHandler) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        if self.finishing || sink.status() != SinkStatus::Writing {
            debug!(status = %sink.status(), "Finish ignored, writer not writing");
            return;
        }

        self.finishing = true;

        debug!("Appended {} video samples", self.stats.video_appended);
        debug!("Appended {} audio samples", self.stats.audio_appended);
        if self.stats.video_dropped + self.stats.audio_dropped > 0 {
            debug!(
                video = self.stats.video_dropped,
                audio = self.stats.audio_dropped,
                "Dropped samples while inputs were busy"
            );
        }

        let output = sink.output_path().to_path_buf();
        let state = self.state.clone();

        sink.finish_writing(Box::new(move |outcome| {
            match outcome.status {
                SinkStatus::Completed => info!(path = %output.display(), "Finished writing"),
                status => error!(%status, "Finishing failed: {:?}", outcome.error),
            }

            state.send_modify(|snapshot| {
                snapshot.status = outcome.status;
                if let Some(error) = outcome.error.clone() {
                    snapshot.error = Some(error);
                }
            });

            on_complete(Some(output));
        }));
    }

    fn publish(&self) {
        let status = self
            .sink
            .as_ref()
            .map(Sink::status)
            .unwrap_or_default();
        let error = self
            .sink
            .as_ref()
            .and_then(Sink::error)
            .or_else(|| self.open_error.clone());

        self.state.send_if_modified(|snapshot| {
            let mut changed = false;

            // the completion callback may already have published a final status
            if snapshot.status != status && !snapshot.status.is_terminal() {
                snapshot.status = status;
                changed = true;
            }

            if let Some(error) = error
                && snapshot.error.as_ref() != Some(&error)
            {
                snapshot.error = Some(error);
                changed = true;
            }

            if snapshot.session_start != self.session_start {
                snapshot.session_start = self.session_start;
                changed = true;
            }

            snapshot.stats = self.stats;

            changed
        });
    }
}

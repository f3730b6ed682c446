use cidre::{objc::Obj, *};
use livestream_media_writer::{
    AudioFormat, AudioSettings, FileType, FinishCallback, FinishOutcome, InputSettings,
    MediaFileWriter, MediaTime, SampleBuffer, Sink, SinkError, SinkStatus, TrackKind,
    VideoCodec, VideoSettings, WriterConfig, WriterError,
};
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::*;

const ERROR_DOMAIN: &str = "AVAssetWriter";

const WRITER_FINISH_TIMEOUT: Duration = Duration::from_secs(10);
const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(10);
const WRITER_LOG_INTERVAL: Duration = Duration::from_secs(2);

pub type AssetFileWriter = MediaFileWriter<AssetWriterSink>;

/// Opens a session recording through `AVAssetWriter`.
pub fn open_writer(config: &WriterConfig) -> Result<AssetFileWriter, WriterError> {
    MediaFileWriter::new(config, AssetWriterSink::open)
}

/// A CoreMedia sample on its way to an asset writer input.
pub struct SampleBuf(pub arc::R<cm::SampleBuf>);

unsafe impl Send for SampleBuf {}

impl SampleBuffer for SampleBuf {
    fn presentation_time(&self) -> MediaTime {
        media_time(self.0.pts())
    }
}

impl From<arc::R<cm::SampleBuf>> for SampleBuf {
    fn from(value: arc::R<cm::SampleBuf>) -> Self {
        Self(value)
    }
}

pub struct AssetWriterSink {
    path: PathBuf,
    asset_writer: arc::R<av::AssetWriter>,
    video_input: Option<arc::R<av::AssetWriterInput>>,
    audio_input: Option<arc::R<av::AssetWriterInput>>,
}

unsafe impl Send for AssetWriterSink {}

impl AssetWriterSink {
    pub fn open(path: &Path, file_type: FileType) -> Result<Self, SinkError> {
        let url = cf::Url::with_path(path, false).ok_or_else(|| {
            SinkError::new(
                ERROR_DOMAIN,
                -1,
                format!("invalid output path {}", path.display()),
            )
        })?;

        let asset_writer = av::AssetWriter::with_url_and_file_type(
            url.as_ns(),
            av_file_type(file_type),
        )
        .map_err(sink_error)?;

        debug!(path = %path.display(), %file_type, "Created AVAssetWriter");

        Ok(Self {
            path: path.to_path_buf(),
            asset_writer,
            video_input: None,
            audio_input: None,
        })
    }
}

impl Sink for AssetWriterSink {
    type Buffer = SampleBuf;

    fn output_path(&self) -> &Path {
        &self.path
    }

    fn status(&self) -> SinkStatus {
        sink_status(self.asset_writer.status())
    }

    fn error(&self) -> Option<SinkError> {
        self.asset_writer.error().map(|e| sink_error(&e))
    }

    fn add_input(&mut self, settings: InputSettings, real_time: bool) -> Result<(), SinkError> {
        let slot = match settings.kind() {
            TrackKind::Video => &mut self.video_input,
            TrackKind::Audio => &mut self.audio_input,
        };

        if slot.is_some() {
            return Err(SinkError::new(
                ERROR_DOMAIN,
                -2,
                format!("{} input already added", settings.kind()),
            ));
        }

        let input = match &settings {
            InputSettings::Video(video) => {
                let output_settings = video_output_settings(video);
                av::AssetWriterInput::with_media_type_and_output_settings(
                    av::MediaType::video(),
                    Some(output_settings.as_ref()),
                )
            }
            InputSettings::Audio(audio) => {
                let output_settings = audio_output_settings(audio);
                av::AssetWriterInput::with_media_type_and_output_settings(
                    av::MediaType::audio(),
                    Some(output_settings.as_ref()),
                )
            }
        };

        let mut input = input.map_err(|e| SinkError::new(ERROR_DOMAIN, -3, e.to_string()))?;
        input.set_expects_media_data_in_real_time(real_time);

        self.asset_writer
            .add_input(&input)
            .map_err(|e| SinkError::new(ERROR_DOMAIN, -4, e.to_string()))?;

        *slot = Some(input);

        Ok(())
    }

    fn is_ready_for_more_media_data(&self, track: TrackKind) -> bool {
        let input = match track {
            TrackKind::Video => self.video_input.as_ref(),
            TrackKind::Audio => self.audio_input.as_ref(),
        };

        input.is_some_and(|i| i.is_ready_for_more_media_data())
    }

    fn start_writing(&mut self) -> bool {
        self.asset_writer.start_writing();

        self.asset_writer.status() == av::asset::writer::Status::Writing
    }

    fn start_session(&mut self, at: MediaTime) {
        self.asset_writer.start_session_at_src_time(cm_time(at));
    }

    fn append(&mut self, track: TrackKind, buffer: SampleBuf) -> bool {
        let input = match track {
            TrackKind::Video => self.video_input.as_mut(),
            TrackKind::Audio => self.audio_input.as_mut(),
        };

        let Some(input) = input else {
            return false;
        };

        match input.append_sample_buf(&buffer.0) {
            Ok(true) => true,
            Ok(false) => {
                if self.asset_writer.status() == av::asset::writer::Status::Failed {
                    warn!(%track, "Writer failed while appending: {:?}", self.error());
                }
                false
            }
            Err(e) => {
                warn!(%track, "Append raised: {e}");
                false
            }
        }
    }

    fn finish_writing(&mut self, done: FinishCallback) {
        if let Some(input) = self.video_input.as_mut() {
            input.mark_as_finished();
        }
        if let Some(input) = self.audio_input.as_mut() {
            input.mark_as_finished();
        }

        self.asset_writer.finish_writing();

        let writer = SendWriter(self.asset_writer.clone());
        std::thread::spawn(move || {
            let writer = writer;
            done(wait_for_writer_finished(&writer.0));
        });
    }
}

struct SendWriter(arc::R<av::AssetWriter>);

unsafe impl Send for SendWriter {}

fn wait_for_writer_finished(writer: &av::AssetWriter) -> FinishOutcome {
    use av::asset::writer::Status;

    let start = Instant::now();
    let mut last_log = start;

    loop {
        let elapsed = start.elapsed();

        match writer.status() {
            Status::Completed => {
                if elapsed > Duration::from_millis(100) {
                    info!("Writer finished after {:?}", elapsed);
                }
                return FinishOutcome::completed();
            }
            Status::Cancelled => {
                return FinishOutcome {
                    status: SinkStatus::Cancelled,
                    error: None,
                };
            }
            Status::Failed | Status::Unknown => {
                let error = writer.error().map(|e| sink_error(&e));
                error!("Writer failed with error: {:?}", error);
                return FinishOutcome::failed(error);
            }
            Status::Writing => {
                if elapsed >= WRITER_FINISH_TIMEOUT {
                    error!(
                        "Writer timeout after {:?} - still in Writing state",
                        elapsed
                    );
                    return FinishOutcome::failed(Some(SinkError::new(
                        ERROR_DOMAIN,
                        -5,
                        "timed out finishing",
                    )));
                }

                if last_log.elapsed() >= WRITER_LOG_INTERVAL {
                    warn!("Writer still finalizing after {:?}...", elapsed);
                    last_log = Instant::now();
                }

                std::thread::sleep(WRITER_POLL_INTERVAL);
            }
        }
    }
}

fn av_file_type(file_type: FileType) -> &'static av::FileType {
    match file_type {
        FileType::Mp4 => av::FileType::mp4(),
        FileType::M4v => av::FileType::m4v(),
        FileType::M4a => av::FileType::m4a(),
    }
}

fn sink_status(status: av::asset::writer::Status) -> SinkStatus {
    use av::asset::writer::Status;

    match status {
        Status::Unknown => SinkStatus::Unknown,
        Status::Writing => SinkStatus::Writing,
        Status::Completed => SinkStatus::Completed,
        Status::Failed => SinkStatus::Failed,
        Status::Cancelled => SinkStatus::Cancelled,
    }
}

fn sink_error(error: &ns::Error) -> SinkError {
    SinkError::new(ERROR_DOMAIN, error.code() as i64, error.to_string())
}

pub fn cm_time(time: MediaTime) -> cm::Time {
    if !time.is_valid() {
        return cm::Time::invalid();
    }

    cm::Time::new(time.value, time.scale)
}

pub fn media_time(time: cm::Time) -> MediaTime {
    if !time.is_valid() {
        return MediaTime::invalid();
    }

    MediaTime::new(time.value, time.scale)
}

fn codec_type(codec: VideoCodec) -> &'static ns::String {
    unsafe {
        match codec {
            VideoCodec::H264 => AVVideoCodecTypeH264,
            VideoCodec::Hevc => AVVideoCodecTypeHEVC,
            VideoCodec::Jpeg => AVVideoCodecTypeJPEG,
        }
    }
}

fn video_output_settings(settings: &VideoSettings) -> arc::R<ns::Dictionary<ns::String, ns::Id>> {
    let width = ns::Number::with_u32(settings.width);
    let height = ns::Number::with_u32(settings.height);
    let bit_rate = ns::Number::with_u32(settings.average_bit_rate);

    let compression_props = ns::Dictionary::with_keys_values(
        &[unsafe { AVVideoAverageBitRateKey }],
        &[bit_rate.as_id_ref()],
    );

    ns::Dictionary::with_keys_values(
        &[
            unsafe { AVVideoCodecKey },
            av::video_settings_keys::width(),
            av::video_settings_keys::height(),
            av::video_settings_keys::compression_props(),
        ],
        &[
            codec_type(settings.codec).as_id_ref(),
            width.as_id_ref(),
            height.as_id_ref(),
            compression_props.as_id_ref(),
        ],
    )
}

fn audio_format(format: AudioFormat) -> cat::AudioFormat {
    match format {
        AudioFormat::Mpeg4Aac => cat::AudioFormat::MPEG4_AAC,
        AudioFormat::LinearPcm => cat::AudioFormat::LINEAR_PCM,
        AudioFormat::AppleLossless => cat::AudioFormat::APPLE_LOSSLESS,
    }
}

fn audio_output_settings(settings: &AudioSettings) -> arc::R<ns::Dictionary<ns::String, ns::Number>> {
    let format = audio_format(settings.format);
    let channels = settings.channels as u32;
    let bit_rate = ns::Number::with_u32(settings.bit_rate);
    let bit_depth = ns::Number::with_u32(16);
    let no = ns::Number::with_bool(false);

    let mut keys = vec![
        av::audio::all_formats_keys::id(),
        av::audio::all_formats_keys::number_of_channels(),
        av::audio::all_formats_keys::sample_rate(),
    ];
    let mut values: Vec<&ns::Number> = vec![
        format.as_ref(),
        channels.as_ref(),
        settings.sample_rate.as_ref(),
    ];

    match settings.format {
        AudioFormat::LinearPcm => {
            keys.extend([
                unsafe { AVLinearPCMBitDepthKey },
                unsafe { AVLinearPCMIsFloatKey },
                unsafe { AVLinearPCMIsBigEndianKey },
                unsafe { AVLinearPCMIsNonInterleaved },
            ]);
            values.extend([&*bit_depth, &*no, &*no, &*no]);
        }
        AudioFormat::Mpeg4Aac => {
            keys.push(av::audio::settings::encoder_propery_keys::bit_rate());
            values.push(&*bit_rate);
        }
        AudioFormat::AppleLossless => {}
    }

    ns::Dictionary::with_keys_values(&keys, &values)
}

#[link(name = "AVFoundation", kind = "framework")]
unsafe extern "C" {
    static AVVideoCodecKey: &'static ns::String;
    static AVVideoAverageBitRateKey: &'static ns::String;

    static AVVideoCodecTypeH264: &'static ns::String;
    static AVVideoCodecTypeHEVC: &'static ns::String;
    static AVVideoCodecTypeJPEG: &'static ns::String;

    static AVLinearPCMBitDepthKey: &'static ns::String;
    static AVLinearPCMIsFloatKey: &'static ns::String;
    static AVLinearPCMIsBigEndianKey: &'static ns::String;
    static AVLinearPCMIsNonInterleaved: &'static ns::String;
}

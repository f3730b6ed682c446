use livestream_media_writer::{
    AddInputError, AudioFormat, AudioSettings, FileType, InputSettings, MediaFileWriter,
    MediaTime, SinkError, SinkStatus, StartError, TrackKind, VideoCodec, VideoSettings,
    WriterConfig,
    memory::{MemorySample, MemorySink, MemorySinkHandle},
};
use std::{path::PathBuf, time::Duration};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

mod test_utils {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init_tracing() {
        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::DEBUG.into()),
                )
                .with_test_writer()
                .try_init()
                .ok();
        });
    }
}

fn open_session(
    config: WriterConfig,
) -> (tempfile::TempDir, MediaFileWriter<MemorySink>, MemorySinkHandle) {
    test_utils::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let config = config.with_output_dir(dir.path());

    let (handle_tx, handle_rx) = flume::bounded(1);
    let writer = MediaFileWriter::new(&config, MemorySink::opener(handle_tx)).unwrap();
    let handle = handle_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap();

    (dir, writer, handle)
}

fn sample(value: i64, scale: i32) -> MemorySample {
    MemorySample::new(MediaTime::new(value, scale), vec![0u8; 16])
}

fn completion_channel() -> (
    impl FnOnce(Option<PathBuf>) + Send + 'static,
    flume::Receiver<Option<PathBuf>>,
) {
    let (tx, rx) = flume::unbounded();
    (
        move |url| {
            tx.send(url).unwrap();
        },
        rx,
    )
}

#[test]
fn records_camera_session_end_to_end() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_video_input(VideoSettings::new(VideoCodec::H264, 480, 640)));
    assert!(writer.add_audio_input(AudioSettings::new(AudioFormat::Mpeg4Aac, 1, 44_100)));
    assert!(writer.start());
    assert_eq!(writer.status(), SinkStatus::Writing);

    for i in 0..3 {
        writer.append_video(sample(600 + i * 20, 600));
    }
    for i in 0..2 {
        writer.append_audio(sample(44_100 + i * 1_024, 44_100));
    }

    let (on_complete, completed) = completion_channel();
    writer.finish(on_complete);

    let url = completed.recv_timeout(CALLBACK_TIMEOUT).unwrap();
    assert_eq!(url.as_deref(), Some(writer.output_path()));
    assert!(completed.recv_timeout(QUIET_PERIOD).is_err());

    assert_eq!(writer.status(), SinkStatus::Completed);
    assert_eq!(writer.last_error(), None);

    let state = handle.state();
    assert_eq!(state.samples_for(TrackKind::Video).len(), 3);
    assert_eq!(state.samples_for(TrackKind::Audio).len(), 2);
    assert!(state.is_input_finished(TrackKind::Video));
    assert!(state.is_input_finished(TrackKind::Audio));
    assert_eq!(state.session_start, Some(MediaTime::new(600, 600)));

    let stats = writer.stats();
    assert_eq!(stats.appended(TrackKind::Video), 3);
    assert_eq!(stats.appended(TrackKind::Audio), 2);
}

#[test]
fn names_output_after_container() {
    let (dir, writer, handle) = open_session(WriterConfig::new(FileType::M4v));

    assert_eq!(writer.file_type(), FileType::M4v);
    assert_eq!(writer.output_path().parent(), Some(dir.path()));
    assert_eq!(
        writer.output_path().extension().and_then(|e| e.to_str()),
        Some("m4v")
    );
    assert_eq!(handle.output_path(), writer.output_path());
}

#[test]
fn input_settings_reach_the_sink() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    let video = VideoSettings::new(VideoCodec::Hevc, 1920, 1080).with_bit_rate(8_000_000);
    let audio = AudioSettings::new(AudioFormat::AppleLossless, 2, 48_000).with_bit_rate(128_000);

    assert!(writer.add_video_input(video));
    assert!(writer.add_audio_input(audio));

    let state = handle.state();
    assert_eq!(state.inputs.len(), 2);
    assert_eq!(state.inputs[0].settings, InputSettings::Video(video));
    assert_eq!(state.inputs[1].settings, InputSettings::Audio(audio));
    assert!(state.inputs.iter().all(|i| i.real_time));
}

#[test]
fn inputs_only_while_idle() {
    let (_dir, writer, _handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert!(writer.start());

    assert!(!writer.add_default_audio_input());
    assert_eq!(
        writer.try_add_audio_input(AudioSettings::default()),
        Err(AddInputError::NotIdle(SinkStatus::Writing))
    );
    assert_eq!(
        writer.try_add_video_input(VideoSettings::default()),
        Err(AddInputError::NotIdle(SinkStatus::Writing))
    );
}

#[test]
fn rejects_second_input_of_a_kind() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert_eq!(
        writer.try_add_video_input(VideoSettings::new(VideoCodec::Hevc, 1920, 1080)),
        Err(AddInputError::Duplicate(TrackKind::Video))
    );
    assert_eq!(handle.state().inputs.len(), 1);
}

#[test]
fn rejects_unusable_settings() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(matches!(
        writer.try_add_audio_input(AudioSettings::new(AudioFormat::LinearPcm, 0, 48_000)),
        Err(AddInputError::Invalid(_))
    ));

    handle.reject_next_input(SinkError::new("AVFoundationErrorDomain", -11861, "unsupported"));
    assert!(matches!(
        writer.try_add_video_input(VideoSettings::default()),
        Err(AddInputError::Rejected(_))
    ));

    // a refused input doesn't occupy the slot
    assert!(writer.add_default_video_input());
}

#[test]
fn audio_container_refuses_video() {
    let (_dir, writer, _handle) = open_session(WriterConfig::new(FileType::M4a));

    assert!(!writer.add_default_video_input());
    assert!(writer.add_default_audio_input());
}

#[test]
fn passes_real_time_flag_to_inputs() {
    let (_dir, writer, handle) =
        open_session(WriterConfig::new(FileType::Mp4).with_real_time(false));

    assert!(!writer.expects_media_data_in_real_time());
    assert!(writer.add_default_audio_input());
    assert!(!handle.state().inputs[0].real_time);
}

#[test]
fn start_only_once() {
    let (_dir, writer, _handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert!(writer.start());
    assert!(!writer.start());
    assert_eq!(writer.try_start(), Err(StartError::AlreadyStarted));
}

#[test]
fn start_failure_is_mirrored() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));
    let error = SinkError::new("AVFoundationErrorDomain", -11800, "unknown error");

    assert!(writer.add_default_video_input());
    handle.fail_start(error.clone());

    assert_eq!(writer.try_start(), Err(StartError::Failed(Some(error.clone()))));
    assert_eq!(writer.status(), SinkStatus::Failed);
    assert_eq!(writer.last_error(), Some(error));
    assert!(!writer.start());
}

#[test]
fn missing_sink_fails_every_control_call() {
    test_utils::init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let config = WriterConfig::new(FileType::Mp4).with_output_dir(dir.path());
    let writer = MediaFileWriter::<MemorySink>::new(&config, |_, _| {
        Err(SinkError::new("NSCocoaErrorDomain", 516, "file exists"))
    })
    .unwrap();

    assert_eq!(writer.status(), SinkStatus::Unknown);
    assert_eq!(writer.last_error().map(|e| e.code), Some(516));

    assert!(!writer.add_default_video_input());
    assert_eq!(writer.try_start(), Err(StartError::NoSink));
    assert!(!writer.start());

    writer.append_video(sample(0, 30));
    let (on_complete, completed) = completion_channel();
    writer.finish(on_complete);
    writer.flush();

    assert!(completed.recv_timeout(QUIET_PERIOD).is_err());
    assert_eq!(writer.session_start(), None);
}

#[test]
fn first_accepted_sample_anchors_session() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert!(writer.add_default_audio_input());
    assert!(writer.start());

    writer.append_audio(sample(88_200, 44_100));
    writer.append_video(sample(1, 1));
    writer.append_video(sample(3, 1));
    writer.flush();

    let anchor = MediaTime::new(88_200, 44_100);
    assert_eq!(writer.session_start(), Some(anchor));
    assert_eq!(handle.state().session_start, Some(anchor));
    assert_eq!(handle.state().samples.len(), 3);
}

#[test]
fn concurrent_producers_keep_their_order() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert!(writer.add_default_audio_input());
    assert!(writer.start());

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 0..200 {
                writer.append_video(sample(i, 600));
            }
        });
        s.spawn(|| {
            for i in 0..200 {
                writer.append_audio(sample(i * 1_024, 44_100));
            }
        });
    });
    writer.flush();

    let state = handle.state();
    let video: Vec<i64> = state
        .samples_for(TrackKind::Video)
        .iter()
        .map(|s| s.pts.value)
        .collect();
    let audio: Vec<i64> = state
        .samples_for(TrackKind::Audio)
        .iter()
        .map(|s| s.pts.value)
        .collect();

    assert_eq!(video, (0..200).collect::<Vec<_>>());
    assert_eq!(audio, (0..200).map(|i| i * 1_024).collect::<Vec<_>>());
    assert_eq!(writer.stats().appended(TrackKind::Video), 200);
    assert_eq!(writer.stats().appended(TrackKind::Audio), 200);
}

#[test]
fn busy_input_drops_samples() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert!(writer.add_default_audio_input());
    assert!(writer.start());

    handle.set_ready(TrackKind::Video, false);
    writer.append_video(sample(10, 30));
    writer.flush();

    {
        let state = handle.state();
        assert!(state.samples.is_empty());
        assert_eq!(state.session_start, None);
    }
    assert_eq!(writer.session_start(), None);
    assert_eq!(writer.stats().dropped(TrackKind::Video), 1);

    writer.append_audio(sample(22_050, 44_100));
    handle.set_ready(TrackKind::Video, true);
    writer.append_video(sample(11, 30));
    writer.flush();

    assert_eq!(writer.session_start(), Some(MediaTime::new(1, 2)));
    assert_eq!(handle.state().samples_for(TrackKind::Video).len(), 1);
    assert_eq!(writer.stats().appended(TrackKind::Video), 1);
}

#[test]
fn ignores_tracks_never_added() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert!(writer.start());

    writer.append_audio(sample(0, 44_100));
    writer.flush();

    assert!(handle.state().samples.is_empty());
    assert_eq!(writer.session_start(), None);
    assert_eq!(writer.stats(), Default::default());
}

#[test]
fn ignores_samples_before_start() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    writer.append_video(sample(0, 30));
    writer.flush();

    assert!(handle.state().samples.is_empty());
    assert_eq!(writer.session_start(), None);
}

#[test]
fn finish_before_start_is_ignored() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_audio_input());

    let (on_complete, completed) = completion_channel();
    writer.finish(on_complete);
    writer.flush();

    assert!(completed.recv_timeout(QUIET_PERIOD).is_err());
    assert_eq!(handle.state().finish_requests, 0);
    assert_eq!(writer.status(), SinkStatus::Unknown);
}

#[test]
fn second_finish_is_ignored() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert!(writer.start());
    writer.append_video(sample(0, 30));

    handle.set_finish_delay(Duration::from_millis(100));

    let (first, first_rx) = completion_channel();
    let (second, second_rx) = completion_channel();
    writer.finish(first);
    writer.finish(second);

    assert!(first_rx.recv_timeout(CALLBACK_TIMEOUT).unwrap().is_some());
    assert!(second_rx.recv_timeout(QUIET_PERIOD).is_err());
    assert_eq!(handle.state().finish_requests, 1);

    let (third, third_rx) = completion_channel();
    writer.finish(third);
    writer.flush();
    assert!(third_rx.recv_timeout(QUIET_PERIOD).is_err());
    assert_eq!(writer.status(), SinkStatus::Completed);
}

#[test]
fn samples_after_finish_are_ignored() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));

    assert!(writer.add_default_video_input());
    assert!(writer.start());
    writer.append_video(sample(0, 30));

    handle.set_finish_delay(Duration::from_millis(100));
    let (on_complete, completed) = completion_channel();
    writer.finish(on_complete);
    writer.append_video(sample(1, 30));

    completed.recv_timeout(CALLBACK_TIMEOUT).unwrap();
    writer.flush();

    assert_eq!(handle.state().samples.len(), 1);
}

#[test]
fn finish_failure_still_reports_location() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));
    let error = SinkError::new("AVFoundationErrorDomain", -11823, "cannot save");

    assert!(writer.add_default_video_input());
    assert!(writer.start());
    writer.append_video(sample(0, 30));
    handle.fail_finish(error.clone());

    let (on_complete, completed) = completion_channel();
    writer.finish(on_complete);

    let url = completed.recv_timeout(CALLBACK_TIMEOUT).unwrap();
    assert_eq!(url.as_deref(), Some(writer.output_path()));
    assert_eq!(writer.status(), SinkStatus::Failed);
    assert_eq!(writer.last_error(), Some(error));
}

#[test]
fn sink_failure_stops_appends() {
    let (_dir, writer, handle) = open_session(WriterConfig::new(FileType::Mp4));
    let error = SinkError::new("AVFoundationErrorDomain", -11847, "interrupted");

    assert!(writer.add_default_video_input());
    assert!(writer.start());
    writer.append_video(sample(0, 30));
    writer.flush();

    handle.fail_now(error.clone());
    writer.append_video(sample(1, 30));
    writer.flush();

    assert_eq!(handle.state().samples.len(), 1);
    assert_eq!(writer.status(), SinkStatus::Failed);
    assert_eq!(writer.last_error(), Some(error));

    let (on_complete, completed) = completion_channel();
    writer.finish(on_complete);
    writer.flush();
    assert!(completed.recv_timeout(QUIET_PERIOD).is_err());
}

#[tokio::test]
async fn settles_after_finish() {
    let (_dir, writer, _handle) = open_session(WriterConfig::new(FileType::M4a));
    let mut updates = writer.subscribe();

    assert!(writer.add_default_audio_input());
    assert!(writer.start());
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().status, SinkStatus::Writing);

    writer.append_audio(sample(0, 44_100));
    writer.finish(|_| {});

    let snapshot = tokio::time::timeout(CALLBACK_TIMEOUT, writer.settled())
        .await
        .unwrap();
    assert_eq!(snapshot.status, SinkStatus::Completed);
    assert_eq!(snapshot.session_start, Some(MediaTime::ZERO));
    assert_eq!(snapshot.stats.audio_appended, 1);
}

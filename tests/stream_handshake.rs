use ndarray::Array2;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use temstream::capture::{Camera, CameraInfo};
use temstream::config::StreamConfig;
use temstream::error::{AcquireError, CaptureError, SinkError};
use temstream::frame::{Frame, FrameKind, MetaValue, Metadata};
use temstream::sink::{spawn_sink, Delivery, FrameSink};
use temstream::stream::{StreamPhase, VideoStream};

/// Camera that sleeps for the exposure and records when each capture began
struct TestCamera {
    info: CameraInfo,
    starts: Arc<Mutex<Vec<Instant>>>,
    /// Fail the capture with this 0-based call index
    fail_on_call: Option<usize>,
    /// Fail every capture longer than this
    fail_above: Option<f64>,
    /// Panic on every capture longer than this
    panic_above: Option<f64>,
}

impl TestCamera {
    fn new() -> Self {
        Self {
            info: CameraInfo {
                name: String::from("test"),
                dimensions: (8, 8),
                default_exposure: 0.02,
                default_binsize: 1,
                binsizes: vec![1, 2],
                min_exposure: 0.001,
                max_exposure: 1.0,
            },
            starts: Arc::new(Mutex::new(Vec::new())),
            fail_on_call: None,
            fail_above: None,
            panic_above: None,
        }
    }

    fn starts(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.starts)
    }
}

impl Camera for TestCamera {
    fn info(&self) -> CameraInfo {
        self.info.clone()
    }

    fn get_image(
        &mut self,
        exposure: f64,
        binsize: u32,
    ) -> Result<(Array2<u16>, Metadata), CaptureError> {
        let call = {
            let mut starts = self.starts.lock();
            starts.push(Instant::now());
            starts.len() - 1
        };
        std::thread::sleep(Duration::from_secs_f64(exposure));

        if self.panic_above.is_some_and(|max| exposure > max) {
            panic!("driver crashed on call {call}");
        }

        if self.fail_on_call == Some(call) || self.fail_above.is_some_and(|max| exposure > max) {
            return Err(CaptureError::Device {
                camera: self.info.name.clone(),
                reason: format!("readout failed on call {call}"),
            });
        }

        let mut metadata = Metadata::new();
        metadata.insert("exposure".into(), exposure.into());
        metadata.insert("binsize".into(), binsize.into());
        metadata.insert("call".into(), MetaValue::Int(call as i64));
        let dims = self.info.binned_dimensions(binsize);
        Ok((Array2::from_elem(dims, call as u16), metadata))
    }
}

fn config(frametime: f64, acquire_timeout: Option<f64>) -> StreamConfig {
    StreamConfig {
        frametime,
        acquire_timeout,
    }
}

fn call_index(frame: &Frame) -> usize {
    match frame.metadata.get("call") {
        Some(MetaValue::Int(call)) => *call as usize,
        other => panic!("missing call index: {other:?}"),
    }
}

fn wait_for_phase(stream: &VideoStream, phase: StreamPhase) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while stream.phase() != phase {
        assert!(Instant::now() < deadline, "stream never reached {phase:?}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn acquired_frame_is_captured_after_the_request() {
    let camera = TestCamera::new();
    let starts = camera.starts();
    let stream = VideoStream::start(camera, &config(0.05, Some(5.0))).unwrap();

    // Let a preview cycle start so a stale frame would be available
    std::thread::sleep(Duration::from_millis(70));

    let issued = Instant::now();
    let frame = stream.get_image(Some(0.01), None).unwrap();

    assert_eq!(frame.kind, FrameKind::Acquired);
    let started = starts.lock()[call_index(&frame)];
    assert!(started >= issued);
    assert!(frame.captured_at >= issued);
    assert_eq!(stream.phase(), StreamPhase::Idle);
    stream.join();
}

#[test]
fn no_stale_frames_across_interleavings() {
    for frametime in [0.005, 0.02, 0.05] {
        let camera = TestCamera::new();
        let starts = camera.starts();
        let stream = VideoStream::start(camera, &config(frametime, Some(5.0))).unwrap();

        let mut last_sequence = None;
        for (i, delay_ms) in [0, 3, 7, 13, 25, 1, 40, 0].into_iter().enumerate() {
            std::thread::sleep(Duration::from_millis(delay_ms));
            let exposure = if i % 2 == 0 { 0.002 } else { 0.01 };

            let issued = Instant::now();
            let frame = stream.get_image(Some(exposure), None).unwrap();

            assert_eq!(frame.kind, FrameKind::Acquired);
            assert_eq!(frame.exposure(), Some(exposure));
            let started = starts.lock()[call_index(&frame)];
            assert!(
                started >= issued,
                "frametime {frametime}, delay {delay_ms} ms: capture began before the request"
            );
            if let Some(last) = last_sequence {
                assert!(frame.sequence > last);
            }
            last_sequence = Some(frame.sequence);
        }
        stream.join();
    }
}

#[test]
fn acquisition_exposure_leaves_cadence_alone() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.05, Some(5.0))).unwrap();
    let mut receiver = stream.subscribe();

    let frame = stream.get_image(Some(0.01), None).unwrap();
    assert_eq!(frame.exposure(), Some(0.01));
    assert_eq!(stream.frametime(), Duration::from_millis(50));

    // Previews after the acquisition keep the configured exposure
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match receiver.recv_timeout(Duration::from_secs(1)).unwrap() {
            Delivery::Preview(preview) if preview.sequence > frame.sequence => {
                assert_eq!(preview.exposure(), Some(0.05));
                break;
            }
            _ => assert!(Instant::now() < deadline, "no preview after acquisition"),
        }
    }
    stream.join();
}

#[test]
fn back_to_back_acquisitions_are_distinct() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.05, Some(5.0))).unwrap();

    let first = stream.get_image(Some(0.01), None).unwrap();
    let second = stream.get_image(Some(0.01), None).unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.sequence > first.sequence);
    assert!(second.captured_at > first.captured_at);
    assert_ne!(call_index(&first), call_index(&second));
    assert_eq!(stream.stats().acquisitions, 2);
    stream.join();
}

#[test]
fn binsize_is_honoured() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.05, Some(5.0))).unwrap();
    let frame = stream.get_image(Some(0.01), Some(2)).unwrap();
    assert_eq!(frame.dimensions(), (4, 4));
    assert_eq!(frame.binsize(), Some(2));
    stream.join();
}

#[test]
fn concurrent_request_is_busy() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.01, Some(5.0))).unwrap();

    std::thread::scope(|s| {
        let slow = s.spawn(|| stream.get_image(Some(0.3), None));
        let deadline = Instant::now() + Duration::from_secs(2);
        while stream.phase() == StreamPhase::Idle {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(matches!(
            stream.get_image(Some(0.01), None),
            Err(AcquireError::Busy)
        ));

        let frame = slow.join().unwrap().unwrap();
        assert_eq!(frame.exposure(), Some(0.3));
    });

    // The stream takes requests again once the first one is collected
    assert!(stream.get_image(Some(0.01), None).is_ok());
    stream.join();
}

#[test]
fn stop_releases_blocked_caller() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.01, None)).unwrap();

    std::thread::scope(|s| {
        let blocked = s.spawn(|| {
            let start = Instant::now();
            (stream.get_image(Some(0.8), None), start.elapsed())
        });
        wait_for_phase(&stream, StreamPhase::Serving);
        stream.stop();

        let (result, elapsed) = blocked.join().unwrap();
        assert!(matches!(result, Err(AcquireError::Aborted)));
        assert!(elapsed < Duration::from_millis(700));
    });

    assert!(stream.is_stopped());
    assert!(matches!(
        stream.get_image(Some(0.01), None),
        Err(AcquireError::Aborted)
    ));
    stream.join();
}

#[test]
fn camera_panic_aborts_blocked_caller() {
    let mut camera = TestCamera::new();
    camera.panic_above = Some(0.1);
    let stream = VideoStream::start(camera, &config(0.01, None)).unwrap();

    let start = Instant::now();
    let err = stream.get_image(Some(0.2), None).unwrap_err();
    assert!(matches!(err, AcquireError::Aborted));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(stream.is_stopped());
    assert!(matches!(
        stream.get_image(Some(0.01), None),
        Err(AcquireError::Aborted)
    ));
    stream.join();
}

#[test]
fn preview_failure_does_not_end_the_stream() {
    let mut camera = TestCamera::new();
    camera.fail_on_call = Some(2);
    let stream = VideoStream::start(camera, &config(0.01, Some(5.0))).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let stats = stream.stats();
        if stats.capture_failures == 1 && stats.previews >= 4 {
            break;
        }
        assert!(Instant::now() < deadline, "stream stalled: {stats:?}");
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(stream.get_image(Some(0.01), None).is_ok());
    assert!(!stream.is_stopped());
    stream.join();
}

#[test]
fn acquisition_failure_is_reported_to_the_caller() {
    let mut camera = TestCamera::new();
    camera.fail_above = Some(0.1);
    let stream = VideoStream::start(camera, &config(0.02, Some(5.0))).unwrap();

    let err = stream.get_image(Some(0.15), None).unwrap_err();
    assert!(matches!(
        err,
        AcquireError::Capture(CaptureError::Device { .. })
    ));
    assert_eq!(stream.phase(), StreamPhase::Idle);

    let frame = stream.get_image(Some(0.01), None).unwrap();
    assert_eq!(frame.kind, FrameKind::Acquired);
    assert_eq!(stream.stats().capture_failures, 1);
    stream.join();
}

#[test]
fn invalid_parameters_are_rejected_up_front() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.05, Some(5.0))).unwrap();

    assert!(matches!(
        stream.get_image(Some(2.0), None),
        Err(AcquireError::InvalidExposure { .. })
    ));
    assert!(matches!(
        stream.get_image(Some(0.0), None),
        Err(AcquireError::InvalidExposure { .. })
    ));
    assert!(matches!(
        stream.get_image(None, Some(3)),
        Err(AcquireError::InvalidBinsize { binsize: 3, .. })
    ));
    assert_eq!(stream.phase(), StreamPhase::Idle);
    assert_eq!(stream.stats().acquisitions, 0);
    stream.join();
}

#[test]
fn bad_stream_settings_are_rejected() {
    assert!(matches!(
        VideoStream::start(TestCamera::new(), &config(0.0, None)),
        Err(AcquireError::InvalidFrametime(_))
    ));
    assert!(matches!(
        VideoStream::start(TestCamera::new(), &config(0.05, Some(-1.0))),
        Err(AcquireError::InvalidTimeout(_))
    ));

    let stream = VideoStream::start(TestCamera::new(), &config(0.05, None)).unwrap();
    assert!(stream.set_frametime(0.02).is_ok());
    assert_eq!(stream.frametime(), Duration::from_millis(20));
    assert!(matches!(
        stream.set_frametime(5.0),
        Err(AcquireError::InvalidFrametime(_))
    ));
    stream.join();
}

#[test]
fn timed_out_request_is_discarded() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.01, Some(0.05))).unwrap();

    let err = stream.get_image(Some(0.3), None).unwrap_err();
    assert!(matches!(err, AcquireError::Timeout(_)));

    wait_for_phase(&stream, StreamPhase::Idle);
    assert_eq!(stream.stats().acquisitions, 0);

    let frame = stream.get_image(Some(0.01), None).unwrap();
    assert_eq!(frame.exposure(), Some(0.01));
    assert_eq!(stream.stats().acquisitions, 1);
    stream.join();
}

#[test]
fn receiver_sees_acquisitions_and_counts_drops() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.005, Some(5.0))).unwrap();
    let mut receiver = stream.subscribe();

    let frame = stream.get_image(Some(0.01), None).unwrap();

    // Sit idle while several previews are overwritten
    std::thread::sleep(Duration::from_millis(100));

    match receiver.recv_timeout(Duration::from_secs(1)).unwrap() {
        Delivery::Acquired(delivered) => assert!(Arc::ptr_eq(&delivered, &frame)),
        other => panic!("expected the acquired frame first, got {other:?}"),
    }
    match receiver.recv_timeout(Duration::from_secs(1)).unwrap() {
        Delivery::Preview(preview) => assert_eq!(preview.kind, FrameKind::Preview),
        other => panic!("expected a preview, got {other:?}"),
    }
    assert!(receiver.dropped() > 0);
    stream.join();
}

#[derive(Default)]
struct CountingSink {
    previews: usize,
    acquired: Vec<u64>,
}

impl FrameSink for CountingSink {
    fn on_preview(&mut self, _frame: &Frame) -> Result<(), SinkError> {
        self.previews += 1;
        Ok(())
    }

    fn on_acquired(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.acquired.push(frame.sequence);
        Ok(())
    }
}

#[test]
fn sink_thread_hands_back_the_sink() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.01, Some(5.0))).unwrap();
    let handle = spawn_sink(stream.subscribe(), CountingSink::default());

    let frame = stream.get_image(Some(0.01), None).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    stream.join();

    let sink = handle.join().unwrap();
    assert_eq!(sink.acquired, vec![frame.sequence]);
    assert!(sink.previews > 0);
}

/// Sink that takes longer per acquisition than the acquisitions take
#[derive(Default)]
struct SlowSink {
    acquired: Vec<u64>,
}

impl FrameSink for SlowSink {
    fn on_preview(&mut self, _frame: &Frame) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_acquired(&mut self, frame: &Frame) -> Result<(), SinkError> {
        std::thread::sleep(Duration::from_millis(200));
        self.acquired.push(frame.sequence);
        Ok(())
    }
}

#[test]
fn slow_sink_receives_every_acquisition() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.02, Some(5.0))).unwrap();
    let handle = spawn_sink(stream.subscribe(), SlowSink::default());

    let served: Vec<u64> = (0..3)
        .map(|_| stream.get_image(Some(0.01), None).unwrap().sequence)
        .collect();
    stream.join();

    let sink = handle.join().unwrap();
    assert_eq!(sink.acquired, served);
}

#[test]
fn receiver_behind_the_backlog_counts_missed_acquisitions() {
    let stream = VideoStream::start(TestCamera::new(), &config(0.01, Some(5.0))).unwrap();
    let mut receiver = stream.subscribe();

    let served: Vec<u64> = (0..66)
        .map(|_| stream.get_image(Some(0.001), None).unwrap().sequence)
        .collect();

    let mut delivered = Vec::new();
    while delivered.len() < 64 {
        if let Delivery::Acquired(frame) = receiver.recv_timeout(Duration::from_secs(1)).unwrap() {
            delivered.push(frame.sequence);
        }
    }
    assert_eq!(receiver.missed_acquisitions(), 2);
    assert_eq!(delivered, served[2..].to_vec());
    stream.join();
}

use temstream::calibrate::center_z_height;
use temstream::capture::open_camera;
use temstream::config::{CameraConfig, CenterZConfig, SimulationConfig, StageConfig, StreamConfig};
use temstream::experiment::Experiment;
use temstream::frame::{FrameKind, MetaValue};
use temstream::sink::{read_frame, FrameHeader};
use temstream::stage::{SimulatedStage, Stage, StagePosition};
use temstream::stream::VideoStream;

fn microscope(size: usize, z: f64) -> (VideoStream, SimulatedStage) {
    let camera = CameraConfig {
        dimensions: (size, size),
        ..CameraConfig::default()
    };
    let stage = SimulatedStage::with_position(
        StageConfig::default(),
        StagePosition {
            z,
            ..StagePosition::default()
        },
    );
    let camera = open_camera(&camera, &SimulationConfig::default(), Some(stage.handle())).unwrap();
    let stream = VideoStream::start(
        camera,
        &StreamConfig {
            frametime: 0.05,
            acquire_timeout: Some(10.0),
        },
    )
    .unwrap();
    (stream, stage)
}

#[test]
fn finds_the_eucentric_height() {
    let (stream, mut stage) = microscope(256, 1_600.0);
    let config = CenterZConfig {
        steps: 8,
        z_step: 500.0,
        settle_time: 0.0,
        ..CenterZConfig::default()
    };

    let height = center_z_height(&stream, &mut stage, &config).unwrap();
    let eucentric = SimulationConfig::default().eucentric_z;
    assert!(
        (height.z - eucentric).abs() < 300.0,
        "found z = {}, expected {}",
        height.z,
        eucentric
    );
    assert_eq!(height.points.len(), 8);
    assert_eq!(height.start_z, 1_600.0);
    assert_eq!(height.alpha, config.start_alpha);

    height.apply(&mut stage).unwrap();
    let position = stage.position().unwrap();
    assert!((position.z - height.z).abs() < 1e-9);
    assert_eq!(position.a, config.start_alpha);

    height.restore(&mut stage).unwrap();
    assert_eq!(stage.position().unwrap().z, 1_600.0);
    stream.join();
}

#[test]
fn tilt_series_writes_numbered_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (stream, mut stage) = microscope(64, 0.0);
    let mut experiment = Experiment::new(dir.path(), &stream);

    let summary = experiment
        .start_collection(&stream, &mut stage, 0.01, 3.0, 1.0)
        .unwrap();
    assert_eq!(summary.start_angle, 0.0);
    assert_eq!(summary.end_angle, 2.0);
    assert_eq!(summary.files.len(), 3);
    assert_eq!(summary.files[2], dir.path().join("00002.tiff"));

    let data = read_frame(&summary.files[1]).unwrap();
    assert_eq!(data.dim(), (64, 64));

    let header: FrameHeader =
        serde_yaml::from_str(&std::fs::read_to_string(dir.path().join("00001.yaml")).unwrap())
            .unwrap();
    assert_eq!(header.kind, FrameKind::Acquired);
    assert_eq!(header.metadata["image_index"], MetaValue::Int(1));
    assert_eq!(header.metadata["stage_a"], MetaValue::Float(1.0));
    assert_eq!(header.metadata["exposure"], MetaValue::Float(0.01));

    // Numbering continues in the next collection
    let summary = experiment
        .start_collection(&stream, &mut stage, 0.01, -2.0, -1.0)
        .unwrap();
    assert_eq!(summary.start_angle, 2.0);
    assert_eq!(summary.end_angle, 1.0);
    assert_eq!(summary.files[0], dir.path().join("00003.tiff"));
    assert_eq!(experiment.offset(), 5);
    experiment.finalize();
    stream.join();
}

use image::Luma;
use multiplex_align::utils::{Gray16Image, Plane, Point2};
use multiplex_align::*;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Returns the same landmarks for every pair, or nothing
struct FixedProvider {
    calls: Arc<AtomicUsize>,
    found: Correspondences,
}

impl FixedProvider {
    fn matching(calls: &Arc<AtomicUsize>) -> Self {
        let reference = vec![
            Point2::new(4.0, 4.0),
            Point2::new(20.0, 4.0),
            Point2::new(4.0, 20.0),
            Point2::new(20.0, 20.0),
        ];
        let target = reference.iter().map(|p| Point2::new(p.x + 2.0, p.y + 1.0)).collect();
        Self {
            calls: calls.clone(),
            found: Correspondences::new(reference, target),
        }
    }

    fn empty(calls: &Arc<AtomicUsize>) -> Self {
        Self {
            calls: calls.clone(),
            found: Correspondences::empty(),
        }
    }

    fn answer(&self) -> anyhow::Result<Correspondences> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.found.clone())
    }
}

impl CorrespondenceProvider<FeatureParams> for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    fn extract(&self, _: &Plane, _: &Plane, _: &FeatureParams) -> anyhow::Result<Correspondences> {
        self.answer()
    }
}

impl CorrespondenceProvider<BlockMatchingParams> for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    fn extract(&self, _: &Plane, _: &Plane, _: &BlockMatchingParams) -> anyhow::Result<Correspondences> {
        self.answer()
    }
}

/// Holds its first call open until released
struct BlockingProvider {
    started: Arc<AtomicBool>,
    release: Arc<AtomicBool>,
}

impl CorrespondenceProvider<FeatureParams> for BlockingProvider {
    fn name(&self) -> &str {
        "blocking"
    }

    fn extract(&self, _: &Plane, _: &Plane, _: &FeatureParams) -> anyhow::Result<Correspondences> {
        self.started.store(true, Ordering::SeqCst);
        while !self.release.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(Correspondences::empty())
    }
}

/// Gives each call its own landmarks: call `n` puts its first reference point at `(100 n, 0)`
struct SequenceProvider {
    calls: Arc<AtomicUsize>,
}

impl SequenceProvider {
    fn answer(&self) -> anyhow::Result<Correspondences> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let base = 100.0 * n as f64;
        let reference = vec![
            Point2::new(base, 0.0),
            Point2::new(base + 10.0, 0.0),
            Point2::new(base, 10.0),
        ];
        let target = reference.iter().map(|p| Point2::new(p.x + n as f64, p.y)).collect();
        Ok(Correspondences::new(reference, target))
    }
}

impl CorrespondenceProvider<FeatureParams> for SequenceProvider {
    fn name(&self) -> &str {
        "sequence"
    }

    fn extract(&self, _: &Plane, _: &Plane, _: &FeatureParams) -> anyhow::Result<Correspondences> {
        self.answer()
    }
}

impl CorrespondenceProvider<BlockMatchingParams> for SequenceProvider {
    fn name(&self) -> &str {
        "sequence"
    }

    fn extract(&self, _: &Plane, _: &Plane, _: &BlockMatchingParams) -> anyhow::Result<Correspondences> {
        self.answer()
    }
}

/// Passes sources through unchanged and remembers each source with the first
/// reference landmark it was warped with
#[derive(Default)]
struct RecordingWarper {
    warped: Arc<Mutex<Vec<(String, Point2)>>>,
}

impl RecordingWarper {
    fn titles(warped: &Mutex<Vec<(String, Point2)>>) -> Vec<String> {
        warped.lock().unwrap().iter().map(|(title, _)| title.clone()).collect()
    }
}

impl ImageWarper for RecordingWarper {
    fn warp(
        &self,
        source: &ChannelImage,
        reference_points: &[Point2],
        _target_points: &[Point2],
        _options: &WarpOptions,
    ) -> anyhow::Result<ChannelImage> {
        self.warped
            .lock()
            .unwrap()
            .push((source.title.clone(), reference_points[0]));
        Ok(source.clone())
    }
}

/// Either fails outright or returns an image without pixels
struct BrokenWarper {
    empty_output: bool,
}

impl ImageWarper for BrokenWarper {
    fn warp(
        &self,
        source: &ChannelImage,
        _reference_points: &[Point2],
        _target_points: &[Point2],
        _options: &WarpOptions,
    ) -> anyhow::Result<ChannelImage> {
        if self.empty_output {
            Ok(ChannelImage::from_pixels(source.title.clone(), Gray16Image::new(0, 0)))
        } else {
            anyhow::bail!("landmarks are degenerate")
        }
    }
}

fn write_image(folder: &Path, name: &str, seed: u16) {
    let pixels = Gray16Image::from_fn(32, 32, |x, y| Luma([seed.wrapping_mul(97) ^ (x * 31 + y * 17) as u16]));
    pixels.save(folder.join(name)).unwrap();
}

fn two_round_folder() -> TempDir {
    let dir = TempDir::new().unwrap();
    for (seed, name) in ["Hu_Layer1.tif", "CD3_Layer1.tif", "DAPI_Layer1.tif", "Hu_Layer2.tif", "CD20_Layer2.tif"]
        .iter()
        .enumerate()
    {
        write_image(dir.path(), name, seed as u16 + 1);
    }
    dir
}

fn corrupt(folder: &Path, name: &str) {
    std::fs::write(folder.join(name), b"not an image").unwrap();
}

fn config(folder: &Path, rounds: usize) -> RegistrationConfig {
    RegistrationConfig::builder()
        .input_folder(folder)
        .marker("Hu")
        .rounds(rounds)
        .build()
        .unwrap()
}

fn pipeline_with(found: bool, calls: &Arc<AtomicUsize>, warper: RecordingWarper) -> RegistrationPipeline {
    let provider = || {
        if found {
            FixedProvider::matching(calls)
        } else {
            FixedProvider::empty(calls)
        }
    };
    let matcher = FeatureMatcher::new(
        Box::new(provider()),
        Box::new(provider()),
        Box::new(provider()),
        MatchingParams::default(),
    );
    RegistrationPipeline::new(matcher, Box::new(warper))
}

fn page_count(path: &Path) -> usize {
    let mut decoder = tiff::decoder::Decoder::new(File::open(path).unwrap()).unwrap();
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().unwrap();
        pages += 1;
    }
    pages
}

#[test]
fn test_two_rounds_produce_ordered_stack_and_landmarks() {
    let dir = two_round_folder();
    let calls = Arc::new(AtomicUsize::new(0));
    let warper = RecordingWarper::default();
    let warped = warper.warped.clone();
    let pipeline = pipeline_with(true, &calls, warper);

    let outputs = pipeline.run(&config(dir.path(), 2)).unwrap();

    assert_eq!(
        outputs.slice_labels,
        ["Hu_Layer1.tif", "CD3_Layer1.tif", "DAPI_Layer1.tif", "CD20_Layer2.tif"]
    );
    assert_eq!(outputs.landmark_pairs, 1);
    // first strategy attempt succeeds
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // round 1 channels are taken as they are
    assert_eq!(RecordingWarper::titles(&warped), ["CD20_Layer2.tif"]);

    let results = dir.path().join("Results");
    assert_eq!(outputs.qc_stack_path, results.join("Hu_stack.tif"));
    assert_eq!(outputs.aligned_stack_path, results.join("Aligned_Stack.tif"));
    assert_eq!(page_count(&outputs.qc_stack_path), 2);
    assert_eq!(page_count(&outputs.aligned_stack_path), 4);

    let exported: Vec<LandmarkRecord> =
        serde_json::from_str(&std::fs::read_to_string(&outputs.landmark_export_path).unwrap()).unwrap();
    let labels: Vec<_> = exported.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, ["Hu_1_ref", "Hu_1_target"]);
    assert_eq!(exported[0].points.len(), 4);
    assert!(!pipeline.is_running());
}

#[test]
fn test_real_warper_keeps_reference_canvas() {
    let dir = two_round_folder();
    let calls = Arc::new(AtomicUsize::new(0));
    let matcher = FeatureMatcher::new(
        Box::new(FixedProvider::matching(&calls)),
        Box::new(FixedProvider::matching(&calls)),
        Box::new(FixedProvider::matching(&calls)),
        MatchingParams::default(),
    );
    let pipeline = RegistrationPipeline::new(matcher, Box::new(AffineLandmarkWarper::new()));

    let outputs = pipeline.run(&config(dir.path(), 2)).unwrap();

    let mut decoder = tiff::decoder::Decoder::new(File::open(&outputs.aligned_stack_path).unwrap()).unwrap();
    assert_eq!(decoder.dimensions().unwrap(), (32, 32));
    let description = decoder
        .get_tag_ascii_string(tiff::tags::Tag::ImageDescription)
        .unwrap();
    assert!(description.contains("images=4"));
}

#[test]
fn test_unmatched_pair_stops_before_final_stack() {
    let dir = two_round_folder();
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline_with(false, &calls, RecordingWarper::default());

    let err = pipeline.run(&config(dir.path(), 2)).unwrap_err();

    match &err {
        RegistrationError::CorrespondenceNotFound {
            pair_index,
            reference,
            target,
            attempts,
        } => {
            assert_eq!(*pair_index, 1);
            assert_eq!(reference, "Hu_Layer1.tif");
            assert_eq!(target, "Hu_Layer2.tif");
            // steps 3, 6, ..., 30 then the two fallbacks
            assert_eq!(attempts.len(), 12);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 12);
    assert!(!dir.path().join("Results").join("Aligned_Stack.tif").exists());
    assert!(!dir.path().join("Results").join("Landmarks.json").exists());
}

#[test]
fn test_existing_results_folder_is_rejected() {
    let dir = two_round_folder();
    std::fs::create_dir(dir.path().join("Results")).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline_with(true, &calls, RecordingWarper::default());

    let err = pipeline.run(&config(dir.path(), 2)).unwrap_err();

    assert_eq!(err.kind(), "OutputConflictError");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_results_go_to_save_folder() {
    let dir = two_round_folder();
    let out = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline_with(true, &calls, RecordingWarper::default());
    let config = RegistrationConfig::builder()
        .input_folder(dir.path())
        .save_folder(out.path())
        .marker("hu")
        .rounds(2)
        .build()
        .unwrap();

    let outputs = pipeline.run(&config).unwrap();

    assert!(outputs.aligned_stack_path.starts_with(out.path()));
    assert!(!dir.path().join("Results").exists());
}

#[test]
fn test_missing_marker_image_for_round() {
    let dir = two_round_folder();
    write_image(dir.path(), "CD45_Layer3.tif", 9);
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline_with(true, &calls, RecordingWarper::default());

    let err = pipeline.run(&config(dir.path(), 3)).unwrap_err();

    match err {
        RegistrationError::LandmarkMissing { round, available } => {
            assert_eq!(round, 3);
            assert_eq!(available, 2);
        }
        other => panic!("unexpected error {other:?}"),
    }
    // QC stack was already written
    assert!(dir.path().join("Results").join("Hu_stack.tif").exists());
}

#[test]
fn test_no_marker_files_is_a_config_error() {
    let dir = two_round_folder();
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline_with(true, &calls, RecordingWarper::default());
    let config = RegistrationConfig::builder()
        .input_folder(dir.path())
        .marker("NaK")
        .rounds(2)
        .build()
        .unwrap();

    let err = pipeline.run(&config).unwrap_err();

    assert_eq!(err.kind(), "ConfigError");
    assert!(err.to_string().contains("NaK"));
}

#[test]
fn test_cancelled_run_makes_no_provider_calls() {
    let dir = two_round_folder();
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline_with(true, &calls, RecordingWarper::default());
    let token = CancellationToken::new();
    token.cancel();

    let err = pipeline.run_with_cancel(&config(dir.path(), 2), token).unwrap_err();

    assert_eq!(err.kind(), "CancelledError");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!pipeline.is_running());
}

#[test]
fn test_second_run_is_rejected_while_first_is_active() {
    let dir = two_round_folder();
    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));
    let matcher = FeatureMatcher::new(
        Box::new(BlockingProvider {
            started: started.clone(),
            release: release.clone(),
        }),
        Box::new(FixedProvider::empty(&calls)),
        Box::new(FixedProvider::empty(&calls)),
        MatchingParams::default(),
    );
    let pipeline = RegistrationPipeline::new(matcher, Box::new(RecordingWarper::default()));
    let config = config(dir.path(), 2);

    std::thread::scope(|scope| {
        let first = scope.spawn(|| pipeline.run(&config));
        while !started.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(pipeline.is_running());

        let err = pipeline.run(&config).unwrap_err();
        assert!(matches!(err, RegistrationError::RunInProgress));

        release.store(true, Ordering::SeqCst);
        let first = first.join().unwrap();
        assert_eq!(first.unwrap_err().kind(), "CorrespondenceNotFoundError");
    });

    assert!(!pipeline.is_running());
}

#[test]
fn test_warper_reproduces_known_affine_mapping() {
    let source = ChannelImage::from_pixels(
        "ramp.tif",
        Gray16Image::from_fn(200, 200, |x, y| Luma([(x * 100 + y * 7) as u16])),
    );
    let map = |p: &Point2| Point2::new(0.5 * p.x - 0.25 * p.y + 60.0, 0.25 * p.x + 0.5 * p.y + 20.0);
    let reference = vec![
        Point2::new(0.0, 0.0),
        Point2::new(60.0, 0.0),
        Point2::new(0.0, 60.0),
        Point2::new(60.0, 60.0),
        Point2::new(30.0, 10.0),
    ];
    let target: Vec<_> = reference.iter().map(map).collect();
    let options = WarpOptions {
        output_size: Some((64, 64)),
        ..WarpOptions::default()
    };

    let warped = AffineLandmarkWarper::new()
        .warp(&source, &reference, &target, &options)
        .unwrap();

    assert_eq!(warped.dimensions(), (64, 64));
    for (x, y) in [(0u32, 0u32), (40, 30), (63, 63), (17, 52)] {
        let q = map(&Point2::new(x as f64, y as f64));
        let expected = (100.0 * q.x + 7.0 * q.y).round() as u16;
        let actual = warped.pixels.get_pixel(x, y)[0];
        assert!(
            (actual as i32 - expected as i32).abs() <= 1,
            "({x}, {y}): {actual} vs {expected}"
        );
    }
}

#[test]
fn test_three_rounds_use_their_own_landmark_pair() {
    let dir = TempDir::new().unwrap();
    for (seed, name) in [
        "Hu_Layer1.tif",
        "CD3_Layer1.tif",
        "Hu_Layer2.tif",
        "CD20_Layer2.tif",
        "Hu_Layer3.tif",
        "Ki67_Layer3.tif",
        "CD45_Layer3.tif",
    ]
    .iter()
    .enumerate()
    {
        write_image(dir.path(), name, seed as u16 + 1);
    }
    let calls = Arc::new(AtomicUsize::new(0));
    let sequence = || SequenceProvider { calls: calls.clone() };
    let matcher = FeatureMatcher::new(
        Box::new(sequence()),
        Box::new(sequence()),
        Box::new(sequence()),
        MatchingParams::default(),
    );
    let warper = RecordingWarper::default();
    let warped = warper.warped.clone();
    let pipeline = RegistrationPipeline::new(matcher, Box::new(warper));

    let outputs = pipeline.run(&config(dir.path(), 3)).unwrap();

    assert_eq!(
        outputs.slice_labels,
        [
            "Hu_Layer1.tif",
            "CD3_Layer1.tif",
            "CD20_Layer2.tif",
            "CD45_Layer3.tif",
            "Ki67_Layer3.tif"
        ]
    );
    assert_eq!(outputs.landmark_pairs, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // round 2 gets the pair of Hu_Layer2, round 3 the pair of Hu_Layer3
    assert_eq!(
        *warped.lock().unwrap(),
        [
            ("CD20_Layer2.tif".to_string(), Point2::new(100.0, 0.0)),
            ("CD45_Layer3.tif".to_string(), Point2::new(200.0, 0.0)),
            ("Ki67_Layer3.tif".to_string(), Point2::new(200.0, 0.0)),
        ]
    );
    assert_eq!(page_count(&outputs.aligned_stack_path), 5);

    let exported: Vec<LandmarkRecord> =
        serde_json::from_str(&std::fs::read_to_string(&outputs.landmark_export_path).unwrap()).unwrap();
    let labels: Vec<_> = exported.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, ["Hu_1_ref", "Hu_1_target", "Hu_2_ref", "Hu_2_target"]);
    assert_eq!(exported[2].points[0], Point2::new(200.0, 0.0));
    assert_eq!(exported[3].points[0], Point2::new(202.0, 0.0));
}

#[test]
fn test_unreadable_reference_image() {
    let dir = two_round_folder();
    corrupt(dir.path(), "Hu_Layer1.tif");
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline_with(true, &calls, RecordingWarper::default());

    let err = pipeline.run(&config(dir.path(), 2)).unwrap_err();

    match &err {
        RegistrationError::ReferenceOpen { path, .. } => {
            assert!(path.ends_with("Hu_Layer1.tif"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.kind(), "ReferenceOpenError");
    assert!(err.to_string().contains("Hu_Layer1.tif"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unreadable_round_one_channel() {
    let dir = two_round_folder();
    corrupt(dir.path(), "CD3_Layer1.tif");
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline_with(true, &calls, RecordingWarper::default());

    let err = pipeline.run(&config(dir.path(), 2)).unwrap_err();

    match &err {
        RegistrationError::ChannelOpen { path, .. } => {
            assert!(path.ends_with("CD3_Layer1.tif"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.kind(), "ChannelOpenError");
    assert!(dir.path().join("Results").join("Hu_stack.tif").exists());
    assert!(!dir.path().join("Results").join("Aligned_Stack.tif").exists());
}

fn run_with_broken_warper(empty_output: bool) -> (TempDir, RegistrationError) {
    let dir = two_round_folder();
    let calls = Arc::new(AtomicUsize::new(0));
    let matcher = FeatureMatcher::new(
        Box::new(FixedProvider::matching(&calls)),
        Box::new(FixedProvider::matching(&calls)),
        Box::new(FixedProvider::matching(&calls)),
        MatchingParams::default(),
    );
    let pipeline = RegistrationPipeline::new(matcher, Box::new(BrokenWarper { empty_output }));
    let err = pipeline.run(&config(dir.path(), 2)).unwrap_err();
    (dir, err)
}

#[test]
fn test_failing_warper_aborts_the_round() {
    for empty_output in [false, true] {
        let (dir, err) = run_with_broken_warper(empty_output);

        match &err {
            RegistrationError::WarpApplication { round, file, reason } => {
                assert_eq!(*round, 2);
                assert_eq!(file, "CD20_Layer2.tif");
                if empty_output {
                    assert!(reason.contains("empty"));
                } else {
                    assert!(reason.contains("degenerate"));
                }
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.kind(), "WarpApplicationError");
        assert!(!dir.path().join("Results").join("Aligned_Stack.tif").exists());
        assert!(!dir.path().join("Results").join("Landmarks.json").exists());
    }
}

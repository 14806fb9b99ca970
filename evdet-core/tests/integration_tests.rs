//! Integration tests covering the full decode → histogram → model →
//! postprocess path with a stub model.

use evdet_core::decoder::{read_predictions, read_predictions_file};
use evdet_core::output::{write_histogram_file, write_predictions, write_predictions_file};
use evdet_core::parser::encode_events;
use evdet_core::{
    ClassTable, Error, Event, EventDecoder, EventSet, HistogramTensor, Model, Pipeline,
    PipelineConfig, Postprocessor, RawDetection, RawPredictions, StackedHistogram,
};
use std::fmt;
use std::io::Write;

/// Deterministic pseudo-random events (64-bit LCG).
fn synthetic_events(count: usize, seed: u64) -> Vec<Event> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as i32
    };
    (0..count)
        .map(|_| {
            Event::new(
                next() % 64,
                next() % 48,
                next() % 2,
                (next() % 1000) as i64,
            )
        })
        .collect()
}

#[test]
fn test_decode_round_trip_is_stable() {
    let input = synthetic_events(500, 7);
    let buffer = encode_events(&input);
    let events = EventDecoder::new().decode(&buffer).unwrap();

    assert_eq!(events.len(), input.len());

    let mut expected: Vec<(usize, Event)> = input.iter().copied().enumerate().collect();
    expected.sort_by_key(|(_, e)| e.t);
    let decoded: Vec<Event> = events.iter().collect();
    let expected: Vec<Event> = expected.into_iter().map(|(_, e)| e).collect();
    assert_eq!(decoded, expected);

    assert!(events.t().windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_decode_file() {
    let input = synthetic_events(32, 11);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&encode_events(&input)).unwrap();
    file.flush().unwrap();

    let events = EventDecoder::new().decode_file(file.path()).unwrap();
    assert_eq!(events.len(), 32);

    let missing = EventDecoder::new().decode_file("/definitely/not/here.bin");
    assert!(matches!(missing, Err(Error::Io(_))));
}

#[test]
fn test_malformed_buffer() {
    let err = EventDecoder::new().decode(&[0u8; 15]).unwrap_err();
    assert!(matches!(err, Error::MalformedInput(_)));
}

#[test]
fn test_histogram_additivity() {
    let all = synthetic_events(400, 3);
    let (a, b) = all.split_at(150);

    let hist = StackedHistogram::new(5, 48, 64).unwrap();
    let (t_start, t_end) = (0, 999);

    let union = hist
        .construct_window(&EventSet::from_events(all.iter().copied()), t_start, t_end)
        .unwrap();
    let mut sum = hist
        .construct_window(&EventSet::from_events(a.iter().copied()), t_start, t_end)
        .unwrap();
    let part_b = hist
        .construct_window(&EventSet::from_events(b.iter().copied()), t_start, t_end)
        .unwrap();
    sum.add(&part_b).unwrap();

    assert_eq!(union, sum);
    assert_eq!(union.total(), 400.0);
}

#[test]
fn test_histogram_additivity_with_shared_range() {
    // Both halves span the same [t_min, t_max], so plain construct applies
    let a = EventSet::from_events([
        Event::new(0, 0, 0, 0),
        Event::new(1, 1, 1, 40),
        Event::new(2, 2, 0, 100),
    ]);
    let b = EventSet::from_events([
        Event::new(3, 3, 1, 0),
        Event::new(1, 1, 1, 60),
        Event::new(0, 0, 1, 100),
    ]);
    let union = EventSet::from_events(a.iter().chain(b.iter()));

    let hist = StackedHistogram::new(4, 4, 4).unwrap();
    let mut sum = hist.construct(&a);
    sum.add(&hist.construct(&b)).unwrap();
    assert_eq!(hist.construct(&union), sum);
}

#[test]
fn test_histogram_is_deterministic() {
    let buffer = encode_events(&synthetic_events(300, 5));
    let hist = StackedHistogram::new(10, 48, 64).unwrap();
    let first = hist.construct(&EventDecoder::new().decode(&buffer).unwrap());
    let second = hist.construct(&EventDecoder::new().decode(&buffer).unwrap());
    assert_eq!(first, second);
}

#[test]
fn test_histogram_dump_file() {
    let hist = StackedHistogram::new(2, 2, 2).unwrap();
    let tensor = hist.construct(&EventSet::from_events([Event::new(1, 1, 1, 0)]));
    let file = tempfile::NamedTempFile::new().unwrap();
    write_histogram_file(file.path(), &tensor).unwrap();

    let data = std::fs::read(file.path()).unwrap();
    assert_eq!(&data[0..8], b"EVDHIST\0");
    assert_eq!(data.len(), 24 + 4 * 2 * 2 * 2 * 2);
}

#[test]
fn test_prediction_dump_round_trip() {
    let data: Vec<f32> = (0..2 * 4 * 8).map(|v| v as f32 * 0.25).collect();
    let predictions = RawPredictions::new(2, 4, 8, data).unwrap();

    let mut bytes = Vec::new();
    write_predictions(&mut bytes, &predictions).unwrap();
    assert_eq!(read_predictions(&bytes[..]).unwrap(), predictions);

    let file = tempfile::NamedTempFile::new().unwrap();
    write_predictions_file(file.path(), &predictions).unwrap();
    assert_eq!(read_predictions_file(file.path()).unwrap(), predictions);

    // Truncated payload no longer matches the declared shape
    bytes.truncate(bytes.len() - 4);
    assert!(matches!(
        read_predictions(&bytes[..]),
        Err(Error::ShapeMismatch { .. })
    ));
}

#[test]
fn test_postprocess_is_deterministic() {
    let rows: Vec<RawDetection> = (0..50)
        .map(|i| {
            let f = i as f32;
            RawDetection::new(
                [10.0 + (f * 3.7) % 20.0, 10.0 + (f * 1.3) % 20.0, 8.0, 6.0],
                0.3 + (f % 7.0) / 10.0,
                vec![(f % 3.0) / 3.0, (f % 5.0) / 5.0, (f % 4.0) / 4.0],
            )
        })
        .collect();
    let raw = vec![rows.clone(), rows];

    let pp = Postprocessor::default();
    let first = pp.postprocess(&raw, 3, 0.05, 0.5).unwrap();
    let second = pp.postprocess(&raw, 3, 0.05, 0.5).unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0], first[1]);

    // class-major, score-descending within a class
    let dets = first[0].as_ref().unwrap();
    for pair in dets.windows(2) {
        assert!(pair[0].class_id <= pair[1].class_id);
        if pair[0].class_id == pair[1].class_id {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}

#[test]
fn test_custom_class_table() {
    let row = RawDetection::new([5.0, 5.0, 2.0, 2.0], 1.0, vec![0.1, 0.9]);
    let out = Postprocessor::new(ClassTable::new(["cat", "dog"]))
        .postprocess(&[vec![row]], 2, 0.5, 0.5)
        .unwrap();
    assert_eq!(out[0].as_ref().unwrap()[0].class_label, "dog");
}

#[derive(Debug)]
struct StubError;

impl fmt::Display for StubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stub model failure")
    }
}

impl std::error::Error for StubError {}

/// Returns fixed predictions and counts its calls in the threaded state.
struct StubModel {
    fail: bool,
    seen_shapes: Vec<[usize; 3]>,
}

impl StubModel {
    fn new() -> Self {
        Self {
            fail: false,
            seen_shapes: Vec::new(),
        }
    }
}

impl Model for StubModel {
    type State = u32;
    type Aux = f64;
    type Error = StubError;

    fn forward(
        &mut self,
        input: &HistogramTensor,
        state: Option<u32>,
    ) -> Result<(RawPredictions, u32, f64), StubError> {
        if self.fail {
            return Err(StubError);
        }
        self.seen_shapes.push(input.shape());

        // Two strongly overlapping vehicles and one weak pedestrian
        let data = vec![
            50.0, 50.0, 10.0, 10.0, 1.0, 0.0, 0.9, 0.0, //
            50.5, 50.0, 10.0, 10.0, 1.0, 0.0, 0.8, 0.0, //
            10.0, 10.0, 4.0, 4.0, 0.01, 0.5, 0.0, 0.0,
        ];
        let predictions = RawPredictions::new(1, 3, 8, data).expect("stub shape");
        Ok((predictions, state.unwrap_or(0) + 1, input.total()))
    }
}

#[test]
fn test_pipeline_end_to_end() {
    let config = PipelineConfig {
        bins: 4,
        height: 48,
        width: 64,
        ..Default::default()
    };
    let mut pipeline = Pipeline::new(config, StubModel::new()).unwrap();
    let buffer = encode_events(&synthetic_events(100, 9));

    let first = pipeline.infer(&buffer, None).unwrap();
    assert_eq!(first.state, 1);
    assert_eq!(first.aux, 100.0);
    assert_eq!(first.detections.len(), 1);

    let dets = first.detections[0].as_ref().unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_label, "vehicle");
    assert_eq!(dets[0].anchor, 0);

    let second = pipeline.infer(&buffer, Some(first.state)).unwrap();
    assert_eq!(second.state, 2);
    assert_eq!(second.detections, first.detections);

    assert_eq!(pipeline.model().seen_shapes, vec![[8, 48, 64]; 2]);
}

#[test]
fn test_pipeline_errors() {
    let mut pipeline = Pipeline::new(PipelineConfig::default(), StubModel::new()).unwrap();
    assert!(matches!(
        pipeline.infer(&[0u8; 17], None),
        Err(Error::MalformedInput(_))
    ));

    let mut failing = StubModel::new();
    failing.fail = true;
    let mut pipeline = Pipeline::new(PipelineConfig::default(), failing).unwrap();
    let err = pipeline.infer(&[], None).unwrap_err();
    assert!(matches!(err, Error::Model(_)));
    assert!(err.to_string().contains("stub model failure"));

    // Model rows carry 3 class scores, config declares 2
    let config = PipelineConfig {
        num_classes: 2,
        ..Default::default()
    };
    let mut pipeline = Pipeline::new(config, StubModel::new()).unwrap();
    assert!(matches!(
        pipeline.infer(&[], None),
        Err(Error::ShapeMismatch { .. })
    ));

    let config = PipelineConfig {
        confidence_threshold: 2.0,
        ..Default::default()
    };
    assert!(matches!(
        Pipeline::new(config, StubModel::new()),
        Err(Error::InvalidParameter { .. })
    ));
}

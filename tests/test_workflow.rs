use evoked::io::{Event, EventTable, Recording};
use evoked::{run_erp, EegError, ErpConfig};
use ndarray::{Array2, Axis};

const SFREQ: f64 = 100.0;

/// 3 channels, 10 s at 100 Hz: channel offset plus a slow sine, with a spike
/// on channel 0 at 4.0 s.
fn recording() -> Recording {
    let mut data = Array2::from_shape_fn((3, 1000), |(c, t)| {
        c as f32 + 0.5 * (2.0 * std::f32::consts::PI * t as f32 / 100.0).sin()
    });
    data[[0, 400]] = 1000.0;
    Recording::new(data, SFREQ, vec![]).unwrap()
}

fn events() -> EventTable {
    let ev = |code: &str, time: f64| Event { code: code.into(), time };
    EventTable::new(vec![
        ev("TRSP", 6.0),
        ev("DIN", 3.0),
        ev("TRSP", 2.0),
        ev("TRSP", 4.0),
        ev("DIN", 5.0),
        ev("TRSP", 9.6),
    ])
}

fn config() -> ErpConfig {
    ErpConfig {
        labels: vec!["TRSP".into(), "DIN".into()],
        categories: Some(vec!["target".into(), "standard".into()]),
        left_padding: 0.5,
        right_padding: 0.5,
        ..ErpConfig::default()
    }
}

#[test]
fn categories_follow_label_order_and_names() {
    let mut rec = recording();
    let out = run_erp(&mut rec, &events(), &config()).unwrap();
    assert_eq!(out.averages.labels(), vec!["target", "standard"]);
    assert_eq!(out.averages.num_segments("target"), Some(3));
    assert_eq!(out.averages.num_segments("standard"), Some(2));
    assert_eq!(out.averages.center_samples(), 49);
    assert_eq!(out.averages.data("target").unwrap().dim(), (3, 100));
    assert_eq!(out.out_of_range["target"], vec![9.6]);
    assert!(!out.out_of_range.contains_key("standard"));
    assert!(out.dropped.is_empty());
}

#[test]
fn timeline_marker_lands_on_the_event_sample() {
    let mut data = Array2::<f32>::zeros((1, 1000));
    data[[0, 500]] = 1.0;
    let mut rec = Recording::new(data, SFREQ, vec![]).unwrap();
    let table = EventTable::new(vec![Event { code: "S".into(), time: 5.0 }]);
    let cfg = ErpConfig {
        labels: vec!["S".into()],
        left_padding: 0.1,
        right_padding: 0.1,
        ..ErpConfig::default()
    };
    let out = run_erp(&mut rec, &table, &cfg).unwrap();

    let avg = out.averages.data("S").unwrap();
    let spike = avg.iter().position(|&v| v == 1.0).unwrap();
    let tl = out.averages.build_timeline().unwrap();
    let marker = ((tl[0].event_begin - tl[0].begin_time) as f64 * SFREQ / 1e6).round() as usize;
    assert_eq!(spike, 9);
    assert_eq!(marker, spike);
    assert_eq!(out.averages.center_samples(), spike);
}

#[test]
fn left_padding_below_one_sample_is_rejected() {
    let mut rec = recording();
    let cfg = ErpConfig { left_padding: 0.001, ..config() };
    assert!(matches!(
        run_erp(&mut rec, &events(), &cfg),
        Err(EegError::InvalidArgument(ref m)) if m.contains("shorter than one sample")
    ));
}

#[test]
fn history_records_each_step() {
    let mut rec = recording();
    let cfg = ErpConfig { lowpass: Some(30.0), average_reference: true, ..config() };
    let out = run_erp(&mut rec, &events(), &cfg).unwrap();
    let names: Vec<&str> = out.history.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "ERP Workflow Lowpass Filter",
            "ERP Workflow Segmentation",
            "ERP Workflow Averaging",
            "ERP Workflow Average Reference",
        ]
    );
    let seg = &out.history[1];
    assert!(seg.results[0].contains("2 categories and 5 segments"));
    assert!(seg
        .results
        .iter()
        .any(|r| r.contains("1 segment(s) could not be created")));
}

#[test]
fn source_file_is_stamped_on_every_entry() {
    let mut rec = recording();
    let mut out = run_erp(&mut rec, &events(), &config()).unwrap();
    out.set_source_file("subject01.safetensors");
    assert!(out
        .history
        .iter()
        .all(|h| h.source_files == vec!["subject01.safetensors".to_string()]));
}

#[test]
fn artifact_rejection_drops_spiky_segment() {
    let mut rec = recording();
    let cfg = ErpConfig { artifact_criterion: Some(100.0), ..config() };
    let out = run_erp(&mut rec, &events(), &cfg).unwrap();
    assert_eq!(out.dropped["target"], 1);
    assert_eq!(out.dropped["standard"], 0);
    assert_eq!(out.averages.num_segments("target"), Some(2));
    assert!(out
        .history
        .iter()
        .any(|h| h.name == "ERP Workflow Artifact Detection"));
}

#[test]
fn rejecting_every_segment_is_an_error() {
    let mut rec = recording();
    let cfg = ErpConfig { artifact_criterion: Some(0.5), ..config() };
    let err = run_erp(&mut rec, &events(), &cfg).unwrap_err();
    assert!(matches!(err, EegError::InvalidArgument(ref m) if m.contains("all segments were dropped")));
}

#[test]
fn unknown_label_lists_valid_codes() {
    let mut rec = recording();
    let cfg = ErpConfig { labels: vec!["NOPE".into()], categories: None, ..config() };
    let err = run_erp(&mut rec, &events(), &cfg).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("NOPE") && msg.contains("DIN") && msg.contains("TRSP"), "{msg}");
}

#[test]
fn category_entirely_out_of_range_is_an_error() {
    let mut rec = recording();
    let table = EventTable::new(vec![
        Event { code: "A".into(), time: 2.0 },
        Event { code: "B".into(), time: 9.9 },
    ]);
    let cfg = ErpConfig { labels: vec!["A".into(), "B".into()], categories: None, ..config() };
    let err = run_erp(&mut rec, &table, &cfg).unwrap_err();
    assert!(err.to_string().contains("\"B\""), "{err}");
}

#[test]
fn bad_channels_merge_recording_and_config() {
    let mut rec = recording();
    rec.set_metadata("bad_channels", "[3]").unwrap();
    let cfg = ErpConfig { bad_channels: vec![3, 1], ..config() };
    let out = run_erp(&mut rec, &events(), &cfg).unwrap();
    assert_eq!(out.averages.bad_channels(), &[1, 3]);
    let tl = out.averages.build_timeline().unwrap();
    assert_eq!(tl[0].bad_channels, vec![1, 3]);
}

#[test]
fn average_reference_zeroes_channel_sum() {
    let mut rec = recording();
    let cfg = ErpConfig { average_reference: true, ..config() };
    let out = run_erp(&mut rec, &events(), &cfg).unwrap();
    assert!(out.averages.average_reference_on());
    for avg in out.averages.iter() {
        for &s in avg.data.sum_axis(Axis(0)).iter() {
            approx::assert_abs_diff_eq!(s, 0.0, epsilon = 1e-2);
        }
    }
}

#[test]
fn invalid_config_fails_before_reading() {
    let mut rec = recording();
    let cfg = ErpConfig { right_padding: -1.0, ..config() };
    assert!(matches!(
        run_erp(&mut rec, &events(), &cfg),
        Err(EegError::InvalidArgument(_))
    ));
}

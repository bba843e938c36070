mod common;
use common::MockReader;
use evoked::segment::Segmenter;
use evoked::{Average, Averages, EegError};
use ndarray::{Array2, Axis};
use std::collections::BTreeMap;

fn five_segments(value: f32) -> Vec<Array2<f32>> {
    (0..5)
        .map(|i| Array2::from_elem((4, 50), value + i as f32))
        .collect()
}

#[test]
fn timeline_for_three_categories() {
    let build = || {
        let mut avgs = Averages::new(5, 100.0, vec![2]);
        for (label, v) in [("std", 0.0), ("dev", 10.0), ("tgt", 20.0)] {
            avgs.add(label, &five_segments(v)).unwrap();
        }
        avgs.build_timeline().unwrap()
    };
    let tl = build();
    assert_eq!(tl, build());

    let names: Vec<&str> = tl.iter().map(|e| e.category.as_str()).collect();
    assert_eq!(names, vec!["std", "dev", "tgt"]);
    for (i, e) in tl.iter().enumerate() {
        assert_eq!(e.begin_time, 500_000 * i as u64);
        assert_eq!(e.end_time - e.begin_time, 500_000);
        assert_eq!(e.event_begin, e.begin_time + 50_000);
        assert_eq!(e.event_begin, e.event_end);
        assert_eq!(e.num_segments, 5);
        assert_eq!(e.status, "unedited");
    }
    for pair in tl.windows(2) {
        assert!(pair[0].end_time <= pair[1].begin_time);
        assert!(pair[0].event_begin < pair[1].event_begin);
    }
}

#[test]
fn averages_of_extracted_segments() {
    // Timestamped data: the mean of windows at 3 s and 5 s is the window at 4 s.
    let reader = MockReader::timestamped(2, 10.0, &[(0.0, 10.0)]);
    let mut seg = Segmenter::new(reader);
    let mut req = BTreeMap::new();
    req.insert("a".to_string(), vec![3.0, 5.0]);
    req.insert("b".to_string(), vec![4.0]);
    let out = seg.extract_segments(&req, 1.0, 1.0).unwrap();

    let mut avgs = Averages::with_center_seconds(1.0, 10.0, vec![]).unwrap();
    assert_eq!(avgs.center_samples(), 10);
    avgs.add("a", &out.segments["a"]).unwrap();
    avgs.add("b", &out.segments["b"]).unwrap();
    let a = avgs.data("a").unwrap();
    let b = avgs.data("b").unwrap();
    for (x, y) in a.iter().zip(b.iter()) {
        approx::assert_abs_diff_eq!(*x, *y, epsilon = 1e-4);
    }
}

#[test]
fn average_reference_after_and_before_adding_agree() {
    let seg = Array2::from_shape_fn((6, 30), |(c, t)| ((c + 1) * t) as f32 * 0.1);
    let bads = vec![2, 6];

    let mut late = Averages::new(10, 100.0, bads.clone());
    late.add("a", &[seg.clone()]).unwrap();
    late.set_average_reference().unwrap();

    let mut early = Averages::new(10, 100.0, bads);
    early.set_average_reference().unwrap();
    early.add("a", &[seg]).unwrap();

    assert_eq!(late.data("a"), early.data("a"));
    // Good channels (1-based 1, 3, 4, 5) average to zero.
    let data = late.data("a").unwrap();
    let good = data.select(Axis(0), &[0, 2, 3, 4]);
    for &m in good.mean_axis(Axis(0)).unwrap().iter() {
        approx::assert_abs_diff_eq!(m, 0.0, epsilon = 1e-4);
    }
}

#[test]
fn reference_with_all_channels_bad_fails() {
    let mut avgs = Averages::new(0, 100.0, vec![1, 2]);
    avgs.add("a", &[Array2::ones((2, 10))]).unwrap();
    assert!(matches!(avgs.set_average_reference(), Err(EegError::InvalidArgument(_))));
}

#[test]
fn independent_averages_validate_on_combine() {
    let a = Average::new("a", &five_segments(0.0), 5, 100.0, vec![]).unwrap();
    let b = Average::new("b", &five_segments(1.0), 5, 100.0, vec![]).unwrap();
    let combined = Averages::from_averages(vec![a.clone(), b]).unwrap();
    assert_eq!(combined.labels(), vec!["a", "b"]);
    assert_eq!(combined.num_segments("b"), Some(5));
    approx::assert_abs_diff_eq!(combined.data("a").unwrap()[[0, 0]], 2.0);

    let odd = Average::new("c", &[Array2::zeros((4, 51))], 5, 100.0, vec![]).unwrap();
    assert!(matches!(
        Averages::from_averages(vec![a, odd]),
        Err(EegError::Shape(_))
    ));
    assert!(Averages::from_averages(vec![]).is_err());
}

#[test]
fn center_beyond_block_is_rejected_for_independent_average() {
    let err = Average::new("a", &[Array2::zeros((2, 10))], 11, 100.0, vec![]).unwrap_err();
    assert!(matches!(err, EegError::InvalidArgument(_)));
}

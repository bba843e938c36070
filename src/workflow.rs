//! End-to-end ERP workflow.
//!
//! ```text
//! events ─┐
//!         ├─ Segmenter          filter each epoch once, cut windows
//! reader ─┘    │
//!              ├─ drop_bad_segments   optional peak-to-peak rejection
//!              ├─ Averages::add       one block per category, in label order
//!              └─ set_average_reference   optional
//! ```
//!
//! Every step appends a [`HistoryEntry`] describing its settings and results.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::artifact::drop_bad_segments;
use crate::average::Averages;
use crate::config::ErpConfig;
use crate::epoch::RecordingReader;
use crate::error::{EegError, Result};
use crate::io::EventTable;
use crate::segment::{Segmenter, Segments};

/// One processing step, as recorded in the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub method: String,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub settings: Vec<String>,
    #[serde(default)]
    pub results: Vec<String>,
}

impl HistoryEntry {
    fn new(name: &str, method: &str, begin_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            method: method.into(),
            begin_time,
            end_time,
            source_files: vec![],
            settings: vec![],
            results: vec![],
        }
    }
}

/// Averages plus a record of how they were produced.
#[derive(Debug, Clone)]
pub struct ErpOutput {
    pub averages: Averages,
    pub history: Vec<HistoryEntry>,
    /// Requested times whose window did not fit in the data, per category.
    pub out_of_range: BTreeMap<String, Vec<f64>>,
    /// Segments removed by artifact rejection, per category.
    pub dropped: BTreeMap<String, usize>,
}

impl ErpOutput {
    /// Stamp every history entry with the file the averages came from.
    pub fn set_source_file(&mut self, path: &str) {
        for entry in &mut self.history {
            entry.source_files = vec![path.to_string()];
        }
    }
}

/// Segment, clean, average and optionally re-reference `reader` around the
/// events in `events` selected by `cfg.labels`.
pub fn run_erp<R: RecordingReader>(
    reader: &mut R,
    events: &EventTable,
    cfg: &ErpConfig,
) -> Result<ErpOutput> {
    cfg.validate()?;
    let sr = reader.sampling_rate();
    let center_samples = cfg.center_samples(sr)?;
    let category_labels = cfg.category_labels();

    // ── Event lookup ──────────────────────────────────────────────────────────
    let mut requests: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (category, label) in &category_labels {
        let times = events.times(label).ok_or_else(|| {
            EegError::InvalidArgument(format!(
                "label \"{label}\" not found among events. Valid event labels: {:?}",
                events.codes()
            ))
        })?;
        requests.insert(category.clone(), times);
    }

    // ── Segmentation ──────────────────────────────────────────────────────────
    let seg_start = Utc::now();
    let segmented = Segmenter::new(&mut *reader)
        .with_filter(cfg.filter_order, cfg.highpass, cfg.lowpass)
        .extract_segments(&requests, cfg.left_padding, cfg.right_padding)?;
    let seg_end = Utc::now();

    for (category, _) in &category_labels {
        if !segmented.segments.contains_key(category) {
            return Err(EegError::InvalidArgument(format!(
                "all segments for category \"{category}\" extended beyond data range"
            )));
        }
    }

    let mut history = Vec::new();
    for (kind, freq) in [("Highpass", cfg.highpass), ("Lowpass", cfg.lowpass)] {
        if let Some(freq) = freq {
            let mut entry =
                HistoryEntry::new(&format!("ERP Workflow {kind} Filter"), "Filtering", seg_start, seg_end);
            entry.kind = Some("Transformation".into());
            entry.settings = vec![
                format!("Filter Setting: {freq} Hz {kind}"),
                "Filter Type: IIR Butterworth".into(),
                format!("Filter Order: {}", cfg.filter_order),
            ];
            history.push(entry);
        }
    }

    let total: usize = segmented.segments.values().map(Vec::len).sum();
    let mut seg_entry = HistoryEntry::new("ERP Workflow Segmentation", "Segmentation", seg_start, seg_end);
    seg_entry
        .results
        .push(format!("Segmented to {} categories and {total} segments", category_labels.len()));
    for (category, label) in &category_labels {
        seg_entry.settings.extend([
            format!("Rules for category \"{category}\""),
            format!("    Milliseconds Before: {}", cfg.left_padding * 1000.0),
            format!("    Milliseconds After: {}", cfg.right_padding * 1000.0),
            "    Milliseconds Offset: 0".into(),
            "    Event 1:".into(),
            format!("        Code is \"{label}\""),
        ]);
        seg_entry.results.extend([
            format!("Results for category \"{category}\""),
            format!("    {} segment(s) created", segmented.count(category)),
        ]);
        if let Some(missed) = segmented.out_of_range.get(category) {
            seg_entry.results.push(format!(
                "    {} segment(s) could not be created because they extended beyond data range",
                missed.len()
            ));
        }
    }
    history.push(seg_entry);

    let Segments { mut segments, out_of_range } = segmented;

    // ── Artifact rejection ────────────────────────────────────────────────────
    let mut dropped = BTreeMap::new();
    if let Some(criterion) = cfg.artifact_criterion {
        let start = Utc::now();
        let mut results = Vec::new();
        for (category, _) in &category_labels {
            let segs = segments.remove(category).unwrap_or_default();
            let before = segs.len();
            let (kept, n_dropped) = drop_bad_segments(segs, criterion);
            if kept.is_empty() {
                return Err(EegError::InvalidArgument(format!(
                    "all segments were dropped for category \"{category}\" with {criterion} \
                     peak-to-peak amplitude criterion"
                )));
            }
            results.extend([
                format!("Results for category \"{category}\""),
                format!("    {n_dropped} out of {before} segments dropped"),
            ]);
            dropped.insert(category.clone(), n_dropped);
            segments.insert(category.clone(), kept);
        }
        let mut entry =
            HistoryEntry::new("ERP Workflow Artifact Detection", "Artifact Detection", start, Utc::now());
        entry.settings = vec![
            format!("Bad Channel Threshold: Max - Min > {criterion}"),
            "Mark segment bad if it contains any bad channels".into(),
        ];
        entry.results = results;
        history.push(entry);
    }

    // ── Averaging ─────────────────────────────────────────────────────────────
    let start = Utc::now();
    let mut bad_channels = reader.bad_channels();
    bad_channels.extend(cfg.bad_channels.iter().copied());
    bad_channels.sort_unstable();
    bad_channels.dedup();

    let mut averages = Averages::new(center_samples, sr, bad_channels);
    for (category, _) in &category_labels {
        let segs = segments.get(category).map(Vec::as_slice).unwrap_or_default();
        averages.add(category.as_str(), segs)?;
    }
    let mut entry = HistoryEntry::new("ERP Workflow Averaging", "Averaging", start, Utc::now());
    entry.settings = vec![
        "Handle source files separately".into(),
        "Subjects are not averaged together".into(),
    ];
    entry.results = averages
        .iter()
        .map(|a| format!("{} segments averaged for category \"{}\"", a.num_segments, a.label))
        .collect();
    history.push(entry);

    // ── Average reference ─────────────────────────────────────────────────────
    if cfg.average_reference {
        let start = Utc::now();
        averages.set_average_reference()?;
        let mut entry =
            HistoryEntry::new("ERP Workflow Average Reference", "Montage Operations Tool", start, Utc::now());
        entry.settings = vec!["Average Reference".into()];
        history.push(entry);
    }

    info!(
        "averaged {} categories at {sr} Hz ({} ch × {} samples)",
        averages.len(),
        averages.iter().next().map_or(0, |a| a.data.nrows()),
        averages.iter().next().map_or(0, |a| a.data.ncols()),
    );

    Ok(ErpOutput { averages, history, out_of_range, dropped })
}

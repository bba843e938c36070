//! Safetensors I/O for recordings, event tables and averages.
//!
//! ## Recording layout
//!
//! | key        | dtype     | shape    | content                               |
//! |------------|-----------|----------|---------------------------------------|
//! | `data`     | F32       | `[C, T]` | all epochs concatenated               |
//! | `sfreq`    | F32 / F64 | `[1]`    | sampling rate (Hz)                    |
//! | `epochs`   | F64       | `[E, 2]` | `(t0, t1)` seconds, optional          |
//!
//! Without `epochs` the recording is one epoch `[0, T / sfreq)`. Each epoch
//! owns `round((t1 − t0) · sfreq)` consecutive columns of `data`.
//! `__metadata__` may carry `start_time`, `device`, `bad_channels` (JSON
//! list of 1-based numbers) and `history` (JSON list of entries).
//!
//! ## Averages layout
//!
//! `avg_<i>` F32 `[C, T]` per category in order, `sfreq` F64 `[1]`, and
//! `__metadata__` strings `start_time`, `device`, `categories` (JSON
//! timeline) and `history` (JSON).
use anyhow::{anyhow, bail, Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::average::{Average, Averages, TimelineEntry};
use crate::epoch::{Epoch, RecordingReader};
use crate::error::EegError;
use crate::segment::seconds_to_samples;
use crate::workflow::HistoryEntry;

// ── Low-level safetensors parser ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TensorEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

struct StFile {
    bytes: Vec<u8>,
    data_start: usize,
    tensors: HashMap<String, TensorEntry>,
    metadata: BTreeMap<String, String>,
}

impl StFile {
    fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(bytes)
    }

    fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 8 {
            bail!("safetensors file too small");
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = u64::from_le_bytes(len) as usize;
        let header_bytes = bytes
            .get(8..8usize.saturating_add(n))
            .context("safetensors header extends past end of file")?;
        let header: HashMap<String, serde_json::Value> =
            serde_json::from_slice(header_bytes).context("failed to parse safetensors header")?;

        let mut tensors = HashMap::new();
        let mut metadata = BTreeMap::new();
        for (key, val) in header {
            if key == "__metadata__" {
                metadata = serde_json::from_value(val).context("__metadata__ must map strings to strings")?;
            } else {
                let entry: TensorEntry = serde_json::from_value(val)
                    .with_context(|| format!("malformed header entry '{key}'"))?;
                tensors.insert(key, entry);
            }
        }
        Ok(Self { bytes, data_start: 8 + n, tensors, metadata })
    }

    fn entry(&self, key: &str) -> Result<&TensorEntry> {
        self.tensors.get(key).with_context(|| format!("missing '{key}' key"))
    }

    fn raw(&self, entry: &TensorEntry) -> Result<&[u8]> {
        let [s, e] = entry.data_offsets;
        let range = self
            .data_start
            .checked_add(s)
            .zip(self.data_start.checked_add(e))
            .context("tensor data extends past end of file")?;
        self.bytes
            .get(range.0..range.1)
            .context("tensor data extends past end of file")
    }

    fn f32_tensor(&self, key: &str) -> Result<(Vec<f32>, Vec<usize>)> {
        let entry = self.entry(key)?;
        if entry.dtype != "F32" {
            bail!("'{key}': expected F32, got {}", entry.dtype);
        }
        let vals = self
            .raw(entry)?
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok((vals, entry.shape.clone()))
    }

    /// F32 or F64 tensor widened to f64.
    fn f64_tensor(&self, key: &str) -> Result<(Vec<f64>, Vec<usize>)> {
        let entry = self.entry(key)?;
        let raw = self.raw(entry)?;
        let vals = match entry.dtype.as_str() {
            "F32" => raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            "F64" => raw
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            other => bail!("'{key}': expected F32 or F64, got {other}"),
        };
        Ok((vals, entry.shape.clone()))
    }

    fn arr2(&self, key: &str) -> Result<Array2<f32>> {
        let (vals, shape) = self.f32_tensor(key)?;
        match shape.as_slice() {
            &[c, t] => Ok(Array2::from_shape_vec((c, t), vals)?),
            other => bail!("'{key}' must be 2-dimensional, got shape {other:?}"),
        }
    }

    fn scalar(&self, key: &str) -> Result<f64> {
        let (vals, _) = self.f64_tensor(key)?;
        vals.first().copied().with_context(|| format!("'{key}' is empty"))
    }

    fn json_meta<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.metadata
            .get(key)
            .map(|s| serde_json::from_str(s).with_context(|| format!("metadata '{key}'")))
            .transpose()
    }
}

// ── Recording ─────────────────────────────────────────────────────────────────

/// Continuous recording held in memory, read epoch by epoch.
#[derive(Debug, Clone)]
pub struct Recording {
    data: Array2<f32>,
    sfreq: f64,
    epochs: Vec<Epoch>,
    /// First column of each epoch in `data`.
    offsets: Vec<usize>,
    metadata: BTreeMap<String, String>,
    /// Parsed from the `bad_channels` metadata entry.
    bad_channels: Vec<usize>,
}

impl Recording {
    /// Build from a concatenated `[C, T]` block and its epoch table.
    ///
    /// An empty epoch table means one epoch spanning the whole block.
    pub fn new(data: Array2<f32>, sfreq: f64, epochs: Vec<Epoch>) -> Result<Self> {
        if !(sfreq > 0.0) {
            bail!("sampling rate must be positive, got {sfreq}");
        }
        let epochs = if epochs.is_empty() {
            vec![Epoch::new(0.0, data.ncols() as f64 / sfreq)]
        } else {
            epochs
        };
        let mut offsets = Vec::with_capacity(epochs.len());
        let mut next = 0usize;
        let mut prev_end = f64::NEG_INFINITY;
        for e in &epochs {
            if !(e.t0 < e.t1) || e.t0 < prev_end {
                bail!("epochs must be ordered and non-overlapping: [{}, {})", e.t0, e.t1);
            }
            prev_end = e.t1;
            offsets.push(next);
            next += seconds_to_samples(e.duration(), sfreq).max(0) as usize;
        }
        if next != data.ncols() {
            bail!(
                "epoch table covers {next} samples but data has {} samples",
                data.ncols()
            );
        }
        Ok(Self {
            data,
            sfreq,
            epochs,
            offsets,
            metadata: BTreeMap::new(),
            bad_channels: vec![],
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let st = StFile::open(path)?;
        let data = st.arr2("data")?;
        let sfreq = st.scalar("sfreq")?;

        let epochs = if st.tensors.contains_key("epochs") {
            let (vals, shape) = st.f64_tensor("epochs")?;
            if shape.len() != 2 || shape[1] != 2 {
                bail!("'epochs' must have shape [E, 2], got {shape:?}");
            }
            vals.chunks_exact(2).map(|p| Epoch::new(p[0], p[1])).collect()
        } else {
            vec![]
        };

        let mut rec = Self::new(data, sfreq, epochs)
            .with_context(|| format!("loading {}", path.display()))?;
        rec.bad_channels = st
            .json_meta("bad_channels")
            .with_context(|| format!("loading {}", path.display()))?
            .unwrap_or_default();
        rec.metadata = st.metadata;
        log::debug!(
            "loaded {}: {} ch × {} samples @ {} Hz, {} epochs",
            path.display(),
            rec.data.nrows(),
            rec.data.ncols(),
            rec.sfreq,
            rec.epochs.len()
        );
        Ok(rec)
    }

    /// Write in the layout [`load`](Self::load) reads.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = StWriter::new();
        w.add_f32_arr2("data", &self.data);
        w.add_f64("sfreq", &[self.sfreq], &[1]);
        let table: Vec<f64> = self.epochs.iter().flat_map(|e| [e.t0, e.t1]).collect();
        w.add_f64("epochs", &table, &[self.epochs.len(), 2]);
        for (k, v) in &self.metadata {
            w.add_metadata(k, v);
        }
        w.write(path)
    }

    /// Set a metadata entry. A `bad_channels` value must be a JSON list of
    /// 1-based channel numbers.
    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        if key == "bad_channels" {
            self.bad_channels = serde_json::from_str(&value)
                .with_context(|| format!("metadata 'bad_channels': {value:?}"))?;
        }
        self.metadata.insert(key.to_string(), value);
        Ok(())
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn device(&self) -> Option<&str> {
        self.metadata.get("device").map(String::as_str)
    }

    /// Processing history carried over from earlier steps.
    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        match self.metadata.get("history") {
            Some(s) => serde_json::from_str(s).context("metadata 'history'"),
            None => Ok(vec![]),
        }
    }
}

impl RecordingReader for Recording {
    fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    fn sampling_rate(&self) -> f64 {
        self.sfreq
    }

    fn start_time(&self) -> Option<String> {
        self.metadata.get("start_time").cloned()
    }

    fn bad_channels(&self) -> Vec<usize> {
        self.bad_channels.clone()
    }

    fn read_epoch(&mut self, epoch: &Epoch) -> crate::Result<Array2<f32>> {
        let idx = self
            .epochs
            .iter()
            .position(|e| e == epoch)
            .ok_or_else(|| EegError::Format(format!("no epoch [{}, {}) in recording", epoch.t0, epoch.t1)))?;
        let start = self.offsets[idx];
        let stop = self.offsets.get(idx + 1).copied().unwrap_or(self.data.ncols());
        Ok(self.data.slice(ndarray::s![.., start..stop]).to_owned())
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub code: String,
    /// Seconds from recording start.
    pub time: f64,
}

/// Event markers, looked up by code.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    events: Vec<Event>,
}

impl EventTable {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Read a JSON list of `{"code": .., "time": ..}` objects.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let events: Vec<Event> =
            serde_json::from_str(&text).with_context(|| format!("parsing events in {}", path.display()))?;
        Ok(Self::new(events))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn codes(&self) -> BTreeSet<&str> {
        self.events.iter().map(|e| e.code.as_str()).collect()
    }

    /// Sorted times for `code`, or `None` if the code never occurs.
    pub fn times(&self, code: &str) -> Option<Vec<f64>> {
        let mut times: Vec<f64> = self
            .events
            .iter()
            .filter(|e| e.code == code)
            .map(|e| e.time)
            .collect();
        if times.is_empty() {
            return None;
        }
        times.sort_by(f64::total_cmp);
        Some(times)
    }
}

// ── Averages ──────────────────────────────────────────────────────────────────

/// Everything written alongside the averaged blocks.
#[derive(Debug, Clone, Default)]
pub struct AveragesMeta {
    pub start_time: Option<String>,
    pub device: String,
    pub history: Vec<HistoryEntry>,
}

/// Write `averages` to a new safetensors file. Fails if `path` exists.
pub fn write_averages(path: &Path, averages: &Averages, meta: &AveragesMeta) -> Result<()> {
    if path.exists() {
        bail!("file exists: '{}'", path.display());
    }
    let timeline = averages.build_timeline()?;

    let mut w = StWriter::new();
    for (i, avg) in averages.iter().enumerate() {
        w.add_f32_arr2(&format!("avg_{i}"), &avg.data);
    }
    w.add_f64("sfreq", &[averages.sample_rate()], &[1]);
    if let Some(t) = &meta.start_time {
        w.add_metadata("start_time", t);
    }
    w.add_metadata("device", &meta.device);
    w.add_metadata("categories", &serde_json::to_string(&timeline)?);
    w.add_metadata("history", &serde_json::to_string(&meta.history)?);
    w.write(path)
        .with_context(|| format!("writing averages to {}", path.display()))
}

/// Averages read back from [`write_averages`] output.
#[derive(Debug, Clone)]
pub struct AveragesFile {
    pub averages: Averages,
    pub timeline: Vec<TimelineEntry>,
    pub meta: AveragesMeta,
}

pub fn read_averages(path: &Path) -> Result<AveragesFile> {
    let st = StFile::open(path)?;
    let sfreq = st.scalar("sfreq")?;
    let timeline: Vec<TimelineEntry> = st
        .json_meta("categories")?
        .ok_or_else(|| anyhow!("missing 'categories' metadata"))?;

    let mut blocks = Vec::with_capacity(timeline.len());
    for (i, entry) in timeline.iter().enumerate() {
        let data = st.arr2(&format!("avg_{i}"))?;
        let offset_us = entry.event_begin.saturating_sub(entry.begin_time) as f64;
        blocks.push(Average {
            label: entry.category.clone(),
            data,
            num_segments: entry.num_segments,
            center_samples: (offset_us * sfreq / 1e6).round() as usize,
            sample_rate: sfreq,
            bad_channels: entry.bad_channels.clone(),
        });
    }
    let averages = Averages::from_averages(blocks)?;
    let meta = AveragesMeta {
        start_time: st.metadata.get("start_time").cloned(),
        device: st.metadata.get("device").cloned().unwrap_or_default(),
        history: st.json_meta("history")?.unwrap_or_default(),
    };
    Ok(AveragesFile { averages, timeline, meta })
}

// ── Generic safetensors builder ───────────────────────────────────────────────

/// Simple safetensors file writer for F32 and F64 tensors plus string
/// metadata.
///
/// Usage:
/// ```rust,no_run
/// use evoked::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f32("signal", &[1.0f32, 2.0, 3.0], &[1, 3]);
/// w.add_f64("sfreq", &[250.0], &[1]);
/// w.add_metadata("device", "HydroCel GSN 256 1.0");
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
    metadata: BTreeMap<String, String>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_f32_arr2(&mut self, name: &str, arr: &Array2<f32>) {
        let data: Vec<f32> = arr.iter().copied().collect();
        self.add_f32(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        use std::io::Write;
        let mut header_map = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header_map.insert("__metadata__".into(), serde_json::to_value(&self.metadata)?);
        }
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(name.clone(), serde_json::json!({
                "dtype": dtype,
                "shape": shape,
                "data_offsets": [offset, offset + data.len()],
            }));
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes.into_iter()
            .chain(std::iter::repeat(b' ').take(pad))
            .collect();
        let mut f = std::fs::File::create(path)?;
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epochs_map_to_column_ranges() {
        let data = Array2::from_shape_fn((2, 10), |(c, t)| (c * 10 + t) as f32);
        let mut rec = Recording::new(data, 2.0, vec![Epoch::new(0.0, 2.0), Epoch::new(5.0, 8.0)]).unwrap();
        let second = rec.read_epoch(&Epoch::new(5.0, 8.0)).unwrap();
        assert_eq!(second.dim(), (2, 6));
        assert_eq!(second[[0, 0]], 4.0);
        assert_eq!(second[[1, 5]], 19.0);
    }

    #[test]
    fn epoch_table_must_cover_data() {
        let data = Array2::<f32>::zeros((1, 10));
        assert!(Recording::new(data.clone(), 2.0, vec![Epoch::new(0.0, 2.0)]).is_err());
        assert!(Recording::new(data, 2.0, vec![Epoch::new(0.0, 3.0), Epoch::new(2.5, 4.5)]).is_err());
    }

    #[test]
    fn unknown_epoch_is_format_error() {
        let mut rec = Recording::new(Array2::zeros((1, 4)), 2.0, vec![]).unwrap();
        let err = rec.read_epoch(&Epoch::new(1.0, 2.0)).unwrap_err();
        assert!(matches!(err, EegError::Format(_)));
    }

    #[test]
    fn event_times_sorted_per_code() {
        let table = EventTable::new(vec![
            Event { code: "b".into(), time: 3.0 },
            Event { code: "a".into(), time: 2.0 },
            Event { code: "b".into(), time: 1.0 },
        ]);
        assert_eq!(table.times("b"), Some(vec![1.0, 3.0]));
        assert_eq!(table.times("c"), None);
        assert_eq!(table.codes().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn overflowing_tensor_offsets_are_rejected() {
        let header = format!(
            r#"{{"x":{{"dtype":"F32","shape":[1],"data_offsets":[{},{}]}}}}"#,
            usize::MAX - 2,
            usize::MAX
        );
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        let st = StFile::parse(bytes).unwrap();
        let err = st.f32_tensor("x").unwrap_err();
        assert!(err.to_string().contains("extends past end of file"), "{err}");
    }

    #[test]
    fn header_is_eight_byte_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.safetensors");
        let mut w = StWriter::new();
        w.add_f32("x", &[1.0, 2.0, 3.0], &[3]);
        w.add_metadata("k", "v");
        w.write(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let n = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        assert_eq!(n % 8, 0);
        let st = StFile::parse(bytes).unwrap();
        assert_eq!(st.metadata.get("k").map(String::as_str), Some("v"));
        assert_eq!(st.f32_tensor("x").unwrap().0, vec![1.0, 2.0, 3.0]);
    }
}

/// Shared helpers: synthetic signals and an in-memory recording reader.
use evoked::{EegError, Epoch, RecordingReader};
use ndarray::Array2;
use std::f32::consts::PI;

#[allow(unused)]
/// Sum of unit sines at `freqs` (Hz), identical on every channel.
pub fn sines(n_ch: usize, n_t: usize, sfreq: f32, freqs: &[f32]) -> Array2<f32> {
    Array2::from_shape_fn((n_ch, n_t), |(_, t)| {
        let ti = t as f32 / sfreq;
        freqs.iter().map(|f| (2.0 * PI * f * ti).sin()).sum()
    })
}

#[allow(unused)]
/// Root mean square of `x`.
pub fn rms(x: &[f32]) -> f32 {
    (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
}

#[allow(unused)]
/// Maximum absolute difference between two arrays.
pub fn max_abs_diff(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0_f32, f32::max)
}

/// Reader over per-epoch blocks held in memory; counts reads.
#[allow(unused)]
pub struct MockReader {
    pub epochs: Vec<Epoch>,
    pub blocks: Vec<Array2<f32>>,
    pub sfreq: f64,
    pub bads: Vec<usize>,
    pub reads: usize,
    /// Index of an epoch whose read fails.
    pub fail_on: Option<usize>,
}

#[allow(unused)]
impl MockReader {
    /// Each epoch's sample at column `t` of channel `c` holds
    /// `100·c + t0 + t / sfreq`, so a value identifies its absolute time.
    pub fn timestamped(n_ch: usize, sfreq: f64, epochs: &[(f64, f64)]) -> Self {
        let epochs: Vec<Epoch> = epochs.iter().map(|&(a, b)| Epoch::new(a, b)).collect();
        let blocks = epochs
            .iter()
            .map(|e| {
                let n_t = ((e.t1 - e.t0) * sfreq).round() as usize;
                Array2::from_shape_fn((n_ch, n_t), |(c, t)| {
                    (100.0 * c as f64 + e.t0 + t as f64 / sfreq) as f32
                })
            })
            .collect();
        Self { epochs, blocks, sfreq, bads: vec![], reads: 0, fail_on: None }
    }
}

impl RecordingReader for MockReader {
    fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    fn sampling_rate(&self) -> f64 {
        self.sfreq
    }

    fn bad_channels(&self) -> Vec<usize> {
        self.bads.clone()
    }

    fn read_epoch(&mut self, epoch: &Epoch) -> evoked::Result<Array2<f32>> {
        let idx = self
            .epochs
            .iter()
            .position(|e| e == epoch)
            .ok_or_else(|| EegError::Format("unknown epoch".into()))?;
        if self.fail_on == Some(idx) {
            return Err(EegError::Format(format!("corrupt block in epoch {idx}")));
        }
        self.reads += 1;
        Ok(self.blocks[idx].clone())
    }
}

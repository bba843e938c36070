//! Butterworth IIR design in second-order-section form, matching
//! `scipy.signal.butter(order, Wn, btype, output='sos')`.
//!
//! Steps (all in `f64`):
//!   • analog prototype     p_k = −exp(jπ(2k − N + 1) / 2N),  k = 0..N
//!   • pre-warp             ω = 4·tan(π·Wn / 2)            (fs = 2)
//!   • frequency transform  lp2lp / lp2hp / lp2bp / lp2bs
//!   • bilinear transform   z = (4 + s) / (4 − s)
//!   • zpk → sos            nearest pole/zero pairing, gain in section 0
//!
//! `Wn` is the cutoff normalised to half-cycles per sample: `2·f / sfreq`.
//!
//! Designs are memoised by the exact `(order, sfreq, low, high)` bit
//! pattern in a bounded least-recently-used cache ([`CACHE_CAPACITY`]).
use std::collections::{HashMap, VecDeque};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustfft::num_complex::Complex64;

use crate::error::{EegError, Result};

/// Number of designs kept by the process-wide coefficient cache.
pub const CACHE_CAPACITY: usize = 128;

static CACHE: Lazy<Mutex<CoefficientCache>> =
    Lazy::new(|| Mutex::new(CoefficientCache::new(CACHE_CAPACITY)));

// ── Filter specification ──────────────────────────────────────────────────

/// Which band the designed filter passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Highpass,
    Lowpass,
    Bandpass,
    Bandstop,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterKind::Highpass => "highpass",
            FilterKind::Lowpass => "lowpass",
            FilterKind::Bandpass => "bandpass",
            FilterKind::Bandstop => "bandstop",
        };
        f.write_str(s)
    }
}

/// Butterworth design parameters.
///
/// `low_cut` and `high_cut` are in the same unit as `sample_rate` (Hz for
/// samples/sec). Which of the two is present, and their relative order,
/// selects the [`FilterKind`]:
///
/// | `low_cut` | `high_cut` | kind                            |
/// |-----------|------------|---------------------------------|
/// | `a`       | `b`, a < b | bandpass over `[a, b]`          |
/// | `a`       | `b`, a > b | bandstop over `[b, a]`          |
/// | `a`       | `a`        | error                           |
/// | `a`       | —          | highpass at `a`                 |
/// | —         | `b`        | lowpass at `b`                  |
/// | —         | —          | error                           |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub order: usize,
    pub sample_rate: f64,
    pub low_cut: Option<f64>,
    pub high_cut: Option<f64>,
}

impl FilterSpec {
    pub fn new(order: usize, sample_rate: f64, low_cut: Option<f64>, high_cut: Option<f64>) -> Self {
        Self { order, sample_rate, low_cut, high_cut }
    }

    /// Resolve the filter kind from the cutoffs that are present.
    pub fn kind(&self) -> Result<FilterKind> {
        match (self.low_cut, self.high_cut) {
            (Some(lo), Some(hi)) if lo < hi => Ok(FilterKind::Bandpass),
            (Some(lo), Some(hi)) if lo > hi => Ok(FilterKind::Bandstop),
            (Some(_), Some(_)) => Err(EegError::InvalidArgument(
                "low and high cutoffs cannot be equal".into(),
            )),
            (Some(_), None) => Ok(FilterKind::Highpass),
            (None, Some(_)) => Ok(FilterKind::Lowpass),
            (None, None) => Err(EegError::InvalidArgument(
                "neither low nor high cutoff provided".into(),
            )),
        }
    }

    fn validate(&self) -> Result<FilterKind> {
        let kind = self.kind()?;
        if self.order == 0 {
            return Err(EegError::InvalidArgument("filter order must be >= 1".into()));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(EegError::InvalidArgument(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        for f in self.low_cut.iter().chain(self.high_cut.iter()) {
            let wn = 2.0 * f / self.sample_rate;
            if !(f.is_finite() && wn > 0.0 && wn < 1.0) {
                return Err(EegError::InvalidArgument(format!(
                    "cutoff {f} Hz must lie strictly between 0 and Nyquist ({} Hz)",
                    self.sample_rate / 2.0
                )));
            }
        }
        Ok(kind)
    }

    fn key(&self) -> SpecKey {
        SpecKey {
            order: self.order,
            sample_rate: self.sample_rate.to_bits(),
            low_cut: self.low_cut.map(f64::to_bits),
            high_cut: self.high_cut.map(f64::to_bits),
        }
    }
}

/// Exact-bit cache key: two specs share a design only if every float is
/// bit-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SpecKey {
    order: usize,
    sample_rate: u64,
    low_cut: Option<u64>,
    high_cut: Option<u64>,
}

// ── Coefficients ──────────────────────────────────────────────────────────

/// Cascade of biquads, one row `[b0, b1, b2, a0, a1, a2]` per section.
///
/// `a0` is always `1`. The overall gain lives in the numerator of section 0.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondOrderSections {
    sections: Vec<[f64; 6]>,
}

impl SecondOrderSections {
    pub fn sections(&self) -> &[[f64; 6]] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Magnitude response at DC, `∏ Σb / Σa`.
    pub fn dc_gain(&self) -> f64 {
        self.sections
            .iter()
            .map(|s| (s[0] + s[1] + s[2]) / (s[3] + s[4] + s[5]))
            .product()
    }
}

// ── Public entry points ───────────────────────────────────────────────────

/// Design (or fetch from the process-wide cache) a Butterworth filter.
///
/// ```
/// use evoked::filter::butter;
///
/// let sos = butter(4, 250.0, Some(1.0), Some(40.0)).unwrap();
/// assert_eq!(sos.len(), 4); // bandpass doubles the pole count
/// ```
pub fn butter(
    order: usize,
    sample_rate: f64,
    low_cut: Option<f64>,
    high_cut: Option<f64>,
) -> Result<Arc<SecondOrderSections>> {
    let spec = FilterSpec::new(order, sample_rate, low_cut, high_cut);
    let key = spec.key();
    if let Some(hit) = CACHE.lock().get(&key) {
        log::debug!("filter cache hit: {spec:?}");
        return Ok(hit);
    }
    // Design outside the lock; a racing miss just inserts an equal value.
    let sos = Arc::new(design(&spec)?);
    log::debug!("filter cache miss: designed {} sections for {spec:?}", sos.len());
    CACHE.lock().insert(key, Arc::clone(&sos));
    Ok(sos)
}

/// Design a Butterworth filter without consulting any cache.
pub fn design(spec: &FilterSpec) -> Result<SecondOrderSections> {
    let kind = spec.validate()?;
    let norm = |f: f64| 2.0 * f / spec.sample_rate;
    let proto = butter_prototype(spec.order);

    let analog = match (kind, spec.low_cut, spec.high_cut) {
        (FilterKind::Lowpass, _, Some(hi)) => lp2lp(proto, warp(norm(hi))),
        (FilterKind::Highpass, Some(lo), _) => lp2hp(proto, warp(norm(lo))),
        (FilterKind::Bandpass, Some(lo), Some(hi)) => {
            let (w1, w2) = (warp(norm(lo)), warp(norm(hi)));
            lp2bp(proto, (w1 * w2).sqrt(), w2 - w1)
        }
        (FilterKind::Bandstop, Some(lo), Some(hi)) => {
            // Stop band runs from the smaller edge (high_cut) to the larger.
            let (w1, w2) = (warp(norm(hi)), warp(norm(lo)));
            lp2bs(proto, (w1 * w2).sqrt(), w2 - w1)
        }
        _ => {
            return Err(EegError::Programming(format!(
                "{kind} design without its cutoffs: {spec:?}"
            )))
        }
    };

    Ok(SecondOrderSections { sections: zpk2sos(bilinear(analog)) })
}

// ── Coefficient cache ─────────────────────────────────────────────────────

/// Bounded least-recently-used memo of filter designs.
///
/// Lookups promote the entry to most-recently-used; inserting into a full
/// cache evicts the least-recently-used design.
#[derive(Debug)]
pub struct CoefficientCache {
    map: HashMap<SpecKey, Arc<SecondOrderSections>>,
    order: VecDeque<SpecKey>,
    capacity: usize,
}

impl CoefficientCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Read-through lookup: return the cached design or compute and insert it.
    pub fn get_or_design(&mut self, spec: &FilterSpec) -> Result<Arc<SecondOrderSections>> {
        let key = spec.key();
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let sos = Arc::new(design(spec)?);
        self.insert(key, Arc::clone(&sos));
        Ok(sos)
    }

    pub fn contains(&self, spec: &FilterSpec) -> bool {
        self.map.contains_key(&spec.key())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn get(&mut self, key: &SpecKey) -> Option<Arc<SecondOrderSections>> {
        let hit = self.map.get(key).cloned()?;
        self.touch(key);
        Some(hit)
    }

    fn insert(&mut self, key: SpecKey, value: Arc<SecondOrderSections>) {
        if self.map.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }
        while self.map.len() >= self.capacity {
            let Some(old) = self.order.pop_front() else { break };
            self.map.remove(&old);
            log::debug!("filter cache evicted: {old:?}");
        }
        self.map.insert(key, value);
        self.order.push_back(key);
    }

    fn touch(&mut self, key: &SpecKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

// ── Zero-pole-gain pipeline ───────────────────────────────────────────────

struct Zpk {
    z: Vec<Complex64>,
    p: Vec<Complex64>,
    k: f64,
}

/// Bilinear pre-warping with `fs = 2`: `2·fs·tan(π·Wn / fs)`.
fn warp(wn: f64) -> f64 {
    4.0 * (PI * wn / 2.0).tan()
}

/// Analog Butterworth prototype of order `n` (unit cutoff, no zeros).
fn butter_prototype(n: usize) -> Zpk {
    let p = (0..n)
        .map(|i| {
            let m = 2.0 * i as f64 - n as f64 + 1.0;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n as f64))
        })
        .collect();
    Zpk { z: vec![], p, k: 1.0 }
}

fn prod(v: impl Iterator<Item = Complex64>) -> Complex64 {
    v.fold(Complex64::new(1.0, 0.0), |acc, x| acc * x)
}

fn lp2lp(proto: Zpk, wo: f64) -> Zpk {
    let degree = proto.p.len() - proto.z.len();
    Zpk {
        z: proto.z.iter().map(|&z| z * wo).collect(),
        p: proto.p.iter().map(|&p| p * wo).collect(),
        k: proto.k * wo.powi(degree as i32),
    }
}

fn lp2hp(proto: Zpk, wo: f64) -> Zpk {
    let degree = proto.p.len() - proto.z.len();
    let gain = prod(proto.z.iter().map(|&z| -z)) / prod(proto.p.iter().map(|&p| -p));
    let mut z: Vec<Complex64> = proto.z.iter().map(|&z| wo / z).collect();
    z.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
    Zpk {
        z,
        p: proto.p.iter().map(|&p| wo / p).collect(),
        k: proto.k * gain.re,
    }
}

/// Each root `r` of the scaled prototype splits into `r ± √(r² − ω₀²)`.
fn split_roots(roots: &[Complex64], wo: f64) -> Vec<Complex64> {
    let w2 = Complex64::new(wo * wo, 0.0);
    let plus = roots.iter().map(|&r| r + (r * r - w2).sqrt());
    let minus = roots.iter().map(|&r| r - (r * r - w2).sqrt());
    plus.chain(minus).collect()
}

fn lp2bp(proto: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = proto.p.len() - proto.z.len();
    let z_lp: Vec<Complex64> = proto.z.iter().map(|&z| z * bw / 2.0).collect();
    let p_lp: Vec<Complex64> = proto.p.iter().map(|&p| p * bw / 2.0).collect();
    let mut z = split_roots(&z_lp, wo);
    z.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
    Zpk {
        z,
        p: split_roots(&p_lp, wo),
        k: proto.k * bw.powi(degree as i32),
    }
}

fn lp2bs(proto: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = proto.p.len() - proto.z.len();
    let gain = prod(proto.z.iter().map(|&z| -z)) / prod(proto.p.iter().map(|&p| -p));
    let z_hp: Vec<Complex64> = proto.z.iter().map(|&z| (bw / 2.0) / z).collect();
    let p_hp: Vec<Complex64> = proto.p.iter().map(|&p| (bw / 2.0) / p).collect();
    let mut z = split_roots(&z_hp, wo);
    z.extend(std::iter::repeat(Complex64::new(0.0, wo)).take(degree));
    z.extend(std::iter::repeat(Complex64::new(0.0, -wo)).take(degree));
    Zpk {
        z,
        p: split_roots(&p_hp, wo),
        k: proto.k * gain.re,
    }
}

fn bilinear(analog: Zpk) -> Zpk {
    const FS2: f64 = 4.0;
    let degree = analog.p.len() - analog.z.len();
    let gain = prod(analog.z.iter().map(|&z| FS2 - z)) / prod(analog.p.iter().map(|&p| FS2 - p));
    let mut z: Vec<Complex64> = analog.z.iter().map(|&z| (FS2 + z) / (FS2 - z)).collect();
    z.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
    Zpk {
        z,
        p: analog.p.iter().map(|&p| (FS2 + p) / (FS2 - p)).collect(),
        k: analog.k * gain.re,
    }
}

// ── zpk → sos ─────────────────────────────────────────────────────────────

fn is_real(c: &Complex64) -> bool {
    c.im == 0.0
}

/// Collapse conjugate pairs to their upper-half representative (sorted by
/// real part) followed by the real roots (sorted). Real roots come back with
/// an imaginary part of exactly zero.
fn cplxreal(roots: &[Complex64]) -> Vec<Complex64> {
    let tol = 100.0 * f64::EPSILON;
    let by_re_then_im = |a: &Complex64, b: &Complex64| {
        a.re.total_cmp(&b.re).then(a.im.abs().total_cmp(&b.im.abs()))
    };

    let mut reals: Vec<f64> = roots
        .iter()
        .filter(|r| r.im.abs() <= tol * r.norm())
        .map(|r| r.re)
        .collect();
    reals.sort_by(f64::total_cmp);

    let mut upper: Vec<Complex64> = Vec::new();
    let mut lower: Vec<Complex64> = Vec::new();
    for r in roots.iter().filter(|r| r.im.abs() > tol * r.norm()) {
        if r.im > 0.0 { upper.push(*r) } else { lower.push(*r) }
    }
    upper.sort_by(by_re_then_im);
    lower.sort_by(by_re_then_im);

    upper
        .iter()
        .zip(lower.iter())
        .map(|(&u, &l)| (u + l.conj()) / 2.0)
        .chain(reals.into_iter().map(|r| Complex64::new(r, 0.0)))
        .collect()
}

#[derive(Clone, Copy, PartialEq)]
enum Which {
    Any,
    Real,
    Complex,
}

/// Index of the root in `from` nearest to `to`, restricted by `which`.
fn nearest_idx(from: &[Complex64], to: Complex64, which: Which) -> Option<usize> {
    let mut order: Vec<usize> = (0..from.len()).collect();
    order.sort_by(|&a, &b| (from[a] - to).norm().total_cmp(&(from[b] - to).norm()));
    order.into_iter().find(|&i| match which {
        Which::Any => true,
        Which::Real => is_real(&from[i]),
        Which::Complex => !is_real(&from[i]),
    })
}

/// Real polynomial coefficients (highest power first) with the given roots.
/// Complex roots must come in conjugate pairs.
fn poly(roots: &[Complex64]) -> Vec<f64> {
    let mut c = vec![Complex64::new(1.0, 0.0)];
    for r in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); c.len() + 1];
        for (i, &v) in c.iter().enumerate() {
            next[i] += v;
            next[i + 1] -= v * *r;
        }
        c = next;
    }
    c.into_iter().map(|v| v.re).collect()
}

/// One biquad row, right-aligning shorter polynomials like `zpk2tf` does.
fn single_section(z: &[Complex64], p: &[Complex64]) -> [f64; 6] {
    let mut row = [0.0; 6];
    let b = poly(z);
    let a = poly(p);
    row[3 - b.len()..3].copy_from_slice(&b);
    row[6 - a.len()..6].copy_from_slice(&a);
    row
}

fn take(v: &mut Vec<Complex64>, idx: usize) -> Complex64 {
    v.remove(idx)
}

fn zpk2sos(zpk: Zpk) -> Vec<[f64; 6]> {
    let Zpk { mut z, mut p, k } = zpk;
    let zero = Complex64::new(0.0, 0.0);

    if z.len() < p.len() {
        z.resize(p.len(), zero);
    } else if p.len() < z.len() {
        p.resize(z.len(), zero);
    }
    let n_sections = (p.len() + 1) / 2;
    if p.len() % 2 == 1 {
        p.push(zero);
        z.push(zero);
    }

    let mut z = cplxreal(&z);
    let mut p = cplxreal(&p);
    let mut sos = vec![[0.0; 6]; n_sections];

    // Fill from the back so the poles closest to the unit circle end up last.
    for si in (0..n_sections).rev() {
        let mut worst = 0;
        for (i, pi) in p.iter().enumerate() {
            if (1.0 - pi.norm()).abs() < (1.0 - p[worst].norm()).abs() {
                worst = i;
            }
        }
        let p1 = take(&mut p, worst);
        let n_real_p = p.iter().filter(|r| is_real(r)).count();
        let n_real_z = z.iter().filter(|r| is_real(r)).count();

        sos[si] = if is_real(&p1) && n_real_p == 0 {
            // Last real pole: pair it with the nearest real zero.
            match nearest_idx(&z, p1, Which::Real) {
                Some(i) => {
                    let z1 = take(&mut z, i);
                    single_section(&[z1, zero], &[p1, zero])
                }
                None => single_section(&[], &[p1, zero]),
            }
        } else if p.len() + 1 == z.len() && !is_real(&p1) && n_real_p == 1 && n_real_z == 1 {
            // A lone real pole/zero pair remains; this complex pole must take
            // a complex zero.
            match nearest_idx(&z, p1, Which::Complex) {
                Some(i) => {
                    let z1 = take(&mut z, i);
                    single_section(&[z1, z1.conj()], &[p1, p1.conj()])
                }
                None => single_section(&[], &[p1, p1.conj()]),
            }
        } else {
            let p2 = if is_real(&p1) {
                let mut best: Option<usize> = None;
                for (i, pi) in p.iter().enumerate().filter(|(_, r)| is_real(r)) {
                    let better = match best {
                        None => true,
                        Some(b) => (pi.norm() - 1.0).abs() < (p[b].norm() - 1.0).abs(),
                    };
                    if better {
                        best = Some(i);
                    }
                }
                match best {
                    Some(i) => take(&mut p, i),
                    None => zero,
                }
            } else {
                p1.conj()
            };

            match nearest_idx(&z, p1, Which::Any) {
                Some(i) => {
                    let z1 = take(&mut z, i);
                    if !is_real(&z1) {
                        single_section(&[z1, z1.conj()], &[p1, p2])
                    } else if let Some(j) = nearest_idx(&z, p1, Which::Real) {
                        let z2 = take(&mut z, j);
                        single_section(&[z1, z2], &[p1, p2])
                    } else {
                        single_section(&[z1], &[p1, p2])
                    }
                }
                None => single_section(&[], &[p1, p2]),
            }
        };
    }

    if let Some(first) = sos.first_mut() {
        for b in first.iter_mut().take(3) {
            *b *= k;
        }
    }
    sos
}

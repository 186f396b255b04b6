use std::ops::Range;

use rustfft::num_complex::Complex;

pub const FFT_SIZE: usize = 2048;
pub const SPECTRUM_BINS: usize = 64;
pub const HISTORY_SIZE: usize = 128;

const DB_FLOOR: f32 = -60.0;
const MAG_EPSILON: f32 = 1e-10;

/// Current display-bin magnitudes (0.0-1.0) and their peak hold.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumFrame {
    pub magnitudes: Vec<f32>,
    pub peaks: Vec<f32>,
}

impl SpectrumFrame {
    pub fn new(bins: usize) -> Self {
        Self {
            magnitudes: vec![0.0; bins],
            peaks: vec![0.0; bins],
        }
    }

    pub fn clear(&mut self) {
        self.magnitudes.fill(0.0);
        self.peaks.fill(0.0);
    }

    pub fn decay_peaks(&mut self, factor: f32) {
        for peak in &mut self.peaks {
            *peak *= factor;
        }
    }
}

/// Windowed FFT folded into a small number of bass-weighted display bins,
/// with temporal smoothing and peak hold.
pub struct SpectralBinner {
    fft_size: usize,
    window: Vec<f32>,
    ranges: Vec<Range<usize>>,
    smoothing: f32,
    scratch: Vec<Complex<f32>>,
    frame: SpectrumFrame,
}

impl SpectralBinner {
    pub fn new(fft_size: usize, bins: usize, smoothing: f32) -> Self {
        assert!(fft_size.is_power_of_two(), "FFT size must be a power of two");
        assert!(
            bins > 0 && bins <= fft_size / 2,
            "display bins must fit in the usable FFT bins"
        );
        Self {
            fft_size,
            window: hann_window(fft_size),
            ranges: display_bin_ranges(bins, fft_size / 2),
            smoothing: smoothing.clamp(0.0, 1.0),
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            frame: SpectrumFrame::new(bins),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bins(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 1.0);
    }

    pub fn frame(&self) -> &SpectrumFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut SpectrumFrame {
        &mut self.frame
    }

    pub fn clear(&mut self) {
        self.frame.clear();
    }

    /// Analyze exactly `fft_size` time-domain samples and fold them into the
    /// running frame.
    pub fn analyze(&mut self, samples: &[f32]) -> &SpectrumFrame {
        assert_eq!(
            samples.len(),
            self.fft_size,
            "analysis buffer must hold exactly one FFT frame"
        );

        for ((slot, &s), &w) in self.scratch.iter_mut().zip(samples).zip(&self.window) {
            *slot = Complex::new(s * w, 0.0);
        }
        fft_in_place(&mut self.scratch);

        let alpha = self.smoothing;
        for (i, range) in self.ranges.iter().enumerate() {
            let normalized = normalize_db(mean_magnitude(&self.scratch[range.clone()]));
            let current = &mut self.frame.magnitudes[i];
            *current = alpha * *current + (1.0 - alpha) * normalized;
            let peak = &mut self.frame.peaks[i];
            if *current > *peak {
                *peak = *current;
            }
        }

        &self.frame
    }
}

/// Ring of past magnitude frames for waterfall rendering.
pub struct SpectrumHistory {
    rows: Vec<Vec<f32>>,
    pos: usize,
}

impl SpectrumHistory {
    pub fn new(depth: usize, bins: usize) -> Self {
        Self {
            rows: vec![vec![0.0; bins]; depth.max(1)],
            pos: 0,
        }
    }

    pub fn push(&mut self, magnitudes: &[f32]) {
        let row = &mut self.rows[self.pos];
        row.clear();
        row.extend_from_slice(magnitudes);
        self.pos = (self.pos + 1) % self.rows.len();
    }

    /// Next write position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Rows from oldest to newest.
    pub fn ordered(&self) -> impl Iterator<Item = &[f32]> + '_ {
        let (newer, older) = self.rows.split_at(self.pos);
        older.iter().chain(newer.iter()).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        for row in &mut self.rows {
            row.fill(0.0);
        }
        self.pos = 0;
    }
}

/// Iterative radix-2 Cooley-Tukey FFT. `data.len()` must be a power of two.
pub fn fft_in_place(data: &mut [Complex<f32>]) {
    let n = data.len();
    if n <= 1 {
        return;
    }
    debug_assert!(n.is_power_of_two());

    // Bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            data.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * std::f32::consts::PI / len as f32;
        let wlen = Complex::new(angle.cos(), angle.sin());
        let half = len / 2;
        for start in (0..n).step_by(len) {
            let mut w = Complex::new(1.0f32, 0.0);
            for k in 0..half {
                let u = data[start + k];
                let v = data[start + k + half] * w;
                data[start + k] = u + v;
                data[start + k + half] = u - v;
                w *= wlen;
            }
        }
        len <<= 1;
    }
}

/// FFT-bin range for each display bin under the quadratic frequency mapping.
///
/// Ranges are contiguous, start at 0, never exceed `useful_bins`, and each
/// covers at least one FFT bin.
pub fn display_bin_ranges(bins: usize, useful_bins: usize) -> Vec<Range<usize>> {
    let edge = |i: usize| -> usize {
        let t = i as f32 / bins as f32;
        ((t * t * useful_bins as f32) as usize).min(useful_bins)
    };

    let mut ranges = Vec::with_capacity(bins);
    let mut prev_end = 0;
    for i in 0..bins {
        let mut start = edge(i).max(prev_end);
        if start >= useful_bins {
            start = useful_bins.saturating_sub(1);
        }
        let mut end = edge(i + 1).min(useful_bins);
        if end <= start {
            end = start + 1;
        }
        ranges.push(start..end);
        prev_end = end;
    }
    if let Some(last) = ranges.last_mut() {
        last.end = useful_bins.max(last.start + 1);
    }
    ranges
}

/// Arithmetic mean of `|z|` over a bin range; 0 for an empty range.
pub fn mean_magnitude(bins: &[Complex<f32>]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    bins.iter().map(|c| c.norm()).sum::<f32>() / bins.len() as f32
}

/// Map a linear magnitude onto 0.0-1.0 over a -60 dB..0 dB range.
pub fn normalize_db(magnitude: f32) -> f32 {
    let db = 20.0 * (magnitude + MAG_EPSILON).log10();
    ((db - DB_FLOOR) / -DB_FLOOR).clamp(0.0, 1.0)
}

pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

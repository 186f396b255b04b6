pub const WAVEFORM_SIZE: usize = 1024;

const PCM_SCALE: f32 = 1.0 / 32768.0;

/// Fixed-length FIFO of normalized samples; pushing K samples drops the K oldest.
#[derive(Clone, Debug)]
pub struct SampleWindow {
    samples: Vec<f32>,
}

impl SampleWindow {
    pub fn new(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    /// Append `incoming`, keeping only the newest `len()` samples.
    pub fn push_iter<I>(&mut self, incoming: I, count: usize)
    where
        I: IntoIterator<Item = f32>,
    {
        let len = self.samples.len();
        if count == 0 || len == 0 {
            return;
        }
        let shift = count.min(len);
        if shift < len {
            self.samples.copy_within(shift.., 0);
        }
        let skip = count - shift;
        let tail = &mut self.samples[len - shift..];
        for (slot, value) in tail.iter_mut().zip(incoming.into_iter().skip(skip)) {
            *slot = value;
        }
    }

    pub fn push_slice(&mut self, incoming: &[f32]) {
        self.push_iter(incoming.iter().copied(), incoming.len());
    }

    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }
}

/// Rolling mono/left/right windows fed from interleaved 16-bit stereo PCM.
#[derive(Clone, Debug)]
pub struct WaveformRing {
    mono: SampleWindow,
    left: SampleWindow,
    right: SampleWindow,
    zoom: f32,
}

impl WaveformRing {
    pub fn new(len: usize) -> Self {
        Self {
            mono: SampleWindow::new(len),
            left: SampleWindow::new(len),
            right: SampleWindow::new(len),
            zoom: 1.0,
        }
    }

    /// Push interleaved L/R frames; a trailing unpaired sample is ignored.
    pub fn push(&mut self, interleaved: &[i16]) {
        let frames = interleaved.len() / 2;
        if frames == 0 {
            return;
        }
        let pairs = || interleaved.chunks_exact(2).map(|lr| stereo_frame(lr[0], lr[1]));
        self.left.push_iter(pairs().map(|(l, _)| l), frames);
        self.right.push_iter(pairs().map(|(_, r)| r), frames);
        self.mono.push_iter(pairs().map(|(l, r)| 0.5 * (l + r)), frames);
    }

    pub fn mono(&self) -> &[f32] {
        self.mono.as_slice()
    }

    pub fn left(&self) -> &[f32] {
        self.left.as_slice()
    }

    pub fn right(&self) -> &[f32] {
        self.right.as_slice()
    }

    pub fn len(&self) -> usize {
        self.mono.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mono.is_empty()
    }

    /// Render-time amplitude multiplier; samples are stored unscaled.
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom.is_finite() && zoom > 0.0 {
            self.zoom = zoom;
        }
    }

    pub fn clear(&mut self) {
        self.mono.clear();
        self.left.clear();
        self.right.clear();
    }
}

pub fn stereo_frame(left: i16, right: i16) -> (f32, f32) {
    (f32::from(left) * PCM_SCALE, f32::from(right) * PCM_SCALE)
}

/// Mono mix of interleaved stereo PCM, normalized to [-1, 1].
pub fn mono_mix(interleaved: &[i16]) -> impl Iterator<Item = f32> + '_ {
    interleaved.chunks_exact(2).map(|lr| {
        let (l, r) = stereo_frame(lr[0], lr[1]);
        0.5 * (l + r)
    })
}

//! Voice classes, telemetry frames and the period → pitch rules shared by the
//! level meters and the note inference.

/// Voices on the base chip: two pulse, triangle, noise, DAC.
pub const BASE_VOICE_COUNT: usize = 5;
/// Voices on the optional expansion chip: two pulse, one saw.
pub const EXPANSION_VOICE_COUNT: usize = 3;
pub const MAX_VOICE_COUNT: usize = BASE_VOICE_COUNT + EXPANSION_VOICE_COUNT;

/// Periodic base voices above this rate are treated as silent.
const MIN_BASE_PERIOD: i32 = 8;
const MIN_EXPANSION_PERIOD: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceClass {
    /// Square/pulse voice whose amplitude is the 4-bit volume.
    Pulse,
    /// Constant-amplitude oscillator; amplitude is waveform position, not loudness.
    Triangle,
    /// Noise voice; amplitude is the 4-bit volume, pitch comes from the period index.
    Noise,
    /// 7-bit sample playback DAC.
    Dac,
    ExpansionPulse,
    /// Accumulator saw; its output step tops out around 31-42.
    ExpansionSaw,
}

impl VoiceClass {
    pub fn short_name(self) -> &'static str {
        match self {
            VoiceClass::Pulse => "Sq",
            VoiceClass::Triangle => "Tri",
            VoiceClass::Noise => "Noi",
            VoiceClass::Dac => "DMC",
            VoiceClass::ExpansionPulse => "V-P",
            VoiceClass::ExpansionSaw => "V-Saw",
        }
    }

    /// Smallest period that still maps to an audible pitch.
    pub fn min_period(self) -> i32 {
        match self {
            VoiceClass::ExpansionPulse | VoiceClass::ExpansionSaw => MIN_EXPANSION_PERIOD,
            _ => MIN_BASE_PERIOD,
        }
    }
}

/// Stable index → class mapping. Base voices first, expansion voices after.
const VOICE_CLASSES: [VoiceClass; MAX_VOICE_COUNT] = [
    VoiceClass::Pulse,
    VoiceClass::Pulse,
    VoiceClass::Triangle,
    VoiceClass::Noise,
    VoiceClass::Dac,
    VoiceClass::ExpansionPulse,
    VoiceClass::ExpansionPulse,
    VoiceClass::ExpansionSaw,
];

/// Which voices are live for the current source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoiceLayout {
    pub expansion: bool,
}

impl VoiceLayout {
    pub fn base() -> Self {
        Self { expansion: false }
    }

    pub fn with_expansion() -> Self {
        Self { expansion: true }
    }

    pub fn voice_count(&self) -> usize {
        if self.expansion {
            MAX_VOICE_COUNT
        } else {
            BASE_VOICE_COUNT
        }
    }

    pub fn class_of(&self, voice: usize) -> Option<VoiceClass> {
        if voice < self.voice_count() {
            Some(VOICE_CLASSES[voice])
        } else {
            None
        }
    }

    pub fn classes(&self) -> &'static [VoiceClass] {
        &VOICE_CLASSES[..self.voice_count()]
    }
}

/// One voice's generation parameters, read without disturbing synthesis.
///
/// For expansion voices `gate` carries the enabled flag (0/1) and `amplitude`
/// the programmed volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoiceTelemetry {
    pub period: i32,
    pub gate: i32,
    pub amplitude: i32,
}

impl VoiceTelemetry {
    pub fn base(period: i32, length: i32, amplitude: i32) -> Self {
        Self {
            period,
            gate: length,
            amplitude,
        }
    }

    pub fn expansion(period: i32, volume: i32, enabled: bool) -> Self {
        Self {
            period,
            gate: i32::from(enabled),
            amplitude: volume,
        }
    }

    pub fn is_gated(&self) -> bool {
        self.gate > 0
    }

    /// Output amplitude as a magnitude; pulse outputs swing negative.
    pub fn level(&self) -> i32 {
        self.amplitude.saturating_abs()
    }
}

/// All voices sampled at one producer step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetryFrame {
    pub base: [VoiceTelemetry; BASE_VOICE_COUNT],
    pub expansion: Option<[VoiceTelemetry; EXPANSION_VOICE_COUNT]>,
}

impl TelemetryFrame {
    pub fn new(base: [VoiceTelemetry; BASE_VOICE_COUNT]) -> Self {
        Self {
            base,
            expansion: None,
        }
    }

    /// Telemetry for a voice index; expansion voices read as silent when the
    /// frame carries no expansion data.
    pub fn voice(&self, voice: usize) -> VoiceTelemetry {
        if voice < BASE_VOICE_COUNT {
            self.base[voice]
        } else {
            self.expansion
                .and_then(|exp| exp.get(voice - BASE_VOICE_COUNT).copied())
                .unwrap_or_default()
        }
    }
}

/// Oscillator frequency for a divider period; `None` for a negative period.
pub fn period_to_frequency(clock_rate: f32, period: i32) -> Option<f32> {
    if period < 0 {
        return None;
    }
    Some(clock_rate / (16.0 * (period as f32 + 1.0)))
}

/// Nearest MIDI pitch for a frequency, `None` outside 0..=127.
pub fn frequency_to_pitch(frequency: f32) -> Option<u8> {
    if frequency <= 0.0 || !frequency.is_finite() {
        return None;
    }
    let pitch = (69.0 + 12.0 * (frequency / 440.0).log2()).round();
    if (0.0..=127.0).contains(&pitch) {
        Some(pitch as u8)
    } else {
        None
    }
}

/// Pitch for a periodic voice, honouring the class's minimum period.
pub fn period_to_pitch(class: VoiceClass, clock_rate: f32, period: i32) -> Option<u8> {
    if period < class.min_period() {
        return None;
    }
    period_to_frequency(clock_rate, period).and_then(frequency_to_pitch)
}

/// Noise voices map their 4-bit period index into a fixed low register.
pub fn noise_pitch(period: i32) -> u8 {
    36 + (15 - (period & 0x0F)) as u8
}

pub fn midi_to_frequency(pitch: u8) -> f32 {
    440.0 * 2.0f32.powf((f32::from(pitch) - 69.0) / 12.0)
}

pub fn is_black_key(pitch: u8) -> bool {
    matches!(pitch % 12, 1 | 3 | 6 | 8 | 10)
}

/// Scientific pitch name, e.g. 60 → "C4".
pub fn note_name(pitch: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let octave = i32::from(pitch) / 12 - 1;
    format!("{}{}", NAMES[usize::from(pitch % 12)], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOCK: f32 = 1_789_773.0;

    #[test]
    fn layout_maps_indices_to_classes() {
        let base = VoiceLayout::base();
        assert_eq!(base.voice_count(), 5);
        assert_eq!(base.class_of(2), Some(VoiceClass::Triangle));
        assert_eq!(base.class_of(5), None);

        let full = VoiceLayout::with_expansion();
        assert_eq!(full.voice_count(), 8);
        assert_eq!(full.class_of(7), Some(VoiceClass::ExpansionSaw));
    }

    #[test]
    fn period_100_is_c_sharp_6() {
        let freq = period_to_frequency(CLOCK, 100).unwrap();
        assert!((freq - 1107.53).abs() < 0.1);
        assert_eq!(period_to_pitch(VoiceClass::Pulse, CLOCK, 100), Some(85));
    }

    #[test]
    fn short_periods_are_silent() {
        assert_eq!(period_to_pitch(VoiceClass::Pulse, CLOCK, 7), None);
        assert!(period_to_pitch(VoiceClass::ExpansionPulse, CLOCK, 7).is_some());
        assert_eq!(period_to_pitch(VoiceClass::Pulse, CLOCK, -1), None);
    }

    #[test]
    fn out_of_range_frequencies_have_no_pitch() {
        assert_eq!(frequency_to_pitch(0.0), None);
        assert_eq!(frequency_to_pitch(f32::NAN), None);
        assert_eq!(frequency_to_pitch(1.0), None);
        assert_eq!(frequency_to_pitch(440.0), Some(69));
    }

    #[test]
    fn noise_uses_low_register() {
        assert_eq!(noise_pitch(0), 51);
        assert_eq!(noise_pitch(15), 36);
        assert_eq!(noise_pitch(0x1F), 36);
    }

    #[test]
    fn missing_expansion_reads_silent() {
        let frame = TelemetryFrame::new([VoiceTelemetry::base(100, 1, 15); BASE_VOICE_COUNT]);
        assert_eq!(frame.voice(6), VoiceTelemetry::default());
        assert_eq!(frame.voice(0).period, 100);
    }

    #[test]
    fn key_helpers() {
        assert!(is_black_key(61));
        assert!(!is_black_key(60));
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(85), "C#6");
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-3);
    }
}

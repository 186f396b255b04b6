use serde::Deserialize;

use crate::voice::{TelemetryFrame, VoiceClass, VoiceLayout, MAX_VOICE_COUNT};

use super::waveform::mono_mix;

const GATED_DECAY: f32 = 0.85;
const AVERAGE_KEEP: f32 = 0.95;
const RMS_DECAY: f32 = 0.9;
const VOLUME_CEILING: f32 = 15.0;
const DAC_CEILING: f32 = 127.0;

/// Where the meters get their activity signal from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    /// Per-voice telemetry with gate/length data.
    #[default]
    Telemetry,
    /// Mixed-output RMS spread over every voice; used when no gate data exists.
    OutputRms,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VoiceLevel {
    pub amplitude: f32,
    pub peak: f32,
}

/// Smoothed, peak-held activity level per voice.
#[derive(Clone, Debug)]
pub struct ChannelLevelEstimator {
    levels: [VoiceLevel; MAX_VOICE_COUNT],
    layout: VoiceLayout,
    saw_ceiling: f32,
}

impl ChannelLevelEstimator {
    pub fn new(layout: VoiceLayout, saw_ceiling: f32) -> Self {
        Self {
            levels: [VoiceLevel::default(); MAX_VOICE_COUNT],
            layout,
            saw_ceiling: saw_ceiling.max(1.0),
        }
    }

    pub fn layout(&self) -> VoiceLayout {
        self.layout
    }

    pub fn set_layout(&mut self, layout: VoiceLayout) {
        self.layout = layout;
        for level in &mut self.levels[layout.voice_count()..] {
            *level = VoiceLevel::default();
        }
    }

    pub fn levels(&self) -> &[VoiceLevel] {
        &self.levels[..self.layout.voice_count()]
    }

    /// Fold one producer step of telemetry into the meters.
    pub fn update(&mut self, frame: &TelemetryFrame) -> &[VoiceLevel] {
        for (voice, &class) in self.layout.classes().iter().enumerate() {
            let telemetry = frame.voice(voice);
            let amp = telemetry.level() as f32;
            let gated = telemetry.is_gated();
            let level = &mut self.levels[voice];

            match class {
                VoiceClass::Pulse | VoiceClass::Noise | VoiceClass::ExpansionPulse => {
                    let normalized = if gated { (amp / VOLUME_CEILING).min(1.0) } else { 0.0 };
                    level.amplitude = max_with_decay(level.amplitude, normalized);
                }
                VoiceClass::ExpansionSaw => {
                    let normalized = if gated { (amp / self.saw_ceiling).min(1.0) } else { 0.0 };
                    level.amplitude = max_with_decay(level.amplitude, normalized);
                }
                VoiceClass::Triangle => {
                    let normalized = if gated { (amp / VOLUME_CEILING).min(1.0) } else { 0.0 };
                    level.amplitude = moving_average(level.amplitude, normalized);
                }
                VoiceClass::Dac => {
                    // The DAC holds its last level after playback stops
                    let normalized = if gated { (amp / DAC_CEILING).min(1.0) } else { 0.0 };
                    level.amplitude = moving_average(level.amplitude, normalized);
                }
            }
            level.peak = level.peak.max(level.amplitude);
        }
        self.levels()
    }

    /// Lower-fidelity fallback: estimate every voice from the mixed output RMS.
    /// Muted voices contribute nothing.
    pub fn update_from_output(&mut self, interleaved: &[i16], mute_mask: u32) -> &[VoiceLevel] {
        let frames = interleaved.len() / 2;
        if frames == 0 {
            return self.levels();
        }
        let energy: f32 = mono_mix(interleaved).map(|s| s * s).sum();
        let rms = (energy / frames as f32).sqrt();

        let voices = self.layout.voice_count();
        for (voice, level) in self.levels[..voices].iter_mut().enumerate() {
            let muted = mute_mask & (1 << voice) != 0;
            let contribution = if muted { 0.0 } else { rms };
            level.amplitude = (level.amplitude * RMS_DECAY).max(contribution);
            level.peak = level.peak.max(level.amplitude);
        }
        self.levels()
    }

    pub fn decay_peaks(&mut self, factor: f32) {
        for level in &mut self.levels {
            level.peak *= factor;
        }
    }

    pub fn clear(&mut self) {
        self.levels = [VoiceLevel::default(); MAX_VOICE_COUNT];
    }
}

fn max_with_decay(previous: f32, normalized: f32) -> f32 {
    (previous * GATED_DECAY).max(normalized)
}

fn moving_average(previous: f32, normalized: f32) -> f32 {
    previous * AVERAGE_KEEP + normalized * (1.0 - AVERAGE_KEEP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{VoiceTelemetry, BASE_VOICE_COUNT};

    fn frame_with(voice: usize, telemetry: VoiceTelemetry) -> TelemetryFrame {
        let mut base = [VoiceTelemetry::default(); BASE_VOICE_COUNT];
        base[voice] = telemetry;
        TelemetryFrame::new(base)
    }

    #[test]
    fn pulse_jumps_up_and_decays_when_gate_closes() {
        let mut meters = ChannelLevelEstimator::new(VoiceLayout::base(), 31.0);
        meters.update(&frame_with(0, VoiceTelemetry::base(100, 10, -15)));
        assert_eq!(meters.levels()[0].amplitude, 1.0);

        // Amplitude still reads 15 but the length counter ran out
        let levels = meters.update(&frame_with(0, VoiceTelemetry::base(100, 0, 15)));
        assert!((levels[0].amplitude - 0.85).abs() < 1e-6);
        assert_eq!(levels[0].peak, 1.0);
    }

    #[test]
    fn triangle_settles_through_moving_average() {
        let mut meters = ChannelLevelEstimator::new(VoiceLayout::base(), 31.0);
        for step in 0..200 {
            let position = if step % 2 == 0 { 15 } else { 0 };
            meters.update(&frame_with(2, VoiceTelemetry::base(200, 5, position)));
        }
        let level = meters.levels()[2].amplitude;
        assert!(level > 0.4 && level < 0.6, "level {level}");
    }

    #[test]
    fn dac_is_zeroed_when_inactive() {
        let mut meters = ChannelLevelEstimator::new(VoiceLayout::base(), 31.0);
        meters.update(&frame_with(4, VoiceTelemetry::base(0, 1, 127)));
        assert!((meters.levels()[4].amplitude - 0.05).abs() < 1e-6);
        meters.update(&frame_with(4, VoiceTelemetry::base(0, 0, 127)));
        assert!((meters.levels()[4].amplitude - 0.0475).abs() < 1e-6);
    }

    #[test]
    fn expansion_saw_uses_its_own_ceiling() {
        let mut meters = ChannelLevelEstimator::new(VoiceLayout::with_expansion(), 31.0);
        let mut frame = TelemetryFrame::default();
        frame.expansion = Some([
            VoiceTelemetry::expansion(300, 15, true),
            VoiceTelemetry::expansion(300, 15, false),
            VoiceTelemetry::expansion(300, 62, true),
        ]);
        let levels = meters.update(&frame);
        assert_eq!(levels.len(), 8);
        assert_eq!(levels[5].amplitude, 1.0);
        assert_eq!(levels[6].amplitude, 0.0);
        assert_eq!(levels[7].amplitude, 1.0);
    }

    #[test]
    fn peaks_never_trail_levels_after_update() {
        let mut meters = ChannelLevelEstimator::new(VoiceLayout::base(), 31.0);
        meters.update(&frame_with(1, VoiceTelemetry::base(100, 3, 8)));
        meters.decay_peaks(0.5);
        meters.update(&frame_with(1, VoiceTelemetry::base(100, 3, 12)));
        for level in meters.levels() {
            assert!(level.peak >= level.amplitude);
        }
    }

    #[test]
    fn output_rms_fallback_skips_muted_voices() {
        let mut meters = ChannelLevelEstimator::new(VoiceLayout::base(), 31.0);
        let pcm = [16384i16, 16384, -16384, -16384];
        let levels = meters.update_from_output(&pcm, 0b00010);
        assert!((levels[0].amplitude - 0.5).abs() < 1e-6);
        assert_eq!(levels[1].amplitude, 0.0);
        assert!((levels[4].amplitude - 0.5).abs() < 1e-6);
    }

    #[test]
    fn shrinking_layout_clears_expansion_meters() {
        let mut meters = ChannelLevelEstimator::new(VoiceLayout::with_expansion(), 31.0);
        let mut frame = TelemetryFrame::default();
        frame.expansion = Some([VoiceTelemetry::expansion(300, 15, true); 3]);
        meters.update(&frame);
        meters.set_layout(VoiceLayout::base());
        meters.set_layout(VoiceLayout::with_expansion());
        assert!(meters.levels()[5..].iter().all(|l| *l == VoiceLevel::default()));
    }
}

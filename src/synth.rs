//! Scripted register-level synth used to exercise the analysis pipeline
//! without a real chip core. Scores are lists of held register states; the
//! synth renders simple pulse/triangle/noise PCM from them and reports the
//! same state back as telemetry.

use crate::notes::preprocess::{SynthError, SynthSession, TelemetrySource, TrackInfo};
use crate::voice::{
    midi_to_frequency, period_to_frequency, TelemetryFrame, VoiceClass, VoiceLayout,
    VoiceTelemetry, BASE_VOICE_COUNT, MAX_VOICE_COUNT,
};

pub const CPU_CLOCK: f32 = 1_789_773.0;

const VOICE_GAIN: f32 = 0.15;

#[derive(Clone, Copy, Debug)]
struct Hold {
    voice: usize,
    telemetry: VoiceTelemetry,
    start: f32,
    end: f32,
}

/// One scripted track.
#[derive(Clone, Debug)]
pub struct Score {
    pub name: String,
    /// Declared length reported through track info.
    pub length: Option<f32>,
    end: Option<f32>,
    expansion: bool,
    holds: Vec<Hold>,
}

impl Score {
    pub fn new(name: impl Into<String>, length: Option<f32>) -> Self {
        Self {
            name: name.into(),
            length,
            end: None,
            expansion: false,
            holds: Vec::new(),
        }
    }

    /// Hold `telemetry` on `voice` over `[start, end)`. Later holds win on overlap.
    pub fn hold(&mut self, voice: usize, telemetry: VoiceTelemetry, start: f32, end: f32) -> &mut Self {
        if voice < MAX_VOICE_COUNT && end > start {
            self.expansion |= voice >= BASE_VOICE_COUNT;
            self.holds.push(Hold {
                voice,
                telemetry,
                start,
                end,
            });
        }
        self
    }

    /// The track reports itself ended from `time` on.
    pub fn end_at(&mut self, time: f32) -> &mut Self {
        self.end = Some(time);
        self
    }

    pub fn uses_expansion(&self) -> bool {
        self.expansion
    }

    pub fn telemetry_at(&self, time: f32) -> TelemetryFrame {
        let mut voices = [VoiceTelemetry::default(); MAX_VOICE_COUNT];
        for hold in self.holds.iter().filter(|h| h.start <= time && time < h.end) {
            voices[hold.voice] = hold.telemetry;
        }

        let mut frame = TelemetryFrame::default();
        frame.base.copy_from_slice(&voices[..BASE_VOICE_COUNT]);
        if self.expansion {
            let mut exp = [VoiceTelemetry::default(); MAX_VOICE_COUNT - BASE_VOICE_COUNT];
            exp.copy_from_slice(&voices[BASE_VOICE_COUNT..]);
            frame.expansion = Some(exp);
        }
        frame
    }
}

/// Divider period that makes a periodic voice play `pitch`.
pub fn period_for_pitch(pitch: u8) -> i32 {
    (CPU_CLOCK / (16.0 * midi_to_frequency(pitch)) - 1.0).round() as i32
}

pub struct ScriptedSynth {
    scores: Vec<Score>,
    sample_rate: u32,
    current: Option<usize>,
    rendered: u64,
    chunk_start: u64,
    phases: [f32; MAX_VOICE_COUNT],
    noise: u32,
    mute_mask: u32,
}

impl ScriptedSynth {
    pub fn new(scores: Vec<Score>, sample_rate: u32) -> Self {
        Self {
            scores,
            sample_rate: sample_rate.max(1),
            current: None,
            rendered: 0,
            chunk_start: 0,
            phases: [0.0; MAX_VOICE_COUNT],
            noise: 1,
            mute_mask: 0,
        }
    }

    /// Voices whose bit is set render silence; telemetry is unaffected.
    pub fn set_mute_mask(&mut self, mask: u32) {
        self.mute_mask = mask;
    }

    /// Seconds rendered since the track started.
    pub fn position(&self) -> f32 {
        (self.rendered as f64 / f64::from(self.sample_rate)) as f32
    }

    fn score(&self) -> Option<&Score> {
        self.current.and_then(|i| self.scores.get(i))
    }

    fn next_noise(&mut self) -> f32 {
        // xorshift32
        let mut x = self.noise;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise = x;
        if x & 1 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl TelemetrySource for ScriptedSynth {
    /// Register state in effect for the most recently rendered chunk.
    fn telemetry(&self) -> TelemetryFrame {
        let time = (self.chunk_start as f64 / f64::from(self.sample_rate)) as f32;
        self.score()
            .map(|score| score.telemetry_at(time))
            .unwrap_or_default()
    }
}

impl SynthSession for ScriptedSynth {
    fn track_info(&self, track: usize) -> Result<TrackInfo, SynthError> {
        self.scores
            .get(track)
            .map(|score| TrackInfo {
                length: score.length,
            })
            .ok_or_else(|| SynthError(format!("no track {track}")))
    }

    fn start_track(&mut self, track: usize) -> Result<(), SynthError> {
        if track >= self.scores.len() {
            return Err(SynthError(format!("no track {track}")));
        }
        self.current = Some(track);
        self.rendered = 0;
        self.chunk_start = 0;
        self.phases = [0.0; MAX_VOICE_COUNT];
        Ok(())
    }

    fn render(&mut self, out: &mut [i16]) {
        self.chunk_start = self.rendered;
        let frames = out.len() / 2;
        let frame = self.telemetry();
        let layout = if self.has_expansion() {
            VoiceLayout::with_expansion()
        } else {
            VoiceLayout::base()
        };
        let step = 1.0 / self.sample_rate as f32;

        for lr in out.chunks_exact_mut(2) {
            let mut mix = 0.0f32;
            for (voice, &class) in layout.classes().iter().enumerate() {
                let t = frame.voice(voice);
                if !t.is_gated() || self.mute_mask & (1 << voice) != 0 {
                    continue;
                }
                let volume = match class {
                    VoiceClass::Triangle => 1.0,
                    VoiceClass::Dac => 0.0,
                    VoiceClass::ExpansionSaw => (t.level() as f32 / 42.0).min(1.0),
                    _ => (t.level() as f32 / 15.0).min(1.0),
                };
                if volume <= 0.0 {
                    continue;
                }
                let sample = if class == VoiceClass::Noise {
                    self.next_noise()
                } else {
                    let freq = period_to_frequency(CPU_CLOCK, t.period).unwrap_or(0.0);
                    let phase = &mut self.phases[voice];
                    *phase = (*phase + freq * step).fract();
                    match class {
                        VoiceClass::Triangle => 4.0 * (*phase - 0.5).abs() - 1.0,
                        VoiceClass::ExpansionSaw => 2.0 * *phase - 1.0,
                        _ if *phase < 0.5 => 1.0,
                        _ => -1.0,
                    }
                };
                mix += sample * volume * VOICE_GAIN;
            }
            let pcm = (mix.clamp(-1.0, 1.0) * 32767.0) as i16;
            lr[0] = pcm;
            lr[1] = pcm;
        }
        self.rendered += frames as u64;
    }

    fn track_ended(&self) -> bool {
        match self.score().and_then(|s| s.end) {
            Some(end) => self.position() >= end,
            None => self.current.is_none(),
        }
    }

    fn has_expansion(&self) -> bool {
        self.score().is_some_and(Score::uses_expansion)
    }
}

/// Built-in demo tracks: an arpeggio with bass and drums, and the same idea
/// on the expansion voices.
pub fn demo_scores() -> Vec<Score> {
    let beat = 0.25f32;
    let mut plain = Score::new("Arpeggio", Some(8.0));
    let mut expanded = Score::new("Expansion arpeggio", Some(8.0));

    let chord = [60u8, 64, 67, 72];
    let bass = [36u8, 41, 43, 36];
    for bar in 0..8 {
        let bar_start = bar as f32 * 4.0 * beat;
        for (step, &pitch) in chord.iter().enumerate() {
            let start = bar_start + step as f32 * beat;
            let lead = VoiceTelemetry::base(period_for_pitch(pitch + 12 * (bar % 2) as u8), 10, 12);
            plain.hold(0, lead, start, start + beat * 0.9);
            expanded.hold(5, VoiceTelemetry::expansion(period_for_pitch(pitch), 12, true), start, start + beat * 0.9);
        }
        let root = bass[bar % bass.len()];
        plain.hold(2, VoiceTelemetry::base(period_for_pitch(root), 20, 8), bar_start, bar_start + 4.0 * beat);
        expanded.hold(7, VoiceTelemetry::expansion(period_for_pitch(root + 12), 30, true), bar_start, bar_start + 4.0 * beat);

        for hit in 0..2 {
            let at = bar_start + hit as f32 * 2.0 * beat;
            plain.hold(3, VoiceTelemetry::base(0x0C, 4, 10), at, at + 0.08);
            expanded.hold(3, VoiceTelemetry::base(0x0C, 4, 10), at, at + 0.08);
        }
        plain.hold(4, VoiceTelemetry::base(0, 100, 64), bar_start + beat, bar_start + beat + 0.1);
    }
    plain.end_at(8.0);
    expanded.end_at(8.0);

    vec![plain, expanded]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_for_pitch_round_trips() {
        for pitch in [36u8, 60, 69, 84] {
            let period = period_for_pitch(pitch);
            let freq = period_to_frequency(CPU_CLOCK, period).unwrap();
            assert_eq!(crate::voice::frequency_to_pitch(freq), Some(pitch));
        }
    }

    #[test]
    fn telemetry_follows_rendered_chunks() {
        let mut score = Score::new("t", Some(1.0));
        score.hold(1, VoiceTelemetry::base(100, 5, 9), 0.1, 0.2);
        let mut synth = ScriptedSynth::new(vec![score], 100);
        synth.start_track(0).unwrap();

        let mut buf = [0i16; 20];
        synth.render(&mut buf);
        assert_eq!(synth.telemetry().base[1], VoiceTelemetry::default());
        synth.render(&mut buf);
        assert_eq!(synth.telemetry().base[1].period, 100);
        assert!(buf.iter().any(|&s| s != 0));
    }

    #[test]
    fn expansion_is_reported_only_when_used() {
        let scores = demo_scores();
        let mut synth = ScriptedSynth::new(scores, 44_100);
        synth.start_track(0).unwrap();
        assert!(!synth.has_expansion());
        assert!(synth.telemetry().expansion.is_none());
        synth.start_track(1).unwrap();
        assert!(synth.has_expansion());
    }

    #[test]
    fn muted_voice_renders_silence() {
        let mut score = Score::new("t", Some(1.0));
        score.hold(0, VoiceTelemetry::base(100, 5, 15), 0.0, 1.0);
        let mut synth = ScriptedSynth::new(vec![score], 1000);
        synth.start_track(0).unwrap();
        synth.set_mute_mask(0b1);

        let mut buf = [0i16; 64];
        synth.render(&mut buf);
        assert!(buf.iter().all(|&s| s == 0));
        assert_eq!(synth.telemetry().base[0].period, 100);
    }

    #[test]
    fn unknown_track_fails_to_start() {
        let mut synth = ScriptedSynth::new(Vec::new(), 44_100);
        assert!(synth.start_track(0).is_err());
        assert!(synth.track_ended());
    }
}

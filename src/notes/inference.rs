//! Telemetry → note inference.
//!
//! Each voice runs the same two-state machine (silent / sounding a pitch).
//! [`advance`] is the pure transition; [`LiveNoteTracker`] drives it from the
//! playback instance and keeps only what is sounding now, [`NoteRecorder`]
//! drives it over a whole track and keeps every closed interval.

use crate::voice::{
    noise_pitch, period_to_pitch, TelemetryFrame, VoiceClass, VoiceLayout, VoiceTelemetry,
    MAX_VOICE_COUNT,
};

use super::timeline::{NoteInterval, NoteTimeline};

const VOLUME_CEILING: f32 = 15.0;

/// Heuristic tuning values for turning telemetry into notes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteRules {
    pub clock_rate: f32,
    /// A reading at or below this velocity counts as silence.
    pub velocity_threshold: f32,
    /// Intervals this short or shorter are dropped.
    pub min_duration: f32,
    pub triangle_velocity: f32,
    pub dac_velocity: f32,
    pub dac_pitch: u8,
    pub saw_velocity_ceiling: f32,
}

impl Default for NoteRules {
    fn default() -> Self {
        Self {
            clock_rate: 1_789_773.0,
            velocity_threshold: 0.01,
            min_duration: 0.01,
            triangle_velocity: 0.8,
            dac_velocity: 0.8,
            dac_pitch: 28,
            saw_velocity_ceiling: 42.0,
        }
    }
}

/// What one voice is playing at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteReading {
    pub pitch: u8,
    pub velocity: f32,
}

/// Classify one voice's telemetry; `None` means no note.
pub fn classify(class: VoiceClass, t: &VoiceTelemetry, rules: &NoteRules) -> Option<NoteReading> {
    let amp = t.level() as f32;
    let reading = match class {
        VoiceClass::Pulse => {
            if !t.is_gated() || amp <= 0.0 {
                return None;
            }
            NoteReading {
                pitch: period_to_pitch(class, rules.clock_rate, t.period)?,
                velocity: (amp / VOLUME_CEILING).min(1.0),
            }
        }
        VoiceClass::Triangle => {
            if !t.is_gated() {
                return None;
            }
            NoteReading {
                pitch: period_to_pitch(class, rules.clock_rate, t.period)?,
                velocity: rules.triangle_velocity,
            }
        }
        VoiceClass::Noise => {
            if !t.is_gated() || amp <= 0.0 {
                return None;
            }
            NoteReading {
                pitch: noise_pitch(t.period),
                velocity: (amp / VOLUME_CEILING).min(1.0),
            }
        }
        VoiceClass::Dac => {
            if !t.is_gated() {
                return None;
            }
            NoteReading {
                pitch: rules.dac_pitch.min(127),
                velocity: rules.dac_velocity,
            }
        }
        VoiceClass::ExpansionPulse | VoiceClass::ExpansionSaw => {
            if !t.is_gated() || amp <= 0.0 {
                return None;
            }
            let ceiling = if class == VoiceClass::ExpansionSaw {
                rules.saw_velocity_ceiling.max(1.0)
            } else {
                VOLUME_CEILING
            };
            NoteReading {
                pitch: period_to_pitch(class, rules.clock_rate, t.period)?,
                velocity: (amp / ceiling).min(1.0),
            }
        }
    };

    if reading.velocity > rules.velocity_threshold {
        Some(reading)
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum VoiceNoteState {
    #[default]
    Silent,
    Sounding {
        pitch: u8,
        velocity: f32,
        start: f32,
    },
}

/// One transition of the per-voice machine. Returns the next state and the
/// interval closed by this step, if it was long enough to keep.
pub fn advance(
    state: VoiceNoteState,
    reading: Option<NoteReading>,
    voice: usize,
    now: f32,
    min_duration: f32,
) -> (VoiceNoteState, Option<NoteInterval>) {
    let open = |r: NoteReading| VoiceNoteState::Sounding {
        pitch: r.pitch,
        velocity: r.velocity,
        start: now,
    };

    match (state, reading) {
        (VoiceNoteState::Silent, None) => (state, None),
        (VoiceNoteState::Silent, Some(r)) => (open(r), None),
        (VoiceNoteState::Sounding { pitch, .. }, Some(r)) if r.pitch == pitch => (state, None),
        (sounding, next) => {
            let closed = close(sounding, voice, now, min_duration);
            (next.map_or(VoiceNoteState::Silent, open), closed)
        }
    }
}

/// Close a sounding state at `end`, keeping it only if it outlasted `min_duration`.
pub fn close(state: VoiceNoteState, voice: usize, end: f32, min_duration: f32) -> Option<NoteInterval> {
    match state {
        VoiceNoteState::Sounding {
            pitch,
            velocity,
            start,
        } if end - start > min_duration => Some(NoteInterval {
            voice,
            pitch,
            velocity,
            start_time: start,
            end_time: end,
        }),
        _ => None,
    }
}

/// What the keyboard shows for one voice right now.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LiveNote {
    pub pitch: u8,
    pub velocity: f32,
    pub active: bool,
}

/// Live driver: tracks what each voice is sounding, keeps no history.
#[derive(Clone, Debug)]
pub struct LiveNoteTracker {
    states: [VoiceNoteState; MAX_VOICE_COUNT],
    notes: [LiveNote; MAX_VOICE_COUNT],
}

impl Default for LiveNoteTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveNoteTracker {
    pub fn new() -> Self {
        Self {
            states: [VoiceNoteState::Silent; MAX_VOICE_COUNT],
            notes: [LiveNote::default(); MAX_VOICE_COUNT],
        }
    }

    pub fn update(&mut self, frame: &TelemetryFrame, layout: VoiceLayout, rules: &NoteRules, now: f32) {
        for (voice, &class) in layout.classes().iter().enumerate() {
            let reading = classify(class, &frame.voice(voice), rules);
            let (next, _) = advance(self.states[voice], reading, voice, now, rules.min_duration);
            self.states[voice] = next;
            self.notes[voice] = match reading {
                Some(r) => LiveNote {
                    pitch: r.pitch,
                    velocity: r.velocity,
                    active: true,
                },
                None => LiveNote {
                    active: false,
                    ..self.notes[voice]
                },
            };
        }
    }

    pub fn notes(&self, layout: VoiceLayout) -> &[LiveNote] {
        &self.notes[..layout.voice_count()]
    }

    /// Start time of the note a voice is currently holding.
    pub fn onset(&self, voice: usize) -> Option<f32> {
        match self.states.get(voice)? {
            VoiceNoteState::Sounding { start, .. } => Some(*start),
            VoiceNoteState::Silent => None,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

/// Batch driver: runs the machine over a whole track and collects intervals.
#[derive(Clone, Debug)]
pub struct NoteRecorder {
    layout: VoiceLayout,
    rules: NoteRules,
    states: [VoiceNoteState; MAX_VOICE_COUNT],
    notes: Vec<NoteInterval>,
}

impl NoteRecorder {
    pub fn new(layout: VoiceLayout, rules: NoteRules) -> Self {
        Self {
            layout,
            rules,
            states: [VoiceNoteState::Silent; MAX_VOICE_COUNT],
            notes: Vec::new(),
        }
    }

    pub fn observe(&mut self, frame: &TelemetryFrame, now: f32) {
        for (voice, &class) in self.layout.classes().iter().enumerate() {
            let reading = classify(class, &frame.voice(voice), &self.rules);
            let (next, closed) =
                advance(self.states[voice], reading, voice, now, self.rules.min_duration);
            self.states[voice] = next;
            self.notes.extend(closed);
        }
    }

    /// Force-close every sounding voice at `end_time` and sort the result.
    pub fn finish(mut self, end_time: f32) -> NoteTimeline {
        for (voice, state) in self.states.iter_mut().enumerate() {
            self.notes
                .extend(close(*state, voice, end_time, self.rules.min_duration));
            *state = VoiceNoteState::Silent;
        }
        NoteTimeline::new(self.notes, end_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::BASE_VOICE_COUNT;

    fn frame_with(voice: usize, telemetry: VoiceTelemetry) -> TelemetryFrame {
        let mut base = [VoiceTelemetry::default(); BASE_VOICE_COUNT];
        base[voice] = telemetry;
        TelemetryFrame::new(base)
    }

    fn pulse(period: i32, gate: i32, amp: i32) -> TelemetryFrame {
        frame_with(0, VoiceTelemetry::base(period, gate, amp))
    }

    #[test]
    fn held_pulse_becomes_one_interval() {
        let rules = NoteRules::default();
        let mut recorder = NoteRecorder::new(VoiceLayout::base(), rules);
        for step in 0..50 {
            recorder.observe(&pulse(100, 10, 15), step as f32 * 0.01);
        }
        recorder.observe(&pulse(100, 0, 15), 0.5);
        let timeline = recorder.finish(1.0);

        assert_eq!(
            timeline.notes(),
            &[NoteInterval {
                voice: 0,
                pitch: 85,
                velocity: 1.0,
                start_time: 0.0,
                end_time: 0.5,
            }]
        );
    }

    #[test]
    fn too_short_notes_are_dropped() {
        let rules = NoteRules::default();
        let mut recorder = NoteRecorder::new(VoiceLayout::base(), rules);
        recorder.observe(&pulse(100, 10, 15), 0.0);
        recorder.observe(&pulse(100, 0, 15), 0.005);
        assert!(recorder.finish(1.0).is_empty());
    }

    #[test]
    fn pitch_change_splits_interval() {
        let rules = NoteRules::default();
        let mut recorder = NoteRecorder::new(VoiceLayout::base(), rules);
        recorder.observe(&pulse(100, 10, 15), 0.0);
        recorder.observe(&pulse(200, 10, 8), 0.25);
        let timeline = recorder.finish(0.75);

        let spans: Vec<(u8, f32, f32)> = timeline
            .notes()
            .iter()
            .map(|n| (n.pitch, n.start_time, n.end_time))
            .collect();
        assert_eq!(spans, vec![(85, 0.0, 0.25), (73, 0.25, 0.75)]);
        assert!((timeline.notes()[1].velocity - 8.0 / 15.0).abs() < 1e-6);
        assert_eq!(timeline.duration(), 0.75);
    }

    #[test]
    fn volume_change_on_same_pitch_keeps_interval() {
        let state = VoiceNoteState::Sounding {
            pitch: 60,
            velocity: 1.0,
            start: 0.0,
        };
        let reading = Some(NoteReading {
            pitch: 60,
            velocity: 0.2,
        });
        assert_eq!(advance(state, reading, 0, 1.0, 0.01), (state, None));
    }

    #[test]
    fn classification_per_voice_class() {
        let rules = NoteRules::default();
        let tri = classify(VoiceClass::Triangle, &VoiceTelemetry::base(100, 1, 0), &rules);
        assert_eq!(tri, Some(NoteReading { pitch: 85, velocity: 0.8 }));

        let noise = classify(VoiceClass::Noise, &VoiceTelemetry::base(3, 1, 6), &rules);
        assert_eq!(noise.map(|r| r.pitch), Some(48));

        let dac = classify(VoiceClass::Dac, &VoiceTelemetry::base(0, 4, 0), &rules);
        assert_eq!(dac, Some(NoteReading { pitch: 28, velocity: 0.8 }));

        let saw = classify(VoiceClass::ExpansionSaw, &VoiceTelemetry::expansion(100, 21, true), &rules);
        assert_eq!(saw, Some(NoteReading { pitch: 85, velocity: 0.5 }));

        assert_eq!(classify(VoiceClass::Pulse, &VoiceTelemetry::base(100, 0, 15), &rules), None);
        assert_eq!(classify(VoiceClass::Pulse, &VoiceTelemetry::base(5, 1, 15), &rules), None);
        assert_eq!(classify(VoiceClass::Pulse, &VoiceTelemetry::base(100, 1, 0), &rules), None);
        assert_eq!(
            classify(VoiceClass::ExpansionPulse, &VoiceTelemetry::expansion(100, 15, false), &rules),
            None
        );
    }

    #[test]
    fn finish_closes_open_voices_and_sorts() {
        let rules = NoteRules::default();
        let mut recorder = NoteRecorder::new(VoiceLayout::base(), rules);
        let mut base = [VoiceTelemetry::default(); BASE_VOICE_COUNT];
        base[2] = VoiceTelemetry::base(300, 1, 7);
        recorder.observe(&TelemetryFrame::new(base), 0.2);
        base[0] = VoiceTelemetry::base(100, 1, 15);
        recorder.observe(&TelemetryFrame::new(base), 0.1);
        let timeline = recorder.finish(2.0);

        let voices: Vec<usize> = timeline.notes().iter().map(|n| n.voice).collect();
        assert_eq!(voices, vec![0, 2]);
        assert!(timeline.notes().iter().all(|n| n.end_time == 2.0));
    }

    #[test]
    fn live_tracker_reports_current_reading() {
        let rules = NoteRules::default();
        let mut live = LiveNoteTracker::new();
        live.update(&pulse(100, 10, 15), VoiceLayout::base(), &rules, 0.0);
        live.update(&pulse(100, 10, 6), VoiceLayout::base(), &rules, 0.1);
        let note = live.notes(VoiceLayout::base())[0];
        assert!(note.active);
        assert_eq!(note.pitch, 85);
        assert!((note.velocity - 0.4).abs() < 1e-6);
        assert_eq!(live.onset(0), Some(0.0));

        live.update(&pulse(100, 0, 6), VoiceLayout::base(), &rules, 0.2);
        assert!(!live.notes(VoiceLayout::base())[0].active);
        assert_eq!(live.onset(0), None);
    }
}

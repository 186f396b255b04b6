use super::timeline::{NoteInterval, NoteTimeline};

pub const EVENT_CHANNELS: usize = 16;
const PITCHES: usize = 128;

/// Leftover notes are closed this far past the last event.
pub const END_MARGIN: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoteEventKind {
    /// Raw 7-bit velocity; 0 means note-off.
    On { velocity: u8 },
    Off,
}

/// A symbolic note event from a sequence source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    pub channel: u8,
    pub pitch: u8,
    pub kind: NoteEventKind,
    /// Seconds from the start of the sequence.
    pub time: f32,
}

impl NoteEvent {
    pub fn on(channel: u8, pitch: u8, velocity: u8, time: f32) -> Self {
        Self {
            channel,
            pitch,
            kind: NoteEventKind::On { velocity },
            time,
        }
    }

    pub fn off(channel: u8, pitch: u8, time: f32) -> Self {
        Self {
            channel,
            pitch,
            kind: NoteEventKind::Off,
            time,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct HeldNote {
    active: bool,
    start: f32,
    velocity: f32,
}

/// Builds note intervals from explicit note-on/note-off pairs, matching each
/// off to the open note on the same (channel, pitch).
pub struct ExplicitEventTimeline {
    held: Vec<[HeldNote; PITCHES]>,
    notes: Vec<NoteInterval>,
    min_duration: f32,
    last_time: f32,
}

impl ExplicitEventTimeline {
    pub fn new(min_duration: f32) -> Self {
        Self {
            held: vec![[HeldNote::default(); PITCHES]; EVENT_CHANNELS],
            notes: Vec::new(),
            min_duration,
            last_time: 0.0,
        }
    }

    /// Build a finished timeline from a whole event list.
    pub fn from_events(events: &[NoteEvent], min_duration: f32) -> NoteTimeline {
        let mut builder = Self::new(min_duration);
        for event in events {
            builder.apply(event);
        }
        builder.finish()
    }

    pub fn apply(&mut self, event: &NoteEvent) {
        match event.kind {
            NoteEventKind::On { velocity } if velocity > 0 => {
                self.note_on(event.channel, event.pitch, f32::from(velocity) / 127.0, event.time)
            }
            _ => {
                self.note_off(event.channel, event.pitch, event.time);
            }
        }
    }

    /// Open (channel, pitch); an already-open note there is overwritten.
    pub fn note_on(&mut self, channel: u8, pitch: u8, velocity: f32, time: f32) {
        self.touch(time);
        if let Some(slot) = self.slot_mut(channel, pitch) {
            *slot = HeldNote {
                active: true,
                start: time,
                velocity,
            };
        }
    }

    /// Close (channel, pitch) if open. Returns the interval when it was kept.
    pub fn note_off(&mut self, channel: u8, pitch: u8, time: f32) -> Option<NoteInterval> {
        self.touch(time);
        let min_duration = self.min_duration;
        let slot = self.slot_mut(channel, pitch)?;
        if !slot.active {
            return None;
        }
        slot.active = false;
        let interval = NoteInterval {
            voice: usize::from(channel),
            pitch,
            velocity: slot.velocity,
            start_time: slot.start,
            end_time: time,
        };
        if interval.duration() > min_duration {
            self.notes.push(interval);
            Some(interval)
        } else {
            None
        }
    }

    /// Drop every open note without emitting intervals.
    pub fn all_notes_off(&mut self) {
        for channel in &mut self.held {
            for held in channel.iter_mut() {
                held.active = false;
            }
        }
    }

    pub fn notes(&self) -> &[NoteInterval] {
        &self.notes
    }

    /// Close leftovers at `last event + END_MARGIN` and sort.
    pub fn finish(mut self) -> NoteTimeline {
        let end_time = self.last_time + END_MARGIN;
        for (channel, pitches) in self.held.iter_mut().enumerate() {
            for (pitch, held) in pitches.iter_mut().enumerate() {
                if held.active {
                    held.active = false;
                    self.notes.push(NoteInterval {
                        voice: channel,
                        pitch: pitch as u8,
                        velocity: held.velocity,
                        start_time: held.start,
                        end_time,
                    });
                }
            }
        }
        NoteTimeline::new(self.notes, end_time)
    }

    pub fn clear(&mut self) {
        self.all_notes_off();
        self.notes.clear();
        self.last_time = 0.0;
    }

    fn touch(&mut self, time: f32) {
        if time > self.last_time {
            self.last_time = time;
        }
    }

    fn slot_mut(&mut self, channel: u8, pitch: u8) -> Option<&mut HeldNote> {
        self.held
            .get_mut(usize::from(channel))?
            .get_mut(usize::from(pitch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_on_and_off_per_channel_and_pitch() {
        let events = [
            NoteEvent::on(0, 60, 127, 0.0),
            NoteEvent::on(1, 60, 64, 0.25),
            NoteEvent::off(0, 60, 1.0),
            NoteEvent::on(1, 60, 0, 1.5),
        ];
        let timeline = ExplicitEventTimeline::from_events(&events, 0.005);
        let spans: Vec<(usize, f32, f32)> = timeline
            .notes()
            .iter()
            .map(|n| (n.voice, n.start_time, n.end_time))
            .collect();
        assert_eq!(spans, vec![(0, 0.0, 1.0), (1, 0.25, 1.5)]);
        assert_eq!(timeline.notes()[0].velocity, 1.0);
        assert!((timeline.notes()[1].velocity - 64.0 / 127.0).abs() < 1e-6);
        assert_eq!(timeline.duration(), 2.0);
    }

    #[test]
    fn leftovers_close_past_last_event() {
        let events = [NoteEvent::on(3, 40, 100, 1.0), NoteEvent::on(3, 41, 100, 2.0)];
        let timeline = ExplicitEventTimeline::from_events(&events, 0.005);
        assert_eq!(timeline.len(), 2);
        assert!(timeline.notes().iter().all(|n| n.end_time == 2.5));
    }

    #[test]
    fn repeated_note_on_overwrites_open_note() {
        let events = [
            NoteEvent::on(0, 60, 100, 0.0),
            NoteEvent::on(0, 60, 50, 0.5),
            NoteEvent::off(0, 60, 1.0),
        ];
        let timeline = ExplicitEventTimeline::from_events(&events, 0.005);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.notes()[0].start_time, 0.5);
    }

    #[test]
    fn blips_and_stray_events_are_ignored() {
        let mut builder = ExplicitEventTimeline::new(0.005);
        builder.note_on(0, 60, 1.0, 1.0);
        assert_eq!(builder.note_off(0, 60, 1.002), None);
        assert_eq!(builder.note_off(0, 61, 1.5), None);
        builder.note_on(16, 60, 1.0, 2.0);
        builder.note_on(0, 200, 1.0, 2.0);
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn all_notes_off_discards_open_notes() {
        let mut builder = ExplicitEventTimeline::new(0.005);
        builder.note_on(2, 50, 0.5, 0.0);
        builder.all_notes_off();
        assert_eq!(builder.note_off(2, 50, 1.0), None);
        assert!(builder.notes().is_empty());
    }
}

/// A closed span during which one voice (or event channel) sounded one pitch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteInterval {
    pub voice: usize,
    pub pitch: u8,
    pub velocity: f32,
    pub start_time: f32,
    pub end_time: f32,
}

impl NoteInterval {
    pub fn duration(&self) -> f32 {
        self.end_time - self.start_time
    }

    pub fn is_sounding_at(&self, time: f32) -> bool {
        self.start_time <= time && self.end_time > time
    }
}

/// Finished note list, sorted by start time, plus the span it covers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoteTimeline {
    notes: Vec<NoteInterval>,
    duration: f32,
}

impl NoteTimeline {
    /// Sorts `notes` by start time. The sort is stable; ties keep insertion order.
    pub fn new(mut notes: Vec<NoteInterval>, duration: f32) -> Self {
        notes.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        Self { notes, duration }
    }

    pub fn notes(&self) -> &[NoteInterval] {
        &self.notes
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Add one note, keeping start order and growing the duration to cover it.
    pub fn insert(&mut self, note: NoteInterval) {
        let at = self.notes.partition_point(|n| n.start_time <= note.start_time);
        self.notes.insert(at, note);
        self.duration = self.duration.max(note.end_time);
    }

    /// Notes overlapping `[start, end)`, in start order.
    pub fn window(&self, start: f32, end: f32) -> impl Iterator<Item = &NoteInterval> + '_ {
        let upper = self.notes.partition_point(|n| n.start_time < end);
        self.notes[..upper]
            .iter()
            .filter(move |n| n.end_time > start)
    }

    /// Notes sounding at `time`.
    pub fn active_at(&self, time: f32) -> impl Iterator<Item = &NoteInterval> + '_ {
        let upper = self.notes.partition_point(|n| n.start_time <= time);
        self.notes[..upper]
            .iter()
            .filter(move |n| n.end_time > time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(voice: usize, pitch: u8, start: f32, end: f32) -> NoteInterval {
        NoteInterval {
            voice,
            pitch,
            velocity: 1.0,
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn sorts_by_start_time() {
        let timeline = NoteTimeline::new(
            vec![note(0, 60, 2.0, 3.0), note(1, 62, 0.5, 1.0), note(2, 64, 1.0, 4.0)],
            4.0,
        );
        let starts: Vec<f32> = timeline.notes().iter().map(|n| n.start_time).collect();
        assert_eq!(starts, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn window_returns_overlapping_notes() {
        let timeline = NoteTimeline::new(
            vec![
                note(0, 60, 0.0, 1.0),
                note(1, 62, 0.5, 5.0),
                note(0, 64, 2.0, 2.5),
                note(0, 65, 3.0, 3.5),
            ],
            5.0,
        );
        let pitches: Vec<u8> = timeline.window(1.0, 3.0).map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![62, 64]);
    }

    #[test]
    fn insert_keeps_order_and_extends_duration() {
        let mut timeline = NoteTimeline::new(vec![note(0, 60, 0.0, 1.0), note(0, 62, 2.0, 3.0)], 3.0);
        timeline.insert(note(1, 64, 1.0, 4.5));
        let pitches: Vec<u8> = timeline.notes().iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![60, 64, 62]);
        assert_eq!(timeline.duration(), 4.5);
    }

    #[test]
    fn active_at_uses_half_open_spans() {
        let timeline = NoteTimeline::new(vec![note(0, 60, 0.0, 1.0), note(0, 62, 1.0, 2.0)], 2.0);
        let pitches: Vec<u8> = timeline.active_at(1.0).map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![62]);
        assert_eq!(timeline.active_at(2.0).count(), 0);
    }
}

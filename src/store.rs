//! Shared visualization state.
//!
//! The audio producer pushes PCM and telemetry, the render loop ticks peak
//! decay and reads snapshots. Both go through one mutex; offline note
//! extraction runs outside it on its own synth instance and only takes the
//! lock to reset and to commit.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::audio::levels::{ChannelLevelEstimator, LevelSource, VoiceLevel};
use crate::audio::spectrum::{
    SpectralBinner, SpectrumFrame, SpectrumHistory, FFT_SIZE, HISTORY_SIZE, SPECTRUM_BINS,
};
use crate::audio::waveform::{mono_mix, SampleWindow, WaveformRing, WAVEFORM_SIZE};
use crate::notes::events::{ExplicitEventTimeline, NoteEvent, EVENT_CHANNELS};
use crate::notes::inference::{LiveNote, LiveNoteTracker};
use crate::notes::preprocess::{self, PreprocessError, PreprocessSettings, SynthSession};
use crate::notes::timeline::{NoteInterval, NoteTimeline};
use crate::voice::{TelemetryFrame, VoiceLayout};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisualSettings {
    pub smoothing: f32,
    pub decay_rate: f32,
    /// Frame rate the decay rate is expressed against.
    pub reference_rate: f32,
    pub zoom: f32,
    pub saw_level_ceiling: f32,
    pub level_source: LevelSource,
    /// Minimum note length for events arriving live.
    pub live_event_min_duration: f32,
    /// Minimum note length when loading a whole event list.
    pub event_min_duration: f32,
    pub preprocess: PreprocessSettings,
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            smoothing: 0.7,
            decay_rate: 0.95,
            reference_rate: 60.0,
            zoom: 1.0,
            saw_level_ceiling: 31.0,
            level_source: LevelSource::Telemetry,
            live_event_min_duration: 0.01,
            event_min_duration: 0.005,
            preprocess: PreprocessSettings::default(),
        }
    }
}

/// Where the current note timeline came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimelineSource {
    #[default]
    Telemetry,
    Events,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaveformSnapshot {
    pub mono: Vec<f32>,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub zoom: f32,
}

struct VisualState {
    layout: VoiceLayout,
    source: TimelineSource,
    waveform: WaveformRing,
    fft_input: SampleWindow,
    spectrum: SpectralBinner,
    history: SpectrumHistory,
    levels: ChannelLevelEstimator,
    live: LiveNoteTracker,
    keyboard: [LiveNote; EVENT_CHANNELS],
    timeline: Option<NoteTimeline>,
    events: ExplicitEventTimeline,
    mute_mask: u32,
    generation: u64,
}

impl VisualState {
    fn new(settings: &VisualSettings) -> Self {
        let layout = VoiceLayout::base();
        let mut waveform = WaveformRing::new(WAVEFORM_SIZE);
        waveform.set_zoom(settings.zoom);
        Self {
            layout,
            source: TimelineSource::Telemetry,
            waveform,
            fft_input: SampleWindow::new(FFT_SIZE),
            spectrum: SpectralBinner::new(FFT_SIZE, SPECTRUM_BINS, settings.smoothing),
            history: SpectrumHistory::new(HISTORY_SIZE, SPECTRUM_BINS),
            levels: ChannelLevelEstimator::new(layout, settings.saw_level_ceiling),
            live: LiveNoteTracker::new(),
            keyboard: [LiveNote::default(); EVENT_CHANNELS],
            timeline: None,
            events: ExplicitEventTimeline::new(settings.live_event_min_duration),
            mute_mask: 0,
            generation: 0,
        }
    }

    fn keyboard_len(&self) -> usize {
        match self.source {
            TimelineSource::Telemetry => self.layout.voice_count(),
            TimelineSource::Events => EVENT_CHANNELS,
        }
    }

    fn clear(&mut self) {
        self.source = TimelineSource::Telemetry;
        self.waveform.clear();
        self.fft_input.clear();
        self.spectrum.clear();
        self.history.clear();
        self.levels.clear();
        self.live.clear();
        self.keyboard = [LiveNote::default(); EVENT_CHANNELS];
        self.timeline = None;
        self.events.clear();
    }
}

pub struct VisualizationStore {
    settings: VisualSettings,
    state: Mutex<VisualState>,
    passes_running: AtomicUsize,
    progress_bits: AtomicU32,
}

impl Default for VisualizationStore {
    fn default() -> Self {
        Self::new(VisualSettings::default())
    }
}

impl VisualizationStore {
    pub fn new(settings: VisualSettings) -> Self {
        Self {
            state: Mutex::new(VisualState::new(&settings)),
            settings,
            passes_running: AtomicUsize::new(0),
            progress_bits: AtomicU32::new(0f32.to_bits()),
        }
    }

    pub fn settings(&self) -> &VisualSettings {
        &self.settings
    }

    fn state(&self) -> MutexGuard<'_, VisualState> {
        // State is plain data; a panicked writer cannot leave it unsafe to read
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear every buffer and the note timeline. Mute bits and layout survive.
    /// A preprocessing pass still running will not commit afterwards.
    pub fn reset(&self) {
        let mut state = self.state();
        state.clear();
        state.generation += 1;
        log::debug!("Visualization state reset");
    }

    pub fn set_expansion_enabled(&self, enabled: bool) {
        let mut state = self.state();
        let layout = if enabled {
            VoiceLayout::with_expansion()
        } else {
            VoiceLayout::base()
        };
        state.layout = layout;
        state.levels.set_layout(layout);
    }

    pub fn layout(&self) -> VoiceLayout {
        self.state().layout
    }

    pub fn set_smoothing(&self, smoothing: f32) {
        self.state().spectrum.set_smoothing(smoothing);
    }

    pub fn set_zoom(&self, zoom: f32) {
        self.state().waveform.set_zoom(zoom);
    }

    pub fn set_voice_muted(&self, voice: usize, muted: bool) {
        if voice >= 32 {
            return;
        }
        let mut state = self.state();
        if muted {
            state.mute_mask |= 1 << voice;
        } else {
            state.mute_mask &= !(1 << voice);
        }
    }

    pub fn is_voice_muted(&self, voice: usize) -> bool {
        voice < 32 && self.state().mute_mask & (1 << voice) != 0
    }

    /// Bitmask of muted voices, for the synth to apply.
    pub fn mute_mask(&self) -> u32 {
        self.state().mute_mask
    }

    // ---- producer side ----

    /// Feed interleaved 16-bit stereo PCM. Empty input is ignored.
    pub fn push_audio(&self, interleaved: &[i16]) {
        if interleaved.len() < 2 {
            return;
        }
        let mut guard = self.state();
        let state = &mut *guard;

        state.waveform.push(interleaved);
        state
            .fft_input
            .push_iter(mono_mix(interleaved), interleaved.len() / 2);
        let frame = state.spectrum.analyze(state.fft_input.as_slice());
        state.history.push(&frame.magnitudes);

        if self.settings.level_source == LevelSource::OutputRms {
            let mask = state.mute_mask;
            state.levels.update_from_output(interleaved, mask);
        }
    }

    /// Feed one step of oscillator telemetry at playback time `now`.
    pub fn update_telemetry(&self, frame: &TelemetryFrame, now: f32) {
        let mut guard = self.state();
        let state = &mut *guard;

        if self.settings.level_source == LevelSource::Telemetry {
            state.levels.update(frame);
        }
        let layout = state.layout;
        state
            .live
            .update(frame, layout, &self.settings.preprocess.rules, now);
        if state.source == TimelineSource::Telemetry {
            let live = state.live.notes(layout);
            state.keyboard[..live.len()].copy_from_slice(live);
        }
    }

    // ---- consumer side ----

    /// Decay peak holds by the wall-clock time since the last tick.
    pub fn tick(&self, delta_seconds: f32) {
        let delta = if delta_seconds.is_finite() { delta_seconds.max(0.0) } else { 0.0 };
        let factor = self
            .settings
            .decay_rate
            .powf(delta * self.settings.reference_rate);
        let mut state = self.state();
        state.spectrum.frame_mut().decay_peaks(factor);
        state.levels.decay_peaks(factor);
    }

    pub fn waveform(&self) -> WaveformSnapshot {
        let state = self.state();
        WaveformSnapshot {
            mono: state.waveform.mono().to_vec(),
            left: state.waveform.left().to_vec(),
            right: state.waveform.right().to_vec(),
            zoom: state.waveform.zoom(),
        }
    }

    pub fn spectrum(&self) -> SpectrumFrame {
        self.state().spectrum.frame().clone()
    }

    /// Waterfall rows, oldest first.
    pub fn spectrum_history(&self) -> Vec<Vec<f32>> {
        self.state().history.ordered().map(<[f32]>::to_vec).collect()
    }

    pub fn levels(&self) -> Vec<VoiceLevel> {
        self.state().levels.levels().to_vec()
    }

    /// Per-voice (or per-channel, for event sources) keyboard state.
    pub fn live_notes(&self) -> Vec<LiveNote> {
        let state = self.state();
        state.keyboard[..state.keyboard_len()].to_vec()
    }

    pub fn timeline_source(&self) -> TimelineSource {
        self.state().source
    }

    pub fn has_timeline(&self) -> bool {
        self.state().timeline.is_some()
    }

    pub fn track_duration(&self) -> Option<f32> {
        self.state().timeline.as_ref().map(NoteTimeline::duration)
    }

    /// Notes overlapping `[start, end)` for piano-roll drawing.
    pub fn notes_in_window(&self, start: f32, end: f32) -> Vec<NoteInterval> {
        let state = self.state();
        match &state.timeline {
            Some(timeline) => timeline.window(start, end).copied().collect(),
            None => Vec::new(),
        }
    }

    /// Point the keyboard at whatever the timeline says is sounding at `time`.
    /// An event channel holding several notes shows the highest one.
    pub fn sync_to_playback_time(&self, time: f32) {
        let mut guard = self.state();
        let state = &mut *guard;
        let len = state.keyboard_len();
        let Some(timeline) = &state.timeline else {
            return;
        };
        let prefer_highest = state.source == TimelineSource::Events;

        for key in &mut state.keyboard[..len] {
            key.active = false;
        }
        for note in timeline.active_at(time) {
            let Some(key) = state.keyboard[..len].get_mut(note.voice) else {
                continue;
            };
            if !key.active || !prefer_highest || note.pitch > key.pitch {
                *key = LiveNote {
                    pitch: note.pitch,
                    velocity: note.velocity,
                    active: true,
                };
            }
        }
    }

    // ---- explicit events ----

    /// Rebuild the timeline from a complete event list.
    pub fn load_events(&self, events: &[NoteEvent]) {
        let timeline = ExplicitEventTimeline::from_events(events, self.settings.event_min_duration);
        log::info!(
            "Loaded {} notes from {} events ({:.1}s)",
            timeline.len(),
            events.len(),
            timeline.duration()
        );
        let mut state = self.state();
        state.generation += 1;
        state.source = TimelineSource::Events;
        state.keyboard = [LiveNote::default(); EVENT_CHANNELS];
        state.events.clear();
        state.timeline = Some(timeline);
    }

    pub fn event_note_on(&self, channel: u8, pitch: u8, velocity: f32, time: f32) {
        if usize::from(channel) >= EVENT_CHANNELS || pitch > 127 {
            return;
        }
        let mut state = self.state();
        state.source = TimelineSource::Events;
        state.keyboard[usize::from(channel)] = LiveNote {
            pitch,
            velocity,
            active: true,
        };
        state.events.note_on(channel, pitch, velocity, time);
    }

    pub fn event_note_off(&self, channel: u8, pitch: u8, time: f32) {
        if usize::from(channel) >= EVENT_CHANNELS || pitch > 127 {
            return;
        }
        let mut guard = self.state();
        let state = &mut *guard;
        if let Some(interval) = state.events.note_off(channel, pitch, time) {
            state
                .timeline
                .get_or_insert_with(NoteTimeline::default)
                .insert(interval);
        }
        let key = &mut state.keyboard[usize::from(channel)];
        if key.pitch == pitch {
            key.active = false;
        }
    }

    pub fn all_notes_off(&self) {
        let mut state = self.state();
        state.events.all_notes_off();
        for key in &mut state.keyboard {
            key.active = false;
        }
    }

    // ---- offline preprocessing ----

    pub fn is_preprocessing(&self) -> bool {
        self.passes_running.load(Ordering::Acquire) > 0
    }

    pub fn preprocess_progress(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    fn set_progress(&self, progress: f32) {
        self.progress_bits
            .store(progress.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Track change: clear everything from the previous track, then build the
    /// new track's timeline. Live playback can start once this returns.
    pub fn load_track<S>(
        &self,
        synth: S,
        track: usize,
        progress: impl FnMut(f32),
    ) -> Result<usize, PreprocessError>
    where
        S: SynthSession,
    {
        self.reset();
        self.preprocess_track(synth, track, progress)
    }

    /// Extract the note timeline for `track` using `synth`, a synth instance
    /// dedicated to this pass. The lock is only held to reset and to commit;
    /// a pass overtaken by a newer one is discarded. Returns the note count.
    pub fn preprocess_track<S>(
        &self,
        mut synth: S,
        track: usize,
        mut progress: impl FnMut(f32),
    ) -> Result<usize, PreprocessError>
    where
        S: SynthSession,
    {
        let generation = {
            let mut state = self.state();
            state.generation += 1;
            state.source = TimelineSource::Telemetry;
            state.timeline = None;
            state.generation
        };

        self.passes_running.fetch_add(1, Ordering::AcqRel);
        self.set_progress(0.0);
        let result = preprocess::preprocess_track(
            &mut synth,
            track,
            &self.settings.preprocess,
            &mut |p| {
                self.set_progress(p);
                progress(p);
            },
        );
        self.passes_running.fetch_sub(1, Ordering::AcqRel);

        let timeline = match result {
            Ok(timeline) => timeline,
            Err(err) => {
                log::warn!("Preprocessing track {} failed: {}", track, err);
                return Err(err);
            }
        };

        let mut state = self.state();
        if state.generation != generation {
            log::warn!("Discarding stale preprocessing result for track {}", track);
            return Err(PreprocessError::Superseded);
        }
        let layout = if synth.has_expansion() {
            VoiceLayout::with_expansion()
        } else {
            VoiceLayout::base()
        };
        state.layout = layout;
        state.levels.set_layout(layout);
        let count = timeline.len();
        state.timeline = Some(timeline);
        Ok(count)
    }
}

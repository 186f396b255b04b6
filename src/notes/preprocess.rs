//! Offline note extraction: drive a private synth instance through a track in
//! fixed-size chunks and record every note it plays.

use thiserror::Error;

use crate::voice::{TelemetryFrame, VoiceLayout};

use super::inference::{NoteRecorder, NoteRules};
use super::timeline::NoteTimeline;

const PROGRESS_EVERY: usize = 100;

/// Read-only access to a synthesizer's per-voice oscillator state.
pub trait TelemetrySource {
    fn telemetry(&self) -> TelemetryFrame;
}

/// A synthesis instance that can be started on a track and stepped forward.
pub trait SynthSession: TelemetrySource {
    fn track_info(&self, track: usize) -> Result<TrackInfo, SynthError>;
    fn start_track(&mut self, track: usize) -> Result<(), SynthError>;
    /// Render interleaved stereo PCM into `out`, advancing the synth.
    fn render(&mut self, out: &mut [i16]);
    fn track_ended(&self) -> bool;
    /// Whether the expansion-chip voices are present.
    fn has_expansion(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackInfo {
    /// Declared length in seconds, if the source knows it.
    pub length: Option<f32>,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SynthError(pub String);

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to read info for track {track}")]
    TrackInfo {
        track: usize,
        #[source]
        source: SynthError,
    },
    #[error("failed to start track {track}")]
    StartTrack {
        track: usize,
        #[source]
        source: SynthError,
    },
    #[error("preprocessing pass was superseded by a newer one")]
    Superseded,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreprocessSettings {
    pub sample_rate: u32,
    /// Stereo frames rendered per step.
    pub chunk_frames: usize,
    /// Used when the track does not declare a length.
    pub default_duration: f32,
    /// Upper bound on how much of a track is scanned.
    pub max_duration: f32,
    pub rules: NoteRules,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            chunk_frames: 1024,
            default_duration: 180.0,
            max_duration: 300.0,
            rules: NoteRules::default(),
        }
    }
}

impl PreprocessSettings {
    pub fn estimated_duration(&self, info: &TrackInfo) -> f32 {
        let declared = info
            .length
            .filter(|len| len.is_finite() && *len > 0.0)
            .unwrap_or(self.default_duration);
        declared.min(self.max_duration)
    }

    pub fn chunk_seconds(&self) -> f32 {
        self.chunk_frames.max(1) as f32 / self.sample_rate.max(1) as f32
    }
}

/// Run the note state machine over `track` on a synth instance owned by the
/// caller. `progress` receives values in 0.0-1.0 and always ends with 1.0.
pub fn preprocess_track<S>(
    synth: &mut S,
    track: usize,
    settings: &PreprocessSettings,
    progress: &mut dyn FnMut(f32),
) -> Result<NoteTimeline, PreprocessError>
where
    S: SynthSession + ?Sized,
{
    let info = synth
        .track_info(track)
        .map_err(|source| PreprocessError::TrackInfo { track, source })?;
    let duration = settings.estimated_duration(&info);

    synth
        .start_track(track)
        .map_err(|source| PreprocessError::StartTrack { track, source })?;

    let layout = if synth.has_expansion() {
        VoiceLayout::with_expansion()
    } else {
        VoiceLayout::base()
    };
    log::debug!(
        "Preprocessing track {} for up to {:.1}s ({} voices)",
        track,
        duration,
        layout.voice_count()
    );

    let chunk_frames = settings.chunk_frames.max(1);
    let sample_rate = f64::from(settings.sample_rate.max(1));
    let mut buffer = vec![0i16; chunk_frames * 2];
    let mut recorder = NoteRecorder::new(layout, settings.rules);
    let mut chunks = 0usize;
    let mut now = 0.0f32;

    while now < duration && !synth.track_ended() {
        synth.render(&mut buffer);
        recorder.observe(&synth.telemetry(), now);

        chunks += 1;
        // Derived from the frame count so long tracks do not drift
        now = ((chunks * chunk_frames) as f64 / sample_rate) as f32;

        if chunks % PROGRESS_EVERY == 0 {
            progress((now / duration).min(1.0));
        }
    }

    let timeline = recorder.finish(now);
    progress(1.0);

    log::info!(
        "Track {}: {} notes over {:.1}s ({} chunks)",
        track,
        timeline.len(),
        timeline.duration(),
        chunks
    );
    Ok(timeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{Score, ScriptedSynth};
    use crate::voice::VoiceTelemetry;

    fn settings() -> PreprocessSettings {
        PreprocessSettings {
            sample_rate: 1000,
            chunk_frames: 10,
            ..PreprocessSettings::default()
        }
    }

    fn held_note_score() -> Score {
        let mut score = Score::new("held", Some(1.0));
        score.hold(0, VoiceTelemetry::base(100, 10, 15), 0.0, 0.5);
        score
    }

    #[test]
    fn records_a_held_note() {
        let mut synth = ScriptedSynth::new(vec![held_note_score()], 1000);
        let mut updates = Vec::new();
        let timeline =
            preprocess_track(&mut synth, 0, &settings(), &mut |p| updates.push(p)).unwrap();

        assert_eq!(timeline.len(), 1);
        let note = timeline.notes()[0];
        assert_eq!((note.voice, note.pitch, note.velocity), (0, 85, 1.0));
        assert!(note.start_time.abs() < 1e-6);
        assert!((note.end_time - 0.5).abs() < 1e-4);
        assert!((timeline.duration() - 1.0).abs() < 1e-4);

        assert_eq!(updates.last(), Some(&1.0));
        assert!(updates.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn duration_defaults_and_caps() {
        let settings = PreprocessSettings::default();
        assert_eq!(settings.estimated_duration(&TrackInfo { length: None }), 180.0);
        assert_eq!(settings.estimated_duration(&TrackInfo { length: Some(0.0) }), 180.0);
        assert_eq!(settings.estimated_duration(&TrackInfo { length: Some(42.0) }), 42.0);
        assert_eq!(settings.estimated_duration(&TrackInfo { length: Some(900.0) }), 300.0);
    }

    #[test]
    fn missing_track_is_an_error() {
        let mut synth = ScriptedSynth::new(vec![held_note_score()], 1000);
        let err = preprocess_track(&mut synth, 3, &settings(), &mut |_| {}).unwrap_err();
        assert!(matches!(err, PreprocessError::TrackInfo { track: 3, .. }));
    }

    #[test]
    fn stops_when_track_ends_early() {
        let mut score = Score::new("short", Some(60.0));
        score.hold(1, VoiceTelemetry::base(200, 10, 9), 0.0, 0.3);
        score.end_at(0.4);
        let mut synth = ScriptedSynth::new(vec![score], 1000);
        let timeline = preprocess_track(&mut synth, 0, &settings(), &mut |_| {}).unwrap();
        assert!(timeline.duration() < 0.5);
        assert_eq!(timeline.len(), 1);
    }
}

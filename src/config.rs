use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::levels::LevelSource;
use crate::notes::inference::NoteRules;
use crate::notes::preprocess::PreprocessSettings;
use crate::store::VisualSettings;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spectrum: SpectrumConfig,
    #[serde(default)]
    pub peaks: PeaksConfig,
    #[serde(default)]
    pub waveform: WaveformConfig,
    #[serde(default)]
    pub notes: NotesConfig,
    #[serde(default)]
    pub levels: LevelsConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

#[derive(Debug, Deserialize)]
pub struct SpectrumConfig {
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
}

#[derive(Debug, Deserialize)]
pub struct PeaksConfig {
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f32,
    #[serde(default = "default_reference_rate")]
    pub reference_rate: f32,
}

#[derive(Debug, Deserialize)]
pub struct WaveformConfig {
    #[serde(default = "default_zoom")]
    pub zoom: f32,
}

#[derive(Debug, Deserialize)]
pub struct NotesConfig {
    #[serde(default = "default_min_duration")]
    pub min_duration: f32,
    #[serde(default = "default_event_min_duration")]
    pub event_min_duration: f32,
    #[serde(default = "default_clock_rate")]
    pub clock_rate: f32,
    #[serde(default = "default_fixed_velocity")]
    pub triangle_velocity: f32,
    #[serde(default = "default_fixed_velocity")]
    pub dac_velocity: f32,
    #[serde(default = "default_dac_pitch")]
    pub dac_pitch: u8,
    #[serde(default = "default_velocity_threshold")]
    pub velocity_threshold: f32,
    #[serde(default = "default_saw_velocity_ceiling")]
    pub saw_velocity_ceiling: f32,
}

#[derive(Debug, Deserialize)]
pub struct LevelsConfig {
    #[serde(default = "default_saw_ceiling")]
    pub saw_ceiling: f32,
    #[serde(default)]
    pub source: LevelSource,
}

#[derive(Debug, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,
    #[serde(default = "default_track_duration")]
    pub default_duration: f32,
    #[serde(default = "default_max_duration")]
    pub max_duration: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            smoothing: default_smoothing(),
        }
    }
}

impl Default for PeaksConfig {
    fn default() -> Self {
        Self {
            decay_rate: default_decay_rate(),
            reference_rate: default_reference_rate(),
        }
    }
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self { zoom: default_zoom() }
    }
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            min_duration: default_min_duration(),
            event_min_duration: default_event_min_duration(),
            clock_rate: default_clock_rate(),
            triangle_velocity: default_fixed_velocity(),
            dac_velocity: default_fixed_velocity(),
            dac_pitch: default_dac_pitch(),
            velocity_threshold: default_velocity_threshold(),
            saw_velocity_ceiling: default_saw_velocity_ceiling(),
        }
    }
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            saw_ceiling: default_saw_ceiling(),
            source: LevelSource::default(),
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_frames: default_chunk_frames(),
            default_duration: default_track_duration(),
            max_duration: default_max_duration(),
        }
    }
}

fn default_smoothing() -> f32 { 0.7 }
fn default_decay_rate() -> f32 { 0.95 }
fn default_reference_rate() -> f32 { 60.0 }
fn default_zoom() -> f32 { 1.0 }
fn default_min_duration() -> f32 { 0.01 }
fn default_event_min_duration() -> f32 { 0.005 }
fn default_clock_rate() -> f32 { 1_789_773.0 }
fn default_fixed_velocity() -> f32 { 0.8 }
fn default_dac_pitch() -> u8 { 28 }
fn default_velocity_threshold() -> f32 { 0.01 }
fn default_saw_velocity_ceiling() -> f32 { 42.0 }
fn default_saw_ceiling() -> f32 { 31.0 }
fn default_sample_rate() -> u32 { 44_100 }
fn default_chunk_frames() -> usize { 1024 }
fn default_track_duration() -> f32 { 180.0 }
fn default_max_duration() -> f32 { 300.0 }

impl NotesConfig {
    pub fn rules(&self) -> NoteRules {
        NoteRules {
            clock_rate: self.clock_rate,
            velocity_threshold: self.velocity_threshold,
            min_duration: self.min_duration,
            triangle_velocity: self.triangle_velocity,
            dac_velocity: self.dac_velocity,
            dac_pitch: self.dac_pitch.min(127),
            saw_velocity_ceiling: self.saw_velocity_ceiling,
        }
    }
}

impl Config {
    pub fn preprocess_settings(&self) -> PreprocessSettings {
        PreprocessSettings {
            sample_rate: self.preprocess.sample_rate,
            chunk_frames: self.preprocess.chunk_frames,
            default_duration: self.preprocess.default_duration,
            max_duration: self.preprocess.max_duration,
            rules: self.notes.rules(),
        }
    }

    pub fn visual_settings(&self) -> VisualSettings {
        VisualSettings {
            smoothing: self.spectrum.smoothing.clamp(0.0, 1.0),
            decay_rate: self.peaks.decay_rate,
            reference_rate: self.peaks.reference_rate,
            zoom: self.waveform.zoom,
            saw_level_ceiling: self.levels.saw_ceiling,
            level_source: self.levels.source,
            live_event_min_duration: self.notes.min_duration,
            event_min_duration: self.notes.event_min_duration,
            preprocess: self.preprocess_settings(),
        }
    }
}

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Explicit path first, then `./chipscope.toml`, then the user config dirs.
pub fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let local = PathBuf::from("chipscope.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("chipscope").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("chipscope").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.visual_settings(), VisualSettings::default());
        assert_eq!(config.notes.rules(), NoteRules::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [spectrum]
            smoothing = 0.5

            [levels]
            source = "output_rms"

            [notes]
            dac_pitch = 40

            [preprocess]
            max_duration = 60.0
            "#,
        )
        .unwrap();

        let settings = config.visual_settings();
        assert_eq!(settings.smoothing, 0.5);
        assert_eq!(settings.level_source, LevelSource::OutputRms);
        assert_eq!(settings.decay_rate, 0.95);
        assert_eq!(settings.preprocess.max_duration, 60.0);
        assert_eq!(settings.preprocess.chunk_frames, 1024);
        assert_eq!(settings.preprocess.rules.dac_pitch, 40);
        assert_eq!(settings.preprocess.rules.triangle_velocity, 0.8);
    }

    #[test]
    fn unknown_level_source_is_rejected() {
        assert!(toml::from_str::<Config>("[levels]\nsource = \"loudness\"").is_err());
    }
}

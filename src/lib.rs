//! Visualization state engine for register-level chip music: waveform and
//! spectrum analysis of the mixed output, per-voice activity meters, and
//! note timelines inferred from oscillator telemetry or symbolic events.

pub mod audio;
pub mod config;
pub mod notes;
pub mod store;
pub mod synth;
pub mod voice;

pub use store::{VisualSettings, VisualizationStore};

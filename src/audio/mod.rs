pub mod levels;
pub mod spectrum;
pub mod waveform;

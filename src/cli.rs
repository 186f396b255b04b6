use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chipscope", about = "Chip-music visualization state engine")]
pub struct Cli {
    /// Config file (TOML). Defaults to ./chipscope.toml or the user config dir
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Demo track to preprocess and play
    #[arg(short, long, default_value_t = 0, conflicts_with = "all_tracks")]
    pub track: usize,

    /// Preprocess every demo track in parallel before playing
    #[arg(long)]
    pub all_tracks: bool,

    /// Seconds of live playback to simulate after preprocessing
    #[arg(long, default_value_t = 4.0)]
    pub live_seconds: f32,

    /// Piano-roll window to report, in seconds
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    pub window: Option<Vec<f32>>,

    /// Consumer tick rate for the live simulation
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// Spectrum smoothing factor (0.0-1.0)
    #[arg(long, default_value_t = 0.7)]
    pub smoothing: f32,

    /// Estimate meters from mixed output instead of voice telemetry
    #[arg(long)]
    pub output_rms: bool,

    /// Voices to mute (comma-separated indices)
    #[arg(long, value_delimiter = ',')]
    pub mute: Vec<usize>,
}

impl Cli {
    pub fn window(&self) -> (f32, f32) {
        match self.window.as_deref() {
            Some([start, end]) => (*start, *end),
            _ => (0.0, 2.0),
        }
    }
}

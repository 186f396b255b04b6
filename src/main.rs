mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chipscope::audio::levels::LevelSource;
use chipscope::config::{self, Config};
use chipscope::notes::preprocess::{self, SynthSession, TelemetrySource};
use chipscope::synth::{demo_scores, ScriptedSynth};
use chipscope::voice::note_name;
use chipscope::VisualizationStore;
use cli::Cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect chipscope.toml / global config
    let mut cfg = Config::default();
    if let Some(path) = config::find_config(cli.config.clone()) {
        match config::load_config(&path) {
            Some(loaded) => {
                log::info!("Loaded config from {}", path.display());
                cfg = loaded;
            }
            None => log::warn!("Failed to load config from {}", path.display()),
        }
    }
    // Merge: CLI values apply only when they differ from their defaults
    if cli.smoothing != 0.7 {
        cfg.spectrum.smoothing = cli.smoothing;
    }
    if cli.output_rms {
        cfg.levels.source = LevelSource::OutputRms;
    }

    let settings = cfg.visual_settings();
    let scores = demo_scores();
    anyhow::ensure!(
        cli.track < scores.len(),
        "Track {} out of range ({} demo tracks)",
        cli.track,
        scores.len()
    );

    log::info!("chipscope - chip music visualization engine");
    log::info!(
        "Track: {} \"{}\", sample rate {} Hz, tick {} fps",
        cli.track,
        scores[cli.track].name,
        settings.preprocess.sample_rate,
        cli.fps
    );

    // 1. Optional survey of every track, one synth per worker
    if cli.all_tracks {
        log::info!("Preprocessing {} tracks in parallel...", scores.len());
        let pb = ProgressBar::new(scores.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tracks")
                .context("invalid progress template")?
                .progress_chars("=>-"),
        );
        let results: Vec<_> = (0..scores.len())
            .into_par_iter()
            .map(|track| {
                let mut synth = ScriptedSynth::new(scores.clone(), settings.preprocess.sample_rate);
                let result =
                    preprocess::preprocess_track(&mut synth, track, &settings.preprocess, &mut |_| {});
                pb.inc(1);
                (track, result)
            })
            .collect();
        pb.finish_and_clear();

        for (track, result) in results {
            match result {
                Ok(timeline) => log::info!(
                    "  [{}] {:<20} {:4} notes, {:.1}s",
                    track,
                    scores[track].name,
                    timeline.len(),
                    timeline.duration()
                ),
                Err(err) => log::warn!("  [{}] {}: {:#}", track, scores[track].name, err),
            }
        }
    }

    // 2. Track change: reset the store and preprocess the selected track into it
    let store = Arc::new(VisualizationStore::new(settings));
    for &voice in &cli.mute {
        store.set_voice_muted(voice, true);
    }

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}% extracting notes")
            .context("invalid progress template")?
            .progress_chars("=>-"),
    );
    let synth = ScriptedSynth::new(scores.clone(), settings.preprocess.sample_rate);
    let note_count = store
        .load_track(synth, cli.track, |p| pb.set_position((p * 100.0) as u64))
        .with_context(|| format!("Failed to preprocess track {}", cli.track))?;
    pb.finish_and_clear();
    log::info!(
        "Timeline ready: {} notes over {:.1}s",
        note_count,
        store.track_duration().unwrap_or(0.0)
    );

    // 3. Live playback: producer thread feeds PCM + telemetry, this thread ticks
    let mut player = ScriptedSynth::new(scores.clone(), settings.preprocess.sample_rate);
    player
        .start_track(cli.track)
        .with_context(|| format!("Failed to start track {}", cli.track))?;
    store.set_expansion_enabled(player.has_expansion());
    player.set_mute_mask(store.mute_mask());

    let fps = cli.fps.max(1);
    let live_seconds = cli.live_seconds.max(0.0);
    let frames_per_tick = (settings.preprocess.sample_rate / fps).max(1) as usize;
    let ticks = (live_seconds * fps as f32).ceil() as usize;

    let producer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let started = Instant::now();
            let mut pcm = vec![0i16; frames_per_tick * 2];
            for _ in 0..ticks {
                if player.track_ended() {
                    break;
                }
                let now = player.position();
                player.render(&mut pcm);
                store.push_audio(&pcm);
                store.update_telemetry(&player.telemetry(), now);

                // Stay roughly in step with the wall clock
                let ahead = Duration::from_secs_f32(player.position())
                    .saturating_sub(started.elapsed());
                thread::sleep(ahead);
            }
        })
    };

    log::info!("Simulating {:.1}s of live playback...", live_seconds);
    let started = Instant::now();
    let mut last = started;
    let tick_interval = Duration::from_secs_f32(1.0 / fps as f32);
    for tick in 0..ticks {
        thread::sleep(tick_interval);
        let now = Instant::now();
        store.tick(now.duration_since(last).as_secs_f32());
        store.sync_to_playback_time(now.duration_since(started).as_secs_f32());
        last = now;

        if (tick + 1) % fps as usize == 0 {
            log_summary(&store, started.elapsed().as_secs_f32());
        }
    }
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("Producer thread panicked"))?;

    // 4. Piano-roll window from the preprocessed timeline
    let (start, end) = cli.window();
    let notes = store.notes_in_window(start, end);
    log::info!("Notes in {:.2}s..{:.2}s: {}", start, end, notes.len());
    for note in &notes {
        log::info!(
            "  voice {} {:<4} vel {:.2}  {:.3}s - {:.3}s",
            note.voice,
            note_name(note.pitch),
            note.velocity,
            note.start_time,
            note.end_time
        );
    }

    log::info!("Done!");
    Ok(())
}

fn log_summary(store: &VisualizationStore, elapsed: f32) {
    let layout = store.layout();
    let meters: Vec<String> = store
        .levels()
        .iter()
        .zip(layout.classes())
        .map(|(level, class)| format!("{}:{:.2}/{:.2}", class.short_name(), level.amplitude, level.peak))
        .collect();

    let spectrum = store.spectrum();
    let loudest = spectrum
        .magnitudes
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(bin, &m)| (bin, m))
        .unwrap_or((0, 0.0));

    let keys: Vec<String> = store
        .live_notes()
        .iter()
        .enumerate()
        .filter(|(_, note)| note.active)
        .map(|(voice, note)| format!("{}={}", voice, note_name(note.pitch)))
        .collect();

    log::info!(
        "{:5.2}s | {} | loudest bin {} ({:.2}) | keys [{}]",
        elapsed,
        meters.join(" "),
        loudest.0,
        loudest.1,
        keys.join(" ")
    );
}

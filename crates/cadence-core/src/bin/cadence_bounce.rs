//! cadence-bounce - render a demo pattern to a WAV file
//!
//! Builds a small synth + percussion pattern, bounces the loop offline and
//! exits. Useful for checking a build without an audio device.
//!
//! ## Command line flags
//!
//! - `--out <path>`: output file (default: timestamped file in the current directory)
//! - `--tempo <bpm>`: tempo (default: from the engine config)
//! - `--bars <n>`: loop length in bars (default: 2)
//! - `--config <path>`: engine config file (default: ~/.config/cadence/engine.yaml)

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use cadence_core::buffer::{AudioBuffer, SampleBuffer};
use cadence_core::config::{default_config_path, load_config};
use cadence_core::effect::native::{DelayProcessor, LimiterProcessor};
use cadence_core::event::AudioEvent;
use cadence_core::record::timestamped_path;
use cadence_core::synth::{OscillatorSettings, SynthSettings, Waveform};
use cadence_core::transport::Timing;
use cadence_core::{note_frequency, ChainTarget, Engine};

const STEPS_PER_BAR: usize = 16;

/// Bass line, one note per quarter (note name, octave)
const BASS_LINE: [(&str, i32); 4] = [("A", 2), ("C", 3), ("E", 2), ("G", 2)];

struct Args {
    out: Option<PathBuf>,
    tempo: Option<f64>,
    bars: usize,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        out: None,
        tempo: None,
        bars: 2,
        config: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = || iter.next().with_context(|| format!("{} needs a value", arg));
        match arg.as_str() {
            "--out" => args.out = Some(PathBuf::from(value()?)),
            "--tempo" => args.tempo = Some(value()?.parse().context("--tempo expects a number")?),
            "--bars" => args.bars = value()?.parse().context("--bars expects a whole number")?,
            "--config" => args.config = Some(PathBuf::from(value()?)),
            other => bail!("Unknown argument: {}", other),
        }
    }
    if args.bars == 0 {
        bail!("--bars must be at least 1");
    }
    Ok(args)
}

/// Short decaying click used as percussion
fn click(sample_rate: u32) -> AudioBuffer {
    let length = (sample_rate / 20) as usize;
    let samples = (0..length)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (t * 180.0 * std::f32::consts::TAU).sin() * (-t * 60.0).exp() * 0.8
        })
        .collect();
    AudioBuffer::from_channels(vec![samples])
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path);
    if let Some(tempo) = args.tempo {
        config.tempo = tempo;
    }
    let sample_rate = config.sample_rate;
    let out = args.out.clone().unwrap_or_else(|| timestamped_path(Path::new(".")));

    let mut engine = Engine::setup(config);
    let config = engine.config().clone();
    let timing = Timing::calculate(sample_rate, config.tempo, config.time_signature, STEPS_PER_BAR);
    engine.update_measures(args.bars, STEPS_PER_BAR)?;

    // synth bass through a delay
    let mut settings = SynthSettings::new(sample_rate).with_oscillator(OscillatorSettings {
        octave_shift: 1,
        volume: 0.3,
        ..OscillatorSettings::new(Waveform::Triangle)
    });
    settings.adsr.set_durations(sample_rate as usize / 200, sample_rate as usize / 10, 0, sample_rate as usize / 8);
    settings.adsr.set_sustain_level(0.6);
    let bass = engine.add_instrument(engine.create_synth_instrument(settings))?;
    engine.add_processor(ChainTarget::Channel(bass), Box::new(DelayProcessor::new(sample_rate)))?;

    // percussion on every beat, all hits share one buffer
    let drums = engine.add_instrument(engine.create_instrument())?;
    let click = SampleBuffer::shared(click(sample_rate));

    let beats_per_bar = config.time_signature.beat_amount as usize;
    for bar in 0..args.bars {
        for beat in 0..beats_per_bar {
            let start = bar * timing.samples_per_bar + beat * timing.samples_per_beat;
            let hit = click.share().context("click content is not shareable")?;
            engine.add_event(drums, AudioEvent::sample(hit, start))?;

            let (note, octave) = BASS_LINE[beat % BASS_LINE.len()];
            let frequency = note_frequency(note, octave).with_context(|| format!("Unknown note {}", note))?;
            let length = timing.samples_per_beat / 2;
            engine.add_event(bass, AudioEvent::synth(frequency, start, length, sample_rate).with_volume(0.7))?;
        }
    }

    engine.add_processor(ChainTarget::Master, Box::new(LimiterProcessor::new(sample_rate)))?;

    let end = timing.samples_per_bar * args.bars - 1;
    log::info!("Bouncing {} bars at {:.1} BPM to {:?}", args.bars, config.tempo, out);
    if !engine.bounce(0, end, &out)? {
        bail!("Bounce to {:?} failed", out);
    }
    println!("Wrote {}", out.display());
    Ok(())
}

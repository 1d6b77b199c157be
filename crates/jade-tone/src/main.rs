//! Jade Tone - plays a sine tone through the jade bridge
//!
//! Opens a client (JACK, or the offline backend), registers one audio output
//! and optionally a MIDI input, connects to the system speakers and feeds a
//! mix bus through the synthesis pump. With `--midi`, every Note On on the
//! input plays a short tone at the note's pitch.
//!
//! ## Command line flags
//!
//! - `--seconds <s>`: play for this long (default 2)
//! - `--freq <hz>`: tone frequency (default 440)
//! - `--name <name>`: requested client name (overrides the config file)
//! - `--config <path>`: config file (default `~/.config/jade/jade.yaml`)
//! - `--midi`: add a MIDI input that triggers tones
//! - `--offline`: render through the offline backend instead of JACK

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};

use jade_core::backend::{Backend, OfflineBackend, OfflineDriver};
use jade_core::config::{default_config_path, load_config, BridgeConfig};
use jade_core::diagnostics::LogSink;
use jade_core::engine::{MixBus, SineTone};
use jade_core::pump::MidiForwarder;
use jade_core::{Client, MidiEvent};

const OUTPUT_PORT: &str = "out";
const MIDI_PORT: &str = "midi_in";
const TONE_AMPLITUDE: f32 = 0.2;

/// Offline rendering format
const OFFLINE_SAMPLE_RATE: u32 = 48_000;
const OFFLINE_BUFFER_SIZE: u32 = 256;

#[derive(Debug)]
struct Args {
    seconds: f32,
    freq: f32,
    name: Option<String>,
    config: Option<PathBuf>,
    midi: bool,
    offline: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args {
            seconds: 2.0,
            freq: 440.0,
            name: None,
            config: None,
            midi: false,
            offline: false,
        };

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| args.next().with_context(|| format!("{} needs a value", flag));
            match arg.as_str() {
                "--seconds" => parsed.seconds = value("--seconds")?.parse().context("invalid --seconds")?,
                "--freq" => parsed.freq = value("--freq")?.parse().context("invalid --freq")?,
                "--name" => parsed.name = Some(value("--name")?),
                "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
                "--midi" => parsed.midi = true,
                "--offline" => parsed.offline = true,
                "--help" | "-h" => {
                    println!("usage: jade-tone [--seconds S] [--freq HZ] [--name NAME] [--config PATH] [--midi] [--offline]");
                    std::process::exit(0);
                }
                other => bail!("unknown argument: {}", other),
            }
        }

        if !(parsed.seconds.is_finite() && parsed.seconds > 0.0) {
            bail!("--seconds must be positive");
        }
        Ok(parsed)
    }
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config: BridgeConfig = load_config(&config_path);
    if let Some(name) = &args.name {
        config.client_name = name.clone();
    }

    log::info!("jade-tone starting up ({} Hz for {:.1}s)", args.freq, args.seconds);

    #[cfg(all(target_os = "linux", feature = "jack-backend"))]
    {
        if !args.offline {
            let backend = jade_core::backend::JackBackend::open(&config)?;
            let client = Client::open(backend, config, Arc::new(LogSink))?;
            return run(client, &args, None);
        }
    }

    if !args.offline {
        log::warn!("JACK backend not available, rendering offline");
    }
    let backend = OfflineBackend::new(&config.client_name, OFFLINE_SAMPLE_RATE, OFFLINE_BUFFER_SIZE);
    let driver = backend.driver();
    let client = Client::open(backend, config, Arc::new(LogSink))?;
    run(client, &args, Some(&driver))
}

fn run<B: Backend>(mut client: Client<B>, args: &Args, driver: Option<&OfflineDriver>) -> Result<()> {
    let sample_rate = client.sample_rate();
    let output = client.add_audio_out_default(OUTPUT_PORT)?;
    let midi = if args.midi {
        Some(client.add_midi_in(MIDI_PORT)?)
    } else {
        None
    };
    client.activate()?;

    // Mono tone on every speaker we have (usually left and right)
    for index in 0..client.n_system_speakers()? {
        if let Err(e) = client.connect_system_speaker(OUTPUT_PORT, index) {
            log::warn!("Could not connect to speaker {}: {}", index, e);
        }
    }

    let (bus, handle) = MixBus::new();
    let length = (args.seconds * sample_rate as f32) as u64;
    handle
        .play(SineTone::new(args.freq, TONE_AMPLITUDE, sample_rate).with_length(length))
        .map_err(|_| anyhow!("mix bus refused the tone"))?;

    let mut forwarder = match midi {
        Some(input) => {
            let handle = handle.clone();
            Some(MidiForwarder::spawn(input, move |event: MidiEvent| {
                if !event.is_note_on() {
                    return;
                }
                let amplitude = TONE_AMPLITUDE * event.data2() as f32 / 127.0;
                let tone = SineTone::new(SineTone::note_frequency(event.data1()), amplitude, sample_rate)
                    .with_length(sample_rate as u64 / 2);
                if handle.play(tone).is_err() {
                    log::warn!("Dropped note {} (mix bus busy)", event.data1());
                }
            })?)
        }
        None => None,
    };

    let mut pump = client.play(bus, output)?;

    match driver {
        Some(driver) => render_offline(driver, &pump, args, sample_rate)?,
        None => std::thread::sleep(Duration::from_secs_f32(args.seconds)),
    }

    let stats = client.xrun_stats();
    log::info!(
        "{} cycles, {} underrun cycles ({} samples held), {} server xruns",
        stats.cycles,
        stats.output_underrun_cycles,
        stats.held_output_samples,
        stats.server_xruns
    );

    if let Some(forwarder) = forwarder.as_mut() {
        forwarder.stop();
    }
    pump.stop();
    client.close()?;
    Ok(())
}

/// Drive offline cycles, giving the pump time to fill each one
fn render_offline<S: jade_core::engine::SampleSource>(
    driver: &OfflineDriver,
    pump: &jade_core::pump::SynthesisPump<S>,
    args: &Args,
    sample_rate: u32,
) -> Result<()> {
    let frames = driver.frames();
    let cycles = (args.seconds * sample_rate as f32 / frames as f32).ceil() as u64;

    if args.midi {
        driver.push_midi_input(MIDI_PORT, 0, MidiEvent::note_on(0, 0, 72, 100).bytes())?;
    }

    let mut peak = 0.0f32;
    for cycle in 0..cycles {
        let needed = (cycle + 1) * frames as u64;
        let deadline = Instant::now() + Duration::from_millis(100);
        while pump.produced() < needed && Instant::now() < deadline {
            std::thread::sleep(Duration::from_micros(200));
        }

        driver.run_cycle().context("offline backend stopped")?;
        if let Some(buffer) = driver.audio_output(OUTPUT_PORT) {
            peak = buffer.iter().fold(peak, |p, s| p.max(s.abs()));
        }
    }

    log::info!("Rendered {} cycles offline (peak {:.3})", cycles, peak);
    Ok(())
}

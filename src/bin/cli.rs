//! jamroom CLI: headless practice session, offline bounce and tuner.
//!
//! Usage:
//!   jr-cli [--bpm 90] [--loop groove.wav] [--drone C3] [--mute click] [--mic] [--seconds 30]
//!   jr-cli --wav out.wav [--seconds 8] [--bpm 120] [--loop groove.wav]
//!   jr-cli --analyze take.wav
//!
//! Logging follows `RUST_LOG`, e.g. `RUST_LOG=jr_master=debug`.

use std::io::Write;
use std::time::{Duration, Instant};
use std::{env, fs};

use jr_master::{
    analyze, frames_to_wav, load_wav_file, Controller, EstimatorConfig, LoopSource, Note, SessionConfig, TunerReading,
    VoiceId,
};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "alloc_check")]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

const USAGE: &str = "Usage: jr-cli [--bpm N] [--seconds S] [--loop file.wav] [--drone NOTE]... [--mute VOICE]... [--mic]
       jr-cli --wav out.wav [options]
       jr-cli --analyze take.wav";

#[derive(Debug, Default)]
struct Args {
    config: SessionConfig,
    bpm: Option<f64>,
    seconds: Option<f64>,
    muted: Vec<VoiceId>,
    microphone: bool,
    wav: Option<String>,
    analyze: Option<String>,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut drone = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = || iter.next().cloned().ok_or_else(|| format!("{} needs a value", arg));
        match arg.as_str() {
            "--bpm" => {
                let v = value()?;
                parsed.bpm = Some(v.parse().map_err(|_| format!("bad tempo `{}`", v))?);
            }
            "--seconds" => {
                let v = value()?;
                parsed.seconds = Some(v.parse().map_err(|_| format!("bad duration `{}`", v))?);
            }
            "--loop" => parsed.config.loop_source = LoopSource::File(value()?.into()),
            "--drone" => {
                let v = value()?;
                drone.push(v.parse::<Note>().map_err(|e| format!("bad drone note `{}`: {}", v, e))?);
            }
            "--mute" => parsed.muted.push(value()?.parse::<VoiceId>().map_err(|e| e.to_string())?),
            "--mic" => parsed.microphone = true,
            "--wav" => parsed.wav = Some(value()?),
            "--analyze" => parsed.analyze = Some(value()?),
            other => return Err(format!("unknown argument `{}`\n{}", other, USAGE)),
        }
    }

    if !drone.is_empty() {
        parsed.config.drone_notes = drone;
    }
    Ok(parsed)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let raw: Vec<String> = env::args().skip(1).collect();
    if raw.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return;
    }

    let args = parse_args(&raw).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(2);
    });

    if let Some(path) = &args.analyze {
        analyze_file(path);
        return;
    }

    let mut ctrl = Controller::new(args.config).unwrap_or_else(|e| {
        eprintln!("Failed to build session: {}", e);
        std::process::exit(1);
    });
    if let Some(bpm) = args.bpm {
        if let Err(e) = ctrl.set_tempo(bpm) {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    }
    for voice in &args.muted {
        let _ = ctrl.toggle_voice(*voice);
    }

    println!("Tempo:  {} BPM", ctrl.tempo());
    println!("Rate:   {} Hz", ctrl.sample_rate());
    let drone: Vec<String> = ctrl.config().drone_notes.iter().map(|n| n.to_string()).collect();
    println!("Drone:  {}", drone.join(" "));
    println!();

    match &args.wav {
        Some(path) => bounce(&mut ctrl, path, args.seconds.unwrap_or(8.0)),
        None => play(&mut ctrl, args.seconds.unwrap_or(30.0), args.microphone),
    }
}

fn play(ctrl: &mut Controller, seconds: f64, microphone: bool) {
    if microphone {
        match ctrl.start_microphone() {
            Ok(rate) => println!("Tuner listening at {} Hz", rate),
            Err(e) => println!("Tuner disabled: {}", e),
        }
    }

    ctrl.play();
    if let Err(e) = ctrl.start_transport() {
        eprintln!("Failed to start transport: {}", e);
        return;
    }
    println!("Playing...");
    println!();

    let started = Instant::now();
    let sample_rate = ctrl.sample_rate() as f64;
    while ctrl.is_playing() && started.elapsed().as_secs_f64() < seconds {
        let elapsed = ctrl.frame_position() as f64 / sample_rate;
        print!("\rTime: {:6.2}s | Tuner: {:<10}", elapsed, ctrl.tuner_reading().to_string());
        let _ = std::io::stdout().flush();
        std::thread::sleep(Duration::from_millis(50));
    }

    if ctrl.is_finished() {
        println!("\rNo audio output; try --wav for an offline bounce.");
    } else {
        println!("\rDone.                                  ");
    }
    ctrl.stop();
    ctrl.stop_tuner();
}

fn bounce(ctrl: &mut Controller, path: &str, seconds: f64) {
    println!("Rendering {:.1}s to {}...", seconds, path);

    let rendered = ctrl.start_transport().and_then(|_| ctrl.render_seconds(seconds));
    let frames = rendered.unwrap_or_else(|e| {
        eprintln!("Render failed: {}", e);
        std::process::exit(1);
    });

    let wav = frames_to_wav(&frames, ctrl.sample_rate());
    println!("Rendered {} bytes", wav.len());

    fs::write(path, &wav).unwrap_or_else(|e| {
        eprintln!("Failed to write {}: {}", path, e);
        std::process::exit(1);
    });

    println!("Done.");
}

fn analyze_file(path: &str) {
    let sample = load_wav_file(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path, e);
        std::process::exit(1);
    });

    let mono: Vec<f32> = (0..sample.len())
        .map(|i| {
            let (l, r) = sample.data.frame(i);
            if sample.data.num_channels() == 1 {
                l
            } else {
                0.5 * (l + r)
            }
        })
        .collect();

    let config = EstimatorConfig::default();
    let readings = analyze(&mono, sample.sample_rate, config);
    let hop = config.window.next_power_of_two() as f64 / sample.sample_rate as f64;

    println!("{}: {} frames at {} Hz", sample.name, sample.len(), sample.sample_rate);
    for (i, reading) in readings.iter().enumerate() {
        let at = i as f64 * hop;
        match reading {
            TunerReading::NoSignal => println!("{:8.3}s  -", at),
            TunerReading::Pitched { frequency_hz, .. } => {
                println!("{:8.3}s  {:<8} {:8.2} Hz", at, reading.to_string(), frequency_hz)
            }
        }
    }
}

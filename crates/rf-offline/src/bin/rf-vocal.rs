//! FluxForge vocal analysis tool
//!
//! Usage:
//!   rf-vocal analyze take.wav                  - Print detected notes as JSON
//!   rf-vocal analyze take.wav --render out.wav - Also vocode the result
//!   rf-vocal models                            - Load every model and report

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use rf_ml::PitchDetectorKind;
use rf_offline::{EditorConfig, EditorController, EditorEvent, SegmenterKind, write_wav_f32};
use rf_pitch::{SAMPLE_RATE, frames_to_seconds, midi_to_note_name};

#[derive(Parser)]
#[command(name = "rf-vocal", about = "FluxForge vocal pitch analysis")]
struct Cli {
    /// JSON editor configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Model directory (overrides the configuration)
    #[arg(short, long, global = true)]
    models: Option<PathBuf>,

    /// Execution device: CPU, CUDA, DirectML, CoreML
    #[arg(long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze and segment an audio file
    Analyze {
        audio: PathBuf,

        /// Pitch detector (rmvpe or fcpe)
        #[arg(short, long)]
        detector: Option<String>,

        /// Use the heuristic segmenter only
        #[arg(long)]
        heuristic: bool,

        /// Vocode the analyzed project into this WAV file
        #[arg(short, long)]
        render: Option<PathBuf>,

        /// Seconds to wait for each job
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Load all models and report what is available
    Models,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EditorConfig::from_json_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => EditorConfig::default(),
    };
    if let Some(dir) = cli.models {
        config = config.with_models_dir(dir);
    }
    if let Some(device) = cli.device {
        config = config.with_device(device, 0);
    }

    match cli.command {
        Commands::Analyze {
            audio,
            detector,
            heuristic,
            render,
            timeout,
        } => {
            if let Some(name) = detector {
                let kind: PitchDetectorKind = name.parse().unwrap_or_default();
                config = config.with_pitch_detector(kind);
            }
            if heuristic {
                config = config.with_segmenter(SegmenterKind::Heuristic);
            }
            analyze(config, audio, render, Duration::from_secs(timeout))
        }
        Commands::Models => report_models(config),
    }
}

fn wait(editor: &mut EditorController, timeout: Duration) -> Result<Vec<EditorEvent>> {
    let events = editor.run_until_idle(timeout);
    for event in &events {
        match event {
            EditorEvent::Progress { fraction, stage, .. } => {
                log::info!("{:>5.1}% {}", fraction * 100.0, stage)
            }
            EditorEvent::Failed { category, message } => bail!("{} failed: {}", category, message),
            EditorEvent::Cancelled { category } => bail!("{} cancelled", category),
            _ => {}
        }
    }
    Ok(events)
}

fn analyze(
    config: EditorConfig,
    audio: PathBuf,
    render: Option<PathBuf>,
    timeout: Duration,
) -> Result<()> {
    let mut editor = EditorController::new(config)?;
    editor.load_audio_file(&audio)?;
    wait(&mut editor, timeout)?;

    let project = editor
        .project()
        .context("analysis finished without a project")?;
    let notes: Vec<_> = project
        .notes()
        .iter()
        .map(|n| {
            json!({
                "start": frames_to_seconds(n.start_frame()),
                "end": frames_to_seconds(n.end_frame()),
                "midi": n.midi_note(),
                "name": midi_to_note_name(n.midi_note()),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&notes)?);

    if let Some(out) = render {
        editor.render_processed_audio()?;
        let events = wait(&mut editor, timeout)?;
        let samples = events
            .into_iter()
            .find_map(|e| match e {
                EditorEvent::Rendered { samples } => Some(samples),
                _ => None,
            })
            .context("render produced no audio")?;
        write_wav_f32(&out, &samples, SAMPLE_RATE)?;
        log::info!("Wrote {} ({} samples)", out.display(), samples.len());
    }
    Ok(())
}

fn report_models(config: EditorConfig) -> Result<()> {
    let mut editor = EditorController::new(config)?;
    let report = editor
        .reload_models(false)?
        .context("synchronous reload returned no report")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.loaded.is_empty() {
        bail!("no models could be loaded");
    }
    Ok(())
}

//! `transcribe` command-line front-end
//!
//! Runs a single file through the engine and prints one JSON record to
//! stdout: `{"status": "success", ...}` on success, `{"status": "error",
//! ...}` on failure. Logs go to stderr so stdout stays machine-readable.

use anyhow::{anyhow, Context, Result};
use batchscribe::asr::engine::HttpTranscriber;
use batchscribe::audio::loader::WavLoader;
use batchscribe::diarization::engine::FeatureDiarizer;
use batchscribe::merge::types::MergedTranscription;
use batchscribe::orchestrator::types::JobState;
use batchscribe::{JobPriority, Orchestrator, OrchestratorConfig};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "transcribe",
    about = "Transcribe an audio file with speaker diarization"
)]
struct Cli {
    /// Audio file to transcribe
    path: PathBuf,

    /// Directory for artifacts (defaults to `<input>_transcription`)
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let started = Instant::now();

    match run(&cli).await {
        Ok(transcription) => {
            let text = transcription
                .segments
                .iter()
                .map(|segment| segment.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let output = json!({
                "status": "success",
                "text": text,
                "language": transcription.language,
                "processing_type": "batch_pipeline",
                "processing_time_seconds": started.elapsed().as_secs_f64(),
                "timestamp": Utc::now().to_rfc3339(),
            });
            println!("{}", output);
        }
        Err(e) => {
            let output = json!({
                "status": "error",
                "error": format!("{:#}", e),
                "timestamp": Utc::now().to_rfc3339(),
            });
            println!("{}", output);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<MergedTranscription> {
    let output_dir = cli.output_dir.clone().unwrap_or_else(|| {
        let stem = cli
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        cli.path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(format!("{}_transcription", stem))
    });

    let transcriber = HttpTranscriber::from_env().context("recognizer configuration")?;

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_env(),
        Arc::new(WavLoader::new()),
        Arc::new(transcriber),
        Arc::new(FeatureDiarizer::default()),
    );
    orchestrator.start();

    let job_id = orchestrator.submit(&cli.path, &output_dir, JobPriority::Normal)?;
    let status = orchestrator
        .wait_for(job_id)
        .await
        .ok_or_else(|| anyhow!("job {} disappeared before completing", job_id))?;
    orchestrator.shutdown();

    match status.state {
        JobState::Completed => {
            let artifact = output_dir.join("final_transcription.json");
            let json = std::fs::read_to_string(&artifact)
                .with_context(|| format!("reading {}", artifact.display()))?;
            Ok(serde_json::from_str(&json)?)
        }
        JobState::Cancelled => Err(anyhow!("job was cancelled")),
        _ => Err(anyhow!(
            "{}",
            status.error.unwrap_or_else(|| "job failed".to_string())
        )),
    }
}

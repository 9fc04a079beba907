use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use voicepipe::audio::CaptureMode;
use voicepipe::session::{PipelineEvent, VoicePipeline};
use voicepipe::Config;

#[derive(Parser, Debug)]
#[command(name = "voicepipe", about = "Live audio -> streaming ASR -> chat completion")]
struct Args {
    /// Path to the configuration file (without extension)
    #[arg(short, long, default_value = "config/voicepipe")]
    config: String,

    /// Capture mode to start in
    #[arg(short, long, value_enum, default_value_t = CaptureMode::System)]
    mode: CaptureMode,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!("no usable config at {} ({}), using defaults", args.config, e);
            Config::default()
        }
    };

    let (mut pipeline, mut events) = VoicePipeline::new(&config)?;
    pipeline.start(args.mode).await?;
    info!("pipeline started in {} mode, ctrl-c to stop", args.mode);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                render(event);
            }
        }
    }

    pipeline.stop().await;
    let status = pipeline.status();
    info!(
        "done: {} utterances, {} chunks sent, {} dropped, {} reconnects",
        status.utterances, status.chunks_sent, status.chunks_dropped, status.reconnects
    );
    Ok(())
}

fn render(event: PipelineEvent) {
    use std::io::Write;
    match event {
        PipelineEvent::Started(mode) => info!("capture started ({})", mode),
        PipelineEvent::Stopped => info!("capture stopped"),
        PipelineEvent::ModeFallback(mode) => warn!("fell back to {} capture", mode),
        PipelineEvent::SessionReady => info!("transcription session ready"),
        PipelineEvent::SessionClosed => info!("transcription session closed"),
        PipelineEvent::TranscriptionUpdate(text) => {
            print!("\r… {text}");
            let _ = std::io::stdout().flush();
        }
        PipelineEvent::TranscriptionComplete(text) => println!("\ryou: {text}"),
        PipelineEvent::AiResponseUpdate(token) => {
            print!("{token}");
            let _ = std::io::stdout().flush();
        }
        PipelineEvent::AiResponse(_) => println!(),
        PipelineEvent::SessionError(msg) | PipelineEvent::Error(msg) => warn!("{msg}"),
        PipelineEvent::AudioData(_) => {}
    }
}

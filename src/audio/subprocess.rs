// Native subprocess capture source
//
// Spawns a helper process that dumps interleaved 16-bit stereo PCM to
// stdout and normalizes its byte stream: realign to whole sample pairs,
// downmix to mono, slice into 100 ms chunks. The reader task never
// blocks on the consumer; chunks are dropped when the channel is full.

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioChunk, CaptureSource, SourceExit};
use super::chunker::{downmix_stereo_bytes, samples_to_le_bytes, FrameAligner, SampleChunker};

const READ_BUF_SIZE: usize = 4096;
const CHUNK_CHANNEL_CAPACITY: usize = 32;

pub struct SubprocessSource {
    name: String,
    child: Child,
    reader: Option<JoinHandle<()>>,
}

impl SubprocessSource {
    /// Spawn `command` and start normalizing its stdout into audio
    /// chunks at `target_rate`.
    pub fn spawn(command: &str, target_rate: u32) -> Result<(Self, mpsc::Receiver<AudioChunk>)> {
        let mut parts = command.split_whitespace();
        let program = parts.next().context("empty capture command")?;
        let args: Vec<&str> = parts.collect();

        let mut child = Command::new(program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn capture process '{}'", program))?;

        let Some(mut stdout) = child.stdout.take() else {
            bail!("capture process has no stdout");
        };

        info!("capture process started: {}", program);

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let reader = tokio::spawn(async move {
            let mut aligner = FrameAligner::new();
            let mut chunker = SampleChunker::new(target_rate);
            let mut buf = vec![0u8; READ_BUF_SIZE];

            loop {
                let n = match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!("capture process read error: {}", e);
                        break;
                    }
                };

                let aligned = aligner.push(&buf[..n]);
                if aligned.is_empty() {
                    continue;
                }
                let mono = downmix_stereo_bytes(&aligned);
                for chunk in chunker.push(&mono) {
                    let audio = AudioChunk {
                        pcm: samples_to_le_bytes(&chunk),
                        sample_rate: target_rate,
                        captured_at: Instant::now(),
                    };
                    if tx.try_send(audio).is_err() {
                        debug!("dropping audio chunk, consumer not ready");
                    }
                }
            }
            debug!("capture process stdout closed");
        });

        Ok((
            Self {
                name: format!("subprocess:{}", program),
                child,
                reader: Some(reader),
            },
            rx,
        ))
    }
}

#[async_trait::async_trait]
impl CaptureSource for SubprocessSource {
    async fn stop(&mut self) -> Result<()> {
        self.child.start_kill().ok();
        let _ = self.child.wait().await;
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        info!("capture process stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn wait_exit(&mut self) -> SourceExit {
        match self.child.wait().await {
            Ok(status) if status.success() => SourceExit::Clean,
            Ok(status) => {
                warn!("capture process exited: {}", status);
                SourceExit::Crashed
            }
            Err(e) => {
                warn!("capture process wait failed: {}", e);
                SourceExit::Crashed
            }
        }
    }
}

// Platform capture source via cpal
//
// cpal streams are not Send, so the stream lives on a dedicated thread.
// The callback appends native-rate f32 samples into a shared buffer; the
// thread drains it every 50 ms, resamples to the target rate, converts
// to 16-bit PCM, and ships 100 ms chunks without ever blocking on the
// consumer.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::{AudioChunk, CaptureSource, SourceExit};
use super::chunker::{f32_to_i16, samples_to_le_bytes, LinearResampler, SampleChunker};

const CHUNK_CHANNEL_CAPACITY: usize = 32;
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

pub struct MicSource {
    name: String,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    exit_rx: Option<oneshot::Receiver<SourceExit>>,
}

impl MicSource {
    /// Start capturing from the given input device (or the default one).
    pub fn start(
        preferred_device: Option<&str>,
        target_rate: u32,
    ) -> Result<(Self, mpsc::Receiver<AudioChunk>)> {
        let device = find_input_device(preferred_device)?;
        Self::start_on_device(device, target_rate)
    }

    /// Capture system audio through the platform API by locating a
    /// loopback/monitor input device. Not every host exposes one; the
    /// caller treats failure as a probe miss.
    pub fn start_loopback(target_rate: u32) -> Result<(Self, mpsc::Receiver<AudioChunk>)> {
        let host = cpal::default_host();
        let devices = host.input_devices().context("no input devices available")?;
        let device = devices
            .into_iter()
            .find(|d| {
                d.name()
                    .map(|n| {
                        let n = n.to_lowercase();
                        n.contains("monitor") || n.contains("loopback")
                    })
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("no loopback capture device exposed by the platform"))?;
        Self::start_on_device(device, target_rate)
    }

    fn start_on_device(
        device: cpal::Device,
        target_rate: u32,
    ) -> Result<(Self, mpsc::Receiver<AudioChunk>)> {
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());
        let default_config = device
            .default_input_config()
            .context("no default input config")?;
        let format = default_config.sample_format();
        let stream_config: StreamConfig = default_config.into();
        let input_rate = stream_config.sample_rate.0;
        let channels = usize::from(stream_config.channels.max(1));

        info!(
            "starting capture on '{}' ({}Hz, {}ch, {:?} -> {}Hz mono)",
            device_name, input_rate, channels, format, target_rate
        );

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_thread = Arc::clone(&stop_flag);

        let thread = std::thread::Builder::new()
            .name("voicepipe-capture".into())
            .spawn(move || {
                let shared: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
                let stream = match build_stream(&device, &stream_config, format, channels, &shared)
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("failed to build input stream: {:#}", e);
                        let _ = exit_tx.send(SourceExit::Crashed);
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    warn!("failed to start input stream: {}", e);
                    let _ = exit_tx.send(SourceExit::Crashed);
                    return;
                }

                let mut resampler = LinearResampler::new(input_rate, target_rate);
                let mut chunker = SampleChunker::new(target_rate);
                while !stop_flag_thread.load(Ordering::SeqCst) {
                    std::thread::sleep(DRAIN_INTERVAL);
                    let drained: Vec<f32> = {
                        let mut buf = match shared.lock() {
                            Ok(b) => b,
                            Err(_) => break,
                        };
                        std::mem::take(&mut *buf)
                    };
                    if drained.is_empty() {
                        continue;
                    }
                    let resampled = resampler.push(&drained);
                    let samples = f32_to_i16(&resampled);
                    for chunk in chunker.push(&samples) {
                        let audio = AudioChunk {
                            pcm: samples_to_le_bytes(&chunk),
                            sample_rate: target_rate,
                            captured_at: Instant::now(),
                        };
                        if chunk_tx.try_send(audio).is_err() {
                            debug!("dropping audio chunk, consumer not ready");
                        }
                    }
                }

                drop(stream);
                let _ = exit_tx.send(SourceExit::Clean);
            })
            .context("failed to spawn capture thread")?;

        Ok((
            Self {
                name: format!("platform:{}", device_name),
                stop_flag,
                thread: Some(thread),
                exit_rx: Some(exit_rx),
            },
            chunk_rx,
        ))
    }
}

#[async_trait::async_trait]
impl CaptureSource for MicSource {
    async fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            // The thread only sleeps in 50ms slices; joining is quick.
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
        info!("platform capture stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn wait_exit(&mut self) -> SourceExit {
        match self.exit_rx.take() {
            Some(rx) => rx.await.unwrap_or(SourceExit::Clean),
            None => SourceExit::Clean,
        }
    }
}

fn find_input_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host.input_devices().context("no input devices available")?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device '{}' not found", name))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device available")),
    }
}

/// Build an input stream for whatever sample format the device speaks,
/// converting everything to mono f32 up front.
fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    channels: usize,
    shared: &Arc<Mutex<Vec<f32>>>,
) -> Result<cpal::Stream> {
    let err_fn = |err| warn!("audio stream error: {}", err);

    let stream = match format {
        SampleFormat::F32 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                config,
                move |data: &[f32], _| {
                    if let Ok(mut buf) = shared.lock() {
                        append_mono(&mut buf, data, channels, |s| s);
                    }
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                config,
                move |data: &[i16], _| {
                    if let Ok(mut buf) = shared.lock() {
                        append_mono(&mut buf, data, channels, |s| s as f32 / 32_768.0);
                    }
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::U16 => {
            let shared = Arc::clone(shared);
            device.build_input_stream(
                config,
                move |data: &[u16], _| {
                    if let Ok(mut buf) = shared.lock() {
                        append_mono(&mut buf, data, channels, |s| {
                            (s as f32 - 32_768.0) / 32_768.0
                        });
                    }
                },
                err_fn,
                None,
            )?
        }
        other => return Err(anyhow!("unsupported sample format: {:?}", other)),
    };

    Ok(stream)
}

/// Average interleaved frames down to one channel while converting to
/// f32.
fn append_mono<T: Copy>(out: &mut Vec<f32>, data: &[T], channels: usize, convert: impl Fn(T) -> f32) {
    if channels <= 1 {
        out.extend(data.iter().map(|&s| convert(s)));
        return;
    }
    for frame in data.chunks_exact(channels) {
        let sum: f32 = frame.iter().map(|&s| convert(s)).sum();
        out.push(sum / channels as f32);
    }
}

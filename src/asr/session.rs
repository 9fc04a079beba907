// ASR WebSocket session
//
// Owns one connection to the streaming recognition endpoint. The connect
// handshake sends a FullClientRequest frame describing the audio format
// and races open+ack against a timeout; after that every incoming audio
// chunk is gzip-compressed and framed independently. Server responses
// feed the merge engine, whose debounce sleep lives in this select loop
// so only one timer is ever outstanding.

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::frame::{self, AsrFrame, Decoded, MessageType};
use super::merge::{MergeOutcome, TranscriptionEvent, UtteranceBuffer, DEFAULT_DEBOUNCE};
use crate::audio::AudioChunk;
use crate::error::{classify_asr_error, ErrorThrottle, PipelineError};
use crate::metrics::{MetricKind, MetricsRing};

/// Session lifecycle, exposed for status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AsrSessionState {
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    Streaming = 3,
    Paused = 4,
    Closing = 5,
    Closed = 6,
}

/// Shared lock-free view of the session state.
#[derive(Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn load(&self) -> AsrSessionState {
        match self.0.load(Ordering::SeqCst) {
            0 => AsrSessionState::Idle,
            1 => AsrSessionState::Connecting,
            2 => AsrSessionState::Ready,
            3 => AsrSessionState::Streaming,
            4 => AsrSessionState::Paused,
            5 => AsrSessionState::Closing,
            _ => AsrSessionState::Closed,
        }
    }

    pub fn store(&self, state: AsrSessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Connection parameters for the recognition endpoint.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub url: String,
    pub uid: String,
    pub sample_rate: u32,
    pub model: String,
    pub connect_timeout: Duration,
    pub debounce: Duration,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            uid: String::new(),
            sample_rate: 16000,
            model: "streaming".to_string(),
            connect_timeout: Duration::from_secs(7),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Events emitted to the pipeline.
#[derive(Debug, Clone)]
pub enum AsrEvent {
    /// Handshake complete; the session accepts audio.
    Ready,
    /// The accumulated transcript changed.
    TranscriptionUpdate(String),
    /// One finalized utterance.
    UtteranceComplete(String),
    /// Classified, throttled session error.
    SessionError(PipelineError),
    /// The connection ended. `deliberate` reflects the pause flag; only
    /// non-deliberate closes feed the Resilience Manager.
    Closed { deliberate: bool },
}

/// Everything one session run needs. The audio receiver and error
/// throttle are shared so they survive reconnects.
pub struct SessionContext {
    pub config: AsrConfig,
    pub audio_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<AudioChunk>>>,
    pub events: mpsc::UnboundedSender<AsrEvent>,
    pub ready: Arc<AtomicBool>,
    pub suppress_close: Arc<AtomicBool>,
    pub state: Arc<StateCell>,
    pub throttle: Arc<Mutex<ErrorThrottle>>,
    pub metrics: Arc<MetricsRing>,
}

#[derive(Serialize)]
struct ClientRequest<'a> {
    uid: &'a str,
    audio: AudioSpec,
    request: RequestOptions<'a>,
}

#[derive(Serialize)]
struct AudioSpec {
    format: &'static str,
    rate: u32,
    bits: u32,
    channel: u32,
}

#[derive(Serialize)]
struct RequestOptions<'a> {
    model_name: &'a str,
    enable_punc: bool,
    result_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ServerPayload {
    #[serde(default)]
    result: Option<ServerResult>,
}

#[derive(Debug, Deserialize)]
struct ServerResult {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    utterances: Option<Vec<ServerUtterance>>,
}

#[derive(Debug, Deserialize)]
struct ServerUtterance {
    text: String,
    #[serde(default)]
    definite: bool,
}

/// Run one ASR session until the connection closes. The merge buffer is
/// created fresh per run, so text buffered when a previous connection
/// dropped is discarded, never resent.
pub async fn run_session(ctx: &SessionContext) -> Result<()> {
    ctx.state.store(AsrSessionState::Connecting);
    ctx.ready.store(false, Ordering::SeqCst);

    info!("connecting to ASR endpoint: {}", ctx.config.url);

    let connect = async {
        let (ws, _) = connect_async(&ctx.config.url)
            .await
            .context("ASR websocket connect failed")?;
        let (mut tx, mut rx) = ws.split();

        let request = ClientRequest {
            uid: &ctx.config.uid,
            audio: AudioSpec {
                format: "pcm",
                rate: ctx.config.sample_rate,
                bits: 16,
                channel: 1,
            },
            request: RequestOptions {
                model_name: &ctx.config.model,
                enable_punc: true,
                result_type: "full",
            },
        };
        let payload = serde_json::to_vec(&request)?;
        let bytes = frame::encode(&AsrFrame::full_client_request(payload))?;
        tx.send(Message::Binary(bytes))
            .await
            .context("failed to send client request frame")?;

        // The first server frame acknowledges the session.
        let ack = match rx.next().await {
            Some(Ok(Message::Binary(data))) => frame::decode(&data)?,
            Some(Ok(other)) => bail!("unexpected handshake message: {:?}", other),
            Some(Err(e)) => return Err(e).context("handshake receive failed"),
            None => bail!("connection closed during handshake"),
        };
        if let Decoded::Error { code } = ack {
            bail!("handshake rejected with code {}", code);
        }

        Ok::<_, anyhow::Error>((tx, rx))
    };

    let (mut ws_tx, mut ws_rx) = match tokio::time::timeout(ctx.config.connect_timeout, connect)
        .await
    {
        Ok(Ok(split)) => split,
        Ok(Err(e)) => {
            // A stop() may have raced the connect; report the close the
            // same way the main teardown path does.
            let deliberate = ctx.suppress_close.load(Ordering::SeqCst);
            ctx.state.store(if deliberate {
                AsrSessionState::Paused
            } else {
                AsrSessionState::Closed
            });
            if !deliberate {
                surface_error(ctx, PipelineError::TransientNetwork(format!("{:#}", e)));
            }
            let _ = ctx.events.send(AsrEvent::Closed { deliberate });
            return Err(e);
        }
        Err(_) => {
            let deliberate = ctx.suppress_close.load(Ordering::SeqCst);
            ctx.state.store(if deliberate {
                AsrSessionState::Paused
            } else {
                AsrSessionState::Closed
            });
            let e = PipelineError::TransientNetwork(format!(
                "ASR connect timed out after {:?}",
                ctx.config.connect_timeout
            ));
            if !deliberate {
                surface_error(ctx, e.clone());
            }
            let _ = ctx.events.send(AsrEvent::Closed { deliberate });
            bail!("{}", e);
        }
    };

    ctx.state.store(AsrSessionState::Ready);
    ctx.ready.store(true, Ordering::SeqCst);
    let _ = ctx.events.send(AsrEvent::Ready);
    info!("ASR session ready");

    let mut buffer = UtteranceBuffer::new(ctx.config.debounce);
    let mut audio_rx = ctx.audio_rx.lock().await;
    let mut protocol_error: Option<PipelineError> = None;
    let mut remote_close = false;

    loop {
        let debounce = buffer.debounce_deadline();
        tokio::select! {
            chunk = audio_rx.recv() => {
                let Some(chunk) = chunk else {
                    // Audio channel gone: the coordinator stopped.
                    ctx.state.store(AsrSessionState::Closing);
                    break;
                };
                ctx.state.store(AsrSessionState::Streaming);
                // An empty chunk is the explicit end-of-utterance signal.
                // Optional in streaming mode; the provider's VAD normally
                // decides utterance boundaries.
                let wire_frame = if chunk.pcm.is_empty() {
                    AsrFrame::last_package()
                } else {
                    AsrFrame::audio(chunk.pcm)
                };
                let bytes = match frame::encode(&wire_frame) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("audio frame encode failed: {:#}", e);
                        break;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Binary(bytes)).await {
                    warn!("audio frame send failed: {}", e);
                    remote_close = true;
                    break;
                }
                ctx.metrics.incr(MetricKind::FrameSent);
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        match handle_server_message(ctx, &mut buffer, &data) {
                            Ok(None) => {}
                            Ok(Some(err)) => {
                                protocol_error = Some(err);
                                break;
                            }
                            Err(e) => {
                                warn!("undecodable server frame: {:#}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("server closed the session: {:?}", frame);
                        remote_close = true;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        surface_error(
                            ctx,
                            PipelineError::TransientNetwork(e.to_string()),
                        );
                        remote_close = true;
                        break;
                    }
                    None => {
                        remote_close = true;
                        break;
                    }
                }
            }
            _ = sleep_until_opt(debounce), if debounce.is_some() => {
                if let Some(text) = buffer.finalize(Instant::now()) {
                    ctx.metrics.incr(MetricKind::UtteranceFinal);
                    let _ = ctx.events.send(AsrEvent::UtteranceComplete(text));
                }
            }
        }
    }

    ctx.ready.store(false, Ordering::SeqCst);
    let deliberate = ctx.suppress_close.load(Ordering::SeqCst);
    ctx.state.store(if deliberate {
        AsrSessionState::Paused
    } else {
        AsrSessionState::Closed
    });

    let _ = ws_tx.close().await;
    let _ = ctx.events.send(AsrEvent::Closed { deliberate });

    if let Some(err) = protocol_error {
        bail!("{}", err);
    }
    if remote_close && !deliberate {
        bail!("ASR connection closed unexpectedly");
    }
    Ok(())
}

/// Decode one server frame and feed the merge engine. Returns the
/// classified error for ErrorResponse frames, which tear the session
/// down.
fn handle_server_message(
    ctx: &SessionContext,
    buffer: &mut UtteranceBuffer,
    data: &[u8],
) -> Result<Option<PipelineError>> {
    match frame::decode(data)? {
        Decoded::Incomplete => {
            warn!("truncated server frame ({} bytes)", data.len());
            Ok(None)
        }
        Decoded::Error { code } => {
            let err = classify_asr_error(code);
            error!("ASR error frame: {}", err);
            ctx.metrics.incr(MetricKind::SessionError);
            surface_error(ctx, err.clone());
            Ok(Some(err))
        }
        Decoded::Frame(frame) => {
            if frame.message_type != MessageType::ServerResponse {
                debug!("ignoring frame of type {:?}", frame.message_type);
                return Ok(None);
            }
            let payload: ServerPayload =
                serde_json::from_slice(&frame.payload).context("malformed server payload")?;
            let now = Instant::now();
            for event in payload_events(payload, now) {
                ctx.metrics.incr(MetricKind::TranscriptPartial);
                if let MergeOutcome::Updated(text) = buffer.observe(&event) {
                    let _ = ctx.events.send(AsrEvent::TranscriptionUpdate(text));
                }
            }
            Ok(None)
        }
    }
}

/// Flatten a server payload into transcription events. Utterance lists
/// carry a per-utterance `definite` final flag; a bare `result.text` is
/// always partial.
fn payload_events(payload: ServerPayload, now: Instant) -> Vec<TranscriptionEvent> {
    let Some(result) = payload.result else {
        return Vec::new();
    };
    if let Some(utterances) = result.utterances {
        return utterances
            .into_iter()
            .filter(|u| !u.text.is_empty())
            .map(|u| TranscriptionEvent {
                text: u.text,
                is_final: u.definite,
                received_at: now,
            })
            .collect();
    }
    match result.text {
        Some(text) if !text.is_empty() => vec![TranscriptionEvent {
            text,
            is_final: false,
            received_at: now,
        }],
        _ => Vec::new(),
    }
}

/// Emit a classified error unless an identical message fired within the
/// throttle window.
fn surface_error(ctx: &SessionContext, err: PipelineError) {
    let message = err.to_string();
    let should_emit = ctx
        .throttle
        .lock()
        .map(|mut t| t.should_emit(&message, Instant::now()))
        .unwrap_or(true);
    if should_emit {
        let _ = ctx.events.send(AsrEvent::SessionError(err));
    } else {
        debug!("suppressed repeated error: {}", message);
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

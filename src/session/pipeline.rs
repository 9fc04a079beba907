// Pipeline orchestrator
//
// Wires capture, transcription, and the completion relay into one
// unit: audio chunks flow coordinator -> ASR session over a bounded
// channel, finalized utterances flow into the relay worker, and every
// externally visible change lands on the pipeline event channel.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::coordinator::{AllowAll, CaptureCoordinator, PermissionGate};
use super::events::PipelineEvent;
use super::stats::PipelineStatus;
use crate::asr::{run_session, AsrEvent, SessionContext, StateCell};
use crate::audio::CaptureMode;
use crate::chat::{CompletionRelay, RelayEvent};
use crate::config::Config;
use crate::error::{ErrorThrottle, PipelineError};
use crate::metrics::{MetricKind, MetricsRing};
use crate::resilience::{BackoffPolicy, ReconnectState};

/// Audio chunks in flight between capture and the ASR session. At 100ms
/// per chunk this is about three seconds of audio.
const CHUNK_QUEUE_DEPTH: usize = 32;

const METRICS_CAPACITY: usize = 1024;

type AsrEventRx = Arc<Mutex<mpsc::UnboundedReceiver<AsrEvent>>>;

pub struct VoicePipeline {
    coordinator: CaptureCoordinator,
    events: mpsc::UnboundedSender<PipelineEvent>,
    ctx: Arc<SessionContext>,
    asr_rx: AsrEventRx,
    utterance_tx: mpsc::UnboundedSender<String>,
    reconnect_policy: BackoffPolicy,
    metrics: Arc<MetricsRing>,
    started_at: DateTime<Utc>,
    asr_task: Option<JoinHandle<()>>,
    relay_task: Option<JoinHandle<()>>,
}

impl VoicePipeline {
    /// Build the pipeline. Returns the receiving end of the event
    /// channel alongside it; the caller drains that for its UI.
    pub fn new(
        config: &Config,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>), PipelineError> {
        Self::with_gate(config, Arc::new(AllowAll))
    }

    pub fn with_gate(
        config: &Config,
        gate: Arc<dyn PermissionGate>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>), PipelineError> {
        let completion = config.completion_config()?;
        let relay = CompletionRelay::new(completion)
            .map_err(|e| PipelineError::unclassified(format!("{:#}", e)))?;

        let metrics = Arc::new(MetricsRing::new(METRICS_CAPACITY));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        let (asr_tx, asr_rx) = mpsc::unbounded_channel();

        let ready = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(SessionContext {
            config: config.asr_config(),
            audio_rx: Arc::new(Mutex::new(chunk_rx)),
            events: asr_tx,
            ready: Arc::clone(&ready),
            suppress_close: Arc::new(AtomicBool::new(false)),
            state: Arc::new(StateCell::default()),
            throttle: Arc::new(std::sync::Mutex::new(ErrorThrottle::default_window())),
            metrics: Arc::clone(&metrics),
        });

        let coordinator = CaptureCoordinator::new(
            config.capture_config(),
            gate,
            event_tx.clone(),
            chunk_tx,
            ready,
            Arc::clone(&metrics),
            config.backoff_policy(),
        );

        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let relay_task = tokio::spawn(run_relay(
            relay,
            utterance_rx,
            event_tx.clone(),
            Arc::clone(&metrics),
        ));

        Ok((
            Self {
                coordinator,
                events: event_tx,
                ctx,
                asr_rx: Arc::new(Mutex::new(asr_rx)),
                utterance_tx,
                reconnect_policy: config.backoff_policy(),
                metrics,
                started_at: Utc::now(),
                asr_task: None,
                relay_task: Some(relay_task),
            },
            event_rx,
        ))
    }

    /// Start capturing and transcribing in the given mode.
    pub async fn start(&mut self, mode: CaptureMode) -> Result<(), PipelineError> {
        self.ensure_asr_running();
        self.coordinator.start(mode).await
    }

    /// Stop the pipeline. Closes the transcription session without
    /// feeding the reconnect logic, then tears capture down.
    pub async fn stop(&mut self) {
        self.ctx.suppress_close.store(true, Ordering::SeqCst);
        self.coordinator.stop().await;
        if let Some(task) = self.asr_task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("ASR driver task panicked: {}", e);
                }
            }
        }
        self.ctx.ready.store(false, Ordering::SeqCst);
        self.ctx.state.store(crate::asr::AsrSessionState::Paused);
    }

    /// Switch capture mode. The ASR session stays up; only the audio
    /// source is swapped.
    pub async fn switch_mode(&mut self, mode: CaptureMode) -> Result<(), PipelineError> {
        self.coordinator.switch_mode(mode).await
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            capturing: self.coordinator.is_capturing(),
            mode: self.coordinator.session().map(|s| s.mode),
            session_state: self.ctx.state.load(),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
            chunks_sent: self.metrics.total(MetricKind::FrameSent),
            chunks_dropped: self.metrics.total(MetricKind::ChunkDropped),
            utterances: self.metrics.total(MetricKind::UtteranceFinal),
            reconnects: self.metrics.total(MetricKind::Reconnect),
        }
    }

    pub fn metrics(&self) -> &MetricsRing {
        &self.metrics
    }

    fn ensure_asr_running(&mut self) {
        if let Some(task) = &self.asr_task {
            if !task.is_finished() {
                return;
            }
        }
        self.ctx.suppress_close.store(false, Ordering::SeqCst);
        self.asr_task = Some(tokio::spawn(drive_asr(
            Arc::clone(&self.ctx),
            Arc::clone(&self.asr_rx),
            self.events.clone(),
            self.utterance_tx.clone(),
            ReconnectState::new(self.reconnect_policy.clone()),
        )));
    }
}

/// Run ASR sessions back to back, applying exponential backoff between
/// failed runs. Session events are dispatched from here so a completed
/// handshake can reset the reconnect counter; a deliberate close (pause
/// flag set) ends the loop without counting as a failure.
async fn drive_asr(
    ctx: Arc<SessionContext>,
    asr_rx: AsrEventRx,
    events: mpsc::UnboundedSender<PipelineEvent>,
    utterances: mpsc::UnboundedSender<String>,
    mut reconnect: ReconnectState,
) {
    let mut asr_rx = asr_rx.lock().await;

    loop {
        let run = run_session(&ctx);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                event = asr_rx.recv() => {
                    let Some(event) = event else { return };
                    if matches!(event, AsrEvent::Ready) {
                        reconnect.succeed();
                    }
                    dispatch_asr_event(event, &events, &utterances);
                }
            }
        };

        // The run may have queued events right before returning.
        while let Ok(event) = asr_rx.try_recv() {
            dispatch_asr_event(event, &events, &utterances);
        }

        if ctx.suppress_close.load(Ordering::SeqCst) {
            info!("ASR session closed deliberately");
            return;
        }

        match result {
            Ok(()) => {
                // Clean close without the pause flag: the audio channel
                // ended, nothing left to transcribe.
                return;
            }
            Err(e) => {
                warn!("ASR session ended: {:#}", e);
                reconnect.fail();
            }
        }

        let now = Instant::now();
        if !reconnect.should_attempt(now) {
            if reconnect.exhausted() {
                error!("ASR reconnect attempts exhausted");
                let _ = events.send(PipelineEvent::Error(
                    "transcription reconnect attempts exhausted".to_string(),
                ));
            }
            return;
        }

        let delay = reconnect.begin_attempt(now);
        ctx.metrics.incr(MetricKind::Reconnect);
        info!("reconnecting to ASR in {:?}", delay);
        tokio::time::sleep(delay).await;

        if ctx.suppress_close.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// Map one session event onto the pipeline channel, peeling finalized
/// utterances off for the relay worker.
fn dispatch_asr_event(
    event: AsrEvent,
    events: &mpsc::UnboundedSender<PipelineEvent>,
    utterances: &mpsc::UnboundedSender<String>,
) {
    match event {
        AsrEvent::Ready => {
            let _ = events.send(PipelineEvent::SessionReady);
        }
        AsrEvent::TranscriptionUpdate(text) => {
            let _ = events.send(PipelineEvent::TranscriptionUpdate(text));
        }
        AsrEvent::UtteranceComplete(text) => {
            let _ = events.send(PipelineEvent::TranscriptionComplete(text.clone()));
            let _ = utterances.send(text);
        }
        AsrEvent::SessionError(err) => {
            let _ = events.send(PipelineEvent::SessionError(err.to_string()));
        }
        AsrEvent::Closed { .. } => {
            let _ = events.send(PipelineEvent::SessionClosed);
        }
    }
}

/// One utterance at a time through the completion relay; utterances
/// that arrive while a call is in flight queue up in order.
async fn run_relay(
    mut relay: CompletionRelay,
    mut utterances: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    metrics: Arc<MetricsRing>,
) {
    let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
    let delta_events = events.clone();
    let delta_task = tokio::spawn(async move {
        while let Some(event) = delta_rx.recv().await {
            let mapped = match event {
                RelayEvent::Delta(token) => {
                    metrics.incr(MetricKind::CompletionToken);
                    PipelineEvent::AiResponseUpdate(token)
                }
                RelayEvent::Complete(answer) => PipelineEvent::AiResponse(answer),
            };
            let _ = delta_events.send(mapped);
        }
    });

    while let Some(utterance) = utterances.recv().await {
        if utterance.trim().is_empty() {
            continue;
        }
        if let Err(e) = relay.respond(&utterance, &delta_tx).await {
            warn!("completion call failed: {}", e);
            let _ = events.send(PipelineEvent::Error(e.to_string()));
        }
    }

    drop(delta_tx);
    let _ = delta_task.await;
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        if let Some(task) = self.asr_task.take() {
            task.abort();
        }
        if let Some(task) = self.relay_task.take() {
            task.abort();
        }
    }
}

// Capture coordinator
//
// Owns capture mode and lifecycle: permission gating, source probing,
// the system-to-microphone fallback, mode switching as a mutual
// exclusion region, and subprocess supervision. Never touches raw OS
// audio APIs itself; that stays inside the capture sources.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::events::PipelineEvent;
use crate::audio::{probe_source, AudioChunk, CaptureConfig, CaptureMode, SourceExit};
use crate::error::PipelineError;
use crate::metrics::{MetricKind, MetricsRing};
use crate::resilience::{BackoffPolicy, ReconnectState};

/// Delay between a completed stop and the next start during a mode
/// switch, so device handles are fully released.
const SWITCH_SETTLE: Duration = Duration::from_millis(100);

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    CheckingPermission,
    Capturing,
    Switching,
    Stopped,
}

/// Collaborator-provided permission status, one check per capture mode
/// (screen capture for system audio, microphone otherwise).
#[async_trait::async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check(&self, mode: CaptureMode) -> bool;
}

/// Gate used when the embedding application handles permissions itself.
pub struct AllowAll;

#[async_trait::async_trait]
impl PermissionGate for AllowAll {
    async fn check(&self, _mode: CaptureMode) -> bool {
        true
    }
}

/// The one live capture session. Destroyed and recreated on stop,
/// start, and mode switch.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub mode: CaptureMode,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub capturing: bool,
}

struct ActiveCapture {
    session: CaptureSession,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
    stopping: Arc<AtomicBool>,
}

pub struct CaptureCoordinator {
    config: CaptureConfig,
    gate: Arc<dyn PermissionGate>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    chunk_tx: mpsc::Sender<AudioChunk>,
    asr_ready: Arc<AtomicBool>,
    metrics: Arc<MetricsRing>,
    backoff: BackoffPolicy,
    state: CoordinatorState,
    active: Option<ActiveCapture>,
}

impl CaptureCoordinator {
    pub fn new(
        config: CaptureConfig,
        gate: Arc<dyn PermissionGate>,
        events: mpsc::UnboundedSender<PipelineEvent>,
        chunk_tx: mpsc::Sender<AudioChunk>,
        asr_ready: Arc<AtomicBool>,
        metrics: Arc<MetricsRing>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            config,
            gate,
            events,
            chunk_tx,
            asr_ready,
            metrics,
            backoff,
            state: CoordinatorState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    /// Start capturing in `mode`. Checks the mode-specific permission
    /// first; denial ends in Stopped with a PermissionDenied error and
    /// no automatic retry. A System start that fails outright falls
    /// back once to Microphone with a mode-fallback notification.
    pub async fn start(&mut self, mode: CaptureMode) -> Result<(), PipelineError> {
        if self.active.is_some() {
            warn!("capture already running, ignoring start");
            return Ok(());
        }

        self.state = CoordinatorState::CheckingPermission;
        if !self.gate.check(mode).await {
            self.state = CoordinatorState::Stopped;
            let err = PipelineError::PermissionDenied(mode.to_string());
            let _ = self.events.send(PipelineEvent::Error(err.to_string()));
            return Err(err);
        }

        match self.launch(mode).await {
            Ok(()) => {
                self.state = CoordinatorState::Capturing;
                let _ = self.events.send(PipelineEvent::Started(mode));
                Ok(())
            }
            Err(e) if mode == CaptureMode::System => {
                warn!("system capture failed to start: {:#}, falling back", e);
                let _ = self
                    .events
                    .send(PipelineEvent::ModeFallback(CaptureMode::Microphone));
                // Microphone permission was not checked yet for a System
                // request.
                if !self.gate.check(CaptureMode::Microphone).await {
                    self.state = CoordinatorState::Stopped;
                    let err =
                        PipelineError::PermissionDenied(CaptureMode::Microphone.to_string());
                    let _ = self.events.send(PipelineEvent::Error(err.to_string()));
                    return Err(err);
                }
                match self.launch(CaptureMode::Microphone).await {
                    Ok(()) => {
                        self.state = CoordinatorState::Capturing;
                        let _ = self
                            .events
                            .send(PipelineEvent::Started(CaptureMode::Microphone));
                        Ok(())
                    }
                    Err(e) => {
                        self.state = CoordinatorState::Stopped;
                        let err = PipelineError::unclassified(format!("{:#}", e));
                        let _ = self.events.send(PipelineEvent::Error(err.to_string()));
                        Err(err)
                    }
                }
            }
            Err(e) => {
                self.state = CoordinatorState::Stopped;
                let err = PipelineError::unclassified(format!("{:#}", e));
                let _ = self.events.send(PipelineEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Stop capturing. Always succeeds, idempotent; cancels any pending
    /// restart backoff for this session.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            self.state = CoordinatorState::Stopped;
            return;
        };

        info!("stopping capture ({})", active.session.mode);
        active.stopping.store(true, Ordering::SeqCst);
        let _ = active.stop_tx.send(());
        if let Err(e) = active.task.await {
            error!("capture task panicked: {}", e);
        }
        self.state = CoordinatorState::Stopped;
        let _ = self.events.send(PipelineEvent::Stopped);
    }

    /// Switch capture mode. Stops the running session completely, waits
    /// a fixed settle delay, then starts the new mode: two pipelines are
    /// never live at once.
    pub async fn switch_mode(&mut self, mode: CaptureMode) -> Result<(), PipelineError> {
        if let Some(session) = self.session() {
            if session.mode == mode {
                return Ok(());
            }
        }

        info!("switching capture mode to {}", mode);
        self.state = CoordinatorState::Switching;
        if self.active.is_some() {
            self.stop().await;
            tokio::time::sleep(SWITCH_SETTLE).await;
        }
        self.start(mode).await
    }

    /// Probe and launch the source, then hand lifetime ownership to the
    /// supervision task.
    async fn launch(&mut self, mode: CaptureMode) -> Result<()> {
        let first = probe_source(mode, &self.config).await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(supervise_capture(
            first,
            mode,
            self.config.clone(),
            self.chunk_tx.clone(),
            self.events.clone(),
            Arc::clone(&self.asr_ready),
            Arc::clone(&self.metrics),
            Arc::clone(&stopping),
            stop_rx,
            ReconnectState::new(self.backoff.clone()),
        ));

        self.active = Some(ActiveCapture {
            session: CaptureSession {
                mode,
                sample_rate: self.config.target_sample_rate,
                channels: 1,
                bit_depth: 16,
                capturing: true,
            },
            stop_tx,
            task,
            stopping,
        });
        Ok(())
    }
}

/// Owns the live source: forwards its chunks, watches for exits, and
/// restarts crashed subprocesses while an ASR session expects audio.
#[allow(clippy::too_many_arguments)]
async fn supervise_capture(
    first: crate::audio::ActiveSource,
    mode: CaptureMode,
    config: CaptureConfig,
    chunk_tx: mpsc::Sender<AudioChunk>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    asr_ready: Arc<AtomicBool>,
    metrics: Arc<MetricsRing>,
    stopping: Arc<AtomicBool>,
    mut stop_rx: oneshot::Receiver<()>,
    mut reconnect: ReconnectState,
) {
    let mut current = Some(first);

    loop {
        let Some(active) = current.take() else { break };
        let mut source = active.source;
        let mut chunks = active.chunks;

        let forward_tx = chunk_tx.clone();
        let forward_ready = Arc::clone(&asr_ready);
        let forward_metrics = Arc::clone(&metrics);
        let forward_events = events.clone();
        let forward = tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                // Bounded real-time behavior: when the ASR session is
                // not ready, drop rather than queue stale audio.
                if !forward_ready.load(Ordering::SeqCst) {
                    forward_metrics.incr(MetricKind::ChunkDropped);
                    continue;
                }
                forward_metrics.incr(MetricKind::ChunkCaptured);
                let _ = forward_events.send(PipelineEvent::AudioData(chunk.pcm.clone()));
                if forward_tx.try_send(chunk).is_err() {
                    forward_metrics.incr(MetricKind::ChunkDropped);
                }
            }
        });

        let exit = tokio::select! {
            exit = source.wait_exit() => exit,
            _ = &mut stop_rx => {
                if let Err(e) = source.stop().await {
                    warn!("source stop failed: {:#}", e);
                }
                forward.abort();
                return;
            }
        };
        forward.abort();

        // Restart only when the exit was a crash and an ASR session is
        // currently expecting audio; everything else is a deliberate
        // stop.
        let session_expects_audio = asr_ready.load(Ordering::SeqCst);
        if stopping.load(Ordering::SeqCst)
            || exit != SourceExit::Crashed
            || !session_expects_audio
        {
            info!("capture source ended ({:?}), not restarting", exit);
            return;
        }

        let _ = events.send(PipelineEvent::Error(PipelineError::ProcessCrash.to_string()));

        loop {
            let now = Instant::now();
            if !reconnect.should_attempt(now) {
                if reconnect.exhausted() {
                    error!("capture restart attempts exhausted");
                    let _ = events.send(PipelineEvent::Error(
                        "capture process restart attempts exhausted".to_string(),
                    ));
                }
                return;
            }

            let delay = reconnect.begin_attempt(now);
            metrics.incr(MetricKind::Reconnect);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stop_rx => return,
            }

            match probe_source(mode, &config).await {
                Ok(next) => {
                    reconnect.succeed();
                    info!("capture source restarted after crash");
                    current = Some(next);
                    break;
                }
                Err(e) => {
                    reconnect.fail();
                    warn!("capture restart failed: {:#}", e);
                }
            }
        }
    }
}

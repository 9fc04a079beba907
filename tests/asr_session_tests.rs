// Integration tests for ASR session close reporting
//
// Connect failures can race a deliberate stop; the close event must
// reflect the pause flag either way so the reconnect logic only sees
// genuine failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use voicepipe::asr::{run_session, AsrConfig, AsrEvent, AsrSessionState, SessionContext, StateCell};
use voicepipe::error::ErrorThrottle;
use voicepipe::metrics::MetricsRing;

fn context_for(url: &str) -> (SessionContext, mpsc::UnboundedReceiver<AsrEvent>) {
    let (_audio_tx, audio_rx) = mpsc::channel(4);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let ctx = SessionContext {
        config: AsrConfig {
            url: url.to_string(),
            uid: "test".to_string(),
            connect_timeout: Duration::from_secs(2),
            ..AsrConfig::default()
        },
        audio_rx: Arc::new(tokio::sync::Mutex::new(audio_rx)),
        events: event_tx,
        ready: Arc::new(AtomicBool::new(false)),
        suppress_close: Arc::new(AtomicBool::new(false)),
        state: Arc::new(StateCell::default()),
        throttle: Arc::new(std::sync::Mutex::new(ErrorThrottle::default_window())),
        metrics: Arc::new(MetricsRing::new(16)),
    };
    (ctx, event_rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AsrEvent>) -> Vec<AsrEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// Port 9 (discard) is not listening; the connect fails immediately.
const UNREACHABLE: &str = "ws://127.0.0.1:9/asr";

#[tokio::test]
async fn test_connect_failure_reports_non_deliberate_close() {
    let (ctx, mut event_rx) = context_for(UNREACHABLE);

    assert!(run_session(&ctx).await.is_err());

    let events = drain(&mut event_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, AsrEvent::Closed { deliberate: false })));
    assert!(events.iter().any(|e| matches!(e, AsrEvent::SessionError(_))));
    assert_eq!(ctx.state.load(), AsrSessionState::Closed);
}

#[tokio::test]
async fn test_connect_failure_under_stop_is_deliberate() {
    let (ctx, mut event_rx) = context_for(UNREACHABLE);
    // a stop raced the connect attempt
    ctx.suppress_close.store(true, Ordering::SeqCst);

    assert!(run_session(&ctx).await.is_err());

    let events = drain(&mut event_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, AsrEvent::Closed { deliberate: true })));
    // a deliberate close is not an error worth surfacing
    assert!(!events.iter().any(|e| matches!(e, AsrEvent::SessionError(_))));
    assert_eq!(ctx.state.load(), AsrSessionState::Paused);
}

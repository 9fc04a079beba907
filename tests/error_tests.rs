// Unit tests for the error taxonomy and throttle

use std::time::{Duration, Instant};

use voicepipe::error::{classify_asr_error, ErrorThrottle, PipelineError};

#[test]
fn test_retryable_classes() {
    assert!(PipelineError::TransientNetwork("reset".into()).is_retryable());
    assert!(PipelineError::ProviderQuotaExceeded.is_retryable());
    assert!(PipelineError::ProtocolError(45000001).is_retryable());
    assert!(PipelineError::ProcessCrash.is_retryable());
}

#[test]
fn test_fatal_classes() {
    assert!(!PipelineError::PermissionDenied("system".into()).is_retryable());
    assert!(!PipelineError::ConfigMissing("api key".into()).is_retryable());
    assert!(!PipelineError::RegionUnsupported.is_retryable());
    assert!(!PipelineError::Unclassified("???".into()).is_retryable());
}

#[test]
fn test_classify_quota_code() {
    assert_eq!(
        classify_asr_error(45000002),
        PipelineError::ProviderQuotaExceeded
    );
}

#[test]
fn test_classify_region_codes() {
    assert_eq!(classify_asr_error(45000300), PipelineError::RegionUnsupported);
    assert_eq!(classify_asr_error(45000309), PipelineError::RegionUnsupported);
    assert_eq!(
        classify_asr_error(45000310),
        PipelineError::ProtocolError(45000310)
    );
}

#[test]
fn test_classify_unknown_code_is_protocol_error() {
    assert_eq!(
        classify_asr_error(45000001),
        PipelineError::ProtocolError(45000001)
    );
}

#[test]
fn test_unclassified_truncates_long_messages() {
    let long = "x".repeat(500);
    let err = PipelineError::unclassified(&long);
    match err {
        PipelineError::Unclassified(msg) => assert_eq!(msg.chars().count(), 200),
        other => panic!("unexpected variant {:?}", other),
    }
}

#[test]
fn test_unclassified_truncates_on_char_boundaries() {
    let long = "错".repeat(300);
    let err = PipelineError::unclassified(&long);
    match err {
        PipelineError::Unclassified(msg) => {
            assert_eq!(msg.chars().count(), 200);
            assert!(msg.chars().all(|c| c == '错'));
        }
        other => panic!("unexpected variant {:?}", other),
    }
}

#[test]
fn test_throttle_suppresses_repeats_within_the_window() {
    let t0 = Instant::now();
    let mut throttle = ErrorThrottle::new(Duration::from_secs(30));

    // two identical provider errors in quick succession surface once
    assert!(throttle.should_emit("ASR protocol error (code 45000001)", t0));
    assert!(!throttle.should_emit(
        "ASR protocol error (code 45000001)",
        t0 + Duration::from_secs(5)
    ));
}

#[test]
fn test_throttle_distinguishes_messages() {
    let t0 = Instant::now();
    let mut throttle = ErrorThrottle::new(Duration::from_secs(30));

    assert!(throttle.should_emit("connection reset", t0));
    assert!(throttle.should_emit("provider quota exceeded", t0));
}

#[test]
fn test_throttle_reopens_after_the_window() {
    let t0 = Instant::now();
    let mut throttle = ErrorThrottle::new(Duration::from_secs(30));

    assert!(throttle.should_emit("connection reset", t0));
    assert!(throttle.should_emit("connection reset", t0 + Duration::from_secs(31)));
}

#[test]
fn test_error_rendering_is_stable() {
    assert_eq!(
        PipelineError::ProtocolError(45000001).to_string(),
        "ASR protocol error (code 45000001)"
    );
    assert_eq!(
        PipelineError::PermissionDenied("system".into()).to_string(),
        "permission denied for system capture"
    );
}

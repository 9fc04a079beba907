// Unit tests for reconnect backoff bookkeeping
//
// `ReconnectState` is time-injected; these tests drive it with
// manufactured instants and never sleep.

use std::time::{Duration, Instant};

use voicepipe::resilience::{BackoffPolicy, ReconnectState};

fn policy() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 5,
        cooldown: Duration::from_secs(60),
        base_delay: Duration::from_millis(500),
        cap_delay: Duration::from_secs(30),
    }
}

#[test]
fn test_delays_double_up_to_the_cap() {
    let mut state = ReconnectState::new(BackoffPolicy {
        max_attempts: 10,
        ..policy()
    });
    let t0 = Instant::now();

    let mut delays = Vec::new();
    for i in 0..8 {
        let now = t0 + Duration::from_secs(i);
        assert!(state.should_attempt(now));
        delays.push(state.begin_attempt(now));
        state.fail();
    }

    assert_eq!(delays[0], Duration::from_millis(500));
    assert_eq!(delays[1], Duration::from_millis(1000));
    assert_eq!(delays[2], Duration::from_millis(2000));
    assert_eq!(delays[5], Duration::from_millis(16000));
    // 500ms * 2^6 = 32s, capped at 30s
    assert_eq!(delays[6], Duration::from_secs(30));
    assert_eq!(delays[7], Duration::from_secs(30));
}

#[test]
fn test_attempts_exhaust_within_cooldown() {
    let mut state = ReconnectState::new(policy());
    let t0 = Instant::now();

    for i in 0..5 {
        let now = t0 + Duration::from_secs(i);
        assert!(state.should_attempt(now));
        state.begin_attempt(now);
        state.fail();
    }

    assert!(state.exhausted());
    assert!(!state.should_attempt(t0 + Duration::from_secs(10)));
}

#[test]
fn test_counter_resets_after_cooldown() {
    let mut state = ReconnectState::new(policy());
    let t0 = Instant::now();

    for i in 0..5 {
        let now = t0 + Duration::from_secs(i);
        state.should_attempt(now);
        state.begin_attempt(now);
        state.fail();
    }
    assert!(!state.should_attempt(t0 + Duration::from_secs(30)));

    // more than one cooldown past the last attempt
    let later = t0 + Duration::from_secs(120);
    assert!(state.should_attempt(later));
    assert_eq!(state.attempt_count(), 0);
}

#[test]
fn test_success_resets_the_counter() {
    let mut state = ReconnectState::new(policy());
    let t0 = Instant::now();

    for i in 0..4 {
        let now = t0 + Duration::from_secs(i);
        assert!(state.should_attempt(now));
        state.begin_attempt(now);
        state.fail();
    }
    assert_eq!(state.attempt_count(), 4);

    state.should_attempt(t0 + Duration::from_secs(5));
    state.begin_attempt(t0 + Duration::from_secs(5));
    state.succeed();
    assert_eq!(state.attempt_count(), 0);

    // the budget is fresh again, and the first delay is back to base
    assert!(state.should_attempt(t0 + Duration::from_secs(6)));
    assert_eq!(
        state.begin_attempt(t0 + Duration::from_secs(6)),
        Duration::from_millis(500)
    );
}

#[test]
fn test_no_concurrent_attempts() {
    let mut state = ReconnectState::new(policy());
    let t0 = Instant::now();

    assert!(state.should_attempt(t0));
    state.begin_attempt(t0);

    // an attempt is in flight; a second one must wait for its outcome
    assert!(!state.should_attempt(t0 + Duration::from_millis(1)));

    state.fail();
    assert!(state.should_attempt(t0 + Duration::from_millis(2)));
}

#[test]
fn test_reset_forgets_everything() {
    let mut state = ReconnectState::new(policy());
    let t0 = Instant::now();

    for i in 0..5 {
        let now = t0 + Duration::from_secs(i);
        state.should_attempt(now);
        state.begin_attempt(now);
        state.fail();
    }
    assert!(state.exhausted());

    state.reset();
    assert!(!state.exhausted());
    assert!(state.should_attempt(t0 + Duration::from_secs(6)));
    assert_eq!(
        state.begin_attempt(t0 + Duration::from_secs(6)),
        Duration::from_millis(500)
    );
}

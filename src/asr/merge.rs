// Transcription merge engine
//
// Streaming ASR providers re-send overlapping partials and occasionally
// echo text that was already finalized. This module accumulates partials
// into one utterance buffer, strips echoes of recent finals, and decides
// when an utterance is complete.
//
// The core is pure and time-injected: the caller passes `Instant`s and
// owns the single debounce sleep via `debounce_deadline()`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// How many finalized utterances are remembered for echo stripping.
const RECENT_FINALS_MAX: usize = 5;
/// How long a finalized utterance stays relevant for echo stripping.
const RECENT_FINALS_TTL: Duration = Duration::from_secs(15);
/// Window in which a near-identical finalize is dropped as a duplicate.
const DUPLICATE_WINDOW: Duration = Duration::from_millis(5000);
/// Similarity above which two finalizations count as the same utterance.
const DUPLICATE_SIMILARITY: f64 = 0.8;
/// Default settle time after a definite signal before finalizing.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// A transcription event handed over by the ASR session.
#[derive(Debug, Clone)]
pub struct TranscriptionEvent {
    pub text: String,
    pub is_final: bool,
    pub received_at: Instant,
}

/// What the engine wants the caller to do after observing an event.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Nothing changed (empty or fully deduplicated input).
    Ignored,
    /// The accumulated text changed; relay it as a live update.
    Updated(String),
}

/// Accumulation state for one ASR session. Reset on reconnect: a buffer
/// that was mid-utterance when the transport dropped is discarded, never
/// resent.
pub struct UtteranceBuffer {
    current_text: String,
    recent_finals: VecDeque<(String, Instant)>,
    last_finalized_text: String,
    last_finalized_at: Option<Instant>,
    debounce: Duration,
    debounce_deadline: Option<Instant>,
}

impl UtteranceBuffer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            current_text: String::new(),
            recent_finals: VecDeque::new(),
            last_finalized_text: String::new(),
            last_finalized_at: None,
            debounce,
            debounce_deadline: None,
        }
    }

    pub fn current_text(&self) -> &str {
        &self.current_text
    }

    /// Deadline of the armed debounce timer, if any. The owning loop
    /// sleeps until this instant and then calls `finalize`.
    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debounce_deadline
    }

    /// Observe one transcription event: normalize against recent finals,
    /// merge into the accumulation, and (re)arm the debounce on definite
    /// results. Re-arming cancels the previous deadline.
    pub fn observe(&mut self, event: &TranscriptionEvent) -> MergeOutcome {
        if event.text.is_empty() {
            return MergeOutcome::Ignored;
        }

        let normalized = self.normalize(&event.text, event.received_at);
        if normalized.is_empty() {
            debug!("dropped duplicate echo of a finalized utterance");
            return MergeOutcome::Ignored;
        }

        let merged = merge(&self.current_text, &normalized);
        let changed = merged != self.current_text;
        self.current_text = merged;

        if event.is_final {
            self.debounce_deadline = Some(event.received_at + self.debounce);
        }

        if changed {
            MergeOutcome::Updated(self.current_text.clone())
        } else {
            MergeOutcome::Ignored
        }
    }

    /// Finalize the accumulated utterance. Returns the completed text, or
    /// None when the buffer is empty or the utterance is a near-duplicate
    /// of the previous finalization. The buffer is cleared exactly once
    /// on the successful path (and on duplicate suppression, without
    /// emitting).
    pub fn finalize(&mut self, now: Instant) -> Option<String> {
        self.debounce_deadline = None;

        let trimmed = self.current_text.trim().to_string();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(last_at) = self.last_finalized_at {
            if now.duration_since(last_at) < DUPLICATE_WINDOW
                && similarity(&trimmed, &self.last_finalized_text) > DUPLICATE_SIMILARITY
            {
                debug!("suppressed near-duplicate finalization: {:?}", trimmed);
                self.current_text.clear();
                return None;
            }
        }

        self.recent_finals.push_back((trimmed.clone(), now));
        while self.recent_finals.len() > RECENT_FINALS_MAX {
            self.recent_finals.pop_front();
        }
        self.last_finalized_text = trimmed.clone();
        self.last_finalized_at = Some(now);
        self.current_text.clear();

        Some(trimmed)
    }

    /// Discard all accumulation. Called when the ASR session reconnects;
    /// buffered non-final text is never resent.
    pub fn reset(&mut self) {
        self.current_text.clear();
        self.recent_finals.clear();
        self.last_finalized_text.clear();
        self.last_finalized_at = None;
        self.debounce_deadline = None;
    }

    /// Strip echoes of recently finalized utterances from `text`.
    ///
    /// Recent finals older than the TTL or beyond the cap are pruned
    /// first. Any recent final that is a proper prefix of the text is
    /// stripped (with the punctuation/whitespace it leaves behind),
    /// repeatedly until nothing matches. Text that then exactly equals a
    /// recent final is an echo and normalizes to empty.
    fn normalize(&mut self, text: &str, now: Instant) -> String {
        while self.recent_finals.len() > RECENT_FINALS_MAX {
            self.recent_finals.pop_front();
        }
        self.recent_finals
            .retain(|(_, at)| now.duration_since(*at) <= RECENT_FINALS_TTL);

        let mut out = text.to_string();
        loop {
            let mut stripped = false;
            for (fin, _) in &self.recent_finals {
                if out.len() > fin.len() && out.starts_with(fin.as_str()) {
                    out = out[fin.len()..]
                        .trim_start_matches(is_boundary_char)
                        .to_string();
                    stripped = true;
                    break;
                }
            }
            if !stripped {
                break;
            }
        }

        if self.recent_finals.iter().any(|(fin, _)| *fin == out) {
            return String::new();
        }
        out
    }
}

fn is_boundary_char(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            ',' | '.' | '!' | '?' | ';' | ':' | '，' | '。' | '！' | '？' | '；' | '：' | '、'
        )
}

/// Merge an incoming partial into the current accumulation.
///
/// Containment and prefix relations pick the longer rendition; otherwise
/// the largest suffix-of-current / prefix-of-incoming overlap (measured
/// in characters) splices the two, and with no overlap at all the
/// incoming text starts a new utterance boundary and is appended.
pub fn merge(current: &str, incoming: &str) -> String {
    if current.is_empty() {
        return incoming.to_string();
    }
    if incoming.is_empty() || current == incoming {
        return current.to_string();
    }
    if incoming.contains(current) {
        return incoming.to_string();
    }
    if current.contains(incoming) {
        return current.to_string();
    }

    let cur: Vec<char> = current.chars().collect();
    let inc: Vec<char> = incoming.chars().collect();
    let max_overlap = cur.len().min(inc.len());
    for i in (1..=max_overlap).rev() {
        if cur[cur.len() - i..] == inc[..i] {
            let mut out: String = cur[..cur.len() - i].iter().collect();
            out.push_str(incoming);
            return out;
        }
    }

    format!("{}{}", current, incoming)
}

/// Character-bag Dice similarity.
///
/// Equality and containment short-circuit; otherwise characters of the
/// shorter string are greedily removed from a bag of the longer string's
/// characters and the match count feeds a Dice coefficient. Not an edit
/// distance, and kept that way deliberately.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let len_a = a.chars().count();
    let len_b = b.chars().count();

    if a.contains(b) || b.contains(a) {
        return len_a.min(len_b) as f64 / len_a.max(len_b) as f64;
    }

    let (shorter, longer) = if len_a <= len_b { (a, b) } else { (b, a) };
    let mut bag: Vec<char> = longer.chars().collect();
    let mut matches = 0usize;
    for c in shorter.chars() {
        if let Some(pos) = bag.iter().position(|&p| p == c) {
            bag.swap_remove(pos);
            matches += 1;
        }
    }

    2.0 * matches as f64 / (len_a + len_b) as f64
}

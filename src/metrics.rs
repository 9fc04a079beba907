// Lock-free pipeline metrics
//
// An append-only, bounded ring of samples plus per-kind counters. Safe
// for concurrent append and read: writers only advance an atomic head
// index and store into atomic slot fields, readers load. A reader racing
// a writer may observe a slot mid-update; snapshots are advisory, the
// counters are exact.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// What a metric sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetricKind {
    ChunkCaptured = 0,
    ChunkDropped = 1,
    FrameSent = 2,
    TranscriptPartial = 3,
    UtteranceFinal = 4,
    Reconnect = 5,
    SessionError = 6,
    CompletionToken = 7,
}

impl MetricKind {
    const COUNT: usize = 8;

    fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(MetricKind::ChunkCaptured),
            1 => Some(MetricKind::ChunkDropped),
            2 => Some(MetricKind::FrameSent),
            3 => Some(MetricKind::TranscriptPartial),
            4 => Some(MetricKind::UtteranceFinal),
            5 => Some(MetricKind::Reconnect),
            6 => Some(MetricKind::SessionError),
            7 => Some(MetricKind::CompletionToken),
            _ => None,
        }
    }
}

/// One recorded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub kind: MetricKind,
    pub value: u64,
    pub at_ms: u64,
}

struct Slot {
    // kind is stored as kind+1 so zero means "never written".
    kind: AtomicU64,
    value: AtomicU64,
    at_ms: AtomicU64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            kind: AtomicU64::new(0),
            value: AtomicU64::new(0),
            at_ms: AtomicU64::new(0),
        }
    }
}

/// Bounded ring-buffer metrics store shared across the pipeline.
pub struct MetricsRing {
    slots: Box<[Slot]>,
    head: AtomicUsize,
    counters: [AtomicU64; MetricKind::COUNT],
}

impl MetricsRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots: Vec<Slot> = (0..capacity).map(|_| Slot::empty()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            head: AtomicUsize::new(0),
            counters: Default::default(),
        }
    }

    /// Append a sample. Never blocks; the oldest sample is overwritten
    /// once the ring wraps.
    pub fn append(&self, kind: MetricKind, value: u64) {
        let idx = self.head.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let slot = &self.slots[idx];
        slot.kind.store(kind as u64 + 1, Ordering::Relaxed);
        slot.value.store(value, Ordering::Relaxed);
        slot.at_ms.store(now_ms(), Ordering::Relaxed);
        self.counters[kind as usize].fetch_add(value, Ordering::Relaxed);
    }

    /// Record a single occurrence of `kind`.
    pub fn incr(&self, kind: MetricKind) {
        self.append(kind, 1);
    }

    /// Running total for one kind.
    pub fn total(&self, kind: MetricKind) -> u64 {
        self.counters[kind as usize].load(Ordering::Relaxed)
    }

    /// Advisory snapshot of the ring contents, oldest first.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let head = self.head.load(Ordering::Relaxed);
        let cap = self.slots.len();
        let mut out = Vec::with_capacity(cap.min(head));
        for offset in 0..cap {
            let idx = (head + offset) % cap;
            let slot = &self.slots[idx];
            let raw_kind = slot.kind.load(Ordering::Relaxed);
            if raw_kind == 0 {
                continue;
            }
            if let Some(kind) = MetricKind::from_u64(raw_kind - 1) {
                out.push(MetricSample {
                    kind,
                    value: slot.value.load(Ordering::Relaxed),
                    at_ms: slot.at_ms.load(Ordering::Relaxed),
                });
            }
        }
        out
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lifecycle phase of a worker lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Accepting and running tasks
    Active,
    /// Quiet past the idle threshold; still accepts tasks (reactivating)
    Idle,
    /// Terminal; rejects tasks while the lane drains
    ShuttingDown,
}

impl WorkerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerPhase::Active => "active",
            WorkerPhase::Idle => "idle",
            WorkerPhase::ShuttingDown => "shutting_down",
        }
    }
}

const TAG_ACTIVE: u64 = 0;
const TAG_IDLE: u64 = 1;
const TAG_SHUTTING_DOWN: u64 = 2;
const TAG_MASK: u64 = 0b11;

fn pack(tag: u64, epoch: u64) -> u64 {
    (epoch << 2) | tag
}

fn tag(packed: u64) -> u64 {
    packed & TAG_MASK
}

fn epoch(packed: u64) -> u64 {
    packed >> 2
}

fn decode(packed: u64) -> WorkerPhase {
    match tag(packed) {
        TAG_IDLE => WorkerPhase::Idle,
        TAG_SHUTTING_DOWN => WorkerPhase::ShuttingDown,
        _ => WorkerPhase::Active,
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Atomically-updatable lifecycle cell for one worker lane.
///
/// The phase tag shares a single word with a transition epoch; every
/// successful transition bumps the epoch, including the `Active -> Active`
/// refresh on enqueue. A reaper CAS taken against a stale observation
/// therefore fails even when the tag it read is still current, which closes
/// the window between a timestamp refresh and a mark-idle attempt. The
/// last-access timestamp lives in a second word and is only consulted for
/// staleness checks, so its ordering relative to the tag word is not load
/// bearing.
///
/// Legal transitions:
/// - `Active|Idle -> Active` on enqueue (refresh / reactivation)
/// - `Active -> Idle` by the reaper, only when stale
/// - `Idle -> ShuttingDown` by the reaper
/// - `any -> ShuttingDown` by process shutdown only
///
/// `ShuttingDown` is terminal.
pub struct WorkerState {
    packed: AtomicU64,
    last_access_ms: AtomicI64,
}

impl WorkerState {
    pub fn new() -> Self {
        WorkerState {
            packed: AtomicU64::new(pack(TAG_ACTIVE, 0)),
            last_access_ms: AtomicI64::new(now_ms()),
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        decode(self.packed.load(Ordering::Acquire))
    }

    pub fn last_access_ms(&self) -> i64 {
        self.last_access_ms.load(Ordering::Acquire)
    }

    /// Enqueue-side transition: refresh an `Active` lane or reactivate an
    /// `Idle` one. Returns false when the lane is `ShuttingDown`, in which
    /// case the caller must retry against a fresh worker.
    pub fn try_touch(&self) -> bool {
        let now = now_ms();

        loop {
            let current = self.packed.load(Ordering::Acquire);
            if tag(current) == TAG_SHUTTING_DOWN {
                return false;
            }

            self.last_access_ms.store(now, Ordering::Release);
            let next = pack(TAG_ACTIVE, epoch(current) + 1);
            if self
                .packed
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
            // lost the race, reread and retry
        }
    }

    /// Reaper step (a): mark an `Active` lane `Idle` when it has been quiet
    /// past the threshold. Single CAS attempt; losing it means the lane was
    /// just touched, which is activity, so no retry. Returns true when the
    /// lane is now idle (marked here or already idle).
    pub fn mark_idle_if_stale(&self, now_ms: i64, idle_threshold_ms: i64) -> bool {
        let current = self.packed.load(Ordering::Acquire);

        match tag(current) {
            TAG_IDLE => true,
            TAG_SHUTTING_DOWN => false,
            _ => {
                let last = self.last_access_ms.load(Ordering::Acquire);
                if now_ms - last <= idle_threshold_ms {
                    return false;
                }

                let next = pack(TAG_IDLE, epoch(current) + 1);
                self.packed
                    .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }
        }
    }

    /// Reaper step (b): retire an `Idle` lane. Must never succeed against an
    /// `Active` lane; idempotent for one already `ShuttingDown`.
    pub fn try_retire(&self) -> bool {
        loop {
            let current = self.packed.load(Ordering::Acquire);

            match tag(current) {
                TAG_ACTIVE => return false,
                TAG_SHUTTING_DOWN => return true,
                _ => {
                    let next = pack(TAG_SHUTTING_DOWN, epoch(current) + 1);
                    if self
                        .packed
                        .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return true;
                    }
                    // lane reactivated under us, reread
                }
            }
        }
    }

    /// Unconditional retirement, reserved for process shutdown. Returns the
    /// phase the lane was in before.
    pub fn force_retire(&self) -> WorkerPhase {
        loop {
            let current = self.packed.load(Ordering::Acquire);
            if tag(current) == TAG_SHUTTING_DOWN {
                return WorkerPhase::ShuttingDown;
            }

            let next = pack(TAG_SHUTTING_DOWN, epoch(current) + 1);
            if self
                .packed
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return decode(current);
            }
        }
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

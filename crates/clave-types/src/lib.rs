//! Shared diagnostic record types for the clave lock runtime.
//!
//! All dump and snapshot types live here so they can be produced by the
//! instrumented runtime and consumed by watchdogs or external tooling
//! without a dependency back into `clave-locks`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Thread identity ──────────────────────────────────────────────

/// Kernel thread id, as returned by `gettid(2)`.
pub type Tid = i32;

/// Sentinel for "no thread".
pub const INVALID_TID: Tid = -1;

// ── Non-mutex wait edges ─────────────────────────────────────────

/// Why a thread is blocked on something other than a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum OtherWaitReason {
    #[default]
    None = 0,
    /// Condition-variable wait; the recorded tid is the expected notifier.
    Cv = 1,
    /// Blocked joining another thread.
    Join = 2,
    /// Blocked sending to another thread's queue.
    Queue = 3,
}

impl OtherWaitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            OtherWaitReason::None => "none",
            OtherWaitReason::Cv => "cv",
            OtherWaitReason::Join => "join",
            OtherWaitReason::Queue => "queue",
        }
    }
}

// ── Per-category contention statistics ───────────────────────────

/// Contention profile of one capability order.
///
/// Counters are sampled without a global lock, so a snapshot may exhibit
/// temporal shear between fields. Informative only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockStatSnapshot {
    pub order: String,
    pub locks: u64,
    /// Acquisitions that did not block (`locks - waits`).
    pub uncontested: u64,
    pub waits: u64,
    pub unlocks: u64,
    pub avg_wait_ms: f64,
    /// Sample standard deviation of wait time; zero below two samples.
    pub std_wait_ms: f64,
}

impl fmt::Display for LockStatSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "locks: {}", self.locks)?;
        writeln!(f, "uncontested: {}", self.uncontested)?;
        writeln!(f, "waits: {}", self.waits)?;
        writeln!(f, "unlocks: {}", self.unlocks)?;
        writeln!(f, "avg_wait_ms: {:.6}", self.avg_wait_ms)?;
        writeln!(f, "std_wait_ms: {:.6}", self.std_wait_ms)
    }
}

// ── Per-thread lock metadata ─────────────────────────────────────

/// A single held-stack entry: opaque mutex handle plus its order name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeldEntry {
    pub handle: u64,
    pub order: String,
}

/// Auxiliary wait state attached to a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherWaitSnapshot {
    pub tid: Tid,
    pub reason: OtherWaitReason,
    /// Order name of the mutex released around a cv wait, if any.
    pub order: Option<String>,
}

/// Point-in-time view of one thread's lock metadata.
///
/// Read without synchronizing against the owning thread; fields may be
/// mutually stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub tid: Tid,
    /// Handle of the mutex the thread is blocked acquiring, 0 if none.
    pub waiting: u64,
    pub other_wait: Option<OtherWaitSnapshot>,
    pub held: Vec<HeldEntry>,
    /// Pushes minus removes; exceeds `held.len()` when entries were
    /// dropped at capacity.
    pub held_true_len: u64,
}

impl fmt::Display for ThreadSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tid: {}", self.tid)?;
        writeln!(f, "waiting: {:#x}", self.waiting)?;
        if let Some(other) = &self.other_wait {
            match other.reason {
                OtherWaitReason::Cv => {
                    let order = other.order.as_deref().unwrap_or("unknown");
                    writeln!(f, "cv_tid: {}  cv_order: {}", other.tid, order)?;
                }
                OtherWaitReason::Join => writeln!(f, "join_tid: {}", other.tid)?,
                OtherWaitReason::Queue => writeln!(f, "queue_tid: {}", other.tid)?,
                OtherWaitReason::None => {}
            }
        }
        write!(
            f,
            "held: len: {} true_len: {} items: [ ",
            self.held.len(),
            self.held_true_len
        )?;
        for entry in &self.held {
            write!(f, "{{ {:#x}, {} }} ", entry.handle, entry.order)?;
        }
        writeln!(f, "]")
    }
}

// ── Deadlock detection ───────────────────────────────────────────

/// One hop in a wait chain: the thread waited on and the edge label
/// (an order name, `cv-<order>`, `join`, or `queue`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub tid: Tid,
    pub label: String,
}

/// Result of a deadlock-detection walk from a target thread.
///
/// When `has_cycle` is set, the last chain entry repeats a tid seen
/// earlier in the walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockInfo {
    /// The thread the walk started from.
    pub tid: Tid,
    pub has_cycle: bool,
    /// Reason of the last non-mutex edge traversed, if any.
    pub other_wait_reason: OtherWaitReason,
    pub chain: Vec<ChainLink>,
}

impl DeadlockInfo {
    pub fn new(tid: Tid) -> Self {
        Self {
            tid,
            has_cycle: false,
            other_wait_reason: OtherWaitReason::None,
            chain: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl fmt::Display for DeadlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_cycle {
            write!(f, "lock cycle found (last tid repeated) ")?;
        } else {
            write!(f, "lock wait chain ")?;
        }
        write!(f, "[ {}", self.tid)?;
        for link in &self.chain {
            write!(f, ", {} (by {})", link.tid, link.label)?;
        }
        write!(f, " ]")
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_info_display_chain() {
        let mut info = DeadlockInfo::new(100);
        info.chain.push(ChainLink {
            tid: 101,
            label: "Engine".to_string(),
        });
        info.chain.push(ChainLink {
            tid: 100,
            label: "cv-Stream".to_string(),
        });
        info.has_cycle = true;

        let text = info.to_string();
        assert_eq!(
            text,
            "lock cycle found (last tid repeated) [ 100, 101 (by Engine), 100 (by cv-Stream) ]"
        );
    }

    #[test]
    fn deadlock_info_display_no_cycle() {
        let mut info = DeadlockInfo::new(7);
        info.chain.push(ChainLink {
            tid: 8,
            label: "join".to_string(),
        });
        assert_eq!(info.to_string(), "lock wait chain [ 7, 8 (by join) ]");
        assert!(!info.is_empty());
    }

    #[test]
    fn thread_snapshot_display_cv_wait() {
        let snap = ThreadSnapshot {
            tid: 42,
            waiting: 0,
            other_wait: Some(OtherWaitSnapshot {
                tid: 43,
                reason: OtherWaitReason::Cv,
                order: Some("Stream".to_string()),
            }),
            held: vec![HeldEntry {
                handle: 0x1000,
                order: "Engine".to_string(),
            }],
            held_true_len: 1,
        };
        let text = snap.to_string();
        assert!(text.contains("tid: 42"));
        assert!(text.contains("cv_tid: 43  cv_order: Stream"));
        assert!(text.contains("held: len: 1 true_len: 1"));
        assert!(text.contains("{ 0x1000, Engine }"));
    }

    #[test]
    fn stat_snapshot_serializes() {
        let snap = LockStatSnapshot {
            order: "Other".to_string(),
            locks: 10,
            uncontested: 8,
            waits: 2,
            unlocks: 10,
            avg_wait_ms: 0.5,
            std_wait_ms: 0.1,
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"uncontested\":8"));
    }
}

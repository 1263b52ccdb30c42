//! Build-time configuration of the lock instrumentation.

use std::sync::LazyLock;

use tracing::debug;

/// When false, the pre/post hooks and wait scopes compile down to
/// nothing and the mutex degrades to a plain exclusive lock.
pub const TRACKING_ENABLED: bool = true;

/// Fatal behavior toggles, one per violation class.
pub const ABORT_ON_ORDER_CHECK: bool = true;
pub const ABORT_ON_RECURSION_CHECK: bool = true;
pub const ABORT_ON_INVALID_UNLOCK: bool = true;

/// Physical capacity of every thread's held stack. If a thread holds
/// more mutexes than this, the oldest tracked entries are retained and
/// deadlock detection may miss edges.
pub const LOCK_STACK_DEPTH: usize = 16;

static PI_ENABLED: LazyLock<bool> = LazyLock::new(|| {
    let enabled = match std::env::var("CLAVE_PI_MUTEX") {
        Ok(value) => !matches!(value.as_str(), "0" | "false" | "off"),
        Err(_) => true,
    };
    debug!(enabled, "mutex priority inheritance");
    enabled
});

/// Process-wide priority-inheritance flag, read once on first use.
/// Every mutex constructed without an explicit override consults this.
pub fn priority_inheritance_enabled() -> bool {
    *PI_ENABLED
}

//! Capability lock order for the clave audio engine.
//!
//! Generated by `cargo xtask gen-lock-order`. Do not edit by hand.
//!
//! Orders form the acquisition hierarchy: a thread may only acquire a
//! mutex whose order is strictly greater than every order it already
//! holds. Lower orders belong to outer, policy-level locks; higher
//! orders to inner, per-stream and per-effect locks.

/// Capability order tag. Dense, fixed at build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum LockOrder {
    RoomRenderer = 0,
    PolicyEffects = 1,
    EffectHandle = 2,
    EffectPolicy = 3,
    PolicyService = 4,
    CommandThread = 5,
    Command = 6,
    ClientPolicy = 7,
    Engine = 8,
    DeviceEffectManager = 9,
    DeviceEffectProxy = 10,
    DeviceEffectHandle = 11,
    PatchCommands = 12,
    Stream = 13,
    EngineClients = 14,
    EffectChain = 15,
    Effect = 16,
    Hardware = 17,
    LoudnessReporter = 18,
    RetiredWriters = 19,
    AsyncCallback = 20,
    ConfigEvent = 21,
    TrackMetadata = 22,
    PatchRead = 23,
    PatchListeners = 24,
    StreamCallback = 25,
    PolicyClients = 26,
    LogNotifier = 27,
    Other = 28,
}

/// Order names, indexed by discriminant.
pub const ORDER_NAMES: [&str; LockOrder::COUNT] = [
    "RoomRenderer",
    "PolicyEffects",
    "EffectHandle",
    "EffectPolicy",
    "PolicyService",
    "CommandThread",
    "Command",
    "ClientPolicy",
    "Engine",
    "DeviceEffectManager",
    "DeviceEffectProxy",
    "DeviceEffectHandle",
    "PatchCommands",
    "Stream",
    "EngineClients",
    "EffectChain",
    "Effect",
    "Hardware",
    "LoudnessReporter",
    "RetiredWriters",
    "AsyncCallback",
    "ConfigEvent",
    "TrackMetadata",
    "PatchRead",
    "PatchListeners",
    "StreamCallback",
    "PolicyClients",
    "LogNotifier",
    "Other",
];

impl LockOrder {
    /// Number of orders, `Other` included.
    pub const COUNT: usize = 29;

    pub fn name(self) -> &'static str {
        ORDER_NAMES[self as usize]
    }

    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Name for a raw order index, as read back out of a held stack.
pub(crate) fn order_name(index: u32) -> &'static str {
    ORDER_NAMES.get(index as usize).copied().unwrap_or("unknown")
}

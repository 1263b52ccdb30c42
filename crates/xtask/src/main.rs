use std::fmt::Write as _;
use std::path::PathBuf;

/// The capability hierarchy, outermost first. Editing this list and
/// re-running `cargo xtask gen-lock-order` is the only supported way to
/// change the lock order enumeration.
const ORDERS: &[&str] = &[
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

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("gen-lock-order") => gen_lock_order(),
        Some(command) => usage_and_exit(&format!("unknown command `{command}`")),
        None => usage_and_exit("missing command"),
    }
}

fn usage_and_exit(error: &str) -> ! {
    eprintln!("Error: {error}");
    eprintln!("Usage: cargo xtask <command>");
    eprintln!("Available commands:");
    eprintln!("  gen-lock-order");
    std::process::exit(1);
}

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("xtask lives two levels below the workspace root")
        .to_path_buf()
}

fn gen_lock_order() {
    let path = workspace_root().join("crates/clave-locks/src/order.rs");
    let text = render_order_rs();
    if let Err(error) = std::fs::write(&path, text) {
        eprintln!("failed to write {}: {error}", path.display());
        std::process::exit(1);
    }
    println!("Wrote {} ({} orders)", path.display(), ORDERS.len());
}

fn render_order_rs() -> String {
    let mut out = String::with_capacity(4096);

    out.push_str(
        "//! Capability lock order for the clave audio engine.\n\
         //!\n\
         //! Generated by `cargo xtask gen-lock-order`. Do not edit by hand.\n\
         //!\n\
         //! Orders form the acquisition hierarchy: a thread may only acquire a\n\
         //! mutex whose order is strictly greater than every order it already\n\
         //! holds. Lower orders belong to outer, policy-level locks; higher\n\
         //! orders to inner, per-stream and per-effect locks.\n\n",
    );

    out.push_str(
        "/// Capability order tag. Dense, fixed at build.\n\
         #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]\n\
         #[repr(u32)]\n\
         pub enum LockOrder {\n",
    );
    for (i, name) in ORDERS.iter().enumerate() {
        writeln!(out, "    {name} = {i},").unwrap();
    }
    out.push_str("}\n\n");

    out.push_str(
        "/// Order names, indexed by discriminant.\n\
         pub const ORDER_NAMES: [&str; LockOrder::COUNT] = [\n",
    );
    for name in ORDERS {
        writeln!(out, "    \"{name}\",").unwrap();
    }
    out.push_str("];\n\n");

    out.push_str("impl LockOrder {\n    /// Number of orders, `Other` included.\n");
    writeln!(out, "    pub const COUNT: usize = {};", ORDERS.len()).unwrap();
    out.push_str(
        "\n    pub fn name(self) -> &'static str {\n        ORDER_NAMES[self as usize]\n    }\n\n    \
         pub fn index(self) -> u32 {\n        self as u32\n    }\n}\n\n",
    );

    out.push_str(
        "/// Name for a raw order index, as read back out of a held stack.\n\
         pub(crate) fn order_name(index: u32) -> &'static str {\n    \
         ORDER_NAMES.get(index as usize).copied().unwrap_or(\"unknown\")\n}\n\n",
    );

    let first = ORDERS.first().unwrap();
    let last = ORDERS.last().unwrap();
    out.push_str("#[cfg(test)]\nmod tests {\n    use super::*;\n\n");
    out.push_str("    #[test]\n    fn names_line_up_with_discriminants() {\n");
    writeln!(out, "        assert_eq!(LockOrder::{first}.name(), \"{first}\");").unwrap();
    writeln!(out, "        assert_eq!(LockOrder::{last}.name(), \"{last}\");").unwrap();
    writeln!(out, "        assert_eq!(LockOrder::{last} as usize, LockOrder::COUNT - 1);").unwrap();
    out.push_str("        assert_eq!(ORDER_NAMES.len(), LockOrder::COUNT);\n    }\n\n");
    out.push_str(
        "    #[test]\n    fn out_of_range_index_is_unknown() {\n        \
         assert_eq!(order_name(LockOrder::COUNT as u32), \"unknown\");\n        \
         assert_eq!(order_name(u32::MAX), \"unknown\");\n    }\n}\n",
    );

    out
}

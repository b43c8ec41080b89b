// loadorder - reads, validates and writes the plugin load order and
// active-plugin set for Bethesda-style games.
//
// The engine reconciles three mutable sources of truth: plugin file
// modification times, the load-order manifest, and the active-plugins
// manifest. Handles cache the reconciled state and re-read it whenever
// the disk moves underneath them.

pub mod active;
pub mod codes;
pub mod error;
pub mod game;
pub mod handle;
pub mod header;
pub mod load_order;
pub mod logging;
pub mod plugin;

// Re-export the types most embedders need.
pub use active::ActivePlugins;
pub use codes::ResultCode;
pub use error::{Error, Outcome, Warning};
pub use game::{GameId, GameProfile, HeaderDialect, LoadOrderMethod};
pub use handle::Handle;
pub use load_order::LoadOrder;
pub use plugin::Plugin;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library version as (major, minor, patch).
pub fn version() -> (u64, u64, u64) {
    let mut parts = VERSION.split('.').map(|part| part.parse().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Whether this build can stand in for the given version. Only major
/// versions are required to match.
pub fn is_compatible(major: u64, _minor: u64, _patch: u64) -> bool {
    version().0 == major
}

//! WireGuard profile and tunnel management
//!
//! Drives the `wg-quick` and `wg` command-line tools; no tunnel or protocol
//! logic lives here.
//!
//! - `profile`: import, removal and listing of `<name>.conf` profiles
//! - `tunnel`: `wg-quick up/down` and interface status
//! - `status`: `wg show` parsing and the last-known statistics cache

pub mod profile;
pub mod status;
pub mod tunnel;

pub use profile::{ProfileError, ProfileManager, SyncOutcome};
pub use status::{CacheEntry, StatusCache, TunnelStatus};
pub use tunnel::{TunnelAction, TunnelController, TunnelError};

//! Wirecloak - WireGuard profile and tunnel manager
//!
//! This crate is the privileged layer behind a WireGuard front-end. It
//! installs and removes profiles in `/etc/wireguard`, brings tunnels up and
//! down with `wg-quick`, and reports per-tunnel statistics from `wg show`.
//! Root access is obtained per command through `pkexec`.
//!
//! # Architecture
//!
//! - `validate`: Profile filename and interface name checks
//! - `process`: Subprocess execution with timeouts, and privilege escalation
//! - `wireguard`: Profile storage, tunnel control and the status cache
//! - `backend`: Async operation surface with change notifications
//! - `config`: Configuration file handling (TOML)
//!
//! # Usage
//!
//! ```bash
//! wirecloak import ~/Downloads/office.conf
//! wirecloak up office
//! wirecloak status office --json
//! ```

pub mod backend;
pub mod config;
pub mod process;
pub mod validate;
pub mod wireguard;

pub use backend::{BackendError, BackendEvent, VpnBackend};
pub use config::Config;
pub use wireguard::TunnelStatus;

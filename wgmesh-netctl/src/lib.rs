//! Abstract kernel control surfaces for wgmesh: WireGuard interface/peer
//! management (section 4.C) and route/firewall synchronisation (section 4.D).
//!
//! Every mutating call passes through [`Executor`] so the reconciler and
//! health monitor can be unit tested against [`RecordingExecutor`] without
//! root privileges or a real WireGuard kernel module.

pub mod error;
pub mod executor;
pub mod routing;
pub mod wgctl;

pub use error::{NetCtlError, NetCtlResult};
pub use executor::{CommandOutput, Executor, RecordingExecutor, SystemExecutor};
pub use routing::{DesiredRoute, KernelRouteDriver, RouteDriver};
pub use wgctl::{KernelPeerState, KernelWireGuardControl, PeerTransfer, WireGuardControl};

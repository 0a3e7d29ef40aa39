//! Container runtime backends.
//!
//! Each backend implements [`ContainerRuntime`](crate::runtime::ContainerRuntime)
//! for single containers, without pod awareness.

pub mod oci_cli;
pub mod simulated;

pub use self::oci_cli::OciCliRuntime;
pub use self::simulated::{RuntimeCall, SimulatedRuntime};

//! Periodic background tasks

pub mod discovery;
pub mod renewal;
pub mod sweep;

pub use discovery::{DiscoveryController, DiscoveryReport};
pub use renewal::{RenewalController, RenewalReport};
pub use sweep::SweepController;

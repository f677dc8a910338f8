//! certfleet - certificate lifecycle and fleet deployment
//!
//! Tracks X.509 certificates from issuance through renewal and revocation and
//! pushes their material to registered agents.

// Foundational layer
pub mod clock;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;
pub mod utils;

// Core layer
pub mod agent;
pub mod ca;
pub mod store;

// Application layer
pub mod controller;
pub mod deploy;
pub mod discovery;
pub mod lifecycle;

// Interface layer
pub mod api;

// Public key types
pub use crate::config::Settings;
pub use crate::error::Error;
pub use crate::lifecycle::LifecycleEngine;
pub use crate::telemetry::metrics::MetricsCollector;
pub use crate::types::{Actor, CertificateStatus, KeyAlgorithm, Result};

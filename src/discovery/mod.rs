//! Network certificate discovery.
//!
//! Endpoints are scanned over TLS and the certificates they present are added
//! to the inventory as unmanaged records.

pub mod inspect;
pub mod scanner;

pub use inspect::{inspect_der, ObservedCertificate};
pub use scanner::{EndpointScanner, ScanTarget, TlsScanner};

/// Adapter id carried by certificates found on the network
pub const DISCOVERED_ADAPTER: &str = "discovered";

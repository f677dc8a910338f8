pub mod gateway;
pub mod local;
pub mod mock;
pub mod pem;
pub mod provider;
pub mod types;

// Re-export key types
pub use gateway::AdapterGateway;
pub use local::LocalCaAdapter;
pub use mock::MockCaAdapter;
pub use provider::{create_ca_adapter, CaAdapter};
pub use types::{IssueRequest, IssuedCertificate, RevocationReason, SignedCertificate};

use std::sync::Arc;

use async_trait::async_trait;

use crate::ca::types::{IssueRequest, IssuedCertificate, RevocationReason};
use crate::clock::SharedClock;
use crate::config::AdapterSettings;
use crate::error::Error;
use crate::types::Result;

/// CA adapter interface
#[async_trait]
pub trait CaAdapter: Send + Sync {
    /// Adapter kind, for logs
    fn kind(&self) -> &'static str;

    /// Sign a new certificate
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate>;

    /// Revoke a certificate by serial number
    async fn revoke(&self, serial: &str, reason: RevocationReason) -> Result<()>;
}

/// Create a CA adapter based on configuration
pub fn create_ca_adapter(settings: &AdapterSettings, clock: SharedClock) -> Result<Arc<dyn CaAdapter>> {
    match settings.kind.as_str() {
        "local" => {
            let ca = crate::ca::local::LocalCaAdapter::new(settings, clock)?;
            Ok(Arc::new(ca))
        }
        "mock" => {
            let ca = crate::ca::mock::MockCaAdapter::new(settings, clock);
            Ok(Arc::new(ca))
        }
        _ => Err(Error::Config(format!(
            "Unsupported adapter kind for {}: {}",
            settings.id, settings.kind
        ))),
    }
}

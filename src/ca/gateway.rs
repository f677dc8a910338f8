//! Routes issuance and revocation to registered CA adapters.
//!
//! Every call is bounded by the adapter timeout and never retried. Issued
//! material is fingerprinted and its validity window checked against the
//! clock before anything is persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::ca::pem::{decode_pem, fingerprint};
use crate::ca::provider::{create_ca_adapter, CaAdapter};
use crate::ca::types::{IssueRequest, RevocationReason, SignedCertificate};
use crate::clock::SharedClock;
use crate::config::Settings;
use crate::error::Error;
use crate::types::Result;

/// CA adapter gateway
pub struct AdapterGateway {
    adapters: RwLock<HashMap<String, Arc<dyn CaAdapter>>>,
    timeout: Duration,
    clock: SharedClock,
}

impl AdapterGateway {
    /// Gateway without adapters
    pub fn new(timeout: Duration, clock: SharedClock) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            timeout,
            clock,
        }
    }

    /// Gateway with every adapter listed in the configuration
    pub fn from_settings(settings: &Settings, clock: SharedClock) -> Result<Self> {
        let gateway = Self::new(settings.lifecycle.adapter_timeout(), clock.clone());
        for adapter in &settings.adapters {
            gateway.register(&adapter.id, create_ca_adapter(adapter, clock.clone())?);
        }
        Ok(gateway)
    }

    /// Register (or replace) an adapter under `id`
    pub fn register(&self, id: &str, adapter: Arc<dyn CaAdapter>) {
        info!("Registered {} CA adapter '{}'", adapter.kind(), id);
        self.adapters.write().insert(id.to_string(), adapter);
    }

    /// Registered adapter ids
    pub fn adapter_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// True if an adapter is registered under `id`
    pub fn contains(&self, id: &str) -> bool {
        self.adapters.read().contains_key(id)
    }

    fn adapter(&self, id: &str) -> Result<Arc<dyn CaAdapter>> {
        self.adapters
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::AdapterNotFound(id.to_string()))
    }

    /// Issue a certificate through `adapter_id`
    pub async fn issue(&self, adapter_id: &str, request: &IssueRequest) -> Result<SignedCertificate> {
        let adapter = self.adapter(adapter_id)?;
        debug!("Issuing {} through adapter {}", request.common_name, adapter_id);

        let issued = tokio::time::timeout(self.timeout, adapter.issue(request))
            .await
            .map_err(|_| {
                warn!("Adapter {} timed out issuing {}", adapter_id, request.common_name);
                Error::AdapterTimeout(self.timeout)
            })??;

        let der = decode_pem(&issued.certificate_pem)
            .map_err(|e| Error::Adapter(format!("Adapter {} returned unreadable material: {}", adapter_id, e)))?;

        let now = self.clock.now();
        if issued.not_before >= issued.not_after {
            return Err(Error::Adapter(format!(
                "Adapter {} returned an empty validity window",
                adapter_id
            )));
        }
        if now < issued.not_before || now > issued.not_after {
            return Err(Error::Adapter(format!(
                "Adapter {} returned a certificate not valid now ({} .. {})",
                adapter_id, issued.not_before, issued.not_after
            )));
        }

        Ok(SignedCertificate {
            fingerprint: fingerprint(&der),
            issued,
        })
    }

    /// Revoke a certificate through `adapter_id`
    pub async fn revoke(&self, adapter_id: &str, serial: &str, reason: RevocationReason) -> Result<()> {
        let adapter = self.adapter(adapter_id)?;
        debug!("Revoking serial {} through adapter {}", serial, adapter_id);

        tokio::time::timeout(self.timeout, adapter.revoke(serial, reason))
            .await
            .map_err(|_| {
                warn!("Adapter {} timed out revoking {}", adapter_id, serial);
                Error::AdapterTimeout(self.timeout)
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::mock::MockCaAdapter;
    use crate::clock::ManualClock;
    use crate::types::KeyAlgorithm;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn request() -> IssueRequest {
        IssueRequest {
            common_name: "api.example.com".to_string(),
            sans: vec![],
            key_algorithm: KeyAlgorithm::Ecdsa,
            key_size: 256,
            owner_id: "team-a".to_string(),
        }
    }

    fn setup(timeout: Duration) -> (AdapterGateway, Arc<MockCaAdapter>) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let gateway = AdapterGateway::new(timeout, clock.clone());
        let mock = Arc::new(MockCaAdapter::with_defaults(clock));
        gateway.register("mock", mock.clone());
        (gateway, mock)
    }

    #[tokio::test]
    async fn test_unknown_adapter() {
        let (gateway, _) = setup(Duration::from_secs(1));
        let result = gateway.issue("nope", &request()).await;
        assert!(matches!(result, Err(Error::AdapterNotFound(id)) if id == "nope"));
    }

    #[tokio::test]
    async fn test_fingerprint_matches_der() {
        let (gateway, _) = setup(Duration::from_secs(1));
        let signed = gateway.issue("mock", &request()).await.unwrap();

        let der = decode_pem(&signed.issued.certificate_pem).unwrap();
        assert_eq!(signed.fingerprint, fingerprint(&der));
        assert!(!signed.fingerprint.contains(':'));
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_rejection() {
        let (gateway, mock) = setup(Duration::from_millis(50));

        mock.set_delay(Duration::from_millis(500));
        assert!(matches!(
            gateway.issue("mock", &request()).await,
            Err(Error::AdapterTimeout(_))
        ));

        mock.set_delay(Duration::ZERO);
        mock.fail_issue(Some("denied"));
        assert!(matches!(gateway.issue("mock", &request()).await, Err(Error::Adapter(_))));
    }

    #[tokio::test]
    async fn test_rejects_material_not_yet_valid() {
        let (gateway, mock) = setup(Duration::from_secs(1));
        mock.set_not_before_offset(ChronoDuration::hours(1));
        assert!(matches!(gateway.issue("mock", &request()).await, Err(Error::Adapter(_))));
    }

    #[test]
    fn test_from_settings_registers_configured_adapters() {
        let settings = Settings::default();
        let gateway = AdapterGateway::from_settings(&settings, crate::clock::system_clock()).unwrap();
        assert_eq!(gateway.adapter_ids(), vec!["local".to_string()]);
    }
}

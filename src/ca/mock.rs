use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::debug;

use crate::ca::pem::encode_pem;
use crate::ca::provider::CaAdapter;
use crate::ca::types::{IssueRequest, IssuedCertificate, RevocationReason};
use crate::clock::SharedClock;
use crate::config::AdapterSettings;
use crate::error::Error;
use crate::types::Result;

/// Mock certificate information
#[derive(Debug, Clone)]
struct MockCertInfo {
    /// Subject common name
    common_name: String,
    /// Revocation reason, once revoked
    revoked: Option<RevocationReason>,
}

/// Injected behaviour
#[derive(Debug, Clone, Default)]
struct MockBehaviour {
    /// Fail issuance with this message
    issue_error: Option<String>,
    /// Fail revocation with this message
    revoke_error: Option<String>,
    /// Simulated processing delay
    delay: Duration,
    /// Shift applied to `not_before` relative to now
    not_before_offset: ChronoDuration,
    /// Override of the configured validity
    validity: Option<ChronoDuration>,
}

/// Mock CA adapter for development and testing.
///
/// Produces syntactically valid PEM around random bytes, for any key
/// algorithm, and can be told to fail or stall.
pub struct MockCaAdapter {
    /// Issuer name
    issuer: String,
    /// Configured validity
    validity: ChronoDuration,
    clock: SharedClock,
    behaviour: Mutex<MockBehaviour>,
    /// Issued certificates by serial
    issued_certs: Mutex<HashMap<String, MockCertInfo>>,
    /// Number of issue calls, including failed ones
    issue_calls: Mutex<usize>,
}

impl MockCaAdapter {
    /// Create a new mock CA adapter
    pub fn new(settings: &AdapterSettings, clock: SharedClock) -> Self {
        Self {
            issuer: settings.issuer.clone(),
            validity: ChronoDuration::days(i64::from(settings.validity_days)),
            clock,
            behaviour: Mutex::new(MockBehaviour::default()),
            issued_certs: Mutex::new(HashMap::new()),
            issue_calls: Mutex::new(0),
        }
    }

    /// Mock adapter with a 90 day validity
    pub fn with_defaults(clock: SharedClock) -> Self {
        Self::new(
            &AdapterSettings {
                id: "mock".to_string(),
                kind: "mock".to_string(),
                issuer: "Mock CA".to_string(),
                validity_days: 90,
            },
            clock,
        )
    }

    /// Make issuance fail (or succeed again with `None`)
    pub fn fail_issue(&self, message: Option<&str>) {
        self.behaviour.lock().issue_error = message.map(str::to_string);
    }

    /// Make revocation fail (or succeed again with `None`)
    pub fn fail_revoke(&self, message: Option<&str>) {
        self.behaviour.lock().revoke_error = message.map(str::to_string);
    }

    /// Delay every call
    pub fn set_delay(&self, delay: Duration) {
        self.behaviour.lock().delay = delay;
    }

    /// Validity of subsequently issued certificates
    pub fn set_validity(&self, validity: ChronoDuration) {
        self.behaviour.lock().validity = Some(validity);
    }

    /// Shift `not_before` of subsequently issued certificates
    pub fn set_not_before_offset(&self, offset: ChronoDuration) {
        self.behaviour.lock().not_before_offset = offset;
    }

    /// Number of issue calls so far
    pub fn issue_calls(&self) -> usize {
        *self.issue_calls.lock()
    }

    /// Serials revoked so far
    pub fn revoked_serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self
            .issued_certs
            .lock()
            .iter()
            .filter(|(_, info)| info.revoked.is_some())
            .map(|(serial, _)| serial.clone())
            .collect();
        serials.sort();
        serials
    }

    /// Generate a mock certificate body
    fn generate_mock_der(request: &IssueRequest, serial: &[u8]) -> Vec<u8> {
        let mut der = serial.to_vec();
        der.extend_from_slice(format!("CN={};", request.common_name).as_bytes());
        for san in &request.sans {
            der.extend_from_slice(format!("SAN={};", san).as_bytes());
        }
        der.extend_from_slice(format!("ALG={}-{}", request.key_algorithm, request.key_size).as_bytes());
        der
    }
}

#[async_trait]
impl CaAdapter for MockCaAdapter {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate> {
        debug!("Mock CA: issuing certificate for {}", request.common_name);
        *self.issue_calls.lock() += 1;

        let behaviour = self.behaviour.lock().clone();

        // Simulate processing delay
        if !behaviour.delay.is_zero() {
            tokio::time::sleep(behaviour.delay).await;
        }

        if let Some(message) = behaviour.issue_error {
            return Err(Error::Adapter(message));
        }

        let mut serial = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut serial);
        let serial_hex = hex::encode(serial);

        let der = Self::generate_mock_der(request, &serial);
        let key = format!("mock-key:{}:{}", request.key_algorithm, serial_hex);

        let not_before = self.clock.now() + behaviour.not_before_offset;
        let not_after = not_before + behaviour.validity.unwrap_or(self.validity);

        self.issued_certs.lock().insert(
            serial_hex.clone(),
            MockCertInfo {
                common_name: request.common_name.clone(),
                revoked: None,
            },
        );

        Ok(IssuedCertificate {
            certificate_pem: encode_pem("CERTIFICATE", &der),
            chain_pem: Some(encode_pem("CERTIFICATE", self.issuer.as_bytes())),
            private_key_pem: encode_pem("PRIVATE KEY", key.as_bytes()),
            serial: serial_hex,
            issuer: self.issuer.clone(),
            not_before,
            not_after,
        })
    }

    async fn revoke(&self, serial: &str, reason: RevocationReason) -> Result<()> {
        debug!("Mock CA: revoking serial {}", serial);

        let behaviour = self.behaviour.lock().clone();

        if !behaviour.delay.is_zero() {
            tokio::time::sleep(behaviour.delay).await;
        }

        if let Some(message) = behaviour.revoke_error {
            return Err(Error::Adapter(message));
        }

        let mut certs = self.issued_certs.lock();
        let info = certs
            .get_mut(serial)
            .ok_or_else(|| Error::Adapter(format!("Unknown serial: {}", serial)))?;
        debug!("Mock CA: {} revoked ({})", info.common_name, reason);
        info.revoked.get_or_insert(reason);
        Ok(())
    }
}

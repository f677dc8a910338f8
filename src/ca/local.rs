//! In-process certificate authority backed by rcgen.
//!
//! Generates a self-signed ECDSA root at startup and signs leaf certificates
//! with it. Only ECDSA P-256 and P-384 keys can be generated.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rcgen::{
    BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SanType, SignatureAlgorithm,
    PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
};
use tracing::{debug, info};

use crate::ca::pem::encode_pem;
use crate::ca::provider::CaAdapter;
use crate::ca::types::{IssueRequest, IssuedCertificate, RevocationReason};
use crate::clock::SharedClock;
use crate::config::AdapterSettings;
use crate::error::Error;
use crate::types::{KeyAlgorithm, Result};

const ROOT_VALIDITY_DAYS: i64 = 3650;

/// Local CA adapter
pub struct LocalCaAdapter {
    /// Issuer common name
    issuer: String,
    /// Leaf validity
    validity: Duration,
    /// Root certificate and key
    root: RcgenCertificate,
    /// Root certificate PEM, served as the chain
    root_pem: String,
    clock: SharedClock,
    /// Issued serials and their revocation state
    serials: Mutex<HashMap<String, Option<RevocationReason>>>,
}

impl LocalCaAdapter {
    /// Create a new local CA
    pub fn new(settings: &AdapterSettings, clock: SharedClock) -> Result<Self> {
        let now = clock.now();

        let mut params = CertificateParams::new(Vec::<String>::new());
        params.alg = &PKCS_ECDSA_P256_SHA256;
        params.distinguished_name = distinguished_name(&settings.issuer);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = to_offset(now - Duration::days(1))?;
        params.not_after = to_offset(now + Duration::days(ROOT_VALIDITY_DAYS))?;

        let root = RcgenCertificate::from_params(params)?;
        let root_pem = root.serialize_pem()?;

        info!("Local CA '{}' initialized for adapter {}", settings.issuer, settings.id);

        Ok(Self {
            issuer: settings.issuer.clone(),
            validity: Duration::days(i64::from(settings.validity_days)),
            root,
            root_pem,
            clock,
            serials: Mutex::new(HashMap::new()),
        })
    }

    /// Root certificate PEM
    pub fn root_pem(&self) -> &str {
        &self.root_pem
    }

    fn signature_algorithm(request: &IssueRequest) -> Result<&'static SignatureAlgorithm> {
        match (request.key_algorithm, request.key_size) {
            (KeyAlgorithm::Ecdsa, 256) => Ok(&PKCS_ECDSA_P256_SHA256),
            (KeyAlgorithm::Ecdsa, 384) => Ok(&PKCS_ECDSA_P384_SHA384),
            (algorithm, size) => Err(Error::Adapter(format!(
                "Local CA cannot generate {} {} keys",
                algorithm, size
            ))),
        }
    }
}

#[async_trait]
impl CaAdapter for LocalCaAdapter {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn issue(&self, request: &IssueRequest) -> Result<IssuedCertificate> {
        debug!("Local CA: issuing certificate for {}", request.common_name);

        let alg = Self::signature_algorithm(request)?;

        // X.509 times carry whole seconds
        let now = self.clock.now();
        let not_before = Utc
            .timestamp_opt(now.timestamp(), 0)
            .single()
            .ok_or_else(|| Error::Internal(format!("Unrepresentable time: {}", now)))?;
        let not_after = not_before + self.validity;

        let serial: u64 = rand::thread_rng().gen_range(1..=i64::MAX as u64);

        let mut params = CertificateParams::new(Vec::<String>::new());
        params.alg = alg;
        params.distinguished_name = distinguished_name(&request.common_name);
        params.subject_alt_names = request.sans.iter().map(|san| san_type(san)).collect();
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.serial_number = Some(serial);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let leaf = RcgenCertificate::from_params(params)?;
        // Sign once; the PEM is framed from the same DER
        let der = leaf.serialize_der_with_signer(&self.root)?;
        let serial = format!("{:x}", serial);

        self.serials.lock().insert(serial.clone(), None);

        Ok(IssuedCertificate {
            certificate_pem: encode_pem("CERTIFICATE", &der),
            chain_pem: Some(self.root_pem.clone()),
            private_key_pem: leaf.serialize_private_key_pem(),
            serial,
            issuer: self.issuer.clone(),
            not_before,
            not_after,
        })
    }

    async fn revoke(&self, serial: &str, reason: RevocationReason) -> Result<()> {
        let mut serials = self.serials.lock();
        match serials.get_mut(serial) {
            Some(state) => {
                debug!("Local CA: revoking serial {} ({})", serial, reason);
                state.get_or_insert(reason);
                Ok(())
            }
            None => Err(Error::Adapter(format!("Unknown serial: {}", serial))),
        }
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name.to_string());
    dn
}

fn san_type(san: &str) -> SanType {
    match san.parse::<IpAddr>() {
        Ok(ip) => SanType::IpAddress(ip),
        Err(_) => SanType::DnsName(san.to_string()),
    }
}

fn to_offset(at: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| Error::Certificate(format!("Invalid validity bound {}: {}", at, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::pem::{decode_pem, fingerprint};
    use crate::clock::system_clock;

    fn settings() -> AdapterSettings {
        AdapterSettings {
            id: "local".to_string(),
            kind: "local".to_string(),
            issuer: "Test Root".to_string(),
            validity_days: 30,
        }
    }

    fn request(algorithm: KeyAlgorithm, size: u32) -> IssueRequest {
        IssueRequest {
            common_name: "api.example.com".to_string(),
            sans: vec!["api.example.com".to_string(), "10.0.0.1".to_string()],
            key_algorithm: algorithm,
            key_size: size,
            owner_id: "team-a".to_string(),
        }
    }

    #[tokio::test]
    async fn test_issue_ecdsa() {
        let ca = LocalCaAdapter::new(&settings(), system_clock()).unwrap();

        let issued = ca.issue(&request(KeyAlgorithm::Ecdsa, 256)).await.unwrap();
        let der = decode_pem(&issued.certificate_pem).unwrap();

        assert!(!der.is_empty());
        assert_eq!(fingerprint(&der).len(), 64);
        assert_eq!(issued.issuer, "Test Root");
        assert_eq!(issued.not_after - issued.not_before, Duration::days(30));
        assert!(issued.private_key_pem.contains("PRIVATE KEY"));
        assert_eq!(issued.chain_pem.as_deref(), Some(ca.root_pem()));

        let other = ca.issue(&request(KeyAlgorithm::Ecdsa, 384)).await.unwrap();
        assert_ne!(other.serial, issued.serial);
    }

    #[tokio::test]
    async fn test_rsa_is_refused() {
        let ca = LocalCaAdapter::new(&settings(), system_clock()).unwrap();
        let result = ca.issue(&request(KeyAlgorithm::Rsa, 2048)).await;
        assert!(matches!(result, Err(Error::Adapter(_))));
    }

    #[tokio::test]
    async fn test_revoke_known_serial_only() {
        let ca = LocalCaAdapter::new(&settings(), system_clock()).unwrap();
        let issued = ca.issue(&request(KeyAlgorithm::Ecdsa, 256)).await.unwrap();

        assert!(ca.revoke(&issued.serial, RevocationReason::KeyCompromise).await.is_ok());
        assert!(ca.revoke(&issued.serial, RevocationReason::KeyCompromise).await.is_ok());
        assert!(matches!(
            ca.revoke("deadbeef", RevocationReason::Unspecified).await,
            Err(Error::Adapter(_))
        ));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CertificateStatus, KeyAlgorithm};

/// Tracked X.509 certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Stable identifier (UUID v4)
    pub id: String,

    /// Subject common name
    pub common_name: String,

    /// Subject alternative names, in request order
    pub sans: Vec<String>,

    /// Issuer name as reported by the adapter
    pub issuer: String,

    /// SHA-256 of the DER encoding, lowercase hex
    pub fingerprint: String,

    /// Key algorithm
    pub key_algorithm: KeyAlgorithm,

    /// RSA modulus bits or ECDSA curve size
    pub key_size: u32,

    /// Start of validity
    pub not_before: DateTime<Utc>,

    /// End of validity
    pub not_after: DateTime<Utc>,

    /// Current lifecycle status
    pub status: CertificateStatus,

    /// Owner identity
    pub owner_id: String,

    /// Adapter that issued the certificate
    pub adapter_id: String,

    /// Serial number as reported by the adapter
    pub serial: String,

    /// Certificate this one renewed, if any
    #[serde(default)]
    pub renewed_from: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Bumped on every mutation; used for compare-and-swap
    pub version: u64,
}

impl Certificate {
    /// Case-insensitive match against subject, issuer and SANs
    pub fn matches_text(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.common_name.to_lowercase().contains(&needle)
            || self.issuer.to_lowercase().contains(&needle)
            || self.sans.iter().any(|san| san.to_lowercase().contains(&needle))
    }
}

/// Certificate and key material, kept apart from the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMaterial {
    /// Leaf certificate PEM
    pub certificate_pem: String,

    /// Issuer chain PEM
    pub chain_pem: Option<String>,

    /// Private key PEM
    pub private_key_pem: String,
}

impl CertificateMaterial {
    /// Leaf followed by the chain, as written to install targets
    pub fn full_chain(&self) -> String {
        match &self.chain_pem {
            Some(chain) => format!("{}{}", self.certificate_pem, chain),
            None => self.certificate_pem.clone(),
        }
    }
}

/// Issuance request state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Waiting on the adapter
    Pending,
    /// Certificate issued
    Issued,
    /// Adapter refused, failed or timed out
    Rejected,
}

/// Tracked issuance request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Request identifier
    pub id: String,

    /// Requesting owner
    pub owner_id: String,

    /// Caller that submitted the request
    pub actor_id: String,

    /// Target adapter
    pub adapter_id: String,

    /// Requested common name
    pub common_name: String,

    /// Current state
    pub state: RequestState,

    /// Issued certificate, once issued
    pub certificate_id: Option<String>,

    /// Failure detail, once rejected
    pub error: Option<String>,

    /// Certificate being renewed, for renewal requests
    #[serde(default)]
    pub renewal_of: Option<String>,

    pub requested_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::store::{AuditEntry, Certificate, InstallRecord, InstallTarget};
use crate::types::{CertificateStatus, KeyAlgorithm, Result};

/// Request for a new certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Owner the certificate is issued for
    pub owner_id: String,

    /// Subject common name
    pub common_name: String,

    /// Subject alternative names; the common name is not added implicitly
    #[serde(default)]
    pub sans: Vec<String>,

    /// Key algorithm
    pub key_algorithm: KeyAlgorithm,

    /// RSA bits or ECDSA curve size
    pub key_size: u32,

    /// Adapter to issue through
    pub adapter_id: String,

    /// Where to install the certificate once issued
    #[serde(default)]
    pub targets: Vec<InstallTarget>,
}

impl CertificateRequest {
    /// Reject malformed requests before any adapter is involved
    pub fn validate(&self) -> Result<()> {
        if self.common_name.trim().is_empty() {
            return Err(Error::Validation("Common name cannot be empty".into()));
        }
        if self.owner_id.trim().is_empty() {
            return Err(Error::Validation("Owner id cannot be empty".into()));
        }
        if self.adapter_id.trim().is_empty() {
            return Err(Error::Validation("Adapter id cannot be empty".into()));
        }

        let mut seen = HashSet::new();
        for san in &self.sans {
            if san.trim().is_empty() {
                return Err(Error::Validation("Subject alternative names cannot be empty".into()));
            }
            if !seen.insert(san.to_lowercase()) {
                return Err(Error::Validation(format!("Duplicate subject alternative name: {}", san)));
            }
        }

        if !self.key_algorithm.allowed_sizes().contains(&self.key_size) {
            return Err(Error::Validation(format!(
                "Unsupported {} key size {} (allowed: {:?})",
                self.key_algorithm,
                self.key_size,
                self.key_algorithm.allowed_sizes()
            )));
        }

        validate_targets(&self.targets)
    }
}

/// Check install targets: agent ids present, paths absolute
pub fn validate_targets(targets: &[InstallTarget]) -> Result<()> {
    for target in targets {
        if target.agent_id.trim().is_empty() {
            return Err(Error::Validation("Install target agent id cannot be empty".into()));
        }
        if target.path.trim().is_empty() || !Path::new(&target.path).is_absolute() {
            return Err(Error::Validation(format!(
                "Install target path must be absolute: '{}'",
                target.path
            )));
        }
        if matches!(&target.reload_cmd, Some(cmd) if cmd.trim().is_empty()) {
            return Err(Error::Validation("Reload command cannot be blank".into()));
        }
    }
    Ok(())
}

/// Result of a successful issuance or renewal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReceipt {
    /// Issuance request id
    pub request_id: String,
    /// Issued certificate id
    pub certificate_id: String,
    /// Status after activation
    pub status: CertificateStatus,
    /// Per-target install outcomes
    pub installs: Vec<InstallRecord>,
}

/// Certificate as presented to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateView {
    #[serde(flatten)]
    pub certificate: Certificate,

    /// Whole days left, rounded up
    pub days_until_expiry: i64,

    /// Audit trail, on single-certificate reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_logs: Option<Vec<AuditEntry>>,

    /// Install attempts, on single-certificate reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installs: Option<Vec<InstallRecord>>,
}

/// Listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateFilter {
    /// Only certificates in this status
    #[serde(default)]
    pub status: Option<CertificateStatus>,

    /// Case-insensitive text matched against subject, issuer and SANs
    #[serde(default)]
    pub q: Option<String>,
}

impl CertificateFilter {
    pub fn matches(&self, certificate: &Certificate) -> bool {
        if let Some(status) = self.status {
            if certificate.status != status {
                return false;
            }
        }
        match self.q.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => certificate.matches_text(q),
            _ => true,
        }
    }
}

/// Outcome of one status sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records looked at
    pub examined: usize,
    /// Records whose status was moved
    pub updated: usize,
    /// Records changed by someone else meanwhile
    pub skipped: usize,
}

/// Inventory counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySummary {
    /// Tracked certificates
    pub total: usize,
    /// Count per status, every status present
    pub by_status: BTreeMap<String, usize>,
    /// Live certificates expiring within 7 days
    pub expiring_within_7_days: usize,
    /// Live certificates expiring within 15 days
    pub expiring_within_15_days: usize,
    /// Live certificates expiring within 30 days
    pub expiring_within_30_days: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CertificateRequest {
        CertificateRequest {
            owner_id: "team-a".to_string(),
            common_name: "api.example.com".to_string(),
            sans: vec!["api.example.com".to_string(), "www.example.com".to_string()],
            key_algorithm: KeyAlgorithm::Ecdsa,
            key_size: 256,
            adapter_id: "local".to_string(),
            targets: vec![InstallTarget::new("web-1", "/etc/ssl/api.pem")],
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_rejections() {
        let cases: Vec<Box<dyn Fn(&mut CertificateRequest)>> = vec![
            Box::new(|r: &mut CertificateRequest| r.common_name = "  ".into()),
            Box::new(|r: &mut CertificateRequest| r.owner_id.clear()),
            Box::new(|r: &mut CertificateRequest| r.adapter_id.clear()),
            Box::new(|r: &mut CertificateRequest| r.sans.push("API.example.com".into())),
            Box::new(|r: &mut CertificateRequest| r.sans.push(String::new())),
            Box::new(|r: &mut CertificateRequest| r.key_size = 521),
            Box::new(|r: &mut CertificateRequest| {
                r.key_algorithm = KeyAlgorithm::Rsa;
                r.key_size = 1024;
            }),
            Box::new(|r: &mut CertificateRequest| r.targets[0].path = "etc/ssl/api.pem".into()),
            Box::new(|r: &mut CertificateRequest| r.targets[0].agent_id.clear()),
        ];

        for mutate in cases {
            let mut r = request();
            mutate(&mut r);
            assert!(matches!(r.validate(), Err(Error::Validation(_))), "{:?}", r);
        }
    }

    #[test]
    fn test_rsa_sizes() {
        let mut r = request();
        r.key_algorithm = KeyAlgorithm::Rsa;
        for size in [2048, 3072, 4096] {
            r.key_size = size;
            assert!(r.validate().is_ok());
        }
    }
}

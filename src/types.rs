use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// Project-wide Result type
pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Key algorithm of a certificate's key pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// RSA, key size in bits
    #[serde(alias = "RSA")]
    Rsa,
    /// ECDSA, key size is the curve size (256 or 384)
    #[serde(alias = "ECDSA")]
    Ecdsa,
}

impl KeyAlgorithm {
    /// Key sizes accepted for this algorithm
    pub fn allowed_sizes(&self) -> &'static [u32] {
        match self {
            KeyAlgorithm::Rsa => &[2048, 3072, 4096],
            KeyAlgorithm::Ecdsa => &[256, 384],
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => write!(f, "RSA"),
            KeyAlgorithm::Ecdsa => write!(f, "ECDSA"),
        }
    }
}

/// Certificate lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    /// Signed by the adapter, not yet activated
    Issued,
    /// Deployment to install targets in flight
    Installing,
    /// Valid, more than 30 days left
    Active,
    /// 8 to 30 days left
    Expiring,
    /// 7 days or less left
    Critical,
    /// Past not-after
    Expired,
    /// At least one install target failed; the certificate is still usable
    InstallFailed,
    /// Revoked at the CA
    Revoked,
    /// Replaced by a renewed certificate
    Superseded,
}

impl CertificateStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CertificateStatus::Expired | CertificateStatus::Revoked | CertificateStatus::Superseded
        )
    }

    /// States whose value is derived from the validity window
    pub fn is_time_derived(&self) -> bool {
        matches!(
            self,
            CertificateStatus::Active
                | CertificateStatus::Expiring
                | CertificateStatus::Critical
                | CertificateStatus::InstallFailed
        )
    }

    /// All statuses, in lifecycle order
    pub fn all() -> &'static [CertificateStatus] {
        &[
            CertificateStatus::Issued,
            CertificateStatus::Installing,
            CertificateStatus::Active,
            CertificateStatus::Expiring,
            CertificateStatus::Critical,
            CertificateStatus::Expired,
            CertificateStatus::InstallFailed,
            CertificateStatus::Revoked,
            CertificateStatus::Superseded,
        ]
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Issued => "issued",
            CertificateStatus::Installing => "installing",
            CertificateStatus::Active => "active",
            CertificateStatus::Expiring => "expiring",
            CertificateStatus::Critical => "critical",
            CertificateStatus::Expired => "expired",
            CertificateStatus::InstallFailed => "install_failed",
            CertificateStatus::Revoked => "revoked",
            CertificateStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificateStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        CertificateStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::error::Error::Validation(format!("Unknown certificate status: {}", s)))
    }
}

/// Authenticated caller identity handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Caller identity
    pub id: String,
    /// Role set supplied by the authentication layer
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    /// Create an actor without roles
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    /// Internal actor used by scheduled tasks
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            roles: vec!["system".to_string()],
        }
    }

    /// Attach roles
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    /// Check role membership
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

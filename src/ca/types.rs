use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::KeyAlgorithm;

/// Signing request handed to a CA adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    /// Subject common name
    pub common_name: String,
    /// Subject alternative names
    pub sans: Vec<String>,
    /// Key algorithm
    pub key_algorithm: KeyAlgorithm,
    /// RSA bits or ECDSA curve size
    pub key_size: u32,
    /// Owner the certificate is issued for
    pub owner_id: String,
}

/// Material returned by a CA adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    /// Leaf certificate PEM
    pub certificate_pem: String,
    /// Issuer chain PEM (optional)
    pub chain_pem: Option<String>,
    /// Private key PEM
    pub private_key_pem: String,
    /// Serial number, hex
    pub serial: String,
    /// Issuer name
    pub issuer: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
}

/// Adapter output checked by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificate {
    /// Material as returned by the adapter
    pub issued: IssuedCertificate,
    /// SHA-256 of the leaf DER, lowercase hex
    pub fingerprint: String,
}

/// Revocation reason (RFC 5280)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RevocationReason {
    /// Unspecified
    #[default]
    #[serde(rename = "unspecified")]
    Unspecified = 0,
    /// Key compromise
    #[serde(rename = "keyCompromise")]
    KeyCompromise = 1,
    /// CA compromise
    #[serde(rename = "cACompromise")]
    CACompromise = 2,
    /// Affiliation changed
    #[serde(rename = "affiliationChanged")]
    AffiliationChanged = 3,
    /// Superseded
    #[serde(rename = "superseded")]
    Superseded = 4,
    /// Cessation of operation
    #[serde(rename = "cessationOfOperation")]
    CessationOfOperation = 5,
    /// Certificate hold
    #[serde(rename = "certificateHold")]
    CertificateHold = 6,
    /// Removed from CRL
    #[serde(rename = "removeFromCRL")]
    RemoveFromCRL = 8,
    /// Privilege withdrawn
    #[serde(rename = "privilegeWithdrawn")]
    PrivilegeWithdrawn = 9,
    /// AA compromise
    #[serde(rename = "aACompromise")]
    AACompromise = 10,
}

impl RevocationReason {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::CACompromise => "cACompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
            Self::CertificateHold => "certificateHold",
            Self::RemoveFromCRL => "removeFromCRL",
            Self::PrivilegeWithdrawn => "privilegeWithdrawn",
            Self::AACompromise => "aACompromise",
        }
    }

    /// CRL reason code
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl FromStr for RevocationReason {
    type Err = Error;

    /// Accepts the RFC 5280 names in any case, with or without spaces or underscores
    fn from_str(reason: &str) -> Result<Self, Self::Err> {
        let normalized: String = reason
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "" | "unspecified" => Ok(Self::Unspecified),
            "keycompromise" => Ok(Self::KeyCompromise),
            "cacompromise" => Ok(Self::CACompromise),
            "affiliationchanged" => Ok(Self::AffiliationChanged),
            "superseded" => Ok(Self::Superseded),
            "cessationofoperation" => Ok(Self::CessationOfOperation),
            "certificatehold" => Ok(Self::CertificateHold),
            "removefromcrl" => Ok(Self::RemoveFromCRL),
            "privilegewithdrawn" => Ok(Self::PrivilegeWithdrawn),
            "aacompromise" => Ok(Self::AACompromise),
            _ => Err(Error::Validation(format!("Unknown revocation reason: {}", reason))),
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_parsing() {
        assert_eq!("key compromise".parse::<RevocationReason>().unwrap(), RevocationReason::KeyCompromise);
        assert_eq!("KEY_COMPROMISE".parse::<RevocationReason>().unwrap(), RevocationReason::KeyCompromise);
        assert_eq!("".parse::<RevocationReason>().unwrap(), RevocationReason::Unspecified);
        assert!("stolen laptop".parse::<RevocationReason>().is_err());
        assert_eq!(RevocationReason::RemoveFromCRL.code(), 8);
    }

    #[test]
    fn test_reason_wire_names() {
        let json = serde_json::to_string(&RevocationReason::CessationOfOperation).unwrap();
        assert_eq!(json, "\"cessationOfOperation\"");
    }
}

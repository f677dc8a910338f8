use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, TimeZone, Utc};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::ca::pem::fingerprint;
use crate::error::Error;
use crate::types::{KeyAlgorithm, Result};

/// Fields read from a certificate presented by an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedCertificate {
    pub fingerprint: String,
    pub common_name: String,
    pub sans: Vec<String>,
    pub issuer: String,
    /// Lowercase hex
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub key_algorithm: KeyAlgorithm,
    pub key_size: u32,
}

/// Parse a DER certificate
pub fn inspect_der(der: &[u8]) -> Result<ObservedCertificate> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| Error::Certificate(format!("Unparseable certificate: {}", e)))?;

    let (key_algorithm, key_size) = match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => (KeyAlgorithm::Rsa, rsa.key_size() as u32),
        Ok(PublicKey::EC(point)) => (KeyAlgorithm::Ecdsa, point.key_size() as u32),
        _ => {
            return Err(Error::Certificate(format!(
                "Unsupported public key algorithm {}",
                cert.public_key().algorithm.algorithm
            )))
        }
    };

    let mut sans = Vec::new();
    if let Ok(Some(extension)) = cert.subject_alternative_name() {
        for name in &extension.value.general_names {
            match name {
                GeneralName::DNSName(dns) => sans.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_address(bytes) {
                        sans.push(ip.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    Ok(ObservedCertificate {
        fingerprint: fingerprint(der),
        common_name: common_name(cert.subject()).unwrap_or_default(),
        sans,
        issuer: common_name(cert.issuer()).unwrap_or_else(|| cert.issuer().to_string()),
        serial: hex::encode(cert.raw_serial()),
        not_before: timestamp(cert.validity().not_before.timestamp())?,
        not_after: timestamp(cert.validity().not_after.timestamp())?,
        key_algorithm,
        key_size,
    })
}

fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn ip_address(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| Error::Certificate(format!("Validity timestamp out of range: {}", secs)))
}

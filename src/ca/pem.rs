//! Minimal PEM framing and certificate fingerprints

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::types::Result;

/// Wrap DER bytes in a PEM block
pub fn encode_pem(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for chunk in body.as_bytes().chunks(64) {
        // base64 output is ASCII
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}

/// Decode the first PEM block in `pem`
pub fn decode_pem(pem: &str) -> Result<Vec<u8>> {
    let mut body = String::new();
    let mut in_block = false;

    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN ") {
            in_block = true;
            continue;
        }
        if line.starts_with("-----END ") {
            if in_block {
                return Ok(STANDARD.decode(body.as_bytes())?);
            }
            break;
        }
        if in_block {
            body.push_str(line);
        }
    }

    Err(Error::Certificate("No complete PEM block found".to_string()))
}

/// SHA-256 of DER bytes, lowercase hex without separators
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

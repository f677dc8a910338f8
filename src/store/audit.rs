//! Append-only audit trail.
//!
//! Each entry carries the hash of its predecessor, so any edit or removal
//! inside the log breaks [`verify_chain`].

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::types::Result;
use crate::utils::FsUtils;

const JOURNAL_FILE: &str = "audit.jsonl";
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Requested,
    Issued,
    RequestFailed,
    Installed,
    InstallFailed,
    Renewed,
    Superseded,
    Revoked,
    RevokeFailed,
    Discovered,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Requested => "requested",
            AuditAction::Issued => "issued",
            AuditAction::RequestFailed => "request_failed",
            AuditAction::Installed => "installed",
            AuditAction::InstallFailed => "install_failed",
            AuditAction::Renewed => "renewed",
            AuditAction::Superseded => "superseded",
            AuditAction::Revoked => "revoked",
            AuditAction::RevokeFailed => "revoke_failed",
            AuditAction::Discovered => "discovered",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event to be appended; sequence, timestamp and hashes are assigned by the log
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor: String,
    pub certificate_id: Option<String>,
    pub request_id: Option<String>,
    pub detail: String,
}

impl AuditEvent {
    /// Event about a certificate
    pub fn certificate(
        action: AuditAction,
        actor: impl Into<String>,
        certificate_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            action,
            actor: actor.into(),
            certificate_id: Some(certificate_id.into()),
            request_id: None,
            detail: detail.into(),
        }
    }

    /// Event about an issuance request
    pub fn request(
        action: AuditAction,
        actor: impl Into<String>,
        request_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            action,
            actor: actor.into(),
            certificate_id: None,
            request_id: Some(request_id.into()),
            detail: detail.into(),
        }
    }

    /// Attach the originating request
    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Recorded audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, starting at 1
    pub seq: u64,

    /// Certificate concerned, absent for failed requests
    pub certificate_id: Option<String>,

    /// Issuance request concerned
    pub request_id: Option<String>,

    pub action: AuditAction,

    /// Caller identity
    pub actor: String,

    pub timestamp: DateTime<Utc>,

    /// Free-text detail
    pub detail: String,

    /// Hash of the previous entry
    pub previous_hash: String,

    /// SHA-256 over this entry's fields and `previous_hash`
    pub hash: String,
}

#[derive(Serialize)]
struct HashInput<'a> {
    seq: u64,
    certificate_id: &'a Option<String>,
    request_id: &'a Option<String>,
    action: AuditAction,
    actor: &'a str,
    timestamp: &'a DateTime<Utc>,
    detail: &'a str,
    previous_hash: &'a str,
}

impl AuditEntry {
    fn compute_hash(&self) -> String {
        let input = HashInput {
            seq: self.seq,
            certificate_id: &self.certificate_id,
            request_id: &self.request_id,
            action: self.action,
            actor: &self.actor,
            timestamp: &self.timestamp,
            detail: &self.detail,
            previous_hash: &self.previous_hash,
        };
        // Serializing a plain struct of strings and integers cannot fail
        let bytes = serde_json::to_vec(&input).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

/// Check that every entry links to its predecessor and hashes correctly
pub fn verify_chain(entries: &[AuditEntry]) -> bool {
    let mut previous = GENESIS_HASH.to_string();
    for (index, entry) in entries.iter().enumerate() {
        if entry.seq != index as u64 + 1
            || entry.previous_hash != previous
            || entry.hash != entry.compute_hash()
        {
            return false;
        }
        previous = entry.hash.clone();
    }
    true
}

/// Audit log
#[derive(Debug)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    // Held across the journal write so lines land in sequence order
    writer: tokio::sync::Mutex<()>,
    journal: Option<PathBuf>,
}

impl AuditLog {
    /// Log kept in memory only
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            writer: tokio::sync::Mutex::new(()),
            journal: None,
        }
    }

    /// Log journaled as JSON lines under `dir`, replaying existing entries
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(JOURNAL_FILE);
        let mut entries = Vec::new();
        for line in FsUtils::read_lines(&path).await? {
            entries.push(serde_json::from_str::<AuditEntry>(&line)?);
        }

        if !verify_chain(&entries) {
            warn!("Audit journal {:?} failed chain verification", path);
        }
        info!("Loaded {} audit entries from {:?}", entries.len(), path);

        Ok(Self {
            entries: Mutex::new(entries),
            writer: tokio::sync::Mutex::new(()),
            journal: Some(path),
        })
    }

    /// Append an event at `at`
    pub async fn append(&self, event: AuditEvent, at: DateTime<Utc>) -> AuditEntry {
        let _writer = self.writer.lock().await;
        let entry = self.chain(event, at);

        if let Some(path) = &self.journal {
            let written = match serde_json::to_string(&entry) {
                Ok(line) => FsUtils::append_line(path, &line).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = written {
                error!("Failed to journal audit entry {}: {}", entry.seq, e);
            }
        }

        entry
    }

    /// Link the event onto the in-memory chain
    fn chain(&self, event: AuditEvent, at: DateTime<Utc>) -> AuditEntry {
        let mut entries = self.entries.lock();

        let previous_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut entry = AuditEntry {
            seq: entries.len() as u64 + 1,
            certificate_id: event.certificate_id,
            request_id: event.request_id,
            action: event.action,
            actor: event.actor,
            timestamp: at,
            detail: event.detail,
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();

        entries.push(entry.clone());
        entry
    }

    /// Entries about one certificate, in order
    pub fn for_certificate(&self, certificate_id: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.certificate_id.as_deref() == Some(certificate_id))
            .cloned()
            .collect()
    }

    /// Entries about one request, in order
    pub fn for_request(&self, request_id: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.request_id.as_deref() == Some(request_id))
            .cloned()
            .collect()
    }

    /// Snapshot of the whole log
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify the in-memory chain
    pub fn verify(&self) -> bool {
        verify_chain(&self.entries.lock())
    }
}

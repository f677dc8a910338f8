//! Durable certificate records.
//!
//! Records, key material and issuance requests live behind one short
//! synchronous lock. When a data directory is configured, mutations are
//! serialized by an async writer lock: each one is applied to a copy of the
//! state, the copy is written as an atomic JSON snapshot, and only then does
//! it replace the live state. A failed write leaves memory untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Error;
use crate::store::records::{Certificate, CertificateMaterial, RequestRecord};
use crate::types::{CertificateStatus, Result};
use crate::utils::FsUtils;

const SNAPSHOT_FILE: &str = "certificates.json";

#[derive(Debug, Default, Clone)]
struct StoreState {
    certificates: HashMap<String, Certificate>,
    material: HashMap<String, CertificateMaterial>,
    fingerprints: HashMap<String, String>,
    requests: HashMap<String, RequestRecord>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    certificates: Vec<Certificate>,
    material: HashMap<String, CertificateMaterial>,
    requests: Vec<RequestRecord>,
}

/// What a mutation did to the candidate state
enum Applied<T> {
    Changed(T),
    Unchanged(T),
}

impl<T> Applied<T> {
    fn into_inner(self) -> T {
        match self {
            Applied::Changed(value) | Applied::Unchanged(value) => value,
        }
    }
}

/// Certificate store
#[derive(Debug)]
pub struct CertificateStore {
    state: RwLock<StoreState>,
    writer: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

impl CertificateStore {
    /// Store that keeps everything in memory
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            writer: Mutex::new(()),
            snapshot_path: None,
        }
    }

    /// Open a store persisted under `dir`, loading an existing snapshot
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(SNAPSHOT_FILE);
        let mut state = StoreState::default();

        if let Some(bytes) = FsUtils::read_optional(&path).await? {
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
            for cert in snapshot.certificates {
                state.fingerprints.insert(cert.fingerprint.clone(), cert.id.clone());
                state.certificates.insert(cert.id.clone(), cert);
            }
            state.material = snapshot.material;
            state.requests = snapshot
                .requests
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect();
            info!(
                "Loaded {} certificates and {} requests from {:?}",
                state.certificates.len(),
                state.requests.len(),
                path
            );
        }

        Ok(Self {
            state: RwLock::new(state),
            writer: Mutex::new(()),
            snapshot_path: Some(path),
        })
    }

    /// Insert a newly issued certificate
    pub async fn insert(&self, cert: Certificate, material: CertificateMaterial) -> Result<()> {
        self.insert_record(cert, Some(material)).await
    }

    /// Insert a certificate whose key material is held elsewhere
    pub async fn insert_observed(&self, cert: Certificate) -> Result<()> {
        self.insert_record(cert, None).await
    }

    /// True if a certificate with this fingerprint is stored
    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.state.read().fingerprints.contains_key(fingerprint)
    }

    async fn insert_record(&self, cert: Certificate, material: Option<CertificateMaterial>) -> Result<()> {
        if cert.not_before >= cert.not_after {
            return Err(Error::Validation(format!(
                "Certificate {} has an empty validity window",
                cert.id
            )));
        }

        self.mutate(move |state| {
            if state.certificates.contains_key(&cert.id) {
                return Err(Error::Conflict(format!("Certificate {} already exists", cert.id)));
            }
            if let Some(existing) = state.fingerprints.get(&cert.fingerprint) {
                return Err(Error::Conflict(format!(
                    "Fingerprint {} already recorded for certificate {}",
                    cert.fingerprint, existing
                )));
            }

            debug!("Storing certificate {} ({})", cert.id, cert.common_name);
            state.fingerprints.insert(cert.fingerprint.clone(), cert.id.clone());
            if let Some(material) = material {
                state.material.insert(cert.id.clone(), material);
            }
            state.certificates.insert(cert.id.clone(), cert);
            Ok(Applied::Changed(()))
        })
        .await
    }

    /// Get a certificate by id
    pub fn get(&self, id: &str) -> Result<Certificate> {
        self.state
            .read()
            .certificates
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Certificate not found: {}", id)))
    }

    /// Get a certificate's key material
    pub fn material(&self, id: &str) -> Result<CertificateMaterial> {
        self.state
            .read()
            .material
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Certificate material not found: {}", id)))
    }

    /// All certificates, oldest first
    pub fn list(&self) -> Vec<Certificate> {
        let mut certs: Vec<Certificate> = self.state.read().certificates.values().cloned().collect();
        certs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        certs
    }

    /// Number of stored certificates
    pub fn len(&self) -> usize {
        self.state.read().certificates.len()
    }

    /// True when no certificate is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the status only if the record is still at `expected_version`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    pub async fn compare_and_set_status(
        &self,
        id: &str,
        expected_version: u64,
        status: CertificateStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.mutate(|state| {
            let cert = state
                .certificates
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("Certificate not found: {}", id)))?;

            if cert.version != expected_version {
                return Ok(Applied::Unchanged(false));
            }

            cert.status = status;
            cert.updated_at = now;
            cert.version += 1;
            Ok(Applied::Changed(true))
        })
        .await
    }

    /// Unconditionally move a certificate to a new status.
    ///
    /// `decide` sees the current record and returns the new status or an
    /// error, which leaves the record untouched.
    pub async fn transition<F>(&self, id: &str, now: DateTime<Utc>, decide: F) -> Result<Certificate>
    where
        F: FnOnce(&Certificate) -> Result<CertificateStatus>,
    {
        self.mutate(|state| {
            let cert = state
                .certificates
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("Certificate not found: {}", id)))?;

            let next = decide(cert)?;
            if next == cert.status {
                return Ok(Applied::Unchanged(cert.clone()));
            }

            cert.status = next;
            cert.updated_at = now;
            cert.version += 1;
            Ok(Applied::Changed(cert.clone()))
        })
        .await
    }

    /// Record or replace an issuance request
    pub async fn put_request(&self, request: RequestRecord) -> Result<()> {
        self.mutate(move |state| {
            state.requests.insert(request.id.clone(), request);
            Ok(Applied::Changed(()))
        })
        .await
    }

    /// Get an issuance request by id
    pub fn get_request(&self, id: &str) -> Result<RequestRecord> {
        self.state
            .read()
            .requests
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Request not found: {}", id)))
    }

    /// Apply `apply` to the state.
    ///
    /// In memory it runs in place under the write lock and must not change
    /// anything before returning an error. When persisted, it runs against a
    /// copy which replaces the live state only once the snapshot is written.
    async fn mutate<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut StoreState) -> Result<Applied<T>>,
    {
        let Some(path) = &self.snapshot_path else {
            let mut state = self.state.write();
            return apply(&mut state).map(Applied::into_inner);
        };

        let _writer = self.writer.lock().await;
        let mut candidate = self.state.read().clone();
        let value = match apply(&mut candidate)? {
            Applied::Unchanged(value) => return Ok(value),
            Applied::Changed(value) => value,
        };

        let snapshot = Snapshot {
            certificates: candidate.certificates.values().cloned().collect(),
            material: candidate.material.clone(),
            requests: candidate.requests.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        FsUtils::write_file_atomic(path, bytes).await?;

        *self.state.write() = candidate;
        Ok(value)
    }
}

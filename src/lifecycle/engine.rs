//! Lifecycle engine.
//!
//! The only component that changes a certificate's status, apart from the
//! sweep which goes through compare-and-swap. Issuance completion, renewal and
//! revocation of one certificate are serialized by a per-id lock; install
//! transmission runs outside of it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ca::{AdapterGateway, IssueRequest, RevocationReason};
use crate::clock::SharedClock;
use crate::deploy::{summarize, Deployment, DeploymentOrchestrator};
use crate::discovery::{ObservedCertificate, DISCOVERED_ADAPTER};
use crate::error::Error;
use crate::lifecycle::classifier::{classify_with, days_remaining, derive_status, ExpiryThresholds};
use crate::lifecycle::locks::KeyedLocks;
use crate::lifecycle::types::{
    validate_targets, CertificateFilter, CertificateRequest, CertificateView, InventorySummary,
    RequestReceipt, SweepReport,
};
use crate::store::{
    AuditAction, AuditEvent, AuditLog, Certificate, CertificateMaterial, CertificateStore, FailureKind,
    InstallRecord, InstallTarget, RequestRecord, RequestState,
};
use crate::telemetry::MetricsCollector;
use crate::types::{Actor, CertificateStatus, Result};

/// What the sweep did with one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Stored status already current
    Unchanged,
    /// Status moved
    Updated(CertificateStatus),
    /// Record changed since it was read
    Skipped,
}

/// Lifecycle engine
pub struct LifecycleEngine {
    store: Arc<CertificateStore>,
    audit: Arc<AuditLog>,
    gateway: Arc<AdapterGateway>,
    orchestrator: Arc<DeploymentOrchestrator>,
    clock: SharedClock,
    thresholds: ExpiryThresholds,
    locks: KeyedLocks,
    metrics: Option<Arc<MetricsCollector>>,
}

impl LifecycleEngine {
    /// Create a new engine
    pub fn new(
        store: Arc<CertificateStore>,
        audit: Arc<AuditLog>,
        gateway: Arc<AdapterGateway>,
        orchestrator: Arc<DeploymentOrchestrator>,
        clock: SharedClock,
        thresholds: ExpiryThresholds,
    ) -> Self {
        Self {
            store,
            audit,
            gateway,
            orchestrator,
            clock,
            thresholds,
            locks: KeyedLocks::new(),
            metrics: None,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn thresholds(&self) -> ExpiryThresholds {
        self.thresholds
    }

    /// Registered CA adapters
    pub fn adapter_ids(&self) -> Vec<String> {
        self.gateway.adapter_ids()
    }

    /// Request, issue and (if targets are given) deploy a new certificate
    pub async fn request_certificate(&self, actor: &Actor, request: CertificateRequest) -> Result<RequestReceipt> {
        request.validate()?;
        if !self.gateway.contains(&request.adapter_id) {
            return Err(Error::AdapterNotFound(request.adapter_id));
        }

        self.issue_and_activate(actor, request, None).await
    }

    /// Certificate with audit trail and install history; the status is
    /// brought up to date on the way
    pub async fn get_certificate(&self, id: &str) -> Result<CertificateView> {
        let now = self.clock.now();
        let cert = self.refresh(self.store.get(id)?, now).await?;

        Ok(CertificateView {
            days_until_expiry: days_remaining(now, cert.not_after),
            audit_logs: Some(self.audit.for_certificate(id)),
            installs: Some(self.orchestrator.ledger().records_for(id)),
            certificate: cert,
        })
    }

    /// Certificates matching `filter`, oldest first
    pub async fn list_certificates(&self, filter: &CertificateFilter) -> Result<Vec<CertificateView>> {
        let now = self.clock.now();
        let mut views = Vec::new();

        for cert in self.store.list() {
            let cert = self.refresh(cert, now).await?;
            if filter.matches(&cert) {
                views.push(CertificateView {
                    days_until_expiry: days_remaining(now, cert.not_after),
                    audit_logs: None,
                    installs: None,
                    certificate: cert,
                });
            }
        }

        Ok(views)
    }

    /// Issuance request by id
    pub fn get_request(&self, request_id: &str) -> Result<RequestRecord> {
        self.store.get_request(request_id)
    }

    /// Revoke at the CA, then locally.
    ///
    /// Revoking a revoked certificate succeeds without touching anything.
    pub async fn revoke(&self, actor: &Actor, id: &str, reason: RevocationReason) -> Result<Certificate> {
        let _guard = self.locks.lock(id).await;

        let now = self.clock.now();
        let cert = self.store.get(id)?;
        ensure_managed(&cert, "revoke")?;
        match self.effective_status(&cert, now) {
            CertificateStatus::Revoked => {
                debug!("Certificate {} already revoked", id);
                return Ok(cert);
            }
            status if status.is_terminal() => {
                return Err(Error::Conflict(format!("Cannot revoke certificate {} in status {}", id, status)));
            }
            _ => {}
        }

        if let Err(e) = self.gateway.revoke(&cert.adapter_id, &cert.serial, reason).await {
            warn!("Revocation of certificate {} failed: {}", id, e);
            self.audit
                .append(
                    AuditEvent::certificate(
                        AuditAction::RevokeFailed,
                        actor.id.clone(),
                        id,
                        format!("reason={} error={}", reason, e),
                    ),
                    self.clock.now(),
                )
                .await;
            self.record_revocation("failed");
            return Err(e);
        }

        let now = self.clock.now();
        let revoked = self
            .store
            .transition(id, now, |_| Ok(CertificateStatus::Revoked))
            .await?;
        self.audit
            .append(
                AuditEvent::certificate(AuditAction::Revoked, actor.id.clone(), id, format!("reason={}", reason)),
                now,
            )
            .await;
        self.orchestrator.release(id);
        self.record_revocation("revoked");

        info!("Certificate {} revoked by {} ({})", id, actor, reason);
        Ok(revoked)
    }

    /// Issue a replacement with the same parameters, deploy it to every
    /// prior target, then supersede the old certificate
    pub async fn renew(&self, actor: &Actor, id: &str) -> Result<RequestReceipt> {
        let _guard = self.locks.lock(id).await;

        let now = self.clock.now();
        let old = self.store.get(id)?;
        ensure_managed(&old, "renew")?;
        let status = self.effective_status(&old, now);
        if !status.is_time_derived() {
            return Err(Error::Conflict(format!("Cannot renew certificate {} in status {}", id, status)));
        }

        let request = CertificateRequest {
            owner_id: old.owner_id.clone(),
            common_name: old.common_name.clone(),
            sans: old.sans.clone(),
            key_algorithm: old.key_algorithm,
            key_size: old.key_size,
            adapter_id: old.adapter_id.clone(),
            targets: self.orchestrator.ledger().targets_for(id),
        };

        // A failed renewal leaves the old certificate untouched
        let receipt = self.issue_and_activate(actor, request, Some(&old)).await?;

        if !receipt.status.is_time_derived() {
            warn!(
                "Renewed certificate {} ended in {}; {} not superseded",
                receipt.certificate_id, receipt.status, id
            );
            return Ok(receipt);
        }

        let now = self.clock.now();
        self.store
            .transition(id, now, |current| {
                if current.status.is_terminal() {
                    Ok(current.status)
                } else {
                    Ok(CertificateStatus::Superseded)
                }
            })
            .await?;
        self.audit
            .append(
                AuditEvent::certificate(
                    AuditAction::Renewed,
                    actor.id.clone(),
                    receipt.certificate_id.clone(),
                    format!("renewed_from={}", id),
                )
                .with_request(receipt.request_id.clone()),
                now,
            )
            .await;
        self.audit
            .append(
                AuditEvent::certificate(
                    AuditAction::Superseded,
                    actor.id.clone(),
                    id,
                    format!("superseded_by={}", receipt.certificate_id),
                ),
                now,
            )
            .await;
        self.orchestrator.release(id);

        info!("Certificate {} renewed as {}", id, receipt.certificate_id);
        Ok(receipt)
    }

    /// Install an existing certificate on additional targets
    pub async fn deploy(&self, actor: &Actor, id: &str, targets: Vec<InstallTarget>) -> Result<Vec<InstallRecord>> {
        if targets.is_empty() {
            return Err(Error::Validation("At least one install target is required".into()));
        }
        validate_targets(&targets)?;

        let now = self.clock.now();
        let cert = self.store.get(id)?;
        ensure_managed(&cert, "deploy")?;
        let status = self.effective_status(&cert, now);
        if status.is_terminal() {
            return Err(Error::Conflict(format!("Cannot deploy certificate {} in status {}", id, status)));
        }

        let material = self.store.material(id)?;
        let records = self.orchestrator.deploy(self.deployment(&cert, material, actor), targets).await;

        // Targets refused because another install is pending do not count:
        // that install decides for itself
        let failed = records
            .iter()
            .any(|r| r.failed() && r.failure != Some(FailureKind::InstallInProgress));

        let _guard = self.locks.lock(id).await;
        let now = self.clock.now();
        self.store
            .transition(id, now, |current| {
                if !current.status.is_time_derived() {
                    return Ok(current.status);
                }
                if failed {
                    Ok(derive_status(CertificateStatus::InstallFailed, now, current.not_after, self.thresholds))
                } else {
                    Ok(classify_with(now, current.not_after, self.thresholds).into())
                }
            })
            .await?;

        debug!("Deployment of {} finished: {:?}", id, summarize(&records));
        Ok(records)
    }

    /// Install a certificate on a single agent.
    ///
    /// Targets that could not be attempted, or timed out, surface as errors;
    /// a rejection by the agent comes back as a failed record.
    pub async fn install(
        &self,
        actor: &Actor,
        agent_id: &str,
        id: &str,
        path: &str,
        reload_cmd: Option<String>,
    ) -> Result<InstallRecord> {
        let target = InstallTarget {
            agent_id: agent_id.to_string(),
            path: path.to_string(),
            reload_cmd,
        };

        let mut records = self.deploy(actor, id, vec![target]).await?;
        let record = records
            .pop()
            .ok_or_else(|| Error::Internal("Deployment returned no install record".into()))?;

        let detail = record.error.clone().unwrap_or_default();
        match record.failure {
            Some(FailureKind::AgentNotFound) => Err(Error::NotFound(format!("Agent not found: {}", agent_id))),
            Some(FailureKind::AgentOffline) => Err(Error::AgentOffline(agent_id.to_string())),
            Some(FailureKind::AgentTimeout) => Err(Error::AgentTimeout(detail)),
            Some(FailureKind::InstallInProgress) => Err(Error::InstallInProgress {
                certificate_id: id.to_string(),
                agent_id: agent_id.to_string(),
            }),
            _ => Ok(record),
        }
    }

    /// Bring every stored status up to date
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut counts: HashMap<CertificateStatus, usize> = HashMap::new();

        for cert in self.store.list() {
            report.examined += 1;
            let status = match self.reconcile(&cert, now).await? {
                Reconciled::Unchanged => cert.status,
                Reconciled::Updated(status) => {
                    report.updated += 1;
                    status
                }
                Reconciled::Skipped => {
                    report.skipped += 1;
                    self.store.get(&cert.id)?.status
                }
            };
            *counts.entry(status).or_insert(0) += 1;
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_status_counts(&counts);
        }

        debug!(
            "Sweep examined {} certificate(s): {} updated, {} skipped",
            report.examined, report.updated, report.skipped
        );
        Ok(report)
    }

    /// Write back the derived status of a record read earlier, unless the
    /// record has changed since
    pub async fn reconcile(&self, cert: &Certificate, now: DateTime<Utc>) -> Result<Reconciled> {
        let derived = derive_status(cert.status, now, cert.not_after, self.thresholds);
        if derived == cert.status {
            return Ok(Reconciled::Unchanged);
        }

        if self
            .store
            .compare_and_set_status(&cert.id, cert.version, derived, now)
            .await?
        {
            Ok(Reconciled::Updated(derived))
        } else {
            debug!("Certificate {} changed during sweep, skipping", cert.id);
            Ok(Reconciled::Skipped)
        }
    }

    /// Live certificates with at most `window_days` left, soonest first
    pub fn renewal_candidates(&self, window_days: i64) -> Vec<Certificate> {
        let now = self.clock.now();
        let mut candidates: Vec<Certificate> = self
            .store
            .list()
            .into_iter()
            .filter(|cert| {
                let status = self.effective_status(cert, now);
                cert.adapter_id != DISCOVERED_ADAPTER
                    && status.is_time_derived()
                    && days_remaining(now, cert.not_after) <= window_days
            })
            .collect();
        candidates.sort_by_key(|cert| cert.not_after);
        candidates
    }

    /// Add a certificate seen at `source` to the inventory.
    ///
    /// Returns `None` when a certificate with the same fingerprint is
    /// already tracked.
    pub async fn record_discovered(&self, source: &str, observed: ObservedCertificate) -> Result<Option<Certificate>> {
        if self.store.contains_fingerprint(&observed.fingerprint) {
            debug!("Certificate {} at {} already tracked", observed.fingerprint, source);
            return Ok(None);
        }

        let now = self.clock.now();
        let id = format!("disc-{}", observed.fingerprint.get(..16).unwrap_or(&observed.fingerprint));
        let cert = Certificate {
            id,
            common_name: observed.common_name,
            sans: observed.sans,
            issuer: observed.issuer,
            fingerprint: observed.fingerprint,
            key_algorithm: observed.key_algorithm,
            key_size: observed.key_size,
            not_before: observed.not_before,
            not_after: observed.not_after,
            status: classify_with(now, observed.not_after, self.thresholds).into(),
            owner_id: String::new(),
            adapter_id: DISCOVERED_ADAPTER.to_string(),
            serial: observed.serial,
            renewed_from: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        match self.store.insert_observed(cert.clone()).await {
            Ok(()) => {}
            // Another scan got there first
            Err(Error::Conflict(_)) => return Ok(None),
            Err(e) => return Err(e),
        }

        self.audit
            .append(
                AuditEvent::certificate(
                    AuditAction::Discovered,
                    Actor::system().id,
                    &cert.id,
                    format!("source={} serial={} not_after={}", source, cert.serial, cert.not_after),
                ),
                now,
            )
            .await;
        info!("Discovered certificate {} ({}) at {}", cert.id, cert.common_name, source);
        Ok(Some(cert))
    }

    /// Counts per status and expiry buckets
    pub fn inventory_summary(&self) -> InventorySummary {
        let now = self.clock.now();
        let mut summary = InventorySummary {
            by_status: CertificateStatus::all()
                .iter()
                .map(|status| (status.as_str().to_string(), 0))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        };

        for cert in self.store.list() {
            let status = self.effective_status(&cert, now);
            summary.total += 1;
            *summary.by_status.entry(status.as_str().to_string()).or_insert(0) += 1;

            if status.is_terminal() {
                continue;
            }
            let days = days_remaining(now, cert.not_after);
            if days > 0 {
                if days <= 7 {
                    summary.expiring_within_7_days += 1;
                }
                if days <= 15 {
                    summary.expiring_within_15_days += 1;
                }
                if days <= 30 {
                    summary.expiring_within_30_days += 1;
                }
            }
        }

        summary
    }

    /// Shared by issuance and renewal
    async fn issue_and_activate(
        &self,
        actor: &Actor,
        request: CertificateRequest,
        renewal_of: Option<&Certificate>,
    ) -> Result<RequestReceipt> {
        let request_id = Uuid::new_v4().to_string();
        let now = self.clock.now();

        let mut record = RequestRecord {
            id: request_id.clone(),
            owner_id: request.owner_id.clone(),
            actor_id: actor.id.clone(),
            adapter_id: request.adapter_id.clone(),
            common_name: request.common_name.clone(),
            state: RequestState::Pending,
            certificate_id: None,
            error: None,
            renewal_of: renewal_of.map(|c| c.id.clone()),
            requested_at: now,
            completed_at: None,
        };
        self.store.put_request(record.clone()).await?;

        let detail = match renewal_of {
            Some(old) => format!("cn={} adapter={} renewal_of={}", request.common_name, request.adapter_id, old.id),
            None => format!("cn={} adapter={}", request.common_name, request.adapter_id),
        };
        self.audit
            .append(AuditEvent::request(AuditAction::Requested, actor.id.clone(), &request_id, detail), now)
            .await;

        let issue = IssueRequest {
            common_name: request.common_name.clone(),
            sans: request.sans.clone(),
            key_algorithm: request.key_algorithm,
            key_size: request.key_size,
            owner_id: request.owner_id.clone(),
        };

        let certificate_id = Uuid::new_v4().to_string();
        let guard = self.locks.lock(&certificate_id).await;

        let stored = match self.gateway.issue(&request.adapter_id, &issue).await {
            Ok(signed) => {
                let now = self.clock.now();
                let cert = Certificate {
                    id: certificate_id.clone(),
                    common_name: request.common_name.clone(),
                    sans: request.sans.clone(),
                    issuer: signed.issued.issuer.clone(),
                    fingerprint: signed.fingerprint.clone(),
                    key_algorithm: request.key_algorithm,
                    key_size: request.key_size,
                    not_before: signed.issued.not_before,
                    not_after: signed.issued.not_after,
                    status: CertificateStatus::Issued,
                    owner_id: request.owner_id.clone(),
                    adapter_id: request.adapter_id.clone(),
                    serial: signed.issued.serial.clone(),
                    renewed_from: renewal_of.map(|c| c.id.clone()),
                    created_at: now,
                    updated_at: now,
                    version: 0,
                };
                let material = CertificateMaterial {
                    certificate_pem: signed.issued.certificate_pem,
                    chain_pem: signed.issued.chain_pem,
                    private_key_pem: signed.issued.private_key_pem,
                };
                self.store
                    .insert(cert.clone(), material.clone())
                    .await
                    .map(|_| (cert, material))
            }
            Err(e) => Err(e),
        };

        let (cert, material) = match stored {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Issuance request {} for {} failed: {}", request_id, request.common_name, e);
                let now = self.clock.now();
                record.state = RequestState::Rejected;
                record.error = Some(e.to_string());
                record.completed_at = Some(now);
                self.store.put_request(record).await?;
                self.audit
                    .append(
                        AuditEvent::request(
                            AuditAction::RequestFailed,
                            actor.id.clone(),
                            &request_id,
                            format!("kind={} error={}", e.kind(), e),
                        ),
                        now,
                    )
                    .await;
                self.record_issuance(&request.adapter_id, e.kind());
                return Err(e);
            }
        };

        let now = self.clock.now();
        record.state = RequestState::Issued;
        record.certificate_id = Some(cert.id.clone());
        record.completed_at = Some(now);
        self.store.put_request(record).await?;
        self.audit
            .append(
                AuditEvent::certificate(
                    AuditAction::Issued,
                    actor.id.clone(),
                    &cert.id,
                    format!("serial={} fingerprint={} not_after={}", cert.serial, cert.fingerprint, cert.not_after),
                )
                .with_request(&request_id),
                now,
            )
            .await;
        self.record_issuance(&request.adapter_id, "issued");
        info!("Issued certificate {} for {} via {}", cert.id, cert.common_name, cert.adapter_id);

        if request.targets.is_empty() {
            let activated = self
                .store
                .transition(&cert.id, now, |current| {
                    Ok(classify_with(now, current.not_after, self.thresholds).into())
                })
                .await?;
            return Ok(RequestReceipt {
                request_id,
                certificate_id: activated.id,
                status: activated.status,
                installs: Vec::new(),
            });
        }

        self.store
            .transition(&cert.id, now, |_| Ok(CertificateStatus::Installing))
            .await?;
        drop(guard);

        let installs = self
            .orchestrator
            .deploy(self.deployment(&cert, material, actor), request.targets)
            .await;
        let failed = installs
            .iter()
            .any(|r| r.failed() && r.failure != Some(FailureKind::InstallInProgress));

        let _guard = self.locks.lock(&cert.id).await;
        let now = self.clock.now();
        let activated = self
            .store
            .transition(&cert.id, now, |current| {
                // A revocation that landed meanwhile wins
                if current.status != CertificateStatus::Installing {
                    return Ok(current.status);
                }
                if failed {
                    Ok(derive_status(CertificateStatus::InstallFailed, now, current.not_after, self.thresholds))
                } else {
                    Ok(classify_with(now, current.not_after, self.thresholds).into())
                }
            })
            .await?;

        Ok(RequestReceipt {
            request_id,
            certificate_id: activated.id,
            status: activated.status,
            installs,
        })
    }

    fn deployment(&self, cert: &Certificate, material: CertificateMaterial, actor: &Actor) -> Deployment {
        Deployment {
            certificate_id: cert.id.clone(),
            material,
            actor: actor.clone(),
        }
    }

    /// Status the record should have now, without writing it
    fn effective_status(&self, cert: &Certificate, now: DateTime<Utc>) -> CertificateStatus {
        derive_status(cert.status, now, cert.not_after, self.thresholds)
    }

    /// Lazily write back a stale status; losing the race just re-reads
    async fn refresh(&self, cert: Certificate, now: DateTime<Utc>) -> Result<Certificate> {
        match self.reconcile(&cert, now).await? {
            Reconciled::Unchanged => Ok(cert),
            Reconciled::Updated(_) | Reconciled::Skipped => self.store.get(&cert.id),
        }
    }

    fn record_issuance(&self, adapter: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_issuance(adapter, outcome);
        }
    }

    fn record_revocation(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_revocation(outcome);
        }
    }
}

fn ensure_managed(cert: &Certificate, operation: &str) -> Result<()> {
    if cert.adapter_id == DISCOVERED_ADAPTER {
        return Err(Error::Conflict(format!(
            "Cannot {} certificate {}: it was discovered on the network, not issued here",
            operation, cert.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentRegistration, AgentRegistry};
    use crate::ca::MockCaAdapter;
    use crate::clock::{Clock, ManualClock};
    use crate::deploy::{AgentTransport, InstallPayload};
    use crate::store::{verify_chain, InstallLedger};
    use crate::types::KeyAlgorithm;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Transport that accepts everything except pushes to listed agents
    #[derive(Default)]
    struct FakeTransport {
        refuse: Mutex<HashSet<String>>,
        pushes: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AgentTransport for FakeTransport {
        async fn push_material(&self, agent: &Agent, payload: &InstallPayload) -> Result<()> {
            if self.refuse.lock().contains(&agent.id) {
                return Err(Error::Transport(format!("{} refused the install", agent.id)));
            }
            self.pushes.lock().push((agent.id.clone(), payload.certificate_id.clone()));
            Ok(())
        }

        async fn run_reload(&self, _agent: &Agent, _command: &str) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        engine: LifecycleEngine,
        ca: Arc<MockCaAdapter>,
        registry: Arc<AgentRegistry>,
        transport: Arc<FakeTransport>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let ca = Arc::new(MockCaAdapter::with_defaults(clock.clone()));
        let gateway = Arc::new(AdapterGateway::new(Duration::from_secs(5), clock.clone()));
        gateway.register("mock", ca.clone());

        let registry = Arc::new(AgentRegistry::new(Duration::from_secs(300), clock.clone()));
        let audit = Arc::new(AuditLog::in_memory());
        let transport = Arc::new(FakeTransport::default());
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            registry.clone(),
            Arc::new(InstallLedger::new()),
            audit.clone(),
            transport.clone(),
            clock.clone(),
            Duration::from_secs(5),
            4,
        ));

        let engine = LifecycleEngine::new(
            Arc::new(CertificateStore::in_memory()),
            audit,
            gateway,
            orchestrator,
            clock.clone(),
            ExpiryThresholds::default(),
        );

        Fixture {
            engine,
            ca,
            registry,
            transport,
            clock,
        }
    }

    impl Fixture {
        fn register(&self, id: &str) {
            self.registry
                .register(AgentRegistration {
                    id: Some(id.to_string()),
                    hostname: id.to_string(),
                    address: format!("{}:7443", id),
                    version: "1.0".to_string(),
                })
                .unwrap();
        }

        async fn issue(&self, targets: Vec<InstallTarget>) -> RequestReceipt {
            self.engine
                .request_certificate(&Actor::new("alice"), request(targets))
                .await
                .unwrap()
        }
    }

    fn request(targets: Vec<InstallTarget>) -> CertificateRequest {
        CertificateRequest {
            owner_id: "team-a".to_string(),
            common_name: "api.example.com".to_string(),
            sans: vec!["api.example.com".to_string()],
            key_algorithm: KeyAlgorithm::Ecdsa,
            key_size: 256,
            adapter_id: "mock".to_string(),
            targets,
        }
    }

    fn actions(engine: &LifecycleEngine, id: &str) -> Vec<AuditAction> {
        engine.audit().for_certificate(id).into_iter().map(|e| e.action).collect()
    }

    #[tokio::test]
    async fn test_issue_without_targets_is_classified() {
        let f = fixture();
        let receipt = f.issue(Vec::new()).await;

        assert_eq!(receipt.status, CertificateStatus::Active);
        assert!(receipt.installs.is_empty());

        let request = f.engine.get_request(&receipt.request_id).unwrap();
        assert_eq!(request.state, RequestState::Issued);
        assert_eq!(request.certificate_id.as_deref(), Some(receipt.certificate_id.as_str()));

        let view = f.engine.get_certificate(&receipt.certificate_id).await.unwrap();
        assert_eq!(view.days_until_expiry, 90);
        assert_eq!(actions(&f.engine, &receipt.certificate_id), vec![AuditAction::Issued]);
    }

    #[tokio::test]
    async fn test_short_validity_is_critical() {
        let f = fixture();
        f.ca.set_validity(ChronoDuration::days(7));

        let receipt = f.issue(Vec::new()).await;
        assert_eq!(receipt.status, CertificateStatus::Critical);
    }

    #[tokio::test]
    async fn test_unknown_adapter_writes_nothing() {
        let f = fixture();
        let mut req = request(Vec::new());
        req.adapter_id = "vault".to_string();

        let err = f.engine.request_certificate(&Actor::new("alice"), req).await.unwrap_err();
        assert!(matches!(err, Error::AdapterNotFound(_)));
        assert!(f.engine.store().is_empty());
        assert!(f.engine.audit().is_empty());
    }

    #[tokio::test]
    async fn test_adapter_failure_rejects_request() {
        let f = fixture();
        f.ca.fail_issue(Some("quota exceeded"));

        let err = f
            .engine
            .request_certificate(&Actor::new("alice"), request(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(_)));
        assert!(f.engine.store().is_empty());

        let entries = f.engine.audit().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, AuditAction::RequestFailed);
        let request = f.engine.get_request(entries[1].request_id.as_deref().unwrap()).unwrap();
        assert_eq!(request.state, RequestState::Rejected);
        assert!(request.error.unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_failed_target_marks_install_failed() {
        let f = fixture();
        f.register("a");
        f.register("b");
        f.transport.refuse.lock().insert("b".to_string());

        let receipt = f
            .issue(vec![
                InstallTarget::new("a", "/etc/ssl/api.pem"),
                InstallTarget::new("b", "/etc/ssl/api.pem"),
            ])
            .await;

        assert_eq!(receipt.status, CertificateStatus::InstallFailed);
        assert!(receipt.installs[0].succeeded());
        assert_eq!(receipt.installs[1].failure, Some(FailureKind::TransmitFailed));
        assert_eq!(f.registry.get("a").unwrap().managed_count, 1);
        assert_eq!(f.registry.get("b").unwrap().managed_count, 0);

        // A later successful deploy clears it
        f.transport.refuse.lock().clear();
        f.engine
            .deploy(&Actor::new("alice"), &receipt.certificate_id, vec![InstallTarget::new("b", "/etc/ssl/api.pem")])
            .await
            .unwrap();
        let view = f.engine.get_certificate(&receipt.certificate_id).await.unwrap();
        assert_eq!(view.certificate.status, CertificateStatus::Active);
    }

    #[tokio::test]
    async fn test_install_surfaces_offline_agent() {
        let f = fixture();
        f.register("a");
        let receipt = f.issue(Vec::new()).await;

        f.clock.advance(ChronoDuration::minutes(10));
        let err = f
            .engine
            .install(&Actor::new("alice"), "a", &receipt.certificate_id, "/etc/ssl/api.pem", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentOffline(_)));
        assert!(f.transport.pushes.lock().is_empty());

        let err = f
            .engine
            .install(&Actor::new("alice"), "ghost", &receipt.certificate_id, "/etc/ssl/api.pem", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_revoke_twice_audits_once() {
        let f = fixture();
        let receipt = f.issue(Vec::new()).await;
        let actor = Actor::new("alice");

        let first = f
            .engine
            .revoke(&actor, &receipt.certificate_id, RevocationReason::KeyCompromise)
            .await
            .unwrap();
        let second = f
            .engine
            .revoke(&actor, &receipt.certificate_id, RevocationReason::KeyCompromise)
            .await
            .unwrap();

        assert_eq!(first.status, CertificateStatus::Revoked);
        assert_eq!(second.version, first.version);
        let revoked = actions(&f.engine, &receipt.certificate_id)
            .into_iter()
            .filter(|a| *a == AuditAction::Revoked)
            .count();
        assert_eq!(revoked, 1);
        assert_eq!(f.ca.revoked_serials().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_failure_keeps_status() {
        let f = fixture();
        let receipt = f.issue(Vec::new()).await;
        f.ca.fail_revoke(Some("ca unavailable"));

        let err = f
            .engine
            .revoke(&Actor::new("alice"), &receipt.certificate_id, RevocationReason::Unspecified)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(_)));

        let view = f.engine.get_certificate(&receipt.certificate_id).await.unwrap();
        assert_eq!(view.certificate.status, CertificateStatus::Active);
        assert_eq!(
            actions(&f.engine, &receipt.certificate_id),
            vec![AuditAction::Issued, AuditAction::RevokeFailed]
        );
    }

    #[tokio::test]
    async fn test_revoke_expired_conflicts() {
        let f = fixture();
        let receipt = f.issue(Vec::new()).await;
        f.clock.advance(ChronoDuration::days(91));

        let err = f
            .engine
            .revoke(&Actor::new("alice"), &receipt.certificate_id, RevocationReason::Superseded)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_renew_supersedes_and_redeploys() {
        let f = fixture();
        f.register("a");
        let old = f
            .issue(vec![InstallTarget::new("a", "/etc/ssl/api.pem").with_reload("systemctl reload nginx")])
            .await;
        f.clock.advance(ChronoDuration::days(70));
        f.registry.heartbeat("a", None).unwrap();

        let renewed = f.engine.renew(&Actor::new("bob"), &old.certificate_id).await.unwrap();
        assert_eq!(renewed.status, CertificateStatus::Active);
        assert_eq!(renewed.installs.len(), 1);
        assert_eq!(renewed.installs[0].reload_cmd.as_deref(), Some("systemctl reload nginx"));

        let old_view = f.engine.get_certificate(&old.certificate_id).await.unwrap();
        assert_eq!(old_view.certificate.status, CertificateStatus::Superseded);
        let new_view = f.engine.get_certificate(&renewed.certificate_id).await.unwrap();
        assert_eq!(new_view.certificate.renewed_from.as_deref(), Some(old.certificate_id.as_str()));
        assert!(actions(&f.engine, &renewed.certificate_id).contains(&AuditAction::Renewed));
        assert!(actions(&f.engine, &old.certificate_id).contains(&AuditAction::Superseded));

        // Old certificate released, new one counted
        assert_eq!(f.registry.get("a").unwrap().managed_count, 1);

        let err = f.engine.renew(&Actor::new("bob"), &old.certificate_id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(f.engine.audit().verify());
    }

    #[tokio::test]
    async fn test_failed_renewal_leaves_old_certificate() {
        let f = fixture();
        let old = f.issue(Vec::new()).await;
        f.ca.fail_issue(Some("rejected"));

        assert!(f.engine.renew(&Actor::new("bob"), &old.certificate_id).await.is_err());
        let view = f.engine.get_certificate(&old.certificate_id).await.unwrap();
        assert_eq!(view.certificate.status, CertificateStatus::Active);
        assert_eq!(f.engine.store().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_moves_statuses() {
        let f = fixture();
        f.issue(Vec::new()).await;
        f.ca.set_validity(ChronoDuration::days(20));
        f.issue(Vec::new()).await;

        let report = f.engine.sweep().await.unwrap();
        assert_eq!(report, SweepReport { examined: 2, updated: 0, skipped: 0 });

        f.clock.advance(ChronoDuration::days(15));
        let report = f.engine.sweep().await.unwrap();
        assert_eq!(report.updated, 1);

        let summary = f.engine.inventory_summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_status["critical"], 1);
        assert_eq!(summary.by_status["active"], 1);
        assert_eq!(summary.by_status["revoked"], 0);
        assert_eq!(summary.expiring_within_7_days, 1);
    }

    #[tokio::test]
    async fn test_sweep_skips_stale_snapshot() {
        let f = fixture();
        let receipt = f.issue(Vec::new()).await;
        let snapshot = f.engine.store().get(&receipt.certificate_id).unwrap();

        f.engine
            .revoke(&Actor::new("alice"), &receipt.certificate_id, RevocationReason::Unspecified)
            .await
            .unwrap();
        f.clock.advance(ChronoDuration::days(80));

        let outcome = f.engine.reconcile(&snapshot, f.clock.now()).await.unwrap();
        assert_eq!(outcome, Reconciled::Skipped);
        assert_eq!(
            f.engine.store().get(&receipt.certificate_id).unwrap().status,
            CertificateStatus::Revoked
        );
    }

    #[tokio::test]
    async fn test_list_filters_on_current_status() {
        let f = fixture();
        f.issue(Vec::new()).await;
        f.ca.set_validity(ChronoDuration::days(10));
        let short = f.issue(Vec::new()).await;

        f.clock.advance(ChronoDuration::days(5));
        let filter = CertificateFilter {
            status: Some(CertificateStatus::Critical),
            q: None,
        };
        let critical = f.engine.list_certificates(&filter).await.unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].certificate.id, short.certificate_id);
        assert!(critical[0].audit_logs.is_none());

        let candidates = f.engine.renewal_candidates(30);
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_audit_chain_spans_operations() {
        let f = fixture();
        f.register("a");
        let receipt = f.issue(vec![InstallTarget::new("a", "/etc/ssl/api.pem")]).await;
        f.engine
            .revoke(&Actor::new("alice"), &receipt.certificate_id, RevocationReason::CessationOfOperation)
            .await
            .unwrap();

        let entries = f.engine.audit().entries();
        assert!(verify_chain(&entries));
        assert_eq!(
            actions(&f.engine, &receipt.certificate_id),
            vec![AuditAction::Issued, AuditAction::Installed, AuditAction::Revoked]
        );
        assert_eq!(f.registry.get("a").unwrap().managed_count, 0);
    }
}

//! Deployment orchestrator.
//!
//! Every install target runs as its own task. Targets are independent: one
//! failing, stalling or being cancelled never affects the others, and
//! outcomes are reported per target.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, AgentRegistry};
use crate::clock::SharedClock;
use crate::deploy::transport::{AgentTransport, InstallPayload};
use crate::error::Error;
use crate::store::{
    AuditAction, AuditEvent, AuditLog, CertificateMaterial, FailureKind, InstallLedger, InstallRecord,
    InstallTarget,
};
use crate::telemetry::MetricsCollector;
use crate::types::Actor;

const QUEUED: u8 = 0;
const DISPATCHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Dispatch state of one target
struct TargetControl {
    state: AtomicU8,
    wake: Notify,
}

impl TargetControl {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(QUEUED),
            wake: Notify::new(),
        }
    }

    fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.wake.notify_one();
        }
        cancelled
    }

    fn dispatch(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, DISPATCHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// State shared by all install tasks
struct Shared {
    registry: Arc<AgentRegistry>,
    ledger: Arc<InstallLedger>,
    audit: Arc<AuditLog>,
    transport: Arc<dyn AgentTransport>,
    clock: SharedClock,
    agent_timeout: Duration,
    permits: Arc<Semaphore>,
    // Pairs ledger updates with agent count changes
    accounting: parking_lot::Mutex<()>,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Deployment orchestrator
pub struct DeploymentOrchestrator {
    shared: Arc<Shared>,
}

/// One certificate's material on its way to a set of targets
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Certificate id
    pub certificate_id: String,
    /// Material to install
    pub material: CertificateMaterial,
    /// Caller recorded in the audit trail
    pub actor: Actor,
}

impl DeploymentOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        registry: Arc<AgentRegistry>,
        ledger: Arc<InstallLedger>,
        audit: Arc<AuditLog>,
        transport: Arc<dyn AgentTransport>,
        clock: SharedClock,
        agent_timeout: Duration,
        max_parallel: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                ledger,
                audit,
                transport,
                clock,
                agent_timeout,
                permits: Arc::new(Semaphore::new(max_parallel.max(1))),
                accounting: parking_lot::Mutex::new(()),
                metrics: None,
            }),
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.metrics = Some(metrics),
            None => warn!("Deployments already started, metrics not attached"),
        }
        self
    }

    /// Install ledger used by this orchestrator
    pub fn ledger(&self) -> &Arc<InstallLedger> {
        &self.shared.ledger
    }

    /// Dispatch every target and return immediately
    pub fn start(&self, deployment: Deployment, targets: Vec<InstallTarget>) -> DeploymentHandle {
        let deployment = Arc::new(deployment);
        let mut tasks = Vec::with_capacity(targets.len());

        info!(
            "Deploying certificate {} to {} target(s)",
            deployment.certificate_id,
            targets.len()
        );

        for target in targets {
            let control = Arc::new(TargetControl::new());
            let task = tokio::spawn(run_target(
                self.shared.clone(),
                deployment.clone(),
                target.clone(),
                control.clone(),
            ));
            tasks.push(TargetTask { target, control, task });
        }

        DeploymentHandle {
            shared: self.shared.clone(),
            deployment,
            tasks,
        }
    }

    /// Dispatch every target and wait for all outcomes, in target order
    pub async fn deploy(&self, deployment: Deployment, targets: Vec<InstallTarget>) -> Vec<InstallRecord> {
        self.start(deployment, targets).wait().await
    }

    /// Forget every agent holding the certificate, decrementing their counts.
    ///
    /// Installs of the certificate still in flight no longer count once they
    /// finish.
    pub fn release(&self, certificate_id: &str) -> Vec<String> {
        let _accounting = self.shared.accounting.lock();
        let agents = self.shared.ledger.release(certificate_id);
        for agent_id in &agents {
            if let Err(e) = self.shared.registry.decrement_managed(agent_id) {
                debug!("Releasing {} from agent {}: {}", certificate_id, agent_id, e);
            }
        }
        agents
    }
}

struct TargetTask {
    target: InstallTarget,
    control: Arc<TargetControl>,
    task: JoinHandle<InstallRecord>,
}

/// Running deployment
pub struct DeploymentHandle {
    shared: Arc<Shared>,
    deployment: Arc<Deployment>,
    tasks: Vec<TargetTask>,
}

impl DeploymentHandle {
    /// Cancel targets on `agent_id` that have not been dispatched yet.
    ///
    /// Returns false if nothing was left to cancel.
    pub fn cancel(&self, agent_id: &str) -> bool {
        let mut cancelled = false;
        for task in self.tasks.iter().filter(|t| t.target.agent_id == agent_id) {
            cancelled |= task.control.cancel();
        }
        if cancelled {
            info!(
                "Cancelled pending install of {} on agent {}",
                self.deployment.certificate_id, agent_id
            );
        }
        cancelled
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every target, returning outcomes in target order
    pub async fn wait(self) -> Vec<InstallRecord> {
        let mut records = Vec::with_capacity(self.tasks.len());
        for TargetTask { target, task, .. } in self.tasks {
            match task.await {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("Install task for agent {} aborted: {}", target.agent_id, e);
                    let record = reject(
                        &self.shared,
                        &self.deployment,
                        &target,
                        FailureKind::TransmitFailed,
                        format!("install task aborted: {}", e),
                    )
                    .await;
                    records.push(record);
                }
            }
        }
        records
    }
}

async fn run_target(
    shared: Arc<Shared>,
    deployment: Arc<Deployment>,
    target: InstallTarget,
    control: Arc<TargetControl>,
) -> InstallRecord {
    // Wait for a dispatch slot unless cancelled first
    let _permit = tokio::select! {
        permit = shared.permits.clone().acquire_owned() => permit.ok(),
        _ = control.wake.notified() => None,
    };

    if !control.dispatch() {
        return reject(&shared, &deployment, &target, FailureKind::Cancelled, "cancelled before dispatch").await;
    }

    let now = shared.clock.now();

    let agent = match shared.registry.get(&target.agent_id) {
        Ok(agent) => agent,
        Err(_) => {
            return reject(
                &shared,
                &deployment,
                &target,
                FailureKind::AgentNotFound,
                format!("agent {} is not registered", target.agent_id),
            )
            .await;
        }
    };

    if !shared.registry.liveness(&agent, now) {
        return reject(
            &shared,
            &deployment,
            &target,
            FailureKind::AgentOffline,
            format!("agent {} last checked in at {}", agent.id, agent.last_checkin),
        )
        .await;
    }

    let record = match shared.ledger.begin(&deployment.certificate_id, &target, now) {
        Ok(record) => record,
        Err(e) => {
            return reject(&shared, &deployment, &target, FailureKind::InstallInProgress, e.to_string()).await;
        }
    };

    match transmit(&shared, &deployment, &agent, &target).await {
        Ok(()) => complete(&shared, &deployment, &record).await,
        Err((kind, detail)) => fail(&shared, &deployment, &record, kind, detail).await,
    }
}

/// Push material, then run the reload command if there is one
async fn transmit(
    shared: &Shared,
    deployment: &Deployment,
    agent: &Agent,
    target: &InstallTarget,
) -> Result<(), (FailureKind, String)> {
    let payload = InstallPayload {
        certificate_id: deployment.certificate_id.clone(),
        path: target.path.clone(),
        certificate_pem: deployment.material.full_chain(),
        private_key_pem: deployment.material.private_key_pem.clone(),
    };

    debug!("Pushing {} to {}:{}", deployment.certificate_id, agent.id, target.path);
    match tokio::time::timeout(shared.agent_timeout, shared.transport.push_material(agent, &payload)).await {
        Err(_) => {
            return Err((
                FailureKind::AgentTimeout,
                Error::AgentTimeout(format!("push to {} exceeded {:?}", agent.id, shared.agent_timeout))
                    .to_string(),
            ))
        }
        Ok(Err(e @ Error::AgentTimeout(_))) => return Err((FailureKind::AgentTimeout, e.to_string())),
        Ok(Err(e)) => return Err((FailureKind::TransmitFailed, e.to_string())),
        Ok(Ok(())) => {}
    }

    if let Some(command) = &target.reload_cmd {
        debug!("Running reload on {}: {}", agent.id, command);
        match tokio::time::timeout(shared.agent_timeout, shared.transport.run_reload(agent, command)).await {
            Err(_) => {
                return Err((
                    FailureKind::AgentTimeout,
                    Error::AgentTimeout(format!("reload on {} exceeded {:?}", agent.id, shared.agent_timeout))
                        .to_string(),
                ))
            }
            Ok(Err(e @ Error::AgentTimeout(_))) => return Err((FailureKind::AgentTimeout, e.to_string())),
            Ok(Err(e)) => return Err((FailureKind::ReloadFailed, e.to_string())),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}

async fn complete(shared: &Shared, deployment: &Deployment, pending: &InstallRecord) -> InstallRecord {
    let now = shared.clock.now();
    let record = {
        let _accounting = shared.accounting.lock();
        let (record, first) = match shared.ledger.succeed(&pending.id, now) {
            Ok(done) => done,
            Err(e) => {
                warn!("Install record {} could not be closed: {}", pending.id, e);
                (pending.clone(), false)
            }
        };

        if first {
            if let Err(e) = shared.registry.increment_managed(&record.agent_id) {
                warn!("Agent {} vanished during install: {}", record.agent_id, e);
            }
        }
        record
    };

    info!(
        "Installed certificate {} on agent {} at {}",
        record.certificate_id, record.agent_id, record.path
    );
    shared
        .audit
        .append(
            AuditEvent::certificate(
                AuditAction::Installed,
                deployment.actor.id.clone(),
                record.certificate_id.clone(),
                format!("agent={} path={}", record.agent_id, record.path),
            ),
            now,
        )
        .await;
    if let Some(metrics) = &shared.metrics {
        metrics.record_install("succeeded");
    }

    record
}

async fn fail(
    shared: &Shared,
    deployment: &Deployment,
    pending: &InstallRecord,
    kind: FailureKind,
    detail: String,
) -> InstallRecord {
    let now = shared.clock.now();
    let record = match shared.ledger.fail(&pending.id, kind, detail.clone(), now) {
        Ok(record) => record,
        Err(e) => {
            warn!("Install record {} could not be closed: {}", pending.id, e);
            pending.clone()
        }
    };
    audit_failure(shared, deployment, &record.agent_id, &record.path, kind, &detail).await;
    record
}

async fn reject(
    shared: &Shared,
    deployment: &Deployment,
    target: &InstallTarget,
    kind: FailureKind,
    detail: impl Into<String>,
) -> InstallRecord {
    let detail = detail.into();
    let now = shared.clock.now();
    let record = shared
        .ledger
        .reject(&deployment.certificate_id, target, kind, detail.clone(), now);
    audit_failure(shared, deployment, &target.agent_id, &target.path, kind, &detail).await;
    record
}

async fn audit_failure(
    shared: &Shared,
    deployment: &Deployment,
    agent_id: &str,
    path: &str,
    kind: FailureKind,
    detail: &str,
) {
    warn!(
        "Install of {} on agent {} failed ({}): {}",
        deployment.certificate_id, agent_id, kind, detail
    );
    shared
        .audit
        .append(
            AuditEvent::certificate(
                AuditAction::InstallFailed,
                deployment.actor.id.clone(),
                deployment.certificate_id.clone(),
                format!("agent={} path={} reason={} {}", agent_id, path, kind, detail),
            ),
            shared.clock.now(),
        )
        .await;
    if let Some(metrics) = &shared.metrics {
        metrics.record_install(kind.as_str());
    }
}

/// Outcome summary of a finished deployment
pub fn summarize(records: &[InstallRecord]) -> HashMap<&'static str, usize> {
    let mut summary = HashMap::new();
    for record in records {
        let key = match record.failure {
            Some(kind) => kind.as_str(),
            None if record.succeeded() => "succeeded",
            None => "pending",
        };
        *summary.entry(key).or_insert(0) += 1;
    }
    summary
}

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certfleet::agent::{Agent, AgentRegistration, AgentRegistry};
use certfleet::ca::{AdapterGateway, MockCaAdapter};
use certfleet::clock::ManualClock;
use certfleet::deploy::{AgentTransport, DeploymentOrchestrator, InstallPayload, InstallTarget};
use certfleet::lifecycle::{CertificateRequest, ExpiryThresholds, LifecycleEngine, RequestReceipt};
use certfleet::store::{AuditLog, CertificateStore, InstallLedger};
use certfleet::{Actor, Error, KeyAlgorithm, Result};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Records every push; optionally holds pushes until released
#[derive(Default)]
pub struct RecordingTransport {
    pub pushes: Mutex<Vec<(String, String)>>,
    pub reloads: Mutex<Vec<(String, String)>>,
    pub refuse: Mutex<HashSet<String>>,
    pub gated: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl RecordingTransport {
    pub fn gated() -> Arc<Self> {
        let transport = Self::default();
        transport.gated.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn pushed_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.pushes.lock().iter().map(|(agent, _)| agent.clone()).collect();
        agents.sort();
        agents
    }
}

#[async_trait]
impl AgentTransport for RecordingTransport {
    async fn push_material(&self, agent: &Agent, payload: &InstallPayload) -> Result<()> {
        self.pushes
            .lock()
            .push((agent.id.clone(), payload.certificate_id.clone()));

        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }

        if self.refuse.lock().contains(&agent.id) {
            return Err(Error::Transport(format!("{} refused the install", agent.id)));
        }
        Ok(())
    }

    async fn run_reload(&self, agent: &Agent, command: &str) -> Result<()> {
        self.reloads.lock().push((agent.id.clone(), command.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<LifecycleEngine>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub registry: Arc<AgentRegistry>,
    pub gateway: Arc<AdapterGateway>,
    pub ca: Arc<MockCaAdapter>,
    pub audit: Arc<AuditLog>,
    pub transport: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(RecordingTransport::default()), 4)
    }

    pub fn with_transport(transport: Arc<RecordingTransport>, max_parallel: usize) -> Self {
        Self::build(
            transport.clone(),
            transport,
            max_parallel,
            CertificateStore::in_memory(),
            AuditLog::in_memory(),
        )
    }

    /// Harness whose agents are reached through `agents`; nothing is recorded
    pub fn with_agent_transport(agents: Arc<dyn AgentTransport>) -> Self {
        Self::build(
            agents,
            Arc::new(RecordingTransport::default()),
            4,
            CertificateStore::in_memory(),
            AuditLog::in_memory(),
        )
    }

    /// Harness backed by a data directory
    pub async fn persistent(dir: &Path) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        Self::build(
            transport.clone(),
            transport,
            4,
            CertificateStore::open(dir).await.unwrap(),
            AuditLog::open(dir).await.unwrap(),
        )
    }

    fn build(
        agents: Arc<dyn AgentTransport>,
        transport: Arc<RecordingTransport>,
        max_parallel: usize,
        store: CertificateStore,
        audit: AuditLog,
    ) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let ca = Arc::new(MockCaAdapter::with_defaults(clock.clone()));
        let gateway = Arc::new(AdapterGateway::new(Duration::from_millis(500), clock.clone()));
        gateway.register("mock", ca.clone());

        let registry = Arc::new(AgentRegistry::new(Duration::from_secs(300), clock.clone()));
        let audit = Arc::new(audit);
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            registry.clone(),
            Arc::new(InstallLedger::new()),
            audit.clone(),
            agents,
            clock.clone(),
            Duration::from_millis(500),
            max_parallel,
        ));
        let engine = Arc::new(LifecycleEngine::new(
            Arc::new(store),
            audit.clone(),
            gateway.clone(),
            orchestrator.clone(),
            clock.clone(),
            ExpiryThresholds::default(),
        ));

        Self {
            engine,
            orchestrator,
            registry,
            gateway,
            ca,
            audit,
            transport,
            clock,
        }
    }

    pub fn register(&self, id: &str) {
        self.register_at(id, &format!("{}:7443", id));
    }

    pub fn register_at(&self, id: &str, address: &str) {
        self.registry
            .register(AgentRegistration {
                id: Some(id.to_string()),
                hostname: format!("{}.internal", id),
                address: address.to_string(),
                version: "1.0.0".to_string(),
            })
            .unwrap();
    }

    pub async fn issue(&self, targets: Vec<InstallTarget>) -> RequestReceipt {
        self.engine
            .request_certificate(&actor(), request(targets))
            .await
            .unwrap()
    }
}

pub fn actor() -> Actor {
    Actor::new("alice").with_roles(vec!["operator".to_string()])
}

pub fn request(targets: Vec<InstallTarget>) -> CertificateRequest {
    CertificateRequest {
        owner_id: "payments".to_string(),
        common_name: "pay.example.com".to_string(),
        sans: vec!["pay.example.com".to_string(), "pay-internal.example.com".to_string()],
        key_algorithm: KeyAlgorithm::Ecdsa,
        key_size: 256,
        adapter_id: "mock".to_string(),
        targets,
    }
}

pub fn target(agent: &str) -> InstallTarget {
    InstallTarget::new(agent, "/etc/ssl/certs/pay.pem")
}

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use certfleet::{
    agent::AgentRegistry,
    api::{ApiServer, ApiState},
    ca::AdapterGateway,
    clock::system_clock,
    config::Settings,
    controller::{DiscoveryController, RenewalController, SweepController},
    deploy::{DeploymentOrchestrator, HttpAgentTransport},
    discovery::TlsScanner,
    lifecycle::LifecycleEngine,
    store::{AuditLog, CertificateStore, InstallLedger},
    telemetry::{init_logging, MetricsCollector},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration; .env is optional
    dotenvy::dotenv().ok();
    let settings = Arc::new(Settings::load().context("Failed to load configuration")?);

    // 2. Initialize logging
    init_logging(&settings)?;
    info!("Starting {} {}...", settings.general.app_name, env!("CARGO_PKG_VERSION"));

    let clock = system_clock();
    let metrics = Arc::new(MetricsCollector::new()?);

    // 3. Open the certificate store and audit log
    let (store, audit) = match &settings.general.data_dir {
        Some(dir) => {
            info!("Using data directory {}", dir.display());
            (CertificateStore::open(dir).await?, AuditLog::open(dir).await?)
        }
        None => {
            warn!("No data directory configured, state is kept in memory only");
            (CertificateStore::in_memory(), AuditLog::in_memory())
        }
    };
    let (store, audit) = (Arc::new(store), Arc::new(audit));
    info!("Loaded {} certificate(s), {} audit entries", store.len(), audit.len());

    // 4. CA adapters
    let gateway = Arc::new(AdapterGateway::from_settings(&settings, clock.clone())?);

    // 5. Agents and deployment
    let lifecycle = &settings.lifecycle;
    let registry = Arc::new(AgentRegistry::new(lifecycle.heartbeat_timeout(), clock.clone()));
    let transport = Arc::new(HttpAgentTransport::new(&settings.agent)?);
    let orchestrator = Arc::new(
        DeploymentOrchestrator::new(
            registry.clone(),
            Arc::new(InstallLedger::new()),
            audit.clone(),
            transport,
            clock.clone(),
            lifecycle.agent_timeout(),
            lifecycle.max_parallel_installs,
        )
        .with_metrics(metrics.clone()),
    );

    // 6. Lifecycle engine
    let engine = Arc::new(
        LifecycleEngine::new(store, audit, gateway, orchestrator, clock, lifecycle.thresholds())
            .with_metrics(metrics.clone()),
    );

    // 7. Background controllers
    let sweep = Arc::new(SweepController::new(engine.clone(), registry.clone()).with_metrics(metrics.clone()));
    sweep.clone().start(lifecycle.sweep_interval());

    let renewal = Arc::new(RenewalController::new(engine.clone(), lifecycle.renewal_window_days));
    if lifecycle.auto_renew {
        renewal.clone().start(lifecycle.renewal_interval());
    } else {
        info!("Automatic renewal disabled");
    }

    let discovery = &settings.discovery;
    let scanner = Arc::new(
        DiscoveryController::new(
            engine.clone(),
            Arc::new(TlsScanner::new(discovery.timeout())),
            discovery.scan_targets()?,
        )
        .with_metrics(metrics.clone()),
    );
    if discovery.enabled {
        scanner.clone().start(discovery.interval());
    } else {
        info!("Certificate discovery disabled");
    }

    // 8. Serve the API until shutdown
    let server = ApiServer::new(ApiState {
        engine,
        registry,
        metrics,
        settings: settings.clone(),
        started_at: Instant::now(),
    })?;
    info!("{} listening on {}", settings.general.app_name, server.address());
    server.start_with_shutdown().await?;

    sweep.stop();
    renewal.stop();
    scanner.stop();
    info!("{} stopped", settings.general.app_name);

    Ok(())
}

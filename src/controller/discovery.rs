use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;
use tracing::{debug, info, warn};

use crate::discovery::{inspect_der, EndpointScanner, ScanTarget};
use crate::error::Error;
use crate::lifecycle::LifecycleEngine;
use crate::store::Certificate;
use crate::telemetry::MetricsCollector;
use crate::types::Result;

/// Periodically scans endpoints and records the certificates they present
pub struct DiscoveryController {
    engine: Arc<LifecycleEngine>,
    scanner: Arc<dyn EndpointScanner>,
    targets: Vec<ScanTarget>,
    metrics: Option<Arc<MetricsCollector>>,
    last_report: Mutex<Option<DiscoveryReport>>,
    running: Mutex<bool>,
}

/// Outcome of one scan pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Endpoints contacted
    pub scanned: usize,
    /// Ids of certificates added to the inventory
    pub discovered: Vec<String>,
    /// Endpoints presenting an already tracked certificate
    pub known: usize,
    /// Endpoint and error
    pub failed: Vec<(String, String)>,
}

impl DiscoveryController {
    pub fn new(engine: Arc<LifecycleEngine>, scanner: Arc<dyn EndpointScanner>, targets: Vec<ScanTarget>) -> Self {
        Self {
            engine,
            scanner,
            targets,
            metrics: None,
            last_report: Mutex::new(None),
            running: Mutex::new(false),
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start scanning every `scan_interval`; the first pass runs immediately
    pub fn start(self: Arc<Self>, scan_interval: Duration) {
        {
            let mut running = self.running.lock();
            if *running {
                return;
            }
            *running = true;
        }

        info!(
            "Starting certificate discovery of {} endpoint(s) every {:?}",
            self.targets.len(),
            scan_interval
        );

        tokio::spawn(async move {
            let mut interval = time::interval(scan_interval);

            loop {
                interval.tick().await;

                if !*self.running.lock() {
                    info!("Certificate discovery stopped");
                    break;
                }

                let report = self.run_once().await;
                if !report.failed.is_empty() {
                    warn!("{} endpoint(s) could not be scanned", report.failed.len());
                }
            }
        });
    }

    /// Stop after the current tick
    pub fn stop(&self) {
        *self.running.lock() = false;
    }

    /// Scan every endpoint once
    pub async fn run_once(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for target in &self.targets {
            report.scanned += 1;
            let outcome = match self.scan(target).await {
                Ok(Some(cert)) => {
                    report.discovered.push(cert.id);
                    "discovered"
                }
                Ok(None) => {
                    report.known += 1;
                    "known"
                }
                Err(e) => {
                    warn!("Scan of {} failed: {}", target, e);
                    report.failed.push((target.to_string(), e.to_string()));
                    "failed"
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_scan(outcome);
            }
        }

        debug!("Discovery report: {:?}", report);
        *self.last_report.lock() = Some(report.clone());
        report
    }

    /// Report of the last completed pass
    pub fn last_report(&self) -> Option<DiscoveryReport> {
        self.last_report.lock().clone()
    }

    async fn scan(&self, target: &ScanTarget) -> Result<Option<Certificate>> {
        let chain = self.scanner.peer_chain(target).await?;
        let leaf = chain
            .first()
            .ok_or_else(|| Error::Transport(format!("{} presented no certificate", target)))?;
        let observed = inspect_der(leaf)?;
        self.engine.record_discovered(&target.to_string(), observed).await
    }
}

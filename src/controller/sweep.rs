use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;
use tracing::{debug, error, info};

use crate::agent::AgentRegistry;
use crate::lifecycle::{LifecycleEngine, SweepReport};
use crate::telemetry::MetricsCollector;
use crate::types::Result;

/// Periodic status sweep
pub struct SweepController {
    /// Lifecycle engine
    engine: Arc<LifecycleEngine>,
    /// Agent registry, for the online gauge
    registry: Arc<AgentRegistry>,
    /// Metrics collector
    metrics: Option<Arc<MetricsCollector>>,
    /// Last completed sweep
    last_report: Mutex<Option<SweepReport>>,
    /// Whether it is running
    running: Mutex<bool>,
}

impl SweepController {
    /// Create a new sweep controller
    pub fn new(engine: Arc<LifecycleEngine>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            engine,
            registry,
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

    /// Start sweeping every `check_interval`
    pub fn start(self: Arc<Self>, check_interval: Duration) {
        // Ensure it only starts once
        {
            let mut running = self.running.lock();
            if *running {
                return;
            }
            *running = true;
        }

        info!("Starting status sweep every {:?}", check_interval);

        tokio::spawn(async move {
            let mut interval = time::interval(check_interval);

            loop {
                interval.tick().await;

                if !*self.running.lock() {
                    info!("Status sweep stopped");
                    break;
                }

                if let Err(e) = self.run_once().await {
                    error!("Status sweep failed: {}", e);
                }
            }
        });
    }

    /// Stop after the current tick
    pub fn stop(&self) {
        *self.running.lock() = false;
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Sweep once and refresh the agent gauge
    pub async fn run_once(&self) -> Result<SweepReport> {
        let report = self.engine.sweep().await?;

        if let Some(metrics) = &self.metrics {
            metrics.set_agents_online(self.registry.online_count());
        }

        debug!("Sweep report: {:?}", report);
        *self.last_report.lock() = Some(report.clone());
        Ok(report)
    }

    /// Report of the last completed sweep
    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report.lock().clone()
    }
}

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::lifecycle::LifecycleEngine;
use crate::types::Actor;

/// Renews certificates entering the renewal window
pub struct RenewalController {
    /// Lifecycle engine
    engine: Arc<LifecycleEngine>,
    /// Days before expiry at which renewal starts
    window_days: i64,
    /// Whether it is running
    running: Mutex<bool>,
}

/// Outcome of one renewal pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Old certificate id and its replacement
    pub renewed: Vec<(String, String)>,
    /// Certificate id and error
    pub failed: Vec<(String, String)>,
}

impl RenewalController {
    /// Create a new renewal controller
    pub fn new(engine: Arc<LifecycleEngine>, window_days: i64) -> Self {
        Self {
            engine,
            window_days,
            running: Mutex::new(false),
        }
    }

    /// Start checking every `check_interval`
    pub fn start(self: Arc<Self>, check_interval: Duration) {
        {
            let mut running = self.running.lock();
            if *running {
                return;
            }
            *running = true;
        }

        info!(
            "Starting automatic renewal every {:?} ({} day window)",
            check_interval, self.window_days
        );

        tokio::spawn(async move {
            let mut interval = time::interval(check_interval);

            loop {
                interval.tick().await;

                if !*self.running.lock() {
                    info!("Automatic renewal stopped");
                    break;
                }

                let report = self.run_once().await;
                if !report.failed.is_empty() {
                    error!("{} renewal(s) failed", report.failed.len());
                }
            }
        });
    }

    /// Stop after the current tick
    pub fn stop(&self) {
        *self.running.lock() = false;
    }

    /// Renew every current candidate once, as the system actor
    pub async fn run_once(&self) -> RenewalReport {
        let actor = Actor::system();
        let mut report = RenewalReport::default();

        let candidates = self.engine.renewal_candidates(self.window_days);
        debug!("{} certificate(s) due for renewal", candidates.len());

        for cert in candidates {
            match self.engine.renew(&actor, &cert.id).await {
                Ok(receipt) => {
                    info!("Renewed {} ({}) as {}", cert.id, cert.common_name, receipt.certificate_id);
                    report.renewed.push((cert.id, receipt.certificate_id));
                }
                Err(e) => {
                    warn!("Failed to renew {} ({}): {}", cert.id, cert.common_name, e);
                    report.failed.push((cert.id, e.to_string()));
                }
            }
        }

        report
    }
}

use std::collections::HashMap;

use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::error::Error;
use crate::types::{CertificateStatus, Result};

/// Metrics collector
pub struct MetricsCollector {
    /// Registry
    registry: Registry,
    /// Issuance attempts by adapter and outcome
    issuances: CounterVec,
    /// Install attempts by outcome
    installs: CounterVec,
    /// Revocation attempts by outcome
    revocations: CounterVec,
    /// Scanned endpoints by outcome
    scans: CounterVec,
    /// Certificates per status, as of the last sweep
    certificates: GaugeVec,
    /// Agents online, as of the last sweep
    agents_online: Gauge,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        // Create metrics
        let issuances = CounterVec::new(
            Opts::new("certfleet_issuances_total", "Certificate issuance attempts"),
            &["adapter", "outcome"],
        )?;
        registry.register(Box::new(issuances.clone()))?;

        let installs = CounterVec::new(
            Opts::new("certfleet_installs_total", "Install attempts per target"),
            &["outcome"],
        )?;
        registry.register(Box::new(installs.clone()))?;

        let revocations = CounterVec::new(
            Opts::new("certfleet_revocations_total", "Revocation attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(revocations.clone()))?;

        let scans = CounterVec::new(
            Opts::new("certfleet_discovery_scans_total", "Discovery scans per endpoint"),
            &["outcome"],
        )?;
        registry.register(Box::new(scans.clone()))?;

        let certificates = GaugeVec::new(
            Opts::new("certfleet_certificates", "Tracked certificates by status"),
            &["status"],
        )?;
        registry.register(Box::new(certificates.clone()))?;

        let agents_online = Gauge::with_opts(Opts::new("certfleet_agents_online", "Agents currently online"))?;
        registry.register(Box::new(agents_online.clone()))?;

        Ok(Self {
            registry,
            issuances,
            installs,
            revocations,
            scans,
            certificates,
            agents_online,
        })
    }

    /// Count an issuance attempt
    pub fn record_issuance(&self, adapter: &str, outcome: &str) {
        self.issuances.with_label_values(&[adapter, outcome]).inc();
    }

    /// Count an install attempt
    pub fn record_install(&self, outcome: &str) {
        self.installs.with_label_values(&[outcome]).inc();
    }

    /// Count a revocation attempt
    pub fn record_revocation(&self, outcome: &str) {
        self.revocations.with_label_values(&[outcome]).inc();
    }

    /// Count a scanned endpoint
    pub fn record_scan(&self, outcome: &str) {
        self.scans.with_label_values(&[outcome]).inc();
    }

    /// Publish per-status counts; statuses absent from `counts` read zero
    pub fn set_status_counts(&self, counts: &HashMap<CertificateStatus, usize>) {
        for status in CertificateStatus::all() {
            let count = counts.get(status).copied().unwrap_or(0);
            self.certificates
                .with_label_values(&[status.as_str()])
                .set(count as f64);
        }
    }

    /// Publish the number of online agents
    pub fn set_agents_online(&self, count: usize) {
        self.agents_online.set(count as f64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics are not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_values() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_issuance("local", "issued");
        metrics.record_install("agent_offline");
        metrics.set_agents_online(3);
        metrics.set_status_counts(&HashMap::from([(CertificateStatus::Active, 2)]));

        let text = metrics.render().unwrap();
        assert!(text.contains("certfleet_issuances_total{adapter=\"local\",outcome=\"issued\"} 1"));
        assert!(text.contains("certfleet_installs_total{outcome=\"agent_offline\"} 1"));
        assert!(text.contains("certfleet_agents_online 3"));
        assert!(text.contains("certfleet_certificates{status=\"active\"} 2"));
        assert!(text.contains("certfleet_certificates{status=\"revoked\"} 0"));
    }
}

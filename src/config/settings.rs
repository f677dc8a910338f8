use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::discovery::ScanTarget;
use crate::error::Error;
use crate::lifecycle::classifier::ExpiryThresholds;
use crate::types::Result;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Lifecycle, sweep and deployment tuning
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Registered CA adapters
    #[serde(default = "default_adapters")]
    pub adapters: Vec<AdapterSettings>,

    /// Agent transport configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Network certificate discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    pub app_name: String,

    /// Log level
    pub log_level: String,

    /// Data directory; certificates are kept in memory only when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: "certfleet".to_string(),
            log_level: "info".to_string(),
            data_dir: Some(PathBuf::from("./data")),
        }
    }
}

/// REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address
    pub listen_addr: String,

    /// Listen port
    pub listen_port: u16,

    /// API path prefix
    pub path_prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            path_prefix: "/api/v1".to_string(),
        }
    }
}

/// Lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Agents are offline once their last check-in is this old (seconds)
    pub heartbeat_timeout_secs: u64,

    /// Timeout applied to each CA adapter call (seconds)
    pub adapter_timeout_secs: u64,

    /// Timeout applied to each agent transport call (seconds)
    pub agent_timeout_secs: u64,

    /// Interval between status sweeps (seconds)
    pub sweep_interval_secs: u64,

    /// Days remaining at or below which a certificate is critical
    pub critical_days: i64,

    /// Days remaining at or below which a certificate is expiring
    pub expiring_days: i64,

    /// Renew automatically when this many days or fewer remain
    pub renewal_window_days: i64,

    /// Enable the renewal scheduler
    pub auto_renew: bool,

    /// Interval between renewal scans (seconds)
    pub renewal_interval_secs: u64,

    /// Upper bound on concurrently dispatched install targets
    pub max_parallel_installs: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 300,
            adapter_timeout_secs: 30,
            agent_timeout_secs: 30,
            sweep_interval_secs: 300,
            critical_days: 7,
            expiring_days: 30,
            renewal_window_days: 30,
            auto_renew: false,
            renewal_interval_secs: 3600,
            max_parallel_installs: 16,
        }
    }
}

impl LifecycleConfig {
    /// Heartbeat timeout
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// CA adapter call timeout
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// Agent transport call timeout
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Renewal scan interval
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    /// Classifier thresholds
    pub fn thresholds(&self) -> ExpiryThresholds {
        ExpiryThresholds {
            critical_days: self.critical_days,
            expiring_days: self.expiring_days,
        }
    }
}

/// CA adapter registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// Adapter id referenced by certificate requests
    pub id: String,

    /// Adapter kind (local, mock)
    pub kind: String,

    /// Issuer common name
    pub issuer: String,

    /// Validity of issued certificates (days)
    pub validity_days: u32,
}

fn default_adapters() -> Vec<AdapterSettings> {
    vec![AdapterSettings {
        id: "local".to_string(),
        kind: "local".to_string(),
        issuer: "certfleet Local CA".to_string(),
        validity_days: 90,
    }]
}

/// Agent transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// URL scheme used to reach agents (http, https)
    pub scheme: String,

    /// Bearer token presented to agents
    pub api_token: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            api_token: None,
        }
    }
}

/// Network certificate discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Enable the discovery scanner
    pub enabled: bool,

    /// Interval between scans (seconds)
    pub interval_secs: u64,

    /// Connect and handshake timeout per endpoint (seconds)
    pub timeout_secs: u64,

    /// Endpoints to scan, as `host:port`
    pub targets: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3600,
            timeout_secs: 5,
            targets: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parsed scan targets
    pub fn scan_targets(&self) -> Result<Vec<ScanTarget>> {
        self.targets.iter().map(|t| t.parse()).collect()
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Enable structured logging
    pub structured_logging: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            structured_logging: true,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            api: ApiConfig::default(),
            lifecycle: LifecycleConfig::default(),
            adapters: default_adapters(),
            agent: AgentConfig::default(),
            telemetry: TelemetryConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Settings {
    /// Load configuration from environment variables and configuration files
    pub fn load() -> Result<Self> {
        use config::{Config, Environment, File};
        use std::env;

        let mut builder = Config::builder();

        // Add default values
        builder = builder.add_source(Config::try_from(&Self::default())?);

        // Add configuration from files
        if let Ok(config_path) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_path));
        } else {
            builder = builder.add_source(File::with_name("config/default").required(false));

            let env = env::var("APP_ENV").unwrap_or_else(|_| "development".into());
            builder = builder.add_source(File::with_name(&format!("config/{}", env)).required(false));
        }

        // Add environment variables
        builder = builder.add_source(Environment::with_prefix("CERTFLEET").separator("__"));

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Get API address string
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api.listen_addr, self.api.listen_port)
    }

    /// Check if configuration is valid
    pub fn validate(&self) -> Result<()> {
        let lifecycle = &self.lifecycle;

        if lifecycle.heartbeat_timeout_secs == 0 {
            return Err(Error::Config("Heartbeat timeout cannot be zero".into()));
        }

        if lifecycle.adapter_timeout_secs == 0 || lifecycle.agent_timeout_secs == 0 {
            return Err(Error::Config("Adapter and agent timeouts cannot be zero".into()));
        }

        if lifecycle.critical_days < 0 || lifecycle.critical_days >= lifecycle.expiring_days {
            return Err(Error::Config(format!(
                "Invalid expiry thresholds: critical_days={} expiring_days={}",
                lifecycle.critical_days, lifecycle.expiring_days
            )));
        }

        if lifecycle.max_parallel_installs == 0 {
            return Err(Error::Config("max_parallel_installs must be at least 1".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for adapter in &self.adapters {
            if adapter.id.is_empty() {
                return Err(Error::Config("Adapter id cannot be empty".into()));
            }
            if !seen.insert(adapter.id.as_str()) {
                return Err(Error::Config(format!("Duplicate adapter id: {}", adapter.id)));
            }
            if adapter.validity_days == 0 {
                return Err(Error::Config(format!("Adapter {} has zero validity", adapter.id)));
            }
            // A fresh certificate must start outside the renewal window
            if i64::from(adapter.validity_days) <= lifecycle.renewal_window_days {
                return Err(Error::Config(format!(
                    "Adapter {} validity of {} days must exceed renewal_window_days={}",
                    adapter.id, adapter.validity_days, lifecycle.renewal_window_days
                )));
            }
        }

        let discovery = &self.discovery;
        if discovery.enabled && (discovery.interval_secs == 0 || discovery.timeout_secs == 0) {
            return Err(Error::Config("Discovery interval and timeout cannot be zero".into()));
        }
        discovery.scan_targets()?;

        Ok(())
    }
}

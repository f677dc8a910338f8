pub mod settings;

pub use settings::{
    AdapterSettings, AgentConfig, ApiConfig, DiscoveryConfig, GeneralConfig, LifecycleConfig, Settings,
    TelemetryConfig,
};

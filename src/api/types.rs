use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentMetrics, AgentRegistry};
use crate::config::Settings;
use crate::lifecycle::LifecycleEngine;
use crate::store::InstallTarget;
use crate::telemetry::MetricsCollector;

/// API state shared between handlers
#[derive(Clone)]
pub struct ApiState {
    /// Lifecycle engine
    pub engine: Arc<LifecycleEngine>,
    /// Agent registry
    pub registry: Arc<AgentRegistry>,
    /// Metrics collector
    pub metrics: Arc<MetricsCollector>,
    /// Application settings
    pub settings: Arc<Settings>,
    /// Process start, for uptime
    pub started_at: Instant,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Success status
    pub success: bool,
    /// Response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a success response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Query of `GET /certificates`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// Status name, case-insensitive
    pub status: Option<String>,
    /// Free text
    pub q: Option<String>,
}

/// Revocation payload
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RevokeBody {
    /// Revocation reason, `unspecified` when absent
    #[serde(default)]
    pub reason: Option<String>,
}

/// Deployment payload
#[derive(Debug, Serialize, Deserialize)]
pub struct DeployBody {
    /// Install targets
    pub targets: Vec<InstallTarget>,
}

/// Single-agent install payload
#[derive(Debug, Serialize, Deserialize)]
pub struct InstallBody {
    /// Certificate to install
    pub certificate_id: String,
    /// Absolute destination path on the agent
    pub path: String,
    /// Command run after the material is written
    #[serde(default)]
    pub reload_cmd: Option<String>,
}

/// Heartbeat payload
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HeartbeatBody {
    /// Host metrics reported by the agent
    #[serde(default)]
    pub metrics: Option<AgentMetrics>,
}

/// Heartbeat acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// Agent id
    pub agent_id: String,
    /// Recorded check-in time
    pub last_checkin: chrono::DateTime<chrono::Utc>,
    /// Seconds until the agent is considered offline
    pub heartbeat_timeout_secs: u64,
}

/// Query of `DELETE /agents/:id`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DecommissionQuery {
    /// Decommission even while certificates are installed
    #[serde(default)]
    pub force: bool,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status
    pub status: String,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime: u64,
    /// Tracked certificates
    pub certificates: usize,
    /// Agents currently online
    pub agents_online: usize,
    /// Registered CA adapters
    pub adapters: Vec<String>,
}

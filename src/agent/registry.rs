//! Agent registry.
//!
//! Liveness is never stored: it is derived from the last check-in whenever an
//! agent is read. The registry lock is synchronous and never held across an
//! await point.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::Error;
use crate::types::Result;

/// Metrics reported with a heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// CPU utilisation, percent
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    /// Resident memory, bytes
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    /// Host uptime, seconds
    #[serde(default)]
    pub uptime_secs: Option<u64>,
    /// Free-form labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// First handshake or re-registration of an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Agent id; a new one is assigned when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Host name
    pub hostname: String,
    /// Address the agent is reachable on (host:port)
    pub address: String,
    /// Agent software version
    #[serde(default)]
    pub version: String,
}

/// Registered agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent id
    pub id: String,
    /// Host name
    pub hostname: String,
    /// Network address (host:port)
    pub address: String,
    /// Agent software version
    pub version: String,
    /// Last heartbeat or registration
    pub last_checkin: DateTime<Utc>,
    /// Certificates currently installed on the agent
    pub managed_count: u64,
    /// Last reported metrics
    pub metrics: AgentMetrics,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    /// Online iff the last check-in is younger than `heartbeat_timeout`
    pub fn is_online(&self, now: DateTime<Utc>, heartbeat_timeout: Duration) -> bool {
        let age = now - self.last_checkin;
        match chrono::Duration::from_std(heartbeat_timeout) {
            Ok(timeout) => age < timeout,
            Err(_) => true,
        }
    }
}

/// Agent with derived liveness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    /// Derived liveness
    pub online: bool,
}

/// Agent registry
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
    heartbeat_timeout: Duration,
    clock: SharedClock,
}

impl AgentRegistry {
    /// Create a new registry
    pub fn new(heartbeat_timeout: Duration, clock: SharedClock) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            heartbeat_timeout,
            clock,
        }
    }

    /// Heartbeat timeout in use
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Create an agent, or refresh and check in an existing one
    pub fn register(&self, registration: AgentRegistration) -> Result<Agent> {
        if registration.hostname.trim().is_empty() {
            return Err(Error::Validation("Agent hostname cannot be empty".into()));
        }
        if registration.address.trim().is_empty() {
            return Err(Error::Validation("Agent address cannot be empty".into()));
        }

        let now = self.clock.now();
        let id = registration
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut agents = self.agents.write();
        let agent = match agents.get_mut(&id) {
            Some(agent) => {
                debug!("Agent {} re-registered from {}", id, registration.address);
                agent.hostname = registration.hostname;
                agent.address = registration.address;
                agent.version = registration.version;
                agent.last_checkin = now;
                agent.clone()
            }
            None => {
                info!("Registered agent {} ({})", id, registration.hostname);
                let agent = Agent {
                    id: id.clone(),
                    hostname: registration.hostname,
                    address: registration.address,
                    version: registration.version,
                    last_checkin: now,
                    managed_count: 0,
                    metrics: AgentMetrics::default(),
                    registered_at: now,
                };
                agents.insert(id, agent.clone());
                agent
            }
        };

        Ok(agent)
    }

    /// Record a check-in; unknown agents are not registered implicitly
    pub fn heartbeat(&self, agent_id: &str, metrics: Option<AgentMetrics>) -> Result<Agent> {
        let now = self.clock.now();
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("Agent not found: {}", agent_id)))?;

        agent.last_checkin = now;
        if let Some(metrics) = metrics {
            agent.metrics = metrics;
        }
        Ok(agent.clone())
    }

    /// Get an agent by id
    pub fn get(&self, agent_id: &str) -> Result<Agent> {
        self.agents
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Agent not found: {}", agent_id)))
    }

    /// Get an agent with derived liveness
    pub fn view(&self, agent_id: &str) -> Result<AgentView> {
        let agent = self.get(agent_id)?;
        Ok(self.to_view(agent, self.clock.now()))
    }

    /// All agents, by id, with derived liveness
    pub fn list(&self) -> Vec<AgentView> {
        let now = self.clock.now();
        let mut agents: Vec<Agent> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents.into_iter().map(|agent| self.to_view(agent, now)).collect()
    }

    /// Derived liveness at `now`
    pub fn liveness(&self, agent: &Agent, now: DateTime<Utc>) -> bool {
        agent.is_online(now, self.heartbeat_timeout)
    }

    /// Number of agents online now
    pub fn online_count(&self) -> usize {
        let now = self.clock.now();
        self.agents
            .read()
            .values()
            .filter(|agent| self.liveness(agent, now))
            .count()
    }

    /// Count one more certificate on the agent
    pub fn increment_managed(&self, agent_id: &str) -> Result<u64> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("Agent not found: {}", agent_id)))?;
        agent.managed_count += 1;
        Ok(agent.managed_count)
    }

    /// Count one certificate less on the agent
    pub fn decrement_managed(&self, agent_id: &str) -> Result<u64> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("Agent not found: {}", agent_id)))?;
        agent.managed_count = agent.managed_count.saturating_sub(1);
        Ok(agent.managed_count)
    }

    /// Remove an agent; refused while it still manages certificates unless forced
    pub fn decommission(&self, agent_id: &str, force: bool) -> Result<Agent> {
        let mut agents = self.agents.write();
        let managed = agents
            .get(agent_id)
            .map(|agent| agent.managed_count)
            .ok_or_else(|| Error::NotFound(format!("Agent not found: {}", agent_id)))?;

        if managed > 0 && !force {
            return Err(Error::Conflict(format!(
                "Agent {} still manages {} certificate(s)",
                agent_id, managed
            )));
        }
        if managed > 0 {
            warn!("Force-decommissioning agent {} with {} certificate(s)", agent_id, managed);
        }

        agents
            .remove(agent_id)
            .ok_or_else(|| Error::NotFound(format!("Agent not found: {}", agent_id)))
    }

    fn to_view(&self, agent: Agent, now: DateTime<Utc>) -> AgentView {
        let online = self.liveness(&agent, now);
        AgentView { agent, online }
    }
}

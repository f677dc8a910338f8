//! Registered hosts that receive certificate material

pub mod registry;

pub use registry::{Agent, AgentMetrics, AgentRegistration, AgentRegistry, AgentView};

//! Pushes certificate material to agents

pub mod orchestrator;
pub mod transport;

pub use orchestrator::{summarize, Deployment, DeploymentHandle, DeploymentOrchestrator};
pub use transport::{AgentTransport, HttpAgentTransport, InstallPayload};

// Install records live in the store; re-exported for callers of this module
pub use crate::store::{FailureKind, InstallOutcome, InstallRecord, InstallTarget};

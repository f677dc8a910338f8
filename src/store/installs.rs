//! Install ledger.
//!
//! Holds every install attempt and enforces at most one pending record per
//! (certificate, agent) pair.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::types::Result;

/// Where to install a certificate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallTarget {
    /// Agent id, resolved at dispatch time
    pub agent_id: String,

    /// Absolute path on the agent's host
    pub path: String,

    /// Command run after the material is written
    #[serde(default)]
    pub reload_cmd: Option<String>,
}

impl InstallTarget {
    pub fn new(agent_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            path: path.into(),
            reload_cmd: None,
        }
    }

    pub fn with_reload(mut self, cmd: impl Into<String>) -> Self {
        self.reload_cmd = Some(cmd.into());
        self
    }
}

/// Install attempt outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// Why an install attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No agent registered under the target's id
    AgentNotFound,
    /// Agent missed its heartbeat window; nothing was sent
    AgentOffline,
    /// Transport call exceeded the agent timeout
    AgentTimeout,
    /// Another install for the same pair is still pending
    InstallInProgress,
    /// Agent rejected or never received the material
    TransmitFailed,
    /// Material written but the reload command failed
    ReloadFailed,
    /// Cancelled before dispatch
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AgentNotFound => "agent_not_found",
            FailureKind::AgentOffline => "agent_offline",
            FailureKind::AgentTimeout => "agent_timeout",
            FailureKind::InstallInProgress => "install_in_progress",
            FailureKind::TransmitFailed => "transmit_failed",
            FailureKind::ReloadFailed => "reload_failed",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One install attempt of a certificate on an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    /// Record identifier
    pub id: String,

    pub certificate_id: String,

    pub agent_id: String,

    /// Target path on the agent
    pub path: String,

    /// Reload command, if any
    pub reload_cmd: Option<String>,

    pub outcome: InstallOutcome,

    /// Failure classification when failed
    pub failure: Option<FailureKind>,

    /// Failure detail when failed
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl InstallRecord {
    fn new(certificate_id: &str, target: &InstallTarget, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            certificate_id: certificate_id.to_string(),
            agent_id: target.agent_id.clone(),
            path: target.path.clone(),
            reload_cmd: target.reload_cmd.clone(),
            outcome: InstallOutcome::Pending,
            failure: None,
            error: None,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == InstallOutcome::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.outcome == InstallOutcome::Failed
    }

    /// Target this record was created for
    pub fn target(&self) -> InstallTarget {
        InstallTarget {
            agent_id: self.agent_id.clone(),
            path: self.path.clone(),
            reload_cmd: self.reload_cmd.clone(),
        }
    }
}

type Pair = (String, String);

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<String, InstallRecord>,
    by_certificate: HashMap<String, Vec<String>>,
    pending: HashMap<Pair, String>,
    installed: HashSet<Pair>,
    // Certificates whose holders were released
    released: HashSet<String>,
}

impl LedgerState {
    fn push(&mut self, record: InstallRecord) {
        self.by_certificate
            .entry(record.certificate_id.clone())
            .or_default()
            .push(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }
}

/// Install ledger
#[derive(Debug, Default)]
pub struct InstallLedger {
    state: Mutex<LedgerState>,
}

impl InstallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a pending record for the pair.
    ///
    /// Fails with `InstallInProgress` if one is already pending.
    pub fn begin(
        &self,
        certificate_id: &str,
        target: &InstallTarget,
        now: DateTime<Utc>,
    ) -> Result<InstallRecord> {
        let mut state = self.state.lock();
        let pair = (certificate_id.to_string(), target.agent_id.clone());

        if state.pending.contains_key(&pair) {
            return Err(Error::InstallInProgress {
                certificate_id: pair.0,
                agent_id: pair.1,
            });
        }

        let record = InstallRecord::new(certificate_id, target, now);
        state.pending.insert(pair, record.id.clone());
        state.push(record.clone());
        Ok(record)
    }

    /// Close a pending record as succeeded.
    ///
    /// The flag is true when this is the first success of the certificate
    /// on the agent. It is never set once the certificate has been released.
    pub fn succeed(&self, record_id: &str, now: DateTime<Utc>) -> Result<(InstallRecord, bool)> {
        let mut state = self.state.lock();
        let record = Self::close(&mut state, record_id, now, InstallOutcome::Succeeded, None, None)?;
        if state.released.contains(&record.certificate_id) {
            return Ok((record, false));
        }
        let first = state
            .installed
            .insert((record.certificate_id.clone(), record.agent_id.clone()));
        Ok((record, first))
    }

    /// Close a pending record as failed
    pub fn fail(
        &self,
        record_id: &str,
        failure: FailureKind,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<InstallRecord> {
        let mut state = self.state.lock();
        Self::close(
            &mut state,
            record_id,
            now,
            InstallOutcome::Failed,
            Some(failure),
            Some(detail.into()),
        )
    }

    /// Record a target that failed before a pending record could be opened
    pub fn reject(
        &self,
        certificate_id: &str,
        target: &InstallTarget,
        failure: FailureKind,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> InstallRecord {
        let mut record = InstallRecord::new(certificate_id, target, now);
        record.outcome = InstallOutcome::Failed;
        record.failure = Some(failure);
        record.error = Some(detail.into());
        record.completed_at = Some(now);

        self.state.lock().push(record.clone());
        record
    }

    /// Forget which agents hold the certificate, returning those agent ids.
    ///
    /// Later successes of the certificate are not tracked as holdings.
    pub fn release(&self, certificate_id: &str) -> Vec<String> {
        let mut state = self.state.lock();
        state.released.insert(certificate_id.to_string());
        let released: Vec<Pair> = state
            .installed
            .iter()
            .filter(|(cert, _)| cert == certificate_id)
            .cloned()
            .collect();

        let mut agents = Vec::with_capacity(released.len());
        for pair in released {
            state.installed.remove(&pair);
            agents.push(pair.1);
        }
        agents.sort();
        agents
    }

    /// All records for a certificate, oldest first
    pub fn records_for(&self, certificate_id: &str) -> Vec<InstallRecord> {
        let state = self.state.lock();
        state
            .by_certificate
            .get(certificate_id)
            .map(|ids| ids.iter().filter_map(|id| state.records.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Distinct targets ever used for a certificate, in first-use order
    pub fn targets_for(&self, certificate_id: &str) -> Vec<InstallTarget> {
        let mut seen = HashSet::new();
        self.records_for(certificate_id)
            .into_iter()
            .filter(|r| seen.insert((r.agent_id.clone(), r.path.clone())))
            .map(|r| r.target())
            .collect()
    }

    /// Get a record by id
    pub fn get(&self, record_id: &str) -> Result<InstallRecord> {
        self.state
            .lock()
            .records
            .get(record_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Install record not found: {}", record_id)))
    }

    /// Agents currently holding the certificate
    pub fn installed_agents(&self, certificate_id: &str) -> Vec<String> {
        let mut agents: Vec<String> = self
            .state
            .lock()
            .installed
            .iter()
            .filter(|(cert, _)| cert == certificate_id)
            .map(|(_, agent)| agent.clone())
            .collect();
        agents.sort();
        agents
    }

    fn close(
        state: &mut LedgerState,
        record_id: &str,
        now: DateTime<Utc>,
        outcome: InstallOutcome,
        failure: Option<FailureKind>,
        error: Option<String>,
    ) -> Result<InstallRecord> {
        let record = state
            .records
            .get_mut(record_id)
            .ok_or_else(|| Error::NotFound(format!("Install record not found: {}", record_id)))?;

        if record.outcome != InstallOutcome::Pending {
            return Err(Error::Conflict(format!("Install record {} already completed", record_id)));
        }

        record.outcome = outcome;
        record.failure = failure;
        record.error = error;
        record.completed_at = Some(now);
        let record = record.clone();

        state
            .pending
            .remove(&(record.certificate_id.clone(), record.agent_id.clone()));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_pending_for_pair_is_refused() {
        let ledger = InstallLedger::new();
        let now = Utc::now();
        let target = InstallTarget::new("agent-a", "/etc/ssl/a.pem");

        let first = ledger.begin("cert-1", &target, now).unwrap();
        let second = ledger.begin("cert-1", &target, now);
        assert!(matches!(second, Err(Error::InstallInProgress { .. })));

        // Other agents and other certificates are unaffected
        assert!(ledger.begin("cert-1", &InstallTarget::new("agent-b", "/x"), now).is_ok());
        assert!(ledger.begin("cert-2", &target, now).is_ok());

        ledger.fail(&first.id, FailureKind::TransmitFailed, "refused", now).unwrap();
        assert!(ledger.begin("cert-1", &target, now).is_ok());
    }

    #[test]
    fn test_first_success_is_reported_once() {
        let ledger = InstallLedger::new();
        let now = Utc::now();
        let target = InstallTarget::new("agent-a", "/etc/ssl/a.pem");

        let record = ledger.begin("cert-1", &target, now).unwrap();
        let (done, first) = ledger.succeed(&record.id, now).unwrap();
        assert!(first);
        assert!(done.succeeded());
        assert!(ledger.succeed(&record.id, now).is_err());

        let again = ledger.begin("cert-1", &target, now).unwrap();
        let (_, first) = ledger.succeed(&again.id, now).unwrap();
        assert!(!first);

        assert_eq!(ledger.release("cert-1"), vec!["agent-a".to_string()]);
        assert!(ledger.release("cert-1").is_empty());
    }

    #[test]
    fn test_success_after_release_is_not_held() {
        let ledger = InstallLedger::new();
        let now = Utc::now();
        let target = InstallTarget::new("agent-a", "/etc/ssl/a.pem");

        let in_flight = ledger.begin("cert-1", &target, now).unwrap();
        assert!(ledger.release("cert-1").is_empty());

        let (done, first) = ledger.succeed(&in_flight.id, now).unwrap();
        assert!(done.succeeded());
        assert!(!first);
        assert!(ledger.installed_agents("cert-1").is_empty());

        // Other certificates on the same agent still count
        let other = ledger.begin("cert-2", &target, now).unwrap();
        assert!(ledger.succeed(&other.id, now).unwrap().1);
    }

    #[test]
    fn test_targets_are_distinct() {
        let ledger = InstallLedger::new();
        let now = Utc::now();
        let a = InstallTarget::new("agent-a", "/etc/ssl/a.pem").with_reload("systemctl reload nginx");
        let b = InstallTarget::new("agent-b", "/etc/ssl/b.pem");

        ledger.reject("cert-1", &a, FailureKind::AgentOffline, "offline", now);
        let r = ledger.begin("cert-1", &a, now).unwrap();
        ledger.succeed(&r.id, now).unwrap();
        ledger.reject("cert-1", &b, FailureKind::AgentNotFound, "unknown", now);

        let targets = ledger.targets_for("cert-1");
        assert_eq!(targets, vec![a, b]);
        assert_eq!(ledger.records_for("cert-1").len(), 3);
    }
}

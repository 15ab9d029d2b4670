//! Structured events emitted by the claim engine.
//!
//! Events are observability only: observers receive them after the engine
//! has decided the outcome and cannot influence it.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::model::{AgentName, ClaimFilters, IssueId, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaimEvent {
    ClaimAttemptStarted {
        agent: AgentName,
        dry_run: bool,
        at: Timestamp,
    },
    IssueClaimed {
        issue_id: IssueId,
        agent: AgentName,
        claimed_at: Timestamp,
    },
    NoIssueAvailable {
        agent: AgentName,
        filters: ClaimFilters,
        checked_at: Timestamp,
    },
    DryRunComplete {
        agent: AgentName,
        issue_id: Option<IssueId>,
        checked_at: Timestamp,
    },
    ClaimFailed {
        agent: AgentName,
        kind: ErrorKind,
        message: String,
        occurred_at: Timestamp,
    },
}

impl ClaimEvent {
    /// Stable event name used as the log message.
    pub fn name(&self) -> &'static str {
        match self {
            ClaimEvent::ClaimAttemptStarted { .. } => "claim_attempt_started",
            ClaimEvent::IssueClaimed { .. } => "issue_claimed",
            ClaimEvent::NoIssueAvailable { .. } => "no_issue_available",
            ClaimEvent::DryRunComplete { .. } => "dry_run_complete",
            ClaimEvent::ClaimFailed { .. } => "claim_failed",
        }
    }
}

/// Receives engine events.
pub trait ClaimObserver: Send + Sync {
    fn observe(&self, event: &ClaimEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ClaimObserver for TracingObserver {
    fn observe(&self, event: &ClaimEvent) {
        let name = event.name();
        match event {
            ClaimEvent::ClaimAttemptStarted { agent, dry_run, .. } => {
                tracing::info!(agent = %agent, dry_run, "{name}");
            }
            ClaimEvent::IssueClaimed {
                issue_id, agent, ..
            } => {
                tracing::info!(agent = %agent, issue_id = %issue_id, "{name}");
            }
            ClaimEvent::NoIssueAvailable { agent, .. } => {
                tracing::info!(agent = %agent, "{name}");
            }
            ClaimEvent::DryRunComplete {
                agent, issue_id, ..
            } => {
                tracing::info!(
                    agent = %agent,
                    found_issue = issue_id.is_some(),
                    issue_id = issue_id.as_ref().map(|id| id.as_str()),
                    "{name}"
                );
            }
            ClaimEvent::ClaimFailed {
                agent,
                kind,
                message,
                ..
            } => {
                tracing::error!(agent = %agent, code = %kind, error = %message, "{name}");
            }
        }
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ClaimEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ClaimEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ClaimEvent::name).collect()
    }
}

impl ClaimObserver for RecordingObserver {
    fn observe(&self, event: &ClaimEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ClaimEvent::IssueClaimed {
            issue_id: IssueId::new("bd-1"),
            agent: AgentName::new("agent-1").unwrap(),
            claimed_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "issue_claimed");
        assert_eq!(json["issue_id"], "bd-1");
        assert_eq!(json["agent"], "agent-1");
    }
}

//! In-process claim store.
//!
//! Applies the same eligibility and ordering rules as the SQLite adapter,
//! using [`Issue::can_be_claimed`] and [`Issue::claim_order`] directly. The
//! whole select-and-update runs under one lock, so concurrent claimers
//! serialize exactly as they would against the database.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::ClaimStore;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{AgentName, ClaimFilters, Issue, IssueId, IssueStatus};

pub struct MemoryClaimStore {
    issues: Mutex<BTreeMap<IssueId, Issue>>,
    clock: Arc<dyn Clock>,
}

impl MemoryClaimStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            issues: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Seed with `issues`, replacing any with the same id.
    pub fn with_issues(clock: Arc<dyn Clock>, issues: impl IntoIterator<Item = Issue>) -> Self {
        let store = Self::new(clock);
        if let Ok(mut map) = store.issues.lock() {
            map.extend(issues.into_iter().map(|issue| (issue.id.clone(), issue)));
        }
        store
    }

    /// Insert or replace an issue.
    pub fn insert(&self, issue: Issue) -> Result<()> {
        self.lock()?.insert(issue.id.clone(), issue);
        Ok(())
    }

    pub fn get(&self, id: &IssueId) -> Result<Option<Issue>> {
        Ok(self.lock()?.get(id).cloned())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<IssueId, Issue>>> {
        self.issues
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))
    }

    fn select(issues: &BTreeMap<IssueId, Issue>, filters: &ClaimFilters) -> Option<IssueId> {
        issues
            .values()
            .filter(|issue| issue.can_be_claimed(filters))
            .min_by(|a, b| a.claim_order(b))
            .map(|issue| issue.id.clone())
    }
}

impl ClaimStore for MemoryClaimStore {
    async fn claim_one_ready(
        &self,
        agent: &AgentName,
        filters: &ClaimFilters,
    ) -> Result<Option<Issue>> {
        let now = self.clock.now();
        let mut issues = self.lock()?;

        let Some(id) = Self::select(&issues, filters) else {
            return Ok(None);
        };

        match issues.get_mut(&id) {
            // Guard on status, same as the SQL update.
            Some(issue) if issue.status == IssueStatus::Open => {
                issue.claim(agent.clone(), now);
                debug!(issue_id = %id, agent = %agent, "claimed in memory");
                Ok(Some(issue.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_one_ready(&self, filters: &ClaimFilters) -> Result<Option<Issue>> {
        let issues = self.lock()?;
        Ok(Self::select(&issues, filters).and_then(|id| issues.get(&id).cloned()))
    }
}

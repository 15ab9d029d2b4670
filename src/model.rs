//! Core data model.
//!
//! An issue is a trackable unit of work living in the shared store. Agents
//! compete for ready issues; the only transition made here is the claim
//! (open → in_progress with an assignee).

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A point in time, always normalized to UTC.
pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// An issue as seen by the claim engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    pub description: String,
    pub status: IssueStatus,
    pub assignee: Option<AgentName>,
    pub priority: Priority,
    pub labels: LabelSet,
    pub issue_type: String,

    /// Materialized by the external dependency index. Read-only here.
    pub blocked: bool,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Issue {
    /// Open and not blocked.
    pub fn is_ready(&self) -> bool {
        self.status.is_claimable() && !self.blocked
    }

    /// Whether this issue satisfies every restriction in `filters`.
    ///
    /// Store-side selection must make exactly the same decision for every
    /// issue; the SQL translation lives in `store::filter`.
    pub fn can_be_claimed(&self, filters: &ClaimFilters) -> bool {
        if !self.is_ready() {
            return false;
        }
        if filters.only_unassigned && self.assignee.is_some() {
            return false;
        }
        if !filters.include_labels.is_empty()
            && !self.labels.contains_all(&filters.include_labels)
        {
            return false;
        }
        if !filters.exclude_labels.is_empty()
            && self.labels.contains_any(&filters.exclude_labels)
        {
            return false;
        }
        if matches!(filters.min_priority, Some(min) if self.priority < min) {
            return false;
        }
        true
    }

    /// Apply the claim transition in place.
    pub fn claim(&mut self, agent: AgentName, now: Timestamp) {
        self.status = IssueStatus::InProgress;
        self.assignee = Some(agent);
        self.updated_at = now;
    }

    /// Selection order among eligible issues: highest priority first, then
    /// oldest, then lowest id. Total, so there are never ties.
    pub fn claim_order(&self, other: &Issue) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Issue identifier as assigned by the issue tracker (e.g. `bd-a1b2`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssueId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Maximum length of an agent name, in characters.
pub const MAX_AGENT_NAME_LEN: usize = 64;

/// A validated agent identity: 1..=64 characters of `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentName(String);

impl AgentName {
    /// Validate an agent name. Surrounding whitespace is trimmed first.
    pub fn new(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "agent name cannot be empty".to_string(),
            ));
        }
        if name.chars().count() > MAX_AGENT_NAME_LEN {
            return Err(Error::InvalidArgument(format!(
                "agent name exceeds maximum length of {MAX_AGENT_NAME_LEN} characters"
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidArgument(
                "agent name contains invalid characters; only letters, digits, underscore and hyphen are allowed"
                    .to_string(),
            ));
        }
        Ok(Self(name.to_string()))
    }

    /// Wrap an assignee read back from the store. Other tools may have
    /// written names this crate would reject, so no validation happens here.
    pub(crate) fn from_store(name: String) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Closed,
    Blocked,
    Archived,
}

impl IssueStatus {
    /// Only open issues can be claimed.
    pub fn is_claimable(self) -> bool {
        self == IssueStatus::Open
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Closed => "closed",
            IssueStatus::Blocked => "blocked",
            IssueStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(IssueStatus::Open),
            "in_progress" => Ok(IssueStatus::InProgress),
            "closed" => Ok(IssueStatus::Closed),
            "blocked" => Ok(IssueStatus::Blocked),
            "archived" => Ok(IssueStatus::Archived),
            _ => Err(Error::Other(format!("unknown issue status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Ordinal priority. Higher = more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i32);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const MEDIUM: Priority = Priority(1);
    pub const HIGH: Priority = Priority(2);

    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::LOW
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Unordered set of labels. Iterates in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>) -> bool {
        self.0.insert(label.into())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    /// True when every label of `other` is present. Vacuously true for an
    /// empty `other`.
    pub fn contains_all(&self, other: &LabelSet) -> bool {
        other.0.is_subset(&self.0)
    }

    /// True when at least one label of `other` is present.
    pub fn contains_any(&self, other: &LabelSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for LabelSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Restrictions an issue must satisfy to be claimed. Every dimension is
/// conjunctive; the default filter set accepts any ready issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFilters {
    pub only_unassigned: bool,
    /// Issue must carry all of these.
    pub include_labels: LabelSet,
    /// Issue must carry none of these.
    pub exclude_labels: LabelSet,
    pub min_priority: Option<Priority>,
}

impl ClaimFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only_unassigned(mut self) -> Self {
        self.only_unassigned = true;
        self
    }

    pub fn include_label(mut self, label: impl Into<String>) -> Self {
        self.include_labels.insert(label);
        self
    }

    pub fn exclude_label(mut self, label: impl Into<String>) -> Self {
        self.exclude_labels.insert(label);
        self
    }

    pub fn min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Reject filter sets that cannot have come from a well-formed request.
    pub fn validate(&self) -> Result<()> {
        for label in self.include_labels.iter().chain(self.exclude_labels.iter()) {
            if label.trim().is_empty() {
                return Err(Error::InvalidArgument(
                    "label filters cannot be empty".to_string(),
                ));
            }
        }
        if let Some(min) = self.min_priority {
            if min.value() < 0 {
                return Err(Error::InvalidArgument(format!(
                    "minimum priority must be non-negative, got {min}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Render a timestamp in the persisted format: RFC 3339, UTC, nanoseconds.
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 at any precision and offset (which covers both the
/// nanosecond UTC layout and the fixed-offset microsecond layout written by
/// older tools) plus SQLite's `YYYY-MM-DD HH:MM:SS[.fff]`, read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

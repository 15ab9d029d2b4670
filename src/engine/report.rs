//! Caller-facing result document.
//!
//! This is what the CLI prints: one JSON object per invocation, always with a
//! `status`, so "no issue available" (ok, `issue: null`) can never be
//! confused with a failure (error, `error: {code, message}`).

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::{ClaimOutcome, ClaimRequest};
use crate::error::{Error, ErrorKind};
use crate::model::{ClaimFilters, Issue, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimResult {
    pub status: ResultStatus,
    pub agent: String,
    pub issue: Option<IssueView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FiltersView>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueView {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub status: String,
    pub assignee: Option<String>,
    pub priority: i32,
    /// Sorted.
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issue_type: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiltersView {
    pub only_unassigned: bool,
    pub include_labels: Vec<String>,
    pub exclude_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorView {
    pub code: ErrorKind,
    pub message: String,
}

impl From<&Issue> for IssueView {
    fn from(issue: &Issue) -> Self {
        Self {
            id: issue.id.to_string(),
            title: issue.title.clone(),
            description: issue.description.clone(),
            status: issue.status.to_string(),
            assignee: issue.assignee.as_ref().map(ToString::to_string),
            priority: issue.priority.value(),
            labels: issue.labels.iter().map(str::to_string).collect(),
            issue_type: issue.issue_type.clone(),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
        }
    }
}

impl From<&ClaimFilters> for FiltersView {
    fn from(filters: &ClaimFilters) -> Self {
        Self {
            only_unassigned: filters.only_unassigned,
            include_labels: filters.include_labels.iter().map(str::to_string).collect(),
            exclude_labels: filters.exclude_labels.iter().map(str::to_string).collect(),
            min_priority: filters.min_priority.map(|p| p.value()),
        }
    }
}

impl ClaimResult {
    pub fn from_outcome(request: &ClaimRequest, outcome: &ClaimOutcome) -> Self {
        let (status, error) = match outcome {
            ClaimOutcome::Failed { kind, message } => (
                ResultStatus::Error,
                Some(ErrorView {
                    code: *kind,
                    message: message.clone(),
                }),
            ),
            _ => (ResultStatus::Ok, None),
        };

        Self {
            status,
            agent: request.agent.to_string(),
            issue: outcome.issue().map(IssueView::from),
            filters: Some(FiltersView::from(&request.filters)),
            dry_run: request.dry_run,
            error,
        }
    }

    /// A failure that happened before a request could be built (bad agent
    /// name, missing workspace, unopenable store).
    pub fn failure(agent: impl Into<String>, error: &Error) -> Self {
        Self {
            status: ResultStatus::Error,
            agent: agent.into(),
            issue: None,
            filters: None,
            dry_run: false,
            error: Some(ErrorView {
                code: error.kind(),
                message: error.to_string(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn render_human(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Error: [{}] {}\n", error.code, error.message);
        }

        let Some(issue) = &self.issue else {
            return format!("No issue available for agent '{}'\n", self.agent);
        };

        let verb = if self.dry_run { "Would claim" } else { "Claimed" };
        let mut out = format!("{verb} issue {}: {}\n", issue.id, issue.title);
        let _ = writeln!(out, "  Status: {}", issue.status);
        if let Some(assignee) = &issue.assignee {
            let _ = writeln!(out, "  Assignee: {assignee}");
        }
        let _ = writeln!(out, "  Priority: {}", issue.priority);
        if !issue.labels.is_empty() {
            let _ = writeln!(out, "  Labels: {}", issue.labels.join(", "));
        }
        out
    }
}

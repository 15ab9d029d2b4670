//! Claim span helpers.

use tracing::Span;

use crate::model::AgentName;

/// Span covering one engine invocation.
///
/// `claim.outcome` and `claim.issue_id` start empty; fill them with
/// [`record_outcome`].
pub fn start_claim_span(agent: &AgentName, dry_run: bool) -> Span {
    tracing::info_span!(
        "claim.execute",
        "claim.agent" = %agent,
        "claim.dry_run" = dry_run,
        "claim.outcome" = tracing::field::Empty,
        "claim.issue_id" = tracing::field::Empty,
    )
}

/// Span covering one store transaction attempt.
pub fn transaction_span(operation: &'static str, attempt: u32) -> Span {
    tracing::debug_span!(
        "claim.transaction",
        "claim.operation" = operation,
        "claim.attempt" = attempt,
    )
}

pub fn record_outcome(span: &Span, outcome: &str, issue_id: Option<&str>) {
    span.record("claim.outcome", outcome);
    if let Some(id) = issue_id {
        span.record("claim.issue_id", id);
    }
}

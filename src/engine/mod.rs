//! Claim engine: runs one claim or dry-run against a [`ClaimStore`] and
//! turns whatever happens into a terminal [`ClaimOutcome`].

pub mod report;

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, Span};

use crate::clock::Clock;
use crate::error::{Error, ErrorKind, Result};
use crate::event::{ClaimEvent, ClaimObserver, TracingObserver};
use crate::model::{AgentName, ClaimFilters, Issue};
use crate::store::ClaimStore;
use crate::telemetry::claim::{record_outcome, start_claim_span};
use crate::telemetry::metrics;

pub use report::{ClaimResult, ErrorView, FiltersView, IssueView, ResultStatus};

/// One invocation of the engine.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub agent: AgentName,
    pub filters: ClaimFilters,
    pub dry_run: bool,
    /// Upper bound on the whole store call, retries included.
    pub deadline: Option<Duration>,
}

impl ClaimRequest {
    pub fn new(agent: AgentName) -> Self {
        Self {
            agent,
            filters: ClaimFilters::default(),
            dry_run: false,
            deadline: None,
        }
    }

    pub fn filters(mut self, filters: ClaimFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Terminal result of [`ClaimEngine::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The issue now belongs to the requesting agent.
    Claimed(Issue),
    /// Dry-run: the issue a claim would take, unmodified.
    Preview(Issue),
    /// Nothing eligible. Not an error.
    NoneAvailable,
    Failed { kind: ErrorKind, message: String },
}

impl ClaimOutcome {
    pub fn issue(&self) -> Option<&Issue> {
        match self {
            ClaimOutcome::Claimed(issue) | ClaimOutcome::Preview(issue) => Some(issue),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ClaimOutcome::Failed { .. })
    }

    /// Metric and span label.
    pub fn label(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed(_) => "claimed",
            ClaimOutcome::Preview(_) => "preview",
            ClaimOutcome::NoneAvailable => "none",
            ClaimOutcome::Failed { .. } => "error",
        }
    }
}

impl From<Error> for ClaimOutcome {
    fn from(err: Error) -> Self {
        ClaimOutcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub struct ClaimEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn ClaimObserver>,
}

impl<S: ClaimStore> ClaimEngine<S> {
    /// Engine reporting events through `tracing`.
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ClaimObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `request` to a terminal outcome. Never panics on store failure
    /// and never reports an empty queue as an error.
    pub async fn execute(&self, request: &ClaimRequest) -> ClaimOutcome {
        let span = start_claim_span(&request.agent, request.dry_run);
        self.run(request, &span).instrument(span.clone()).await
    }

    async fn run(&self, request: &ClaimRequest, span: &Span) -> ClaimOutcome {
        let started = Instant::now();
        metrics::claim_attempts().add(1, &[KeyValue::new("dry_run", request.dry_run)]);

        self.observer.observe(&ClaimEvent::ClaimAttemptStarted {
            agent: request.agent.clone(),
            dry_run: request.dry_run,
            at: self.clock.now(),
        });

        let result = match request.filters.validate() {
            Ok(()) => self.call_store(request).await,
            Err(err) => Err(err),
        };

        let outcome = match result {
            Ok(Some(issue)) if request.dry_run => ClaimOutcome::Preview(issue),
            Ok(Some(issue)) => ClaimOutcome::Claimed(issue),
            Ok(None) => ClaimOutcome::NoneAvailable,
            Err(err) => ClaimOutcome::from(err),
        };

        self.report(request, &outcome, span, started);
        outcome
    }

    async fn call_store(&self, request: &ClaimRequest) -> Result<Option<Issue>> {
        let call = async {
            if request.dry_run {
                self.store.find_one_ready(&request.filters).await
            } else {
                self.store
                    .claim_one_ready(&request.agent, &request.filters)
                    .await
            }
        };

        match request.deadline {
            // Dropping the timed-out call drops its open transaction, which
            // rolls back.
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| Error::DeadlineExceeded(limit))?,
            None => call.await,
        }
    }

    fn report(&self, request: &ClaimRequest, outcome: &ClaimOutcome, span: &Span, started: Instant) {
        let agent = request.agent.clone();
        let now = self.clock.now();

        let event = match outcome {
            ClaimOutcome::Claimed(issue) => ClaimEvent::IssueClaimed {
                issue_id: issue.id.clone(),
                agent,
                claimed_at: issue.updated_at,
            },
            ClaimOutcome::Preview(issue) => ClaimEvent::DryRunComplete {
                agent,
                issue_id: Some(issue.id.clone()),
                checked_at: now,
            },
            ClaimOutcome::NoneAvailable if request.dry_run => ClaimEvent::DryRunComplete {
                agent,
                issue_id: None,
                checked_at: now,
            },
            ClaimOutcome::NoneAvailable => ClaimEvent::NoIssueAvailable {
                agent,
                filters: request.filters.clone(),
                checked_at: now,
            },
            ClaimOutcome::Failed { kind, message } => ClaimEvent::ClaimFailed {
                agent,
                kind: *kind,
                message: message.clone(),
                occurred_at: now,
            },
        };
        self.observer.observe(&event);

        let label = outcome.label();
        record_outcome(span, label, outcome.issue().map(|issue| issue.id.as_str()));

        let mut attrs = vec![KeyValue::new("outcome", label)];
        if let ClaimOutcome::Failed { kind, .. } = outcome {
            attrs.push(KeyValue::new("code", kind.code()));
        }
        metrics::claim_outcomes().add(1, &attrs);
        metrics::claim_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("outcome", label)],
        );
    }
}

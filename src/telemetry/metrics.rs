//! Metric instrument factories.
//!
//! Instruments come from the `"bd-claim"` meter on the globally registered
//! `MeterProvider`; without an OTLP endpoint that is the no-op provider.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("bd-claim")
}

/// Counter: claim engine invocations.
/// Labels: `dry_run`.
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("claim.attempts")
        .with_description("Number of claim engine invocations")
        .build()
}

/// Counter: terminal claim outcomes.
/// Labels: `outcome` ("claimed" | "preview" | "none" | "error"), `code`.
pub fn claim_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("claim.outcomes")
        .with_description("Number of claim outcomes by kind")
        .build()
}

/// Counter: backoffs scheduled after a busy attempt. The final busy attempt
/// gives up instead and is not counted.
/// Labels: `attempt` (the attempt that failed).
pub fn busy_retries() -> Counter<u64> {
    meter()
        .u64_counter("claim.busy_retries")
        .with_description("Retries scheduled after lock contention")
        .build()
}

/// Histogram: end-to-end engine duration.
/// Labels: `outcome`.
pub fn claim_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("claim.duration_ms")
        .with_description("Claim duration in milliseconds")
        .with_unit("ms")
        .build()
}

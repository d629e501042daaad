//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall. Operators install their own
//! `metrics` recorder (e.g. prometheus); without a recorder installed, all
//! metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).

/// Requests answered with an `X-Cache-Status` header.
///
/// Labels: `status` (the header value: "HIT", "MISS", "EXPIRED", "MUTATION",
/// "OPTIONS", or "BLOCKED" for rejected webhook callers). Granted webhook
/// calls carry no cache status and are counted by [`AUTH_DECISIONS_TOTAL`].
pub const REQUESTS_TOTAL: &str = "heimdall_requests_total";

/// Calls made to the GraphQL backend.
///
/// Labels: `outcome` ("ok" | "error_status" | "timeout" | "transport_error").
pub const BACKEND_REQUESTS_TOTAL: &str = "heimdall_backend_requests_total";

/// Backend call duration in seconds, including body download.
pub const BACKEND_DURATION_SECONDS: &str = "heimdall_backend_duration_seconds";

/// Completed background cache writes.
pub const CACHE_WRITES_TOTAL: &str = "heimdall_cache_writes_total";

/// Authorization webhook decisions.
///
/// Labels: `decision` ("granted" | "anonymous" | "blocked").
pub const AUTH_DECISIONS_TOTAL: &str = "heimdall_auth_decisions_total";

//! Structured lifecycle events for collection sessions.
//!
//! Every function here emits one event with a stable `event` field so log
//! pipelines can filter on it (`event=session.transition`). Detected error
//! events are logged at `error` level, warnings at `warn`, the rest at
//! `info`.

use tracing::{error, info, warn};

use crate::domain::{ErrorEvent, SessionState, SessionWarning};

/// Span carrying the session id and namespace.
///
/// Attach it to the session future with `tracing::Instrument` so every
/// event logged by the session and its tasks is tagged:
///
/// ```ignore
/// run_session(session).instrument(session_span(&id, "miniudm")).await
/// ```
pub fn session_span(session_id: &str, namespace: &str) -> tracing::Span {
    tracing::info_span!(
        "symptom.session",
        session_id = %session_id,
        namespace = %namespace
    )
}

pub fn emit_session_started(session_id: &str, namespace: &str, fragments: &[String]) {
    info!(
        event = "session.started",
        session_id = %session_id,
        namespace = %namespace,
        fragments = %fragments.join(" "),
    );
}

pub fn emit_session_transition(session_id: &str, from: SessionState, to: SessionState) {
    info!(
        event = "session.transition",
        session_id = %session_id,
        from = %from,
        to = %to,
    );
}

/// A keyword match or source failure arrived at the aggregator.
pub fn emit_error_event(event: &ErrorEvent) {
    error!(
        event = "session.error_event",
        timestamp = %event.timestamp.to_rfc3339(),
        source = %event.source,
        message = %event.message,
    );
}

pub fn emit_session_warning(session_id: &str, warning: &SessionWarning) {
    warn!(event = "session.warning", session_id = %session_id, warning = %warning);
}

pub fn emit_session_closed(
    session_id: &str,
    duration_ms: u64,
    total_events: u64,
    warnings: usize,
    timed_out: bool,
) {
    info!(
        event = "session.closed",
        session_id = %session_id,
        duration_ms = duration_ms,
        total_events = total_events,
        warnings = warnings,
        timed_out = timed_out,
    );
}

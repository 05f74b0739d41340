// Request Header Resolution
//
// Pure and infallible: malformed values fall back to defaults, never to an
// error. Resolution happens exactly once per call; the resulting deadline
// is absolute and is never recomputed or extended afterwards.

use std::collections::HashMap;

/// Header names acknowledged by the engine.
pub mod names {
    pub const CORRELATION_ID: &str = "correlation-id";
    /// Absolute deadline, epoch seconds. Takes precedence over the timeout.
    pub const REQUEST_DEADLINE: &str = "request-deadline";
    /// Relative timeout in seconds, clamped to `1..=max_request_time`.
    pub const REQUEST_TIMEOUT: &str = "request-timeout";
    pub const ABORT_ON_ERROR: &str = "abort-on-error";
    /// Response only: set when a stored session changed or was just loaded.
    pub const SESSION_ID: &str = "session-id";
}

/// Raw transport headers as handed over by the frontend.
pub type HeaderMap = HashMap<String, String>;

/// Per-call execution headers, derived once and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    pub correlation_id: String,
    /// Absolute deadline, epoch seconds.
    pub deadline: i64,
    pub abort_on_error: bool,
}

impl RequestHeaders {
    /// Derive execution headers from raw transport headers.
    ///
    /// `now` is injected so resolution stays a pure function of its inputs
    /// (frozen-clock tests rely on this). Only the default correlation token
    /// draws randomness.
    pub fn resolve(
        raw: &HeaderMap,
        now: i64,
        default_request_time: i64,
        max_request_time: i64,
    ) -> Self {
        let deadline = match parse_i64(raw.get(names::REQUEST_DEADLINE)) {
            Some(absolute) => absolute.clamp(now, now + max_request_time),
            None => {
                let timeout = parse_i64(raw.get(names::REQUEST_TIMEOUT))
                    .unwrap_or(default_request_time)
                    .clamp(1, max_request_time);
                now + timeout + 1
            }
        };
        let correlation_id = raw
            .get(names::CORRELATION_ID)
            .cloned()
            .unwrap_or_else(random_token);
        let abort_on_error = parse_bool(raw.get(names::ABORT_ON_ERROR), false);
        Self {
            correlation_id,
            deadline,
            abort_on_error,
        }
    }
}

fn parse_i64(value: Option<&String>) -> Option<i64> {
    value.and_then(|v| v.trim().parse::<i64>().ok())
}

fn parse_bool(value: Option<&String>, default: bool) -> bool {
    match value {
        Some(v) => v.eq_ignore_ascii_case("true"),
        None => default,
    }
}

/// Eight lowercase hex chars.
fn random_token() -> String {
    format!("{:08x}", rand::random::<u32>())
}

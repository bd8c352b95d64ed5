//! Session counters emitted through the `metrics` facade
//!
//! - `session_requests_total` (counter): label `class`
//! - `session_refresh_total` (counter): label `outcome`
//! - `session_forced_logout_total` (counter): label `reason`
//!
//! Without an installed recorder these calls are no-ops.

use crate::classify::ResponseClass;

pub fn record_response(class: ResponseClass) {
    metrics::counter!("session_requests_total", "class" => class.label()).increment(1);
}

pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_forced_logout(reason: &'static str) {
    metrics::counter!("session_forced_logout_total", "reason" => reason).increment(1);
}

//! Metrics module
//!
//! Prometheus counters for negotiation attempts, fallbacks and logins.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    // Negotiation metrics
    pub static ref NEGOTIATE_ATTEMPTS: CounterVec = register_counter_vec!(
        "negotiate_attempts_total",
        "Negotiation attempts by mechanism and result",
        &["mechanism", "result"]
    ).unwrap();

    pub static ref NEGOTIATE_FALLBACKS: CounterVec = register_counter_vec!(
        "negotiate_fallbacks_total",
        "Logins handed to the fallback source",
        &["reason"]
    ).unwrap();

    pub static ref NEGOTIATE_CHALLENGES: Counter = register_counter!(
        "negotiate_challenges_total",
        "401 Negotiate challenges sent"
    ).unwrap();

    // Login metrics
    pub static ref LOGINS_TOTAL: CounterVec = register_counter_vec!(
        "negotiate_logins_total",
        "Completed logins by authenticating source",
        &["source"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "negotiate_request_duration_seconds",
        "Request duration in seconds",
        &["endpoint"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "negotiate_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record one negotiation attempt
///
/// # Arguments
/// * `mechanism` - `negotiate`, `basic`, `other` or `none`
/// * `result` - `success`, `failure`, `skipped` or `challenge`
pub fn record_attempt(mechanism: &str, result: &str) {
    NEGOTIATE_ATTEMPTS
        .with_label_values(&[mechanism, result])
        .inc();
}

/// Record a hand-off to the fallback source
pub fn record_fallback(reason: &str) {
    NEGOTIATE_FALLBACKS.with_label_values(&[reason]).inc();
}

/// Record a Negotiate challenge
pub fn record_challenge() {
    NEGOTIATE_CHALLENGES.inc();
}

/// Record a completed login
pub fn record_login(source: &str) {
    LOGINS_TOTAL.with_label_values(&[source]).inc();
}

/// Record request duration
pub fn record_request_duration(endpoint: &str, duration_secs: f64) {
    REQUEST_DURATION
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Record an error raised by a fallback source
pub fn record_fallback_error(source: &str) {
    ERRORS_TOTAL
        .with_label_values(&[&format!("fallback:{}", source)])
        .inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

use crate::models::Classification;
use tracing::trace;

// Lightweight metrics helpers emitted as trace events; a collector can
// aggregate them from the log stream.

pub fn inc_poll(site: &str) {
    trace!(target = "talaria.metrics", site = site, "monitor_polls_inc");
}

pub fn checkout_step_elapsed(step: &'static str, elapsed_ms: u128) {
    trace!(
        target = "talaria.metrics",
        step = step,
        elapsed_ms = elapsed_ms as u64,
        "checkout_step_elapsed"
    );
}

pub fn record_outcome(classification: Classification) {
    trace!(
        target = "talaria.metrics",
        ?classification,
        success = classification.is_success(),
        "checkout_outcomes_inc"
    );
}

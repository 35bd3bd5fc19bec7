use tracing::trace;

// Trace-level counters. The embedding service owns the real exporter,
// so these stay off the metrics-backend dependency entirely.

pub fn retry_scheduled(attempt: u32, delay_ms: u64) {
    trace!(
        target = "repricer.metrics",
        attempt = attempt,
        delay_ms = delay_ms,
        "retry_scheduled"
    );
}

pub fn sku_processed(action: &'static str) {
    trace!(
        target = "repricer.metrics",
        action = action,
        "sku_processed"
    );
}

pub fn batch_finished(status: &'static str, processed: u32) {
    trace!(
        target = "repricer.metrics",
        status = status,
        processed = processed,
        "batch_finished"
    );
}

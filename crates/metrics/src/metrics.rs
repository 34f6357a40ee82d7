use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // ADMISSION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Admission decisions by outcome and the bucket that denied (if any)
    pub static ref ADMISSIONS: IntCounterVec = register_int_counter_vec!(
        "notify_guard_admissions_total",
        "Total admission decisions",
        &["decision", "scope"]
    )
    .unwrap();

    /// Requests let through without a limit check
    pub static ref FAIL_OPEN: IntCounterVec = register_int_counter_vec!(
        "notify_guard_fail_open_total",
        "Total requests admitted because limits could not be evaluated",
        &["reason"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // DELIVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Final dispatch outcomes per channel
    pub static ref DELIVERIES: IntCounterVec = register_int_counter_vec!(
        "notify_guard_deliveries_total",
        "Total dispatches by outcome",
        &["outcome", "channel"]
    )
    .unwrap();

    /// End-to-end dispatch latency, retries included
    pub static ref DELIVERY_LATENCY: HistogramVec = register_histogram_vec!(
        "notify_guard_delivery_latency_ms",
        "Dispatch latency in milliseconds",
        &["channel"],
        vec![5.0, 25.0, 100.0, 250.0, 1000.0, 2500.0, 10000.0, 30000.0, 120000.0]
    )
    .unwrap();

    /// Provider attempts that failed or timed out
    pub static ref RETRY_ATTEMPTS_FAILED: IntCounterVec = register_int_counter_vec!(
        "notify_guard_retry_attempts_failed_total",
        "Total failed delivery attempts",
        &["provider_id"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // CIRCUIT BREAKER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub static ref CIRCUIT_OPENED: IntCounterVec = register_int_counter_vec!(
        "notify_guard_circuit_opened_total",
        "Total times a provider circuit opened",
        &["provider_id"]
    )
    .unwrap();

    /// 1 while the provider circuit is open
    pub static ref CIRCUIT_OPEN: IntGaugeVec = register_int_gauge_vec!(
        "notify_guard_circuit_open",
        "Whether the provider circuit is currently open",
        &["provider_id"]
    )
    .unwrap();
}

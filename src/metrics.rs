use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounterVec, IntGauge, TextEncoder, register_histogram,
    register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_requests_total",
        "Relay requests received, by operation",
        &["operation"]
    )
    .expect("relay_requests_total registers once");
    pub static ref REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "relay_rejections_total",
        "Requests answered with an error, by reason",
        &["reason"]
    )
    .expect("relay_rejections_total registers once");
    pub static ref DOWNSTREAM_LATENCY: Histogram = register_histogram!(
        "relay_downstream_latency_seconds",
        "Latency of downstream webhook calls in seconds"
    )
    .expect("relay_downstream_latency_seconds registers once");
    pub static ref TRACKED_KEYS: IntGauge = register_int_gauge!(
        "relay_rate_limit_tracked_keys",
        "Keys currently held by the rate limiter"
    )
    .expect("relay_rate_limit_tracked_keys registers once");
}

// Render the default registry in text exposition format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

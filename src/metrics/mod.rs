//! Prometheus metrics exposed by the sniffer.
//!
//! All metrics live in a custom registry carrying the `kafka_sniffer`
//! namespace so nothing collides with other libraries using the default
//! registry. Registration failures are non-fatal: a duplicate registration
//! is logged and the unregistered handle is used as a fallback, so a second
//! initialisation can never prevent startup.
//!
//! Monotonic counters are declared here as statics. The expiring relation
//! gauges are also declared here but their lifecycle (per-label-set TTL) is
//! owned by [`storage::Storage`].

pub mod storage;

pub use storage::Storage;

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Metric namespace prefix.
pub const NAMESPACE: &str = "kafka_sniffer";

/// Registry gathered by the exposition endpoint.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some(NAMESPACE.to_string()), None).unwrap_or_else(|_| Registry::new())
});

fn register_int_counter_vec_safe(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter =
        IntCounterVec::new(Opts::new(name, help), labels).expect("metric opts should be valid");
    if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "metric already registered, reusing collector");
    }
    counter
}

fn register_int_gauge_vec_safe(name: &str, help: &str, labels: &[&str]) -> IntGaugeVec {
    let gauge =
        IntGaugeVec::new(Opts::new(name, help), labels).expect("metric opts should be valid");
    if let Err(e) = REGISTRY.register(Box::new(gauge.clone())) {
        warn!(name, error = %e, "metric already registered, reusing collector");
    }
    gauge
}

/// Requests by type and version.
pub static REQUESTS_COUNT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec_safe(
        "typed_requests_total",
        "Total requests to kafka by type and version",
        &["client_ip", "request_type", "version"],
    )
});

/// Record batches carried by produce requests.
pub static PRODUCER_BATCH_LEN: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec_safe(
        "producer_batch_length",
        "Length of producer request batch to kafka",
        &["client_ip"],
    )
});

/// Record batch bytes carried by produce requests.
pub static PRODUCER_BATCH_SIZE: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec_safe(
        "producer_batch_size",
        "Total size of a batch in producer request to kafka",
        &["client_ip"],
    )
});

/// Partition blocks requested by fetch requests.
pub static BLOCKS_REQUESTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec_safe(
        "blocks_requested",
        "Total partition blocks requested in fetch requests",
        &["client_ip"],
    )
});

/// Client software reported through ApiVersions v3+.
pub static CLIENT_SOFTWARE_INFO: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec_safe(
        "client_software_info",
        "Information about client software connecting to kafka",
        &["client_ip", "software_name", "software_version"],
    )
});

/// Authentication attempts with a recovered identity.
pub static AUTHENTICATION_INFO: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec_safe(
        "authentication_info",
        "Information about client authentication to kafka",
        &["client_ip", "mechanism", "username"],
    )
});

/// Expiring gauge: authenticated user activity.
pub static AUTH_USER_ACTIVITY: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec_safe(
        "auth_user_activity",
        "Activity tracking for authenticated users",
        &["client_ip", "username", "mechanism"],
    )
});

/// Expiring gauge: producer/topic relation.
pub static PRODUCER_TOPIC_RELATION: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec_safe(
        "producer_topic_relation_info",
        "Relation information between producer and topic",
        &["client_ip", "topic"],
    )
});

/// Expiring gauge: consumer/topic relation.
pub static CONSUMER_TOPIC_RELATION: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec_safe(
        "consumer_topic_relation_info",
        "Relation information between consumer and topic",
        &["client_ip", "topic"],
    )
});

/// Expiring gauge: producer/user/topic relation.
pub static PRODUCER_USER_TOPIC: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec_safe(
        "producer_user_topic_info",
        "Relationship between user, client and produced topics",
        &["client_ip", "username", "topic"],
    )
});

/// Expiring gauge: consumer/user/topic relation.
pub static CONSUMER_USER_TOPIC: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec_safe(
        "consumer_user_topic_info",
        "Relationship between user, client and consumed topics",
        &["client_ip", "username", "topic"],
    )
});

/// Expiring gauge: active connections per client.
pub static ACTIVE_CONNECTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec_safe(
        "active_connections_total",
        "Contains total count of active connections",
        &["client_ip"],
    )
});

/// Encode every registered metric in the Prometheus text format.
pub fn encode_text() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        warn!(error = %e, "failed to encode metrics");
        return String::from("# encoding error\n");
    }
    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# encoding error\n"))
}

//! End-to-end scenarios driving the per-flow orchestrator over in-memory
//! byte streams and asserting on the exposed telemetry.

use bytes::{BufMut, BytesMut};
use kafka_sniffer::auth::AuthTracker;
use kafka_sniffer::metrics::{self, Storage};
use kafka_sniffer::stream::KafkaStream;
use std::sync::Arc;
use std::time::Duration;

const MAX_REQUEST_SIZE: usize = 100 * 1024 * 1024;

fn tracker() -> Arc<AuthTracker> {
    Arc::new(AuthTracker::new(
        Duration::from_secs(300),
        Duration::from_secs(1800),
    ))
}

async fn run_flow(storage: &Arc<Storage>, auth: &Arc<AuthTracker>, src: &str, wire: Vec<u8>) {
    let stream = KafkaStream::new(
        src.to_string(),
        "10.0.0.99:9092".to_string(),
        Arc::clone(storage),
        Arc::clone(auth),
        MAX_REQUEST_SIZE,
        false,
    );
    stream.run(wire.as_slice()).await;
}

/// Wrap a request body (starting at correlation_id) into a wire frame.
fn frame(api_key: i16, api_version: i16, client_id: &str, body: &[u8]) -> Vec<u8> {
    let mut inner = BytesMut::new();
    inner.put_i16(api_key);
    inner.put_i16(api_version);
    inner.put_i32(1); // correlation id
    inner.put_i16(client_id.len() as i16);
    inner.put_slice(client_id.as_bytes());
    inner.put_slice(body);

    let mut out = BytesMut::new();
    out.put_i32(inner.len() as i32);
    out.put_slice(&inner);
    out.to_vec()
}

fn fetch_v11_body(topics: &[(&str, &[i32])]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_i32(-1); // replica id
    buf.put_i32(500); // max wait
    buf.put_i32(1); // min bytes
    buf.put_i32(1 << 20); // max bytes (v3+)
    buf.put_i8(0); // isolation (v4+)
    buf.put_i32(0); // session id (v7+)
    buf.put_i32(-1); // session epoch (v7+)
    buf.put_i32(topics.len() as i32);
    for (topic, partitions) in topics {
        buf.put_i16(topic.len() as i16);
        buf.put_slice(topic.as_bytes());
        buf.put_i32(partitions.len() as i32);
        for partition in *partitions {
            buf.put_i32(*partition);
            buf.put_i32(-1); // leader epoch (v9+)
            buf.put_i64(0); // fetch offset
            buf.put_i64(0); // log start offset (v5+)
            buf.put_i32(1 << 16); // partition max bytes
        }
    }
    buf.put_i32(0); // forgotten topics (v7+)
    buf.put_i16(0); // rack id (v11+)
    buf.to_vec()
}

fn produce_v3_body(topic: &str, records: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_i16(-1); // transactional id
    buf.put_i16(1); // acks
    buf.put_i32(30_000); // timeout
    buf.put_i32(1); // topic count
    buf.put_i16(topic.len() as i16);
    buf.put_slice(topic.as_bytes());
    buf.put_i32(1); // partition count
    buf.put_i32(0); // partition
    buf.put_i32(records.len() as i32); // record set
    buf.put_slice(records);
    buf.to_vec()
}

fn sasl_authenticate_v1_body(token: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_i32(token.len() as i32);
    buf.put_slice(token);
    buf.to_vec()
}

fn sasl_handshake_body(mechanism: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_i16(mechanism.len() as i16);
    buf.put_slice(mechanism.as_bytes());
    buf.to_vec()
}

/// Value of a metric sample in the exposition text, matched by metric name
/// and label fragments.
fn sample_value(name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let text = metrics::encode_text();
    for line in text.lines() {
        if !line.starts_with(&format!("kafka_sniffer_{name}{{")) {
            continue;
        }
        if labels
            .iter()
            .all(|(k, v)| line.contains(&format!("{k}=\"{v}\"")))
        {
            return line.split_whitespace().last()?.parse().ok();
        }
    }
    None
}

#[tokio::test]
async fn plain_auth_via_sasl_authenticate() {
    let storage = Arc::new(Storage::new(Duration::from_secs(900)));
    let auth = tracker();

    // \0user1\0pass1
    let token: &[u8] = &[
        0x00, 0x75, 0x73, 0x65, 0x72, 0x31, 0x00, 0x70, 0x61, 0x73, 0x73, 0x31,
    ];
    let wire = frame(36, 1, "producer-app", &sasl_authenticate_v1_body(token));
    run_flow(&storage, &auth, "203.0.113.10:40001", wire).await;

    assert_eq!(
        sample_value(
            "authentication_info",
            &[
                ("client_ip", "203.0.113.10"),
                ("mechanism", "PLAIN"),
                ("username", "user1"),
            ],
        ),
        Some(1.0)
    );
    assert_eq!(auth.lookup("203.0.113.10:40001").as_deref(), Some("user1"));
    // The password never shows up in any label.
    assert!(!metrics::encode_text().contains("pass1"));
}

#[tokio::test]
async fn raw_sasl_token_after_handshake() {
    let storage = Arc::new(Storage::new(Duration::from_secs(900)));
    let auth = tracker();

    let mut wire = frame(17, 1, "legacy-client", &sasl_handshake_body("PLAIN"));
    // Raw token: size 16, payload \0user1\0pass1 plus trailing opaque bytes.
    wire.extend_from_slice(&[0x00, 0x00, 0x00, 0x10]);
    wire.extend_from_slice(&[
        0x00, 0x75, 0x73, 0x65, 0x72, 0x31, 0x00, 0x70, 0x61, 0x73, 0x73, 0x31, 0xaa, 0xbb, 0xcc,
        0xdd,
    ]);
    run_flow(&storage, &auth, "203.0.113.11:40002", wire).await;

    assert_eq!(auth.lookup("203.0.113.11:40002").as_deref(), Some("user1"));
    assert_eq!(
        sample_value(
            "authentication_info",
            &[("client_ip", "203.0.113.11"), ("username", "user1")],
        ),
        Some(1.0)
    );
    // The token was not mistaken for a structured request: the only typed
    // request from this client is the handshake itself.
    assert_eq!(
        sample_value(
            "typed_requests_total",
            &[("client_ip", "203.0.113.11"), ("request_type", "sasl_handshake")],
        ),
        Some(1.0)
    );
    let text = metrics::encode_text();
    let extra_typed = text
        .lines()
        .filter(|l| {
            l.starts_with("kafka_sniffer_typed_requests_total{")
                && l.contains("client_ip=\"203.0.113.11\"")
                && !l.contains("sasl_handshake")
        })
        .count();
    assert_eq!(extra_typed, 0);
}

#[tokio::test]
async fn fetch_v11_counts_blocks_and_topics() {
    let storage = Arc::new(Storage::new(Duration::from_secs(900)));
    let auth = tracker();

    let body = fetch_v11_body(&[("t1", &[0, 1, 2]), ("t2", &[0, 1, 2])]);
    let wire = frame(1, 11, "consumer-app", &body);
    run_flow(&storage, &auth, "203.0.113.12:40003", wire).await;

    assert_eq!(
        sample_value(
            "typed_requests_total",
            &[
                ("client_ip", "203.0.113.12"),
                ("request_type", "fetch"),
                ("version", "11"),
            ],
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value("blocks_requested", &[("client_ip", "203.0.113.12")]),
        Some(6.0)
    );
    assert_eq!(
        sample_value(
            "consumer_topic_relation_info",
            &[("client_ip", "203.0.113.12"), ("topic", "t1")],
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            "consumer_topic_relation_info",
            &[("client_ip", "203.0.113.12"), ("topic", "t2")],
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn metadata_v1_with_empty_topic_list() {
    let storage = Arc::new(Storage::new(Duration::from_secs(900)));
    let auth = tracker();

    let mut body = BytesMut::new();
    body.put_i32(0); // no topics
    let wire = frame(3, 1, "admin-cli", &body);
    run_flow(&storage, &auth, "203.0.113.13:40004", wire).await;

    assert_eq!(
        sample_value(
            "typed_requests_total",
            &[
                ("client_ip", "203.0.113.13"),
                ("request_type", "metadata"),
                ("version", "1"),
            ],
        ),
        Some(1.0)
    );
    // No relation gauge for this client.
    let text = metrics::encode_text();
    assert!(!text
        .lines()
        .any(|l| l.contains("topic_relation_info") && l.contains("203.0.113.13")));
}

#[tokio::test]
async fn cross_connection_identity_backfill() {
    let storage = Arc::new(Storage::new(Duration::from_secs(900)));
    let auth = tracker();

    // Connection A: unauthenticated produce to "orders".
    let wire_a = frame(0, 3, "producer-app", &produce_v3_body("orders", b"records"));
    run_flow(&storage, &auth, "203.0.113.14:50001", wire_a).await;
    assert_eq!(
        sample_value(
            "producer_topic_relation_info",
            &[("client_ip", "203.0.113.14"), ("topic", "orders")],
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            "producer_user_topic_info",
            &[("client_ip", "203.0.113.14"), ("topic", "orders")],
        ),
        None
    );

    // Connection B from the same host authenticates as alice.
    let token: &[u8] = &[
        0x00, b'a', b'l', b'i', b'c', b'e', 0x00, b's', b'3', b'c', b'r', b'3', b't',
    ];
    let wire_b = frame(36, 1, "producer-app", &sasl_authenticate_v1_body(token));
    run_flow(&storage, &auth, "203.0.113.14:50002", wire_b).await;

    assert_eq!(
        sample_value(
            "producer_user_topic_info",
            &[
                ("client_ip", "203.0.113.14"),
                ("username", "alice"),
                ("topic", "orders"),
            ],
        ),
        Some(1.0)
    );
    // The identity is visible for any future endpoint of that host.
    assert_eq!(auth.lookup("203.0.113.14:50099").as_deref(), Some("alice"));
}

#[tokio::test(start_paused = true)]
async fn consumer_relation_expires_when_idle() {
    let expiry = Duration::from_secs(60);
    let storage = Arc::new(Storage::new(expiry));
    let auth = tracker();

    let body = fetch_v11_body(&[("logs", &[0])]);
    let wire = frame(1, 11, "consumer-app", &body);
    run_flow(&storage, &auth, "203.0.113.15:40005", wire).await;

    assert_eq!(
        sample_value(
            "consumer_topic_relation_info",
            &[("client_ip", "203.0.113.15"), ("topic", "logs")],
        ),
        Some(1.0)
    );

    tokio::time::advance(expiry + Duration::from_secs(1)).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        sample_value(
            "consumer_topic_relation_info",
            &[("client_ip", "203.0.113.15"), ("topic", "logs")],
        ),
        None
    );
}

#[tokio::test]
async fn subsequent_flows_inherit_identity_for_new_topics() {
    let storage = Arc::new(Storage::new(Duration::from_secs(900)));
    let auth = tracker();

    // Authenticate first, produce from a different connection afterwards.
    let token: &[u8] = &[0x00, b'c', b'a', b'r', b'o', b'l', 0x00, b'p', b'w'];
    let wire_auth = frame(36, 0, "auth-conn", &sasl_authenticate_v1_body(token));
    run_flow(&storage, &auth, "203.0.113.16:50010", wire_auth).await;

    let wire_produce = frame(0, 3, "producer-app", &produce_v3_body("audit", b"x"));
    run_flow(&storage, &auth, "203.0.113.16:50011", wire_produce).await;

    assert_eq!(
        sample_value(
            "producer_user_topic_info",
            &[
                ("client_ip", "203.0.113.16"),
                ("username", "carol"),
                ("topic", "audit"),
            ],
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn malformed_frames_do_not_stop_the_flow() {
    let storage = Arc::new(Storage::new(Duration::from_secs(900)));
    let auth = tracker();

    // An undersized frame, then garbage body under a known key, then a
    // well-formed metadata request. All three are survived; the last one is
    // decoded normally.
    let mut wire = Vec::new();
    wire.extend_from_slice(&2i32.to_be_bytes());
    wire.extend_from_slice(&[0x00, 0x00]);

    let mut bad_body = BytesMut::new();
    bad_body.put_i32(-9); // negative topic count
    wire.extend(frame(3, 1, "bad", &bad_body));

    let mut good_body = BytesMut::new();
    good_body.put_i32(1);
    good_body.put_i16(5);
    good_body.put_slice(b"green");
    wire.extend(frame(3, 1, "good", &good_body));

    run_flow(&storage, &auth, "203.0.113.17:40006", wire).await;

    assert_eq!(
        sample_value(
            "typed_requests_total",
            &[
                ("client_ip", "203.0.113.17"),
                ("request_type", "metadata"),
                ("version", "1"),
            ],
        ),
        Some(2.0)
    );
    assert_eq!(
        sample_value(
            "producer_topic_relation_info",
            &[("client_ip", "203.0.113.17"), ("topic", "green")],
        ),
        Some(1.0)
    );
}

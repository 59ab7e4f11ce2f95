//! Expiring relation storage.
//!
//! Relation gauges (producer↔topic, consumer↔topic, user activity, active
//! connections) would otherwise accumulate label sets forever on a busy
//! capture point. Each gauge family here owns a map from label tuple to a
//! relation; every relation owns a single timer task, refreshed on each
//! observation. When a timer elapses the relation sends its labels to the
//! family's cleanup task, which removes the tuple from both the map and the
//! exposed gauge. A relation fires at most one expiration signal; the hot
//! path is an O(1) map probe plus a watch send.
//!
//! The store also keeps the plain indices needed for identity back-fill:
//! which topics each client has produced to or consumed from, and the
//! username last authenticated from each client address.

use crate::metrics;
use prometheus::IntGaugeVec;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Label separator for relation keys. Label values can contain `_`, so a
/// non-printable separator avoids key collisions between tuples.
const KEY_SEP: &str = "\u{1f}";

fn relation_key(labels: &[&str]) -> String {
    labels.join(KEY_SEP)
}

/// One gauge family with per-label-set expiration.
struct ExpiringGauge {
    gauge: IntGaugeVec,
    ttl: Duration,
    relations: Arc<Mutex<HashMap<String, watch::Sender<Instant>>>>,
    expire_tx: Mutex<Option<mpsc::Sender<Vec<String>>>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiringGauge {
    fn new(gauge: IntGaugeVec, ttl: Duration) -> Self {
        let relations: Arc<Mutex<HashMap<String, watch::Sender<Instant>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (expire_tx, mut expire_rx) = mpsc::channel::<Vec<String>>(64);

        // Single cleanup consumer per family: deletes the tuple from the
        // exposed gauge and from the relation map.
        let cleanup_gauge = gauge.clone();
        let cleanup_relations = Arc::clone(&relations);
        let cleanup = tokio::spawn(async move {
            while let Some(labels) = expire_rx.recv().await {
                let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
                let _ = cleanup_gauge.remove_label_values(&refs);
                cleanup_relations
                    .lock()
                    .expect("relation map lock poisoned")
                    .remove(&relation_key(&refs));
                debug!(?labels, "relation expired");
            }
        });

        Self {
            gauge,
            ttl,
            relations,
            expire_tx: Mutex::new(Some(expire_tx)),
            cleanup: Mutex::new(Some(cleanup)),
        }
    }

    fn set(&self, labels: &[&str]) {
        if let Some(expire_tx) = self.observation_channel() {
            self.gauge.with_label_values(labels).set(1);
            self.touch(labels, expire_tx);
        }
    }

    fn inc(&self, labels: &[&str]) {
        if let Some(expire_tx) = self.observation_channel() {
            self.gauge.with_label_values(labels).inc();
            self.touch(labels, expire_tx);
        }
    }

    /// `None` once the store has shut down; no further observations then.
    fn observation_channel(&self) -> Option<mpsc::Sender<Vec<String>>> {
        self.expire_tx
            .lock()
            .expect("expire channel lock poisoned")
            .clone()
    }

    /// Reset the relation's timer, creating the relation on first sight.
    fn touch(&self, labels: &[&str], expire_tx: mpsc::Sender<Vec<String>>) {
        let key = relation_key(labels);
        let mut relations = self.relations.lock().expect("relation map lock poisoned");
        if let Some(touch_tx) = relations.get(&key) {
            if touch_tx.send(Instant::now()).is_ok() {
                return;
            }
            // The timer already fired and its task is gone; fall through and
            // arm a fresh relation.
        }

        let (touch_tx, touch_rx) = watch::channel(Instant::now());
        relations.insert(key, touch_tx);
        let owned: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        tokio::spawn(run_relation_timer(owned, self.ttl, expire_tx, touch_rx));
    }

    /// Stop accepting observations, release every timer, close the signal
    /// channel, and wait for the cleanup task.
    async fn close(&self) {
        self.expire_tx
            .lock()
            .expect("expire channel lock poisoned")
            .take();
        self.relations
            .lock()
            .expect("relation map lock poisoned")
            .clear();
        let handle = self
            .cleanup
            .lock()
            .expect("cleanup handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Timer task owned by one relation. Exits after sending a single
/// expiration signal, or silently when its refresh handle is dropped.
async fn run_relation_timer(
    labels: Vec<String>,
    ttl: Duration,
    expire_tx: mpsc::Sender<Vec<String>>,
    mut touch_rx: watch::Receiver<Instant>,
) {
    loop {
        let deadline = *touch_rx.borrow_and_update() + ttl;
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                // A refresh can race the timer; only expire if the deadline
                // still stands.
                let latest = *touch_rx.borrow_and_update();
                if latest + ttl > Instant::now() {
                    continue;
                }
                let _ = expire_tx.send(labels).await;
                return;
            }
            changed = touch_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct UserInfo {
    username: String,
    mechanism: String,
}

#[derive(Debug, Default)]
struct ClientIndex {
    producer_topics: HashMap<String, HashSet<String>>,
    consumer_topics: HashMap<String, HashSet<String>>,
    users: HashMap<String, UserInfo>,
}

/// Telemetry store: expiring relation gauges plus the in-memory indices
/// used to back-fill identity-labelled series.
pub struct Storage {
    producer_topic: ExpiringGauge,
    consumer_topic: ExpiringGauge,
    active_connections: ExpiringGauge,
    auth_user_activity: ExpiringGauge,
    producer_user_topic: ExpiringGauge,
    consumer_user_topic: ExpiringGauge,
    clients: RwLock<ClientIndex>,
}

impl Storage {
    /// Build the store; gauge tuples expire `expire_after` after their last
    /// observation.
    pub fn new(expire_after: Duration) -> Self {
        Self {
            producer_topic: ExpiringGauge::new(
                metrics::PRODUCER_TOPIC_RELATION.clone(),
                expire_after,
            ),
            consumer_topic: ExpiringGauge::new(
                metrics::CONSUMER_TOPIC_RELATION.clone(),
                expire_after,
            ),
            active_connections: ExpiringGauge::new(
                metrics::ACTIVE_CONNECTIONS.clone(),
                expire_after,
            ),
            auth_user_activity: ExpiringGauge::new(
                metrics::AUTH_USER_ACTIVITY.clone(),
                expire_after,
            ),
            producer_user_topic: ExpiringGauge::new(
                metrics::PRODUCER_USER_TOPIC.clone(),
                expire_after,
            ),
            consumer_user_topic: ExpiringGauge::new(
                metrics::CONSUMER_USER_TOPIC.clone(),
                expire_after,
            ),
            clients: RwLock::new(ClientIndex::default()),
        }
    }

    /// Record that `client_ip` produced to `topic`. When an identity is
    /// known (passed by the caller or remembered from authentication) the
    /// user-labelled series is updated as well.
    pub fn add_producer_topic_relation(&self, client_ip: &str, topic: &str, username: Option<&str>) {
        self.producer_topic.set(&[client_ip, topic]);

        let remembered = {
            let mut clients = self.clients.write().expect("client index lock poisoned");
            clients
                .producer_topics
                .entry(client_ip.to_string())
                .or_default()
                .insert(topic.to_string());
            clients.users.get(client_ip).map(|u| u.username.clone())
        };

        if let Some(user) = username.map(str::to_string).or(remembered) {
            self.producer_user_topic.set(&[client_ip, &user, topic]);
        }
    }

    /// Record that `client_ip` consumed from `topic`.
    pub fn add_consumer_topic_relation(&self, client_ip: &str, topic: &str, username: Option<&str>) {
        self.consumer_topic.set(&[client_ip, topic]);

        let remembered = {
            let mut clients = self.clients.write().expect("client index lock poisoned");
            clients
                .consumer_topics
                .entry(client_ip.to_string())
                .or_default()
                .insert(topic.to_string());
            clients.users.get(client_ip).map(|u| u.username.clone())
        };

        if let Some(user) = username.map(str::to_string).or(remembered) {
            self.consumer_user_topic.set(&[client_ip, &user, topic]);
        }
    }

    /// Count a new connection from `client_ip`.
    pub fn add_active_connection(&self, client_ip: &str) {
        self.active_connections.inc(&[client_ip]);
    }

    /// Remember an authenticated identity for `client_ip` and back-fill the
    /// user-labelled series for every topic already observed.
    pub fn record_authentication(&self, client_ip: &str, username: &str, mechanism: &str) {
        self.auth_user_activity.set(&[client_ip, username, mechanism]);

        let (produced, consumed) = {
            let mut clients = self.clients.write().expect("client index lock poisoned");
            clients.users.insert(
                client_ip.to_string(),
                UserInfo {
                    username: username.to_string(),
                    mechanism: mechanism.to_string(),
                },
            );
            (
                clients
                    .producer_topics
                    .get(client_ip)
                    .map(|t| t.iter().cloned().collect::<Vec<_>>())
                    .unwrap_or_default(),
                clients
                    .consumer_topics
                    .get(client_ip)
                    .map(|t| t.iter().cloned().collect::<Vec<_>>())
                    .unwrap_or_default(),
            )
        };

        for topic in &produced {
            self.producer_user_topic.set(&[client_ip, username, topic]);
        }
        for topic in &consumed {
            self.consumer_user_topic.set(&[client_ip, username, topic]);
        }
    }

    /// Username remembered for a client address, refreshing nothing.
    pub fn username_for(&self, client_ip: &str) -> Option<String> {
        let clients = self.clients.read().expect("client index lock poisoned");
        clients.users.get(client_ip).map(|u| u.username.clone())
    }

    /// Mechanism remembered for a client address.
    pub fn mechanism_for(&self, client_ip: &str) -> Option<String> {
        let clients = self.clients.read().expect("client index lock poisoned");
        clients.users.get(client_ip).map(|u| u.mechanism.clone())
    }

    /// Topics this client has produced to.
    pub fn producer_topics_for(&self, client_ip: &str) -> Vec<String> {
        let clients = self.clients.read().expect("client index lock poisoned");
        clients
            .producer_topics
            .get(client_ip)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Topics this client has consumed from.
    pub fn consumer_topics_for(&self, client_ip: &str) -> Vec<String> {
        let clients = self.clients.read().expect("client index lock poisoned");
        clients
            .consumer_topics
            .get(client_ip)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Orderly shutdown of every gauge family: no new observations, timers
    /// released, signal channels closed, cleanup tasks awaited.
    pub async fn close(&self) {
        self.producer_topic.close().await;
        self.consumer_topic.close().await;
        self.active_connections.close().await;
        self.auth_user_activity.close().await;
        self.producer_user_topic.close().await;
        self.consumer_user_topic.close().await;
    }
}

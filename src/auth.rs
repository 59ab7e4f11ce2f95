//! Cross-connection SASL session correlation.
//!
//! A client typically authenticates on one or two short-lived connections
//! and then opens further connections from the same host that carry the
//! actual produce/fetch traffic. Sessions are therefore indexed twice: by
//! full `ip:port` endpoint (short TTL) and by base IP (long TTL). The
//! base-IP index is the authoritative cross-connection lookup and lets later
//! flows inherit a previously observed identity without re-observing auth.
//!
//! The tracker is an owned instance threaded through the stream factory into
//! every orchestrator, never a process-wide global.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// One observed authentication exchange on a specific endpoint.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub mechanism: Option<String>,
    pub username: Option<String>,
    last_touch: Instant,
}

#[derive(Debug)]
struct IpIdentity {
    username: String,
    last_touch: Instant,
}

#[derive(Debug, Default)]
struct AuthState {
    by_endpoint: HashMap<String, AuthSession>,
    by_ip: HashMap<String, IpIdentity>,
}

/// Dual-index tracker mapping network identities to SASL identities.
#[derive(Debug)]
pub struct AuthTracker {
    state: RwLock<AuthState>,
    endpoint_ttl: Duration,
    ip_ttl: Duration,
}

impl AuthTracker {
    pub fn new(endpoint_ttl: Duration, ip_ttl: Duration) -> Self {
        Self {
            state: RwLock::new(AuthState::default()),
            endpoint_ttl,
            ip_ttl,
        }
    }

    /// Record a SASL handshake: the endpoint now has a mechanism but no
    /// identity yet.
    pub fn record_handshake(&self, endpoint: &str, mechanism: &str) {
        let mut state = self.state.write().expect("auth state lock poisoned");
        let now = Instant::now();
        state
            .by_endpoint
            .entry(endpoint.to_string())
            .and_modify(|s| {
                s.mechanism = Some(mechanism.to_string());
                s.last_touch = now;
            })
            .or_insert_with(|| AuthSession {
                mechanism: Some(mechanism.to_string()),
                username: None,
                last_touch: now,
            });
        debug!(endpoint, mechanism, "recorded SASL handshake");
    }

    /// Record an authenticated identity for the endpoint and its base IP.
    pub fn record_authentication(&self, endpoint: &str, username: &str) {
        let mut state = self.state.write().expect("auth state lock poisoned");
        let now = Instant::now();
        let mechanism = state
            .by_endpoint
            .get(endpoint)
            .and_then(|s| s.mechanism.clone());
        state.by_endpoint.insert(
            endpoint.to_string(),
            AuthSession {
                mechanism,
                username: Some(username.to_string()),
                last_touch: now,
            },
        );
        state.by_ip.insert(
            base_ip(endpoint).to_string(),
            IpIdentity {
                username: username.to_string(),
                last_touch: now,
            },
        );
        info!(endpoint, username, "client authenticated");
    }

    /// Look up the identity for an endpoint: exact endpoint match first,
    /// then the base-IP index. A hit refreshes the entry's timestamp.
    pub fn lookup(&self, endpoint: &str) -> Option<String> {
        let mut state = self.state.write().expect("auth state lock poisoned");
        let now = Instant::now();

        if let Some(session) = state.by_endpoint.get_mut(endpoint) {
            if let Some(username) = session.username.clone() {
                session.last_touch = now;
                return Some(username);
            }
        }

        let base = base_ip(endpoint).to_string();
        if let Some(identity) = state.by_ip.get_mut(&base) {
            identity.last_touch = now;
            return Some(identity.username.clone());
        }
        None
    }

    /// Mechanism last seen on an endpoint, if any.
    pub fn mechanism(&self, endpoint: &str) -> Option<String> {
        let state = self.state.read().expect("auth state lock poisoned");
        state
            .by_endpoint
            .get(endpoint)
            .and_then(|s| s.mechanism.clone())
    }

    /// Drop endpoint entries older than the endpoint TTL and IP entries
    /// older than the IP TTL.
    pub fn sweep(&self, now: Instant) {
        let mut state = self.state.write().expect("auth state lock poisoned");
        let endpoint_ttl = self.endpoint_ttl;
        let ip_ttl = self.ip_ttl;
        state
            .by_endpoint
            .retain(|_, s| now.duration_since(s.last_touch) <= endpoint_ttl);
        state
            .by_ip
            .retain(|_, s| now.duration_since(s.last_touch) <= ip_ttl);
    }

    /// Spawn the periodic sweeper. The task runs until the tracker is
    /// dropped by every holder; aborting the handle stops it earlier.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracker.sweep(Instant::now());
            }
        })
    }
}

/// Network address portion of an endpoint.
///
/// `ip:port` loses the port; `[v6]:port` loses brackets and port; a bare
/// IPv6 address (multiple colons, no brackets) is returned whole.
pub fn base_ip(endpoint: &str) -> &str {
    if let Some(rest) = endpoint.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    if endpoint.matches(':').count() > 1 {
        // Bare IPv6 without brackets; no way to tell address from port.
        return endpoint;
    }
    endpoint.split(':').next().unwrap_or(endpoint)
}

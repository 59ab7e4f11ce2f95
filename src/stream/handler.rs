//! Per-flow orchestrator.
//!
//! Drives one reassembled client-to-broker byte stream: reads wire frames,
//! decodes requests, feeds the telemetry store, and keeps the SASL
//! correlator up to date. A malformed frame is counted and skipped; only
//! end-of-stream terminates the task.
//!
//! One wrinkle sits between framing and decoding: after a PLAIN handshake,
//! some clients send the bare SASL token without a Kafka header (the
//! pre-0.10 authentication flow). Those frames must be intercepted before
//! request decoding, which would otherwise misread the token as a garbage
//! request.

use crate::auth::{base_ip, AuthTracker};
use crate::metrics::{self, Storage};
use crate::protocol::frame::{FrameError, FrameReader};
use crate::protocol::request::{decode_request, Request, RequestBody};
use crate::protocol::{api_name, sasl};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

/// Raw-token detection: a plausible token frame is short and its payload
/// starts with the PLAIN null byte.
const RAW_TOKEN_MAX_LEN: i32 = 1000;

pub struct KafkaStream {
    src: String,
    dst: String,
    client_ip: String,
    storage: Arc<Storage>,
    auth: Arc<AuthTracker>,
    max_request_size: usize,
    verbose: bool,

    /// Mechanism from the most recent handshake on this flow; armed state
    /// for raw-token interception.
    last_handshake_mechanism: Option<String>,
    /// Identity cached once learned, from this flow or a sibling.
    username: Option<String>,
}

impl KafkaStream {
    pub fn new(
        src: String,
        dst: String,
        storage: Arc<Storage>,
        auth: Arc<AuthTracker>,
        max_request_size: usize,
        verbose: bool,
    ) -> Self {
        let client_ip = base_ip(&src).to_string();
        Self {
            src,
            dst,
            client_ip,
            storage,
            auth,
            max_request_size,
            verbose,
            last_handshake_mechanism: None,
            username: None,
        }
    }

    /// Process the flow until it ends.
    pub async fn run<R: AsyncRead + Unpin>(mut self, reader: R) {
        info!("{} -> {}", self.src, self.dst);
        self.storage.add_active_connection(&self.client_ip);

        let mut frames = FrameReader::new(reader, self.max_request_size);

        loop {
            if self.last_handshake_mechanism.as_deref() == Some("PLAIN")
                && self.try_consume_raw_token(&mut frames).await
            {
                continue;
            }

            let (frame, body) = match frames.next_frame().await {
                Ok(frame) => frame,
                Err(FrameError::EndOfStream) => {
                    debug!(src = %self.src, "end of stream");
                    break;
                }
                Err(e @ FrameError::Oversized { .. }) | Err(e @ FrameError::Undersized { .. }) => {
                    warn!(src = %self.src, error = %e, "discarded frame");
                    continue;
                }
                Err(FrameError::Io(e)) => {
                    debug!(src = %self.src, error = %e, "flow read failed");
                    break;
                }
            };

            let (request, body_err) = match decode_request(&frame, &body) {
                Ok(decoded) => decoded,
                Err(e) => {
                    // The header itself was unreadable; count the request by
                    // its frame-level identity and move on.
                    metrics::REQUESTS_COUNT
                        .with_label_values(&[
                            &self.client_ip,
                            api_name(frame.api_key).as_ref(),
                            &frame.api_version.to_string(),
                        ])
                        .inc();
                    debug!(src = %self.src, api_key = frame.api_key, error = %e, "malformed request header");
                    continue;
                }
            };

            if let Some(e) = body_err {
                debug!(
                    src = %self.src,
                    api = %request.body.request_type(),
                    error = %e,
                    "malformed request body, keeping partial decode"
                );
            }

            request.body.collect_metrics(&self.client_ip);
            if self.verbose {
                debug!(
                    client = %self.src,
                    key = request.header.api_key,
                    version = request.header.api_version,
                    client_id = %request.header.client_id,
                    api = %request.body.request_type(),
                    "request"
                );
            }

            self.handle_request(&request, &mut frames);
        }
    }

    /// Peek for a bare PLAIN token sitting where a frame should be. Returns
    /// true when a token was consumed (successfully or not, the bytes are
    /// gone either way).
    async fn try_consume_raw_token<R: AsyncRead + Unpin>(
        &mut self,
        frames: &mut FrameReader<R>,
    ) -> bool {
        let peeked = match frames.peek(16).await {
            Ok(p) if p.len() >= 5 => p,
            _ => return false,
        };
        let size = i32::from_be_bytes([peeked[0], peeked[1], peeked[2], peeked[3]]);
        if size <= 0 || size >= RAW_TOKEN_MAX_LEN || peeked[4] != 0 {
            return false;
        }

        let token = match frames.read_bytes(size as usize + 4).await {
            Ok(token) => token,
            Err(_) => return false,
        };
        let mechanism = self
            .last_handshake_mechanism
            .take()
            .unwrap_or_else(|| "PLAIN".to_string());

        if let Some(username) = sasl::extract_plain_username(&token[4..]) {
            info!(
                client = %self.src,
                mechanism = %mechanism,
                username = %username,
                "raw SASL authentication"
            );
            metrics::AUTHENTICATION_INFO
                .with_label_values(&[&self.client_ip, &mechanism, &username])
                .inc();
            self.record_identity(&username, &mechanism);
        } else {
            debug!(client = %self.src, "raw SASL token without extractable identity");
        }
        true
    }

    fn handle_request<R: AsyncRead + Unpin>(
        &mut self,
        request: &Request,
        frames: &mut FrameReader<R>,
    ) {
        match &request.body {
            RequestBody::Produce(_) => {
                let username = self.identity();
                for topic in request.body.topics() {
                    self.storage.add_producer_topic_relation(
                        &self.client_ip,
                        topic,
                        username.as_deref(),
                    );
                    match &username {
                        Some(user) => {
                            info!("client {} ({}) produced to topic {}", self.src, user, topic)
                        }
                        None => info!("client {} produced to topic {}", self.src, topic),
                    }
                }
            }
            RequestBody::Fetch(_) => {
                let username = self.identity();
                for topic in request.body.topics() {
                    self.storage.add_consumer_topic_relation(
                        &self.client_ip,
                        topic,
                        username.as_deref(),
                    );
                    match &username {
                        Some(user) => {
                            info!("client {} ({}) consumed from topic {}", self.src, user, topic)
                        }
                        None => info!("client {} consumed from topic {}", self.src, topic),
                    }
                }
            }
            RequestBody::ListOffsets(_) => {
                // Offset queries lean consumer-side; they usually precede a
                // fetch from the same client.
                let username = self.identity();
                for topic in request.body.topics() {
                    self.storage.add_consumer_topic_relation(
                        &self.client_ip,
                        topic,
                        username.as_deref(),
                    );
                }
            }
            RequestBody::Metadata(_) | RequestBody::DescribeConfigs(_) | RequestBody::DeleteTopics(_) => {
                // Direction unknown: record both sides for named topics.
                let username = self.identity();
                for topic in request.body.topics() {
                    if topic.is_empty() {
                        continue;
                    }
                    self.storage.add_producer_topic_relation(
                        &self.client_ip,
                        topic,
                        username.as_deref(),
                    );
                    self.storage.add_consumer_topic_relation(
                        &self.client_ip,
                        topic,
                        username.as_deref(),
                    );
                }
            }
            RequestBody::CreateTopics(_) => {
                let username = self.identity();
                for topic in request.body.topics() {
                    self.storage.add_producer_topic_relation(
                        &self.client_ip,
                        topic,
                        username.as_deref(),
                    );
                }
            }
            RequestBody::SaslHandshake(handshake) => {
                self.auth.record_handshake(&self.src, &handshake.mechanism);
                self.last_handshake_mechanism = Some(handshake.mechanism.clone());
                // Clients occasionally ship the first token immediately
                // after the handshake frame; scan what is already buffered.
                self.scan_buffered_auth_data(frames);
            }
            RequestBody::SaslAuthenticate(authenticate) => {
                if let Some(username) = authenticate.username.clone() {
                    let mechanism = authenticate.mechanism.unwrap_or("UNKNOWN").to_string();
                    info!(
                        client = %self.src,
                        mechanism = %mechanism,
                        username = %username,
                        "SASL authentication"
                    );
                    self.record_identity(&username, &mechanism);
                } else {
                    debug!(client = %self.src, "SaslAuthenticate without extractable identity");
                }
            }
            RequestBody::ApiVersions(_)
            | RequestBody::FindCoordinator(_)
            | RequestBody::DescribeGroups(_)
            | RequestBody::Generic(_) => {}
        }
    }

    /// Identity for this flow: cached first, then the cross-connection
    /// correlator.
    fn identity(&mut self) -> Option<String> {
        if self.username.is_none() {
            if let Some(username) = self.auth.lookup(&self.src) {
                self.username = Some(username);
            }
        }
        self.username.clone()
    }

    /// Common path for a newly learned identity: cache it on the flow,
    /// publish to the correlator, and back-fill the user-labelled topic
    /// series. The `authentication_info` counter is NOT touched here; the
    /// structured SaslAuthenticate body counts itself, and the raw-token
    /// paths count at their call sites.
    fn record_identity(&mut self, username: &str, mechanism: &str) {
        self.username = Some(username.to_string());

        self.auth.record_handshake(&self.src, mechanism);
        self.auth.record_authentication(&self.src, username);
        self.storage
            .record_authentication(&self.client_ip, username, mechanism);
    }

    /// After a handshake, look at bytes already buffered for an auth token
    /// that will never arrive as a well-formed SaslAuthenticate frame.
    /// PLAIN tokens are left alone: the raw-token interceptor consumes them
    /// on the next loop iteration, and handling them twice would double the
    /// authentication counters.
    fn scan_buffered_auth_data<R: AsyncRead + Unpin>(&mut self, frames: &mut FrameReader<R>) {
        let mechanism = self
            .last_handshake_mechanism
            .clone()
            .unwrap_or_else(|| "UNKNOWN".to_string());
        if mechanism.eq_ignore_ascii_case("PLAIN") {
            return;
        }

        let buffered = frames.buffered();
        if buffered.len() < 8 {
            return;
        }
        // A structured frame (api_key high byte is zero) will be decoded
        // normally and count itself; only bare tokens are scanned here.
        if buffered[4] == 0 {
            return;
        }
        let window = &buffered[..buffered.len().min(1024)];

        let username = if mechanism.to_ascii_uppercase().starts_with("SCRAM-") {
            sasl::extract_scram_username(window)
        } else {
            sasl::extract_jwt_subject(window)
        };

        if let Some(username) = username {
            info!(
                client = %self.src,
                mechanism = %mechanism,
                username = %username,
                "identity extracted from buffered auth data"
            );
            metrics::AUTHENTICATION_INFO
                .with_label_values(&[&self.client_ip, &mechanism, &username])
                .inc();
            self.record_identity(&username, &mechanism);
        }
    }
}

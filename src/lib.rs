//! # kafka-sniffer
//!
//! A passive observer for the Kafka wire protocol. The sniffer never speaks
//! the protocol itself: it is handed reassembled client-to-broker TCP byte
//! streams by an external capture layer, reframes and decodes the requests
//! flowing through them, and exposes Prometheus telemetry that links client
//! network identities to the topics they produce to and consume from and the
//! SASL identities under which they authenticate.
//!
//! ## Architecture
//!
//! - [`protocol`] - wire framing and request decoding (headers plus the
//!   request bodies relevant to topic and identity extraction)
//! - [`stream`] - one task per observed TCP flow driving frame → decode →
//!   telemetry
//! - [`auth`] - cross-connection SASL session correlation
//! - [`metrics`] - labelled counters and expiring relation gauges
//! - [`http_server`] - Prometheus text exposition endpoint
//! - [`config`] - runtime configuration
//!
//! A flow is fed in through [`stream::StreamFactory::spawn`]; everything
//! downstream of that call is this crate's responsibility.

pub mod auth;
pub mod config;
pub mod http_server;
pub mod metrics;
pub mod protocol;
pub mod stream;

pub use auth::AuthTracker;
pub use config::SnifferConfig;
pub use http_server::HttpMetricsServer;
pub use metrics::Storage;
pub use stream::{Flow, StreamFactory};

use thiserror::Error;

/// Error type covering every failure surface of the sniffer.
///
/// Decode-level failures ([`protocol::decoder::DecodeError`],
/// [`protocol::frame::FrameError`]) are normally absorbed inside the per-flow
/// request loop; they only escape through this enum when a caller drives the
/// protocol layers directly.
#[derive(Debug, Error)]
pub enum SnifferError {
    /// I/O failures on flow byte streams or the exposition listener
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration parameters
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire frame violations (size bounds, premature end of stream)
    #[error("frame error: {0}")]
    Frame(#[from] protocol::frame::FrameError),

    /// Request body decode failures
    #[error("decode error: {0}")]
    Decode(#[from] protocol::decoder::DecodeError),

    /// Metric registration or encoding failures
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SnifferError>;

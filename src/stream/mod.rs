//! Per-flow stream handling.
//!
//! The capture layer (pcap/BPF, a replay file, a test harness) is an
//! external collaborator: it reassembles TCP segments and hands this module
//! one [`Flow`] per client-to-broker connection. Everything downstream -
//! framing, decoding, telemetry - happens in one task per flow, created by
//! the [`StreamFactory`].

pub mod handler;

pub use handler::KafkaStream;

use crate::auth::AuthTracker;
use crate::config::SnifferConfig;
use crate::metrics::Storage;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

/// One reassembled client-to-broker byte stream.
pub struct Flow {
    /// Client endpoint as `ip:port`
    pub src: String,
    /// Broker endpoint as `ip:port`
    pub dst: String,
    /// Reassembled bytes in wire order
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl Flow {
    pub fn new(
        src: impl Into<String>,
        dst: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            reader: Box::new(reader),
        }
    }
}

/// Creates one orchestrator task per observed flow. Owns nothing mutable
/// beyond references to the storage and auth tracker singletons.
pub struct StreamFactory {
    storage: Arc<Storage>,
    auth: Arc<AuthTracker>,
    max_request_size: usize,
    verbose: bool,
}

impl StreamFactory {
    pub fn new(storage: Arc<Storage>, auth: Arc<AuthTracker>, config: &SnifferConfig) -> Self {
        Self {
            storage,
            auth,
            max_request_size: config.max_request_size,
            verbose: config.verbose,
        }
    }

    /// Spawn the per-flow orchestrator. The task ends when the flow does.
    pub fn spawn(&self, flow: Flow) -> JoinHandle<()> {
        let stream = KafkaStream::new(
            flow.src,
            flow.dst,
            Arc::clone(&self.storage),
            Arc::clone(&self.auth),
            self.max_request_size,
            self.verbose,
        );
        tokio::spawn(async move {
            stream.run(flow.reader).await;
        })
    }
}

//! Catch-all body for API keys without a structured decoder.
//!
//! The request is still identified and counted by its symbolic name; a small
//! prefix of the body is kept for diagnostics, anything larger is discarded
//! unread.

use super::decoder::{ByteDecoder, Result};
use super::api_name;
use crate::metrics;
use std::borrow::Cow;

/// Body bytes kept for diagnostics; larger remainders are dropped.
const RAW_CAPTURE_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct GenericRequest {
    pub api_key: i16,
    pub api_name: Cow<'static, str>,
    pub version: i16,
    pub raw_bytes: Option<Vec<u8>>,
}

impl GenericRequest {
    pub fn new(api_key: i16, version: i16) -> Self {
        Self {
            api_key,
            api_name: api_name(api_key),
            version,
            raw_bytes: None,
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        let remaining = dec.remaining();
        if remaining == 0 {
            return Ok(());
        }
        if remaining <= RAW_CAPTURE_LIMIT {
            self.raw_bytes = Some(dec.get_raw_bytes(remaining)?.to_vec());
        } else {
            dec.skip(remaining)?;
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        Vec::new()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        metrics::REQUESTS_COUNT
            .with_label_values(&[client_ip, &self.api_name, &self.version.to_string()])
            .inc();
    }
}

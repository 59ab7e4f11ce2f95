//! Produce request body (API key 0).
//!
//! Only what the observer needs is retained: topic names plus batch counts
//! and sizes for the producer throughput counters. Record batches themselves
//! are skipped over, not parsed.

use super::decoder::{ByteDecoder, Result};
use super::MAX_COLLECTION_LEN;
use crate::metrics;

#[derive(Debug, Default, Clone)]
pub struct ProduceRequest {
    pub version: i16,
    pub transactional_id: Option<String>,
    pub acks: i16,
    pub timeout_ms: i32,
    pub topics: Vec<String>,
    /// One per partition record set in the request
    pub batch_count: u64,
    /// Total record set bytes across all partitions
    pub batch_bytes: u64,
}

impl ProduceRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        if self.version >= 3 {
            self.transactional_id = dec.get_nullable_string()?;
        }
        self.acks = dec.get_i16()?;
        self.timeout_ms = dec.get_i32()?;

        let topic_count = dec.get_array_length()?;
        if topic_count > MAX_COLLECTION_LEN {
            return Err(super::DecodeError::MalformedLength(topic_count as i64));
        }

        for _ in 0..topic_count {
            let topic = dec.get_string()?;
            let partition_count = dec.get_array_length()?;
            if partition_count > MAX_COLLECTION_LEN {
                return Err(super::DecodeError::MalformedLength(partition_count as i64));
            }
            for _ in 0..partition_count {
                let _partition = dec.get_i32()?;
                if let Some(records) = dec.get_nullable_bytes()? {
                    self.batch_count += 1;
                    self.batch_bytes += records.len() as u64;
                }
            }
            self.topics.push(topic);
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        self.topics.iter().map(String::as_str).collect()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        let version = self.version.to_string();
        metrics::REQUESTS_COUNT
            .with_label_values(&[client_ip, "produce", &version])
            .inc();
        if self.batch_count > 0 {
            metrics::PRODUCER_BATCH_LEN
                .with_label_values(&[client_ip])
                .inc_by(self.batch_count);
            metrics::PRODUCER_BATCH_SIZE
                .with_label_values(&[client_ip])
                .inc_by(self.batch_bytes);
        }
    }
}

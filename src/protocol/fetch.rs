//! Fetch request body (API key 1).
//!
//! Version gating follows the protocol: v3 added `max_bytes`, v4 the
//! isolation level, v7 fetch sessions and the forgotten-topics array, v9 the
//! per-partition leader epoch, v11 the rack id.

use super::decoder::{ByteDecoder, DecodeError, Result};
use super::MAX_COLLECTION_LEN;
use crate::metrics;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchBlock {
    pub current_leader_epoch: Option<i32>,
    pub fetch_offset: i64,
    pub log_start_offset: Option<i64>,
    pub max_bytes: i32,
}

#[derive(Debug, Default, Clone)]
pub struct FetchRequest {
    pub version: i16,
    pub max_wait_ms: i32,
    pub min_bytes: i32,
    pub max_bytes: Option<i32>,
    pub isolation_level: Option<i8>,
    pub session_id: Option<i32>,
    pub session_epoch: Option<i32>,
    pub blocks: HashMap<String, HashMap<i32, FetchBlock>>,
    pub forgotten: HashMap<String, Vec<i32>>,
    pub rack_id: Option<String>,
}

impl FetchRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        let _replica_id = dec.get_i32()?;
        self.max_wait_ms = dec.get_i32()?;
        self.min_bytes = dec.get_i32()?;
        if self.version >= 3 {
            self.max_bytes = Some(dec.get_i32()?);
        }
        if self.version >= 4 {
            self.isolation_level = Some(dec.get_i8()?);
        }
        if self.version >= 7 {
            self.session_id = Some(dec.get_i32()?);
            self.session_epoch = Some(dec.get_i32()?);
        }

        let topic_count = dec.get_array_length()?;
        if topic_count > MAX_COLLECTION_LEN {
            return Err(DecodeError::MalformedLength(topic_count as i64));
        }
        for _ in 0..topic_count {
            let topic = dec.get_string()?;
            let partition_count = dec.get_array_length()?;
            if partition_count > MAX_COLLECTION_LEN {
                return Err(DecodeError::MalformedLength(partition_count as i64));
            }
            let version = self.version;
            let partitions = self.blocks.entry(topic).or_default();
            for _ in 0..partition_count {
                let partition = dec.get_i32()?;
                partitions.insert(partition, decode_block(version, dec)?);
            }
        }

        if self.version >= 7 {
            let forgotten_count = dec.get_array_length()?;
            if forgotten_count > MAX_COLLECTION_LEN {
                return Err(DecodeError::MalformedLength(forgotten_count as i64));
            }
            for _ in 0..forgotten_count {
                let topic = dec.get_string()?;
                let partition_count = dec.get_array_length()?;
                if partition_count > MAX_COLLECTION_LEN {
                    return Err(DecodeError::MalformedLength(partition_count as i64));
                }
                let mut partitions = Vec::with_capacity(partition_count);
                for _ in 0..partition_count {
                    partitions.push(dec.get_i32()?);
                }
                self.forgotten.insert(topic, partitions);
            }
        }

        if self.version >= 11 {
            self.rack_id = Some(dec.get_string()?);
        }
        Ok(())
    }

    /// Total partition blocks requested across all topics.
    pub fn requested_blocks(&self) -> u64 {
        self.blocks.values().map(|p| p.len() as u64).sum()
    }

    pub fn topics(&self) -> Vec<&str> {
        self.blocks.keys().map(String::as_str).collect()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        let version = self.version.to_string();
        metrics::REQUESTS_COUNT
            .with_label_values(&[client_ip, "fetch", &version])
            .inc();
        metrics::BLOCKS_REQUESTED
            .with_label_values(&[client_ip])
            .inc_by(self.requested_blocks());
    }
}

fn decode_block(version: i16, dec: &mut ByteDecoder<'_>) -> Result<FetchBlock> {
    let mut block = FetchBlock::default();
    if version >= 9 {
        block.current_leader_epoch = Some(dec.get_i32()?);
    }
    block.fetch_offset = dec.get_i64()?;
    if version >= 5 {
        block.log_start_offset = Some(dec.get_i64()?);
    }
    block.max_bytes = dec.get_i32()?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    pub(crate) fn encode_body(version: i16, topics: &[(&str, &[i32])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_i32(-1); // replica id
        buf.put_i32(500); // max wait
        buf.put_i32(1); // min bytes
        if version >= 3 {
            buf.put_i32(1024 * 1024);
        }
        if version >= 4 {
            buf.put_i8(0);
        }
        if version >= 7 {
            buf.put_i32(0); // session id
            buf.put_i32(-1); // session epoch
        }
        buf.put_i32(topics.len() as i32);
        for (topic, partitions) in topics {
            buf.put_i16(topic.len() as i16);
            buf.put_slice(topic.as_bytes());
            buf.put_i32(partitions.len() as i32);
            for partition in *partitions {
                buf.put_i32(*partition);
                if version >= 9 {
                    buf.put_i32(-1); // leader epoch
                }
                buf.put_i64(0); // fetch offset
                if version >= 5 {
                    buf.put_i64(0); // log start offset
                }
                buf.put_i32(1024); // max bytes
            }
        }
        if version >= 7 {
            buf.put_i32(0); // forgotten topics
        }
        if version >= 11 {
            buf.put_i16(0); // empty rack id
        }
        buf.to_vec()
    }

    #[test]
    fn decodes_v11_with_all_gated_fields() {
        let body = encode_body(11, &[("t1", &[0, 1, 2]), ("t2", &[0, 1, 2])]);
        let mut req = FetchRequest::new(11);
        req.decode(&mut ByteDecoder::new(&body)).unwrap();

        assert_eq!(req.requested_blocks(), 6);
        let mut topics = req.topics();
        topics.sort_unstable();
        assert_eq!(topics, vec!["t1", "t2"]);
        assert_eq!(req.max_bytes, Some(1024 * 1024));
        assert_eq!(req.isolation_level, Some(0));
        assert_eq!(req.session_id, Some(0));
        assert_eq!(req.rack_id.as_deref(), Some(""));
        let block = req.blocks["t1"][&1];
        assert_eq!(block.current_leader_epoch, Some(-1));
        assert_eq!(block.log_start_offset, Some(0));
    }

    #[test]
    fn decodes_v0_without_gated_fields() {
        let body = encode_body(0, &[("plain", &[3])]);
        let mut req = FetchRequest::new(0);
        req.decode(&mut ByteDecoder::new(&body)).unwrap();

        assert_eq!(req.max_bytes, None);
        assert_eq!(req.isolation_level, None);
        assert_eq!(req.session_id, None);
        assert_eq!(req.rack_id, None);
        let block = req.blocks["plain"][&3];
        assert_eq!(block.current_leader_epoch, None);
        assert_eq!(block.log_start_offset, None);
        assert_eq!(block.max_bytes, 1024);
    }

    #[test]
    fn empty_topic_array_is_valid() {
        let body = encode_body(4, &[]);
        let mut req = FetchRequest::new(4);
        req.decode(&mut ByteDecoder::new(&body)).unwrap();
        assert!(req.topics().is_empty());
        assert_eq!(req.requested_blocks(), 0);
    }

    #[test]
    fn oversized_topic_count_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_i32(-1);
        buf.put_i32(500);
        buf.put_i32(1);
        buf.put_i32(1_000_000); // topic count beyond the ceiling
        let mut req = FetchRequest::new(0);
        let err = req.decode(&mut ByteDecoder::new(&buf)).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedLength(_)));
        assert!(req.topics().is_empty());
    }
}

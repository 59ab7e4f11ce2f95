//! Metadata and admin request bodies: Metadata, ListOffsets, CreateTopics,
//! DeleteTopics, DescribeConfigs, FindCoordinator, DescribeGroups.
//!
//! These decoders only go as deep as topic extraction requires; fields past
//! that point are consumed but not retained.

use super::decoder::{ByteDecoder, DecodeError, Result};
use super::MAX_COLLECTION_LEN;
use crate::metrics;

fn bounded_array_length(dec: &mut ByteDecoder<'_>) -> Result<usize> {
    let len = dec.get_array_length()?;
    if len > MAX_COLLECTION_LEN {
        return Err(DecodeError::MalformedLength(len as i64));
    }
    Ok(len)
}

fn count_request(client_ip: &str, request_type: &str, version: i16) {
    metrics::REQUESTS_COUNT
        .with_label_values(&[client_ip, request_type, &version.to_string()])
        .inc();
}

// ---------------------------------------------------------------------------
// Metadata (API key 3)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct MetadataRequest {
    pub version: i16,
    pub topics: Vec<String>,
}

impl MetadataRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            topics: Vec::new(),
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        let count = bounded_array_length(dec)?;
        for _ in 0..count {
            self.topics.push(dec.get_string()?);
        }
        // Auto-create / authorized-operations flags of newer versions are
        // irrelevant to topic extraction.
        if dec.remaining() > 0 {
            dec.skip(dec.remaining())?;
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        self.topics.iter().map(String::as_str).collect()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        count_request(client_ip, "metadata", self.version);
    }
}

// ---------------------------------------------------------------------------
// ListOffsets (API key 2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ListOffsetsPartition {
    pub partition: i32,
    /// -1 latest, -2 earliest, otherwise a wall-clock timestamp
    pub time: i64,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsTopic {
    pub name: String,
    pub partitions: Vec<ListOffsetsPartition>,
}

#[derive(Debug, Default, Clone)]
pub struct ListOffsetsRequest {
    pub version: i16,
    pub replica_id: i32,
    pub isolation_level: Option<i8>,
    pub topics: Vec<ListOffsetsTopic>,
}

impl ListOffsetsRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        self.replica_id = dec.get_i32()?;
        if self.version >= 2 {
            self.isolation_level = Some(dec.get_i8()?);
        }
        let topic_count = bounded_array_length(dec)?;
        for _ in 0..topic_count {
            let name = dec.get_string()?;
            let partition_count = bounded_array_length(dec)?;
            let mut partitions = Vec::with_capacity(partition_count);
            for _ in 0..partition_count {
                let partition = dec.get_i32()?;
                // v0 carried a max_num_offsets field after the timestamp
                let time = dec.get_i64()?;
                if self.version == 0 {
                    let _max_num_offsets = dec.get_i32()?;
                }
                partitions.push(ListOffsetsPartition { partition, time });
            }
            self.topics.push(ListOffsetsTopic { name, partitions });
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        self.topics.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        count_request(client_ip, "list_offsets", self.version);
    }
}

// ---------------------------------------------------------------------------
// CreateTopics (API key 19)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct CreateTopicsRequest {
    pub version: i16,
    pub topics: Vec<String>,
    pub timeout_ms: i32,
    pub validate_only: bool,
}

impl CreateTopicsRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        let topic_count = bounded_array_length(dec)?;
        for _ in 0..topic_count {
            let topic = dec.get_string()?;
            let _num_partitions = dec.get_i32()?;
            let _replication_factor = dec.get_i16()?;

            // Replica assignments and config entries are consumed unseen.
            let assignment_count = bounded_array_length(dec)?;
            for _ in 0..assignment_count {
                let _partition = dec.get_i32()?;
                let replica_count = bounded_array_length(dec)?;
                for _ in 0..replica_count {
                    let _replica = dec.get_i32()?;
                }
            }
            let config_count = bounded_array_length(dec)?;
            for _ in 0..config_count {
                let _name = dec.get_string()?;
                let _value = dec.get_nullable_string()?;
            }
            self.topics.push(topic);
        }
        self.timeout_ms = dec.get_i32()?;
        if self.version >= 1 {
            self.validate_only = dec.get_bool()?;
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        self.topics.iter().map(String::as_str).collect()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        count_request(client_ip, "create_topics", self.version);
    }
}

// ---------------------------------------------------------------------------
// DeleteTopics (API key 20)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct DeleteTopicsRequest {
    pub version: i16,
    pub topics: Vec<String>,
    pub timeout_ms: i32,
}

impl DeleteTopicsRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        let topic_count = bounded_array_length(dec)?;
        for _ in 0..topic_count {
            self.topics.push(dec.get_string()?);
        }
        self.timeout_ms = dec.get_i32()?;
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        self.topics.iter().map(String::as_str).collect()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        count_request(client_ip, "delete_topics", self.version);
    }
}

// ---------------------------------------------------------------------------
// DescribeConfigs (API key 32)
// ---------------------------------------------------------------------------

/// Resource type carried by DescribeConfigs; 1 identifies a topic.
pub const RESOURCE_TYPE_TOPIC: i8 = 1;

#[derive(Debug, Clone)]
pub struct DescribeConfigsResource {
    pub resource_type: i8,
    pub resource_name: String,
    pub config_names: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct DescribeConfigsRequest {
    pub version: i16,
    pub resources: Vec<DescribeConfigsResource>,
    pub include_synonyms: bool,
}

impl DescribeConfigsRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        let resource_count = bounded_array_length(dec)?;
        for _ in 0..resource_count {
            let resource_type = dec.get_i8()?;
            let resource_name = dec.get_string()?;

            // A null config-names array asks for every config.
            let config_len = dec.get_i32()?;
            let mut config_names = Vec::new();
            if config_len > 0 {
                if config_len as usize > MAX_COLLECTION_LEN {
                    return Err(DecodeError::MalformedLength(config_len as i64));
                }
                for _ in 0..config_len {
                    config_names.push(dec.get_string()?);
                }
            } else if config_len < -1 {
                return Err(DecodeError::MalformedLength(config_len as i64));
            }

            self.resources.push(DescribeConfigsResource {
                resource_type,
                resource_name,
                config_names,
            });
        }
        if self.version >= 1 {
            self.include_synonyms = dec.get_bool()?;
        }
        Ok(())
    }

    /// Topic names only; broker and logger resources are not topics.
    pub fn topics(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| r.resource_type == RESOURCE_TYPE_TOPIC)
            .map(|r| r.resource_name.as_str())
            .collect()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        count_request(client_ip, "describe_configs", self.version);
    }
}

// ---------------------------------------------------------------------------
// FindCoordinator (API key 10)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct FindCoordinatorRequest {
    pub version: i16,
    pub coordinator_key: String,
    /// 0 consumer group, 1 transaction
    pub coordinator_type: i8,
}

impl FindCoordinatorRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        self.coordinator_key = dec.get_string()?;
        if self.version >= 1 {
            self.coordinator_type = dec.get_i8()?;
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        Vec::new()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        count_request(client_ip, "find_coordinator", self.version);
    }
}

// ---------------------------------------------------------------------------
// DescribeGroups (API key 15)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct DescribeGroupsRequest {
    pub version: i16,
    pub groups: Vec<String>,
}

impl DescribeGroupsRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            groups: Vec::new(),
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        let group_count = bounded_array_length(dec)?;
        for _ in 0..group_count {
            self.groups.push(dec.get_string()?);
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        Vec::new()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        count_request(client_ip, "describe_groups", self.version);
    }
}

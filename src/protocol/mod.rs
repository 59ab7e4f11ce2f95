//! Kafka Wire Protocol (request side)
//!
//! This module decodes the client half of the Kafka binary protocol. All
//! requests share the same outer format:
//!
//! ```text
//! RequestMessage => MessageSize RequestHeader RequestBody
//! MessageSize => int32
//! RequestHeader => api_key api_version correlation_id client_id
//! api_key => int16
//! api_version => int16
//! correlation_id => int32
//! client_id => nullable_string
//! ```
//!
//! All integers are big-endian. Strings carry an int16 length prefix, byte
//! arrays an int32 length prefix; -1 denotes null for both. Arrays carry an
//! int32 length; a negative length is malformed.
//!
//! Only the request direction is decoded. Responses are never parsed.

pub mod admin;
pub mod api_versions;
pub mod decoder;
pub mod fetch;
pub mod frame;
pub mod generic;
pub mod produce;
pub mod request;
pub mod sasl;

pub use decoder::{ByteDecoder, DecodeError};
pub use frame::{FrameError, FrameHeader, FrameReader};
pub use request::{Request, RequestBody, RequestHeader};

use std::borrow::Cow;

/// Kafka API keys with structured decoders
pub const API_KEY_PRODUCE: i16 = 0;
pub const API_KEY_FETCH: i16 = 1;
pub const API_KEY_LIST_OFFSETS: i16 = 2;
pub const API_KEY_METADATA: i16 = 3;
pub const API_KEY_FIND_COORDINATOR: i16 = 10;
pub const API_KEY_DESCRIBE_GROUPS: i16 = 15;
pub const API_KEY_SASL_HANDSHAKE: i16 = 17;
pub const API_KEY_API_VERSIONS: i16 = 18;
pub const API_KEY_CREATE_TOPICS: i16 = 19;
pub const API_KEY_DELETE_TOPICS: i16 = 20;
pub const API_KEY_DESCRIBE_CONFIGS: i16 = 32;
pub const API_KEY_SASL_AUTHENTICATE: i16 = 36;

/// Upper bound on any decoded topic/partition/resource collection. Counts
/// beyond this are treated as malformed input rather than an allocation
/// request.
pub const MAX_COLLECTION_LEN: usize = 10_000;

/// Symbolic name for an API key.
///
/// Covers every key assigned up to 67 plus the later keys observed in the
/// wild; anything else is reported as `Unknown(<key>)`.
pub fn api_name(key: i16) -> Cow<'static, str> {
    let name = match key {
        0 => "Produce",
        1 => "Fetch",
        2 => "ListOffsets",
        3 => "Metadata",
        4 => "LeaderAndIsr",
        5 => "StopReplica",
        6 => "UpdateMetadata",
        7 => "ControlledShutdown",
        8 => "OffsetCommit",
        9 => "OffsetFetch",
        10 => "FindCoordinator",
        11 => "JoinGroup",
        12 => "Heartbeat",
        13 => "LeaveGroup",
        14 => "SyncGroup",
        15 => "DescribeGroups",
        16 => "ListGroups",
        17 => "SaslHandshake",
        18 => "ApiVersions",
        19 => "CreateTopics",
        20 => "DeleteTopics",
        21 => "DeleteRecords",
        22 => "InitProducerId",
        23 => "OffsetForLeaderEpoch",
        24 => "AddPartitionsToTxn",
        25 => "AddOffsetsToTxn",
        26 => "EndTxn",
        27 => "WriteTxnMarkers",
        28 => "TxnOffsetCommit",
        29 => "DescribeAcls",
        30 => "CreateAcls",
        31 => "DeleteAcls",
        32 => "DescribeConfigs",
        33 => "AlterConfigs",
        34 => "AlterReplicaLogDirs",
        35 => "DescribeLogDirs",
        36 => "SaslAuthenticate",
        37 => "CreatePartitions",
        38 => "CreateDelegationToken",
        39 => "RenewDelegationToken",
        40 => "ExpireDelegationToken",
        41 => "DescribeDelegationToken",
        42 => "DeleteGroups",
        43 => "ElectLeaders",
        44 => "IncrementalAlterConfigs",
        45 => "AlterPartitionReassignments",
        46 => "ListPartitionReassignments",
        47 => "OffsetDelete",
        48 => "DescribeClientQuotas",
        49 => "AlterClientQuotas",
        50 => "DescribeUserScramCredentials",
        51 => "AlterUserScramCredentials",
        52 => "VoteRequest",
        53 => "BeginQuorumEpoch",
        54 => "EndQuorumEpoch",
        55 => "DescribeQuorum",
        56 => "AlterIsr",
        57 => "UpdateFeatures",
        58 => "Envelope",
        59 => "FetchSnapshot",
        60 => "DescribeCluster",
        61 => "DescribeProducers",
        62 => "BrokerRegistration",
        63 => "BrokerHeartbeat",
        64 => "UnregisterBroker",
        65 => "DescribeTransactions",
        66 => "ListTransactions",
        67 => "AllocateProducerIds",
        68 => "ConsumerGroupHeartbeat",
        69 => "ConsumerGroupDescribe",
        71 => "GetTelemetrySubscriptions",
        72 => "PushTelemetry",
        74 => "ListClientMetricsResources",
        75 => "DescribeTopicPartitions",
        80 => "AddRaftVoter",
        81 => "RemoveRaftVoter",
        _ => return Cow::Owned(format!("Unknown({key})")),
    };
    Cow::Borrowed(name)
}

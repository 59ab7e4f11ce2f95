//! Request header decoding and body dispatch.
//!
//! Every frame body starts with `correlation_id:i32` and `client_id:string`;
//! the bytes after that are interpreted per `(api_key, api_version)`. A
//! malformed body never propagates an error out of this module as a stream
//! failure: the partially populated body is handed back together with the
//! error classification so the caller can still count the request and move
//! on. Header decode failures are the only hard error.

use super::admin::{
    CreateTopicsRequest, DeleteTopicsRequest, DescribeConfigsRequest, DescribeGroupsRequest,
    FindCoordinatorRequest, ListOffsetsRequest, MetadataRequest,
};
use super::api_versions::ApiVersionsRequest;
use super::decoder::{ByteDecoder, DecodeError};
use super::fetch::FetchRequest;
use super::frame::FrameHeader;
use super::generic::GenericRequest;
use super::produce::ProduceRequest;
use super::sasl::{SaslAuthenticateRequest, SaslHandshakeRequest};
use super::{
    API_KEY_API_VERSIONS, API_KEY_CREATE_TOPICS, API_KEY_DELETE_TOPICS, API_KEY_DESCRIBE_CONFIGS,
    API_KEY_DESCRIBE_GROUPS, API_KEY_FETCH, API_KEY_FIND_COORDINATOR, API_KEY_LIST_OFFSETS,
    API_KEY_METADATA, API_KEY_PRODUCE, API_KEY_SASL_AUTHENTICATE, API_KEY_SASL_HANDSHAKE,
};
use std::borrow::Cow;

/// Decoded request header.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: String,
    /// Body bytes remaining after the header was consumed
    pub body_length: i32,
}

/// One decoded request: header plus body variant.
#[derive(Debug)]
pub struct Request {
    pub header: RequestHeader,
    pub body: RequestBody,
}

#[derive(Debug)]
pub enum RequestBody {
    Produce(ProduceRequest),
    Fetch(FetchRequest),
    ListOffsets(ListOffsetsRequest),
    Metadata(MetadataRequest),
    FindCoordinator(FindCoordinatorRequest),
    DescribeGroups(DescribeGroupsRequest),
    SaslHandshake(SaslHandshakeRequest),
    ApiVersions(ApiVersionsRequest),
    CreateTopics(CreateTopicsRequest),
    DeleteTopics(DeleteTopicsRequest),
    DescribeConfigs(DescribeConfigsRequest),
    SaslAuthenticate(SaslAuthenticateRequest),
    Generic(GenericRequest),
}

impl RequestBody {
    /// Topic names referenced by this request, possibly empty.
    pub fn topics(&self) -> Vec<&str> {
        match self {
            RequestBody::Produce(b) => b.topics(),
            RequestBody::Fetch(b) => b.topics(),
            RequestBody::ListOffsets(b) => b.topics(),
            RequestBody::Metadata(b) => b.topics(),
            RequestBody::FindCoordinator(b) => b.topics(),
            RequestBody::DescribeGroups(b) => b.topics(),
            RequestBody::SaslHandshake(b) => b.topics(),
            RequestBody::ApiVersions(b) => b.topics(),
            RequestBody::CreateTopics(b) => b.topics(),
            RequestBody::DeleteTopics(b) => b.topics(),
            RequestBody::DescribeConfigs(b) => b.topics(),
            RequestBody::SaslAuthenticate(b) => b.topics(),
            RequestBody::Generic(b) => b.topics(),
        }
    }

    /// Label value used for the typed request counter.
    pub fn request_type(&self) -> Cow<'static, str> {
        match self {
            RequestBody::Produce(_) => Cow::Borrowed("produce"),
            RequestBody::Fetch(_) => Cow::Borrowed("fetch"),
            RequestBody::ListOffsets(_) => Cow::Borrowed("list_offsets"),
            RequestBody::Metadata(_) => Cow::Borrowed("metadata"),
            RequestBody::FindCoordinator(_) => Cow::Borrowed("find_coordinator"),
            RequestBody::DescribeGroups(_) => Cow::Borrowed("describe_groups"),
            RequestBody::SaslHandshake(_) => Cow::Borrowed("sasl_handshake"),
            RequestBody::ApiVersions(_) => Cow::Borrowed("api_versions"),
            RequestBody::CreateTopics(_) => Cow::Borrowed("create_topics"),
            RequestBody::DeleteTopics(_) => Cow::Borrowed("delete_topics"),
            RequestBody::DescribeConfigs(_) => Cow::Borrowed("describe_configs"),
            RequestBody::SaslAuthenticate(_) => Cow::Borrowed("sasl_authenticate"),
            RequestBody::Generic(b) => b.api_name.clone(),
        }
    }

    /// Record the typed request counter and any body-specific counters.
    pub fn collect_metrics(&self, client_ip: &str) {
        match self {
            RequestBody::Produce(b) => b.collect_metrics(client_ip),
            RequestBody::Fetch(b) => b.collect_metrics(client_ip),
            RequestBody::ListOffsets(b) => b.collect_metrics(client_ip),
            RequestBody::Metadata(b) => b.collect_metrics(client_ip),
            RequestBody::FindCoordinator(b) => b.collect_metrics(client_ip),
            RequestBody::DescribeGroups(b) => b.collect_metrics(client_ip),
            RequestBody::SaslHandshake(b) => b.collect_metrics(client_ip),
            RequestBody::ApiVersions(b) => b.collect_metrics(client_ip),
            RequestBody::CreateTopics(b) => b.collect_metrics(client_ip),
            RequestBody::DeleteTopics(b) => b.collect_metrics(client_ip),
            RequestBody::DescribeConfigs(b) => b.collect_metrics(client_ip),
            RequestBody::SaslAuthenticate(b) => b.collect_metrics(client_ip),
            RequestBody::Generic(b) => b.collect_metrics(client_ip),
        }
    }
}

/// Decode one request from a frame body.
///
/// Returns the request plus the body decode error, if any; the body is then
/// partially populated up to the point of failure. `Err` is returned only
/// when the header itself cannot be read.
pub fn decode_request(
    frame: &FrameHeader,
    body: &[u8],
) -> Result<(Request, Option<DecodeError>), DecodeError> {
    let mut dec = ByteDecoder::new(body);
    let correlation_id = dec.get_i32()?;
    let client_id = dec.get_nullable_string()?.unwrap_or_default();

    let header = RequestHeader {
        api_key: frame.api_key,
        api_version: frame.api_version,
        correlation_id,
        client_id,
        body_length: dec.remaining() as i32,
    };

    let version = frame.api_version;
    let (body, err) = match frame.api_key {
        API_KEY_PRODUCE => {
            let mut b = ProduceRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::Produce(b), err)
        }
        API_KEY_FETCH => {
            let mut b = FetchRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::Fetch(b), err)
        }
        API_KEY_LIST_OFFSETS => {
            let mut b = ListOffsetsRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::ListOffsets(b), err)
        }
        API_KEY_METADATA => {
            let mut b = MetadataRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::Metadata(b), err)
        }
        API_KEY_FIND_COORDINATOR => {
            let mut b = FindCoordinatorRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::FindCoordinator(b), err)
        }
        API_KEY_DESCRIBE_GROUPS => {
            let mut b = DescribeGroupsRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::DescribeGroups(b), err)
        }
        API_KEY_SASL_HANDSHAKE => {
            let mut b = SaslHandshakeRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::SaslHandshake(b), err)
        }
        API_KEY_API_VERSIONS => {
            let mut b = ApiVersionsRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::ApiVersions(b), err)
        }
        API_KEY_CREATE_TOPICS => {
            let mut b = CreateTopicsRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::CreateTopics(b), err)
        }
        API_KEY_DELETE_TOPICS => {
            let mut b = DeleteTopicsRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::DeleteTopics(b), err)
        }
        API_KEY_DESCRIBE_CONFIGS => {
            let mut b = DescribeConfigsRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::DescribeConfigs(b), err)
        }
        API_KEY_SASL_AUTHENTICATE => {
            let mut b = SaslAuthenticateRequest::new(version);
            let err = b.decode(&mut dec).err();
            (RequestBody::SaslAuthenticate(b), err)
        }
        other => {
            let mut b = GenericRequest::new(other, version);
            let err = b.decode(&mut dec).err();
            (RequestBody::Generic(b), err)
        }
    };

    Ok((Request { header, body }, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn body_with_header(client_id: &str, rest: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_i32(7); // correlation id
        buf.put_i16(client_id.len() as i16);
        buf.put_slice(client_id.as_bytes());
        buf.put_slice(rest);
        buf.to_vec()
    }

    fn frame_header(api_key: i16, api_version: i16, body_len: usize) -> FrameHeader {
        FrameHeader {
            size: 4 + body_len as i32,
            api_key,
            api_version,
        }
    }

    #[test]
    fn header_fields_are_decoded() {
        let mut rest = BytesMut::new();
        rest.put_i32(0); // empty metadata topic array
        let body = body_with_header("console-producer", &rest);
        let frame = frame_header(3, 1, body.len());

        let (request, err) = decode_request(&frame, &body).unwrap();
        assert!(err.is_none());
        assert_eq!(request.header.correlation_id, 7);
        assert_eq!(request.header.client_id, "console-producer");
        assert_eq!(request.header.body_length, 4);
        assert!(matches!(request.body, RequestBody::Metadata(_)));
    }

    #[test]
    fn null_client_id_becomes_empty() {
        let mut buf = BytesMut::new();
        buf.put_i32(1);
        buf.put_i16(-1);
        let frame = frame_header(18, 0, buf.len());
        let (request, _) = decode_request(&frame, &buf).unwrap();
        assert_eq!(request.header.client_id, "");
    }

    #[test]
    fn unknown_key_dispatches_to_generic() {
        let body = body_with_header("cli", &[1, 2, 3]);
        let frame = frame_header(42, 0, body.len());
        let (request, err) = decode_request(&frame, &body).unwrap();
        assert!(err.is_none());
        match request.body {
            RequestBody::Generic(ref g) => {
                assert_eq!(g.api_name, "DeleteGroups");
                assert_eq!(g.raw_bytes.as_deref(), Some(&[1, 2, 3][..]));
            }
            ref other => panic!("expected generic body, got {other:?}"),
        }
        assert_eq!(request.body.request_type(), "DeleteGroups");
    }

    #[test]
    fn malformed_body_returns_partial_with_classification() {
        let mut rest = BytesMut::new();
        rest.put_i32(-2); // negative topic count
        let body = body_with_header("x", &rest);
        let frame = frame_header(3, 1, body.len());

        let (request, err) = decode_request(&frame, &body).unwrap();
        assert_eq!(err, Some(DecodeError::MalformedLength(-2)));
        assert!(request.body.topics().is_empty());
    }

    #[test]
    fn truncated_header_is_a_hard_error() {
        let frame = frame_header(0, 0, 2);
        assert!(decode_request(&frame, &[0, 1]).is_err());
    }

    #[test]
    fn parsing_the_same_frame_is_idempotent() {
        let mut rest = BytesMut::new();
        rest.put_i32(1);
        rest.put_i16(5);
        rest.put_slice(b"topic");
        let body = body_with_header("app", &rest);
        let frame = frame_header(3, 1, body.len());

        let first = decode_request(&frame, &body).unwrap().0;
        let second = decode_request(&frame, &body).unwrap().0;
        assert_eq!(first.body.topics(), second.body.topics());
        assert_eq!(first.header.correlation_id, second.header.correlation_id);
    }
}

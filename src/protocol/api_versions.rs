//! ApiVersions request body (API key 18).
//!
//! v3+ carries the client software name and version. Clients disagree about
//! header flexibility at that boundary, so the two trailing strings are read
//! tolerantly; absence or garbage leaves them unset without failing the
//! request.

use super::decoder::{ByteDecoder, Result};
use crate::metrics;

#[derive(Debug, Default, Clone)]
pub struct ApiVersionsRequest {
    pub version: i16,
    pub client_software_name: Option<String>,
    pub client_software_version: Option<String>,
}

impl ApiVersionsRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        if self.version >= 3 && dec.remaining() > 0 {
            if let Ok(name) = dec.get_nullable_string() {
                self.client_software_name = name;
                if let Ok(software_version) = dec.get_nullable_string() {
                    self.client_software_version = software_version;
                }
            }
        }
        if dec.remaining() > 0 {
            dec.skip(dec.remaining())?;
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        Vec::new()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        metrics::REQUESTS_COUNT
            .with_label_values(&[client_ip, "api_versions", &self.version.to_string()])
            .inc();
        if let Some(ref name) = self.client_software_name {
            let software_version = self.client_software_version.as_deref().unwrap_or("");
            metrics::CLIENT_SOFTWARE_INFO
                .with_label_values(&[client_ip, name, software_version])
                .inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn v3_reads_software_fields() {
        let mut buf = BytesMut::new();
        buf.put_i16(10);
        buf.put_slice(b"librdkafka");
        buf.put_i16(5);
        buf.put_slice(b"2.3.0");
        let mut req = ApiVersionsRequest::new(3);
        req.decode(&mut ByteDecoder::new(&buf)).unwrap();
        assert_eq!(req.client_software_name.as_deref(), Some("librdkafka"));
        assert_eq!(req.client_software_version.as_deref(), Some("2.3.0"));
    }

    #[test]
    fn v3_tolerates_missing_fields() {
        let mut req = ApiVersionsRequest::new(3);
        req.decode(&mut ByteDecoder::new(&[])).unwrap();
        assert_eq!(req.client_software_name, None);
        assert_eq!(req.client_software_version, None);
    }

    #[test]
    fn pre_v3_has_no_body() {
        let mut req = ApiVersionsRequest::new(1);
        req.decode(&mut ByteDecoder::new(&[])).unwrap();
        assert_eq!(req.client_software_name, None);
    }
}

//! SASL request bodies (API keys 17 and 36) and best-effort identity
//! extraction from opaque authentication tokens.
//!
//! Any identity recovered here is a diagnostic hint, never an authorisation
//! claim. Candidates are rejected unless they fit the username character
//! class `[A-Za-z0-9._@-]` and the length range 3..=100. Whatever follows a
//! PLAIN username is a secret and is never copied out of the token.

use super::decoder::{ByteDecoder, Result};
use crate::metrics;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 100;

// ---------------------------------------------------------------------------
// SaslHandshake (API key 17)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct SaslHandshakeRequest {
    pub version: i16,
    /// Mechanism the client asked the broker for (e.g. `PLAIN`,
    /// `SCRAM-SHA-256`)
    pub mechanism: String,
}

impl SaslHandshakeRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            mechanism: String::new(),
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        self.mechanism = dec.get_string()?;
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        Vec::new()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        metrics::REQUESTS_COUNT
            .with_label_values(&[client_ip, "sasl_handshake", &self.version.to_string()])
            .inc();
    }
}

// ---------------------------------------------------------------------------
// SaslAuthenticate (API key 36)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct SaslAuthenticateRequest {
    pub version: i16,
    pub auth_bytes: Vec<u8>,
    /// Username recovered from the token, if any
    pub username: Option<String>,
    /// Mechanism implied by the winning extraction strategy
    pub mechanism: Option<&'static str>,
}

impl SaslAuthenticateRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn decode(&mut self, dec: &mut ByteDecoder<'_>) -> Result<()> {
        let auth = dec.get_bytes()?;
        self.auth_bytes = auth.to_vec();
        if let Some((username, mechanism)) = extract_identity(auth) {
            self.username = Some(username);
            self.mechanism = Some(mechanism);
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<&str> {
        Vec::new()
    }

    pub fn collect_metrics(&self, client_ip: &str) {
        metrics::REQUESTS_COUNT
            .with_label_values(&[client_ip, "sasl_authenticate", &self.version.to_string()])
            .inc();
        if let Some(ref username) = self.username {
            metrics::AUTHENTICATION_INFO
                .with_label_values(&[client_ip, self.mechanism.unwrap_or("UNKNOWN"), username])
                .inc();
        }
    }
}

// ---------------------------------------------------------------------------
// Identity extraction
// ---------------------------------------------------------------------------

/// Run the extraction strategies in order; the first plausible identity wins
/// and names the mechanism it implies.
pub fn extract_identity(data: &[u8]) -> Option<(String, &'static str)> {
    if data.len() < 3 {
        return None;
    }
    if let Some(username) = extract_plain_username(data) {
        return Some((username, "PLAIN"));
    }
    if let Some(username) = extract_scram_username(data) {
        return Some((username, "SCRAM"));
    }
    if let Some(username) = extract_jwt_subject(data) {
        return Some((username, "JWT"));
    }
    extract_printable_candidate(data).map(|username| (username, "UNKNOWN"))
}

/// PLAIN token: `[0x00]authcid[0x00]password`. The bytes past the second
/// null are the secret and are left untouched.
pub fn extract_plain_username(data: &[u8]) -> Option<String> {
    if data.len() < 3 || data[0] != 0 {
        return None;
    }
    let second_null = data[1..].iter().position(|&b| b == 0)? + 1;
    if second_null <= 1 || second_null + 1 >= data.len() {
        return None;
    }
    let candidate = String::from_utf8_lossy(&data[1..second_null]).into_owned();
    is_valid_username(&candidate).then_some(candidate)
}

/// SCRAM client-first-message: the username follows the first `n=` and runs
/// to the next `,` or null.
pub fn extract_scram_username(data: &[u8]) -> Option<String> {
    let start = data.windows(2).position(|w| w == b"n=")? + 2;
    let end = data[start..]
        .iter()
        .position(|&b| b == b',' || b == 0)
        .map(|off| start + off)?;
    if end <= start {
        return None;
    }
    let candidate = String::from_utf8_lossy(&data[start..end]).into_owned();
    is_valid_username(&candidate).then_some(candidate)
}

/// OAUTHBEARER/JWT: exactly three dot-separated base64url segments; the
/// subject comes out of the decoded middle segment's `"sub"` claim.
pub fn extract_jwt_subject(data: &[u8]) -> Option<String> {
    let mut segments = data.split(|&b| b == b'.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let needle = b"\"sub\":\"";
    let sub_start = decoded
        .windows(needle.len())
        .position(|w| w == needle)?
        + needle.len();
    let sub_end = decoded[sub_start..]
        .iter()
        .position(|&b| b == b'"')
        .map(|off| sub_start + off)?;
    if sub_end <= sub_start {
        return None;
    }
    let candidate = String::from_utf8_lossy(&decoded[sub_start..sub_end]).into_owned();
    is_valid_username(&candidate).then_some(candidate)
}

/// Fallback: the longest contiguous printable-ASCII run that validates as a
/// username.
fn extract_printable_candidate(data: &[u8]) -> Option<String> {
    let mut best: Option<&[u8]> = None;
    let mut run_start = None;
    for (i, &b) in data.iter().enumerate() {
        let printable = (32..127).contains(&b);
        match (printable, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                best = longer_run(best, &data[start..i]);
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        best = longer_run(best, &data[start..]);
    }

    let run = best?;
    if run.len() < MIN_USERNAME_LEN || run.len() > MAX_USERNAME_LEN {
        return None;
    }
    let candidate = String::from_utf8_lossy(run).into_owned();
    is_valid_username(&candidate).then_some(candidate)
}

fn longer_run<'a>(best: Option<&'a [u8]>, run: &'a [u8]) -> Option<&'a [u8]> {
    match best {
        Some(b) if b.len() >= run.len() => Some(b),
        _ => Some(run),
    }
}

/// Username character class and length bounds for any extracted identity.
pub fn is_valid_username(s: &str) -> bool {
    if s.len() < MIN_USERNAME_LEN || s.len() > MAX_USERNAME_LEN {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'))
}

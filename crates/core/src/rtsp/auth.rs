//! Digest authentication (RFC 2617, as used by RTSP per RFC 2326 §18.2).
//!
//! Grounded on the response formula spelled out for this system:
//! `MD5(MD5(user:realm:pass):nonce:MD5(method:uri))`, lowercase hex
//! throughout, the intermediate digests taken as their hex *string*
//! form (not raw bytes) before the outer hash — exactly RFC 2617's
//! "unquoted MD5" variant.

use md5::{Digest, Md5};

fn hex_md5(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Realm/nonce/credentials for one RTSP server (§3 "Authenticator").
///
/// `realm`/`nonce` are populated either by the caller up front or from
/// a `WWW-Authenticate: Digest realm="…", nonce="…"` challenge on a 401
/// response (§4.8 step 9).
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    pub realm: String,
    pub nonce: String,
    pub username: String,
    pub password: String,
}

impl Authenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            realm: String::new(),
            nonce: String::new(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// `true` once a challenge has supplied both `realm` and `nonce`.
    pub fn is_challenged(&self) -> bool {
        !self.realm.is_empty() && !self.nonce.is_empty()
    }

    /// Fill in realm/nonce from a parsed `WWW-Authenticate` header.
    pub fn apply_challenge(&mut self, realm: &str, nonce: &str) {
        self.realm = realm.to_string();
        self.nonce = nonce.to_string();
    }

    /// Compute the `response` field for a Digest `Authorization` header.
    fn response(&self, method: &str, uri: &str) -> String {
        let ha1 = hex_md5(&format!("{}:{}:{}", self.username, self.realm, self.password));
        let ha2 = hex_md5(&format!("{method}:{uri}"));
        hex_md5(&format!("{ha1}:{}:{ha2}", self.nonce))
    }

    /// Build the full `Authorization: Digest …` header value for one
    /// request (§4.8 step 2).
    pub fn authorization_header(&self, method: &str, uri: &str) -> String {
        let response = self.response(method, uri);
        format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            self.username, self.realm, self.nonce, uri, response
        )
    }
}

/// Parse `realm`/`nonce` out of a `WWW-Authenticate: Digest realm="…", nonce="…"`
/// header value. Returns `None` if either quoted field is missing.
pub fn parse_challenge(header_value: &str) -> Option<(String, String)> {
    let realm = extract_quoted(header_value, "realm")?;
    let nonce = extract_quoted(header_value, "nonce")?;
    Some((realm, nonce))
}

fn extract_quoted(haystack: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=\"");
    let start = haystack.find(&needle)? + needle.len();
    let end = haystack[start..].find('"')? + start;
    Some(haystack[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_matches_rfc2617_worked_example() {
        let mut auth = Authenticator::new("u", "p");
        auth.apply_challenge("R", "N");
        let header = auth.authorization_header("DESCRIBE", "rtsp://h/m");

        let ha1 = hex_md5("u:R:p");
        let ha2 = hex_md5("DESCRIBE:rtsp://h/m");
        let expected = hex_md5(&format!("{ha1}:N:{ha2}"));

        assert!(header.contains(&format!("response=\"{expected}\"")));
        assert_eq!(expected.len(), 32);
        assert!(expected.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn parse_challenge_extracts_realm_and_nonce() {
        let (realm, nonce) = parse_challenge(r#"Digest realm="R", nonce="N""#).unwrap();
        assert_eq!(realm, "R");
        assert_eq!(nonce, "N");
    }

    #[test]
    fn parse_challenge_rejects_missing_fields() {
        assert!(parse_challenge(r#"Digest realm="R""#).is_none());
        assert!(parse_challenge("Basic").is_none());
    }

    #[test]
    fn is_challenged_reflects_populated_state() {
        let mut auth = Authenticator::new("u", "p");
        assert!(!auth.is_challenged());
        auth.apply_challenge("R", "N");
        assert!(auth.is_challenged());
    }
}

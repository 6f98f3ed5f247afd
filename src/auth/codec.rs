// Token decoding and storage chunking
// Pure functions, no I/O

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::types::TokenChunks;
use crate::error::{Result, SessionError};

/// Claims read from a token payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenClaims {
    /// Expiration, seconds since the epoch
    pub exp: f64,
}

impl TokenClaims {
    /// Expiration as epoch milliseconds
    pub fn expires_at_millis(&self) -> i64 {
        (self.exp * 1000.0).round() as i64
    }

    /// Expiration instant
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at_millis())
            .single()
            .ok_or_else(|| {
                SessionError::MalformedToken(format!("exp claim out of range: {}", self.exp))
            })
    }
}

#[derive(Deserialize)]
struct RawClaims {
    exp: Option<f64>,
}

/// Decode the payload segment of a `header.payload.signature` token.
///
/// The signature is not verified; the token is only inspected for its
/// expiration so the client can plan refreshes.
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(SessionError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| SessionError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    let raw: RawClaims = serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::MalformedToken(format!("payload is not a JSON object: {}", e)))?;

    let exp = raw.exp.ok_or(SessionError::MissingExpiry)?;
    Ok(TokenClaims { exp })
}

/// Split a token at the ceiling of half its length.
/// The cut is moved forward to the next char boundary for non-ASCII input.
pub fn split(token: &str) -> TokenChunks {
    let mut mid = token.len().div_ceil(2);
    while !token.is_char_boundary(mid) {
        mid += 1;
    }

    let (part1, part2) = token.split_at(mid);
    TokenChunks {
        part1: part1.to_string(),
        part2: part2.to_string(),
    }
}

/// Reassemble a token from its stored chunks
pub fn join(part1: &str, part2: &str) -> String {
    let mut token = String::with_capacity(part1.len() + part2.len());
    token.push_str(part1);
    token.push_str(part2);
    token
}

#[cfg(test)]
pub(crate) mod testing {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::{Duration, Utc};

    /// Unsigned token whose payload is the given JSON
    pub fn token_with_payload(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.signature", header, body)
    }

    /// Unsigned token expiring `secs` seconds from now
    pub fn token_expiring_in(secs: i64) -> String {
        let exp = (Utc::now() + Duration::seconds(secs)).timestamp();
        token_with_payload(&serde_json::json!({ "sub": "user-1", "exp": exp }))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_decode_claims() {
        let token = token_with_payload(&serde_json::json!({ "exp": 1_700_000_000 }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.exp, 1_700_000_000.0);
        assert_eq!(claims.expires_at_millis(), 1_700_000_000_000);
        assert_eq!(
            claims.expires_at().unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_decode_claims_tolerates_padding() {
        let token = token_with_payload(&serde_json::json!({ "exp": 42 }));
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        parts[1].push_str("==");
        let padded = parts.join(".");
        assert_eq!(decode_claims(&padded).unwrap().exp, 42.0);
    }

    #[test]
    fn test_decode_claims_wrong_segment_count() {
        assert!(matches!(
            decode_claims("only.two"),
            Err(SessionError::MalformedToken(_))
        ));
        assert!(matches!(
            decode_claims("a.b.c.d"),
            Err(SessionError::MalformedToken(_))
        ));
        assert!(matches!(decode_claims(""), Err(SessionError::MalformedToken(_))));
    }

    #[test]
    fn test_decode_claims_bad_payload() {
        assert!(matches!(
            decode_claims("header.!!!not-base64!!!.sig"),
            Err(SessionError::MalformedToken(_))
        ));

        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(matches!(
            decode_claims(&not_json),
            Err(SessionError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_decode_claims_missing_exp() {
        let token = token_with_payload(&serde_json::json!({ "sub": "user-1" }));
        assert!(matches!(
            decode_claims(&token),
            Err(SessionError::MissingExpiry)
        ));
    }

    #[test]
    fn test_split_at_ceiling_of_half() {
        let chunks = split("abcde");
        assert_eq!(chunks.part1, "abc");
        assert_eq!(chunks.part2, "de");

        let chunks = split("abcd");
        assert_eq!(chunks.part1, "ab");
        assert_eq!(chunks.part2, "cd");

        let chunks = split("a");
        assert_eq!(chunks.part1, "a");
        assert_eq!(chunks.part2, "");

        let chunks = split("");
        assert_eq!(chunks.part1, "");
        assert_eq!(chunks.part2, "");
    }

    #[test]
    fn test_split_join_reconstructs_every_length() {
        let source = token_expiring_in(3600);
        for len in 0..=source.len() {
            let token = &source[..len];
            let chunks = split(token);
            assert_eq!(join(&chunks.part1, &chunks.part2), token, "length {}", len);
        }
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let token = "aé€z";
        let chunks = split(token);
        assert_eq!(join(&chunks.part1, &chunks.part2), token);
    }
}

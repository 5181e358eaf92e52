//! Opaque continuation tokens for paginated listings.
//!
//! Tokens encode the last key of the previous page (keyset continuation, so
//! walks survive concurrent insertions) behind base64, and carry a version
//! tag. Anything that does not decode restarts the walk from the beginning;
//! an invalid token is never an error.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

const TOKEN_VERSION: &str = "v1";

pub fn encode_token(last_key: &str) -> String {
    STANDARD.encode(format!("{TOKEN_VERSION}:{last_key}"))
}

/// The last key the previous page ended on, or None for a fresh walk.
pub fn decode_token(token: Option<&str>) -> Option<String> {
    let token = token?;
    let decoded = STANDARD.decode(token).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (version, key) = decoded.split_once(':')?;
    if version != TOKEN_VERSION {
        return None;
    }
    Some(key.to_string())
}

/// `maxResults` clamped to `[1, 100]`; unset defaults to 100.
pub fn clamp_max_results(max_results: Option<i64>) -> i64 {
    max_results.unwrap_or(100).clamp(1, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let token = encode_token("test-cluster-04");
        assert_eq!(decode_token(Some(&token)).as_deref(), Some("test-cluster-04"));
    }

    #[test]
    fn test_keys_with_separators_survive() {
        let token = encode_token("nginx:12");
        assert_eq!(decode_token(Some(&token)).as_deref(), Some("nginx:12"));
    }

    #[test]
    fn test_invalid_tokens_restart_the_walk() {
        assert_eq!(decode_token(None), None);
        assert_eq!(decode_token(Some("invalid-token")), None);
        assert_eq!(decode_token(Some("")), None);
        // valid base64, wrong version tag
        let stale = STANDARD.encode("v0:whatever");
        assert_eq!(decode_token(Some(&stale)), None);
    }

    #[test]
    fn test_clamping() {
        assert_eq!(clamp_max_results(None), 100);
        assert_eq!(clamp_max_results(Some(0)), 1);
        assert_eq!(clamp_max_results(Some(-5)), 1);
        assert_eq!(clamp_max_results(Some(5)), 5);
        assert_eq!(clamp_max_results(Some(500)), 100);
    }
}

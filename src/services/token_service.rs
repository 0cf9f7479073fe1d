//! Lookup token derivation.
//!
//! A lookup token is the lowercase hex HMAC-SHA256 of a caller keyword keyed
//! with the process-wide server secret. Tokens are stored as object metadata
//! and recomputed at lookup time; the keyword itself is never persisted.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{fmt, sync::Arc};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of a rendered token: 32 digest bytes as hex.
pub const TOKEN_HEX_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("server secret must not be empty")]
    Empty,
    #[error("server secret must not be only whitespace")]
    Blank,
}

/// HMAC key shared by every request for the lifetime of the process.
///
/// Cheap to clone. `Debug` never prints the value.
#[derive(Clone)]
pub struct ServerSecret(Arc<[u8]>);

impl ServerSecret {
    pub fn new(secret: impl AsRef<str>) -> Result<Self, SecretError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SecretError::Empty);
        }
        if secret.trim().is_empty() {
            return Err(SecretError::Blank);
        }
        Ok(Self(Arc::from(secret.as_bytes())))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerSecret(<redacted>)")
    }
}

/// Deterministic digest of (keyword, secret), rendered as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LookupToken(String);

impl LookupToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a token read back from object metadata.
    ///
    /// Runs in time independent of where the first differing byte is.
    pub fn matches(&self, candidate: &str) -> bool {
        bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()))
    }
}

impl fmt::Display for LookupToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for LookupToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LookupToken({}…)", &self.0[..8.min(self.0.len())])
    }
}

/// Derive the lookup token for `keyword` under `secret`.
pub fn derive(keyword: &str, secret: &ServerSecret) -> LookupToken {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(keyword.as_bytes());
    LookupToken(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> ServerSecret {
        ServerSecret::new(s).unwrap()
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert_eq!(ServerSecret::new("").unwrap_err(), SecretError::Empty);
        assert_eq!(ServerSecret::new(" \t ").unwrap_err(), SecretError::Blank);
    }

    #[test]
    fn secret_whitespace_is_significant() {
        assert_ne!(derive("k", &secret(" pad ")), derive("k", &secret("pad")));
    }

    #[test]
    fn derive_is_deterministic() {
        let s = secret("s3cr3t");
        assert_eq!(derive("golden-retriever", &s), derive("golden-retriever", &s));
    }

    #[test]
    fn derive_matches_reference_hmac() {
        // RFC 4231 test case 2.
        let s = secret("Jefe");
        assert_eq!(
            derive("what do ya want for nothing?", &s).as_str(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn token_is_lowercase_hex_of_fixed_length() {
        let token = derive("golden-retriever", &secret("s3cr3t"));
        assert_eq!(token.as_str().len(), TOKEN_HEX_LEN);
        assert!(
            token
                .as_str()
                .chars()
                .all(|c| matches!(c, '0'..='9' | 'a'..='f'))
        );
    }

    #[test]
    fn derive_is_sensitive_to_keyword_and_secret() {
        let s = secret("s3cr3t");
        assert_ne!(
            derive("golden-retriever", &s),
            derive("Golden-Retriever", &s)
        );
        assert_ne!(
            derive("golden-retriever", &s),
            derive("golden-retriever", &secret("s3cr3T"))
        );
    }

    #[test]
    fn empty_keyword_still_derives() {
        let token = derive("", &secret("s3cr3t"));
        assert_eq!(token.as_str().len(), TOKEN_HEX_LEN);
    }

    #[test]
    fn matches_compares_whole_token() {
        let token = derive("golden-retriever", &secret("s3cr3t"));
        assert!(token.matches(&token.to_string()));
        assert!(!token.matches(&token.as_str()[..TOKEN_HEX_LEN - 1]));
        assert!(!token.matches(""));
        let mut flipped = token.to_string();
        flipped.replace_range(0..1, if flipped.starts_with('0') { "1" } else { "0" });
        assert!(!token.matches(&flipped));
    }

    #[test]
    fn secret_debug_is_redacted() {
        assert!(!format!("{:?}", secret("s3cr3t")).contains("s3cr3t"));
    }
}

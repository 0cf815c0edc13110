//! HS256 token minting and verification.
//!
//! Tokens authenticate requests to endpoints registered as secure. Claims are
//! an open JSON map; `mint` stamps `iat` and `exp`, and `verify` refuses any
//! token without `exp` — there is no implicit "forever". Signature checks are
//! constant-time inside `jsonwebtoken`.

use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Open claim map carried in the token payload.
pub type Claims = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    #[error("malformed token")]
    BadFormat,
    #[error("signature mismatch")]
    BadSignature,
    #[error("claims are not valid JSON")]
    BadJson,
    #[error("missing exp claim")]
    MissingExp,
    #[error("invalid claim")]
    BadClaim,
    #[error("token expired")]
    Expired,
}

/// Owned by the server façade and shared immutably with the I/O workers.
pub struct JwtService {
    enc: EncodingKey,
    dec: DecodingKey,
    validation: Validation,
    timeout_seconds: u64,
}

impl JwtService {
    pub fn new(secret: &str, timeout_seconds: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            enc: EncodingKey::from_secret(secret.as_bytes()),
            dec: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            timeout_seconds,
        }
    }

    /// Signs `claims` after stamping `iat` (now) and `exp` (now + timeout).
    pub fn mint(&self, mut claims: Claims) -> Result<String, JwtError> {
        let iat = unix_now();
        claims.insert("iat".into(), Value::from(iat));
        claims.insert("exp".into(), Value::from(iat + self.timeout_seconds));

        encode(&Header::new(Algorithm::HS256), &claims, &self.enc).map_err(|_| JwtError::BadJson)
    }

    /// Checks signature and expiry, returning the claim map.
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        decode::<Claims>(token, &self.dec, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                ErrorKind::InvalidSignature => JwtError::BadSignature,
                ErrorKind::MissingRequiredClaim(_) => JwtError::MissingExp,
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                    JwtError::BadFormat
                }
                ErrorKind::Json(_) => JwtError::BadJson,
                _ => JwtError::BadClaim,
            })
    }
}

#[inline]
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

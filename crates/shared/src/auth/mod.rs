use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    InvalidFormat,
    InvalidPayload,
    InvalidClaims,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidFormat => write!(f, "Token is not a three-segment JWT"),
            AuthError::InvalidPayload => write!(f, "Token payload is not valid base64"),
            AuthError::InvalidClaims => write!(f, "Token claims are not valid JSON"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Claims carried in the identity provider's bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub exp: u64,
    pub iat: u64,
}

/// Decode the claims segment of a bearer token. Signature verification
/// happens upstream at the gateway; only the payload is read here.
pub fn extract_claims(token: &str) -> Result<Claims, AuthError> {
    let mut segments = token.split('.');
    let payload_b64 = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(AuthError::InvalidFormat),
    };
    let decoded = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidPayload)?;
    serde_json::from_slice(&decoded).map_err(|_| AuthError::InvalidClaims)
}

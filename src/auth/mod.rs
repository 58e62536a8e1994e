use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AuthSettings;

/// Claims carried by an access token. The subject is the configured user
/// name the token authorizes.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    pub fn new(user: &str, duration_secs: i64, auth: &AuthSettings) -> Self {
        Self {
            sub: user.to_string(),
            exp: Utc::now().timestamp() + duration_secs,
            iss: auth.issuer.clone(),
            aud: auth.audience.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),
    #[error("invalid JWT secret")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims, auth: &AuthSettings) -> Result<String, JwtError> {
    if auth.secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(auth.secret.as_bytes()),
    )
    .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

/// Returns true when the token verifies against this user's settings
/// (HS256, expiry, optional issuer/audience) and names the user as its
/// subject.
pub fn authorize(token: &str, username: &str, auth: &AuthSettings) -> bool {
    let mut validation = Validation::new(Algorithm::HS256);
    if let Some(audience) = &auth.audience {
        validation.set_audience(&[audience]);
    }
    if let Some(issuer) = &auth.issuer {
        validation.set_issuer(&[issuer]);
    }

    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => data.claims.sub == username,
        Err(_) => false,
    }
}

//! Access token verification for the `authenticate` handshake.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Claims carried by the backend's access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Backend user id.
    pub sub: i64,
    /// Role name, e.g. `STUDENT` or `ADMIN`.
    pub role: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Who a verified token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub role: String,
}

/// Validates access tokens presented on `authenticate`.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, Error>;
}

/// HS256 verifier sharing its secret with the token-issuing backend.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 5;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn validate(&self, token: &str) -> Result<Identity, Error> {
        if token.is_empty() {
            return Err(Error::InvalidToken("empty token".to_string()));
        }

        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)?;
        if data.claims.role.is_empty() {
            return Err(Error::InvalidToken("token carries no role".to_string()));
        }

        Ok(Identity {
            user_id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

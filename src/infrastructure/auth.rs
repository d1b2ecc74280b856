//! JWT Identity Verifier
//!
//! Default implementation of the identity seam: HS256 bearer tokens with
//! the user id in the `sub` claim. Swap in another `IdentityVerifier` to
//! delegate to an external identity service.

use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::JwtSettings;
use crate::domain::{IdentityVerifier, VerifiedIdentity};
use crate::shared::error::AppError;

/// JWT claims for token validation
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
    #[serde(default)]
    name: Option<String>,
}

pub struct JwtIdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::AuthenticationFailure(format!("Invalid token: {}", e)))?;

        let user_id = token_data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::AuthenticationFailure("Invalid user ID in token".into()))?;

        Ok(VerifiedIdentity {
            user_id,
            display_name: token_data.claims.name,
        })
    }
}

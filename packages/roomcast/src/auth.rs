//! Bearer-token validation for WebSocket connections.
//!
//! Tokens are HS256 JWTs issued elsewhere. The `sub` claim names the user either
//! by id, by username, or (for bots) by slug. Expired tokens and disabled users
//! are rejected.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::ids::UserId;
use crate::models::UserIdentity;
use crate::services::{IdentityLookup, TokenValidator};

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
    identities: Arc<dyn IdentityLookup>,
}

impl JwtValidator {
    pub fn new(secret: &[u8], leeway_secs: u64, identities: Arc<dyn IdentityLookup>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            identities,
        }
    }

    async fn resolve_subject(&self, subject: &str) -> Result<UserIdentity, AuthError> {
        let lookup_err = |e: anyhow::Error| AuthError::Lookup(e.to_string());

        // An inactive id match still lets a username or slug of the same text win.
        let mut inactive = false;
        if let Ok(user_id) = subject.parse::<UserId>() {
            match self
                .identities
                .identity(user_id)
                .await
                .map_err(lookup_err)?
            {
                Some(user) if user.is_active => return Ok(user),
                Some(_) => inactive = true,
                None => {}
            }
        }

        match self
            .identities
            .identity_by_name(subject)
            .await
            .map_err(lookup_err)?
        {
            Some(user) if user.is_active => Ok(user),
            Some(_) => Err(AuthError::Inactive),
            None if inactive => Err(AuthError::Inactive),
            None => Err(AuthError::UnknownUser(subject.to_string())),
        }
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<UserIdentity, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Token rejected: {}", e);
            AuthError::InvalidToken
        })?;

        let subject = data
            .claims
            .sub
            .filter(|s| !s.trim().is_empty())
            .ok_or(AuthError::MissingSubject)?;

        let result = self.resolve_subject(subject.trim()).await;
        if let Err(ref e) = result {
            warn!(subject = %subject, code = e.error_code(), "Token subject rejected: {}", e);
        }
        result
    }
}

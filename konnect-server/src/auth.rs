//! Password hashing and bearer tokens.
//!
//! Tokens are `base64url(payload).base64url(hmac_sha256(payload))`, where the payload is
//! a small JSON object naming the user id and an expiry.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use konnect_common::UserId;
use ring::{hmac, pbkdf2, rand as ring_rand};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => unreachable!(),
};
const SALT_LENGTH: usize = 16;
const CREDENTIAL_LENGTH: usize = 32;

/// Well-formed hash that matches no password. Login checks unknown emails against it so
/// both branches cost one PBKDF2 derivation.
pub const UNKNOWN_USER_HASH: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenPayload {
    sub: UserId,
    iat: u64,
    exp: u64,
    jti: String,
}

#[derive(Clone)]
pub struct AuthService {
    signing_key: Arc<hmac::Key>,
    token_expiry_secs: u64,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("token_expiry_secs", &self.token_expiry_secs)
            .finish()
    }
}

impl AuthService {
    pub fn new(token_secret: Option<&str>, token_expiry_secs: u64) -> Result<Self> {
        let signing_key = match token_secret {
            Some(secret) => hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            None => {
                tracing::warn!("No token secret configured; issued tokens will not survive a restart");
                let rng = ring_rand::SystemRandom::new();
                hmac::Key::generate(hmac::HMAC_SHA256, &rng)
                    .map_err(|_| anyhow::anyhow!("Failed to generate signing key"))?
            }
        };
        Ok(Self {
            signing_key: Arc::new(signing_key),
            token_expiry_secs,
        })
    }

    pub fn issue_token(&self, user: &UserId) -> Result<String> {
        let now = unix_now()?;
        let payload = TokenPayload {
            sub: user.clone(),
            iat: now,
            exp: now.saturating_add(self.token_expiry_secs),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);
        let signature = hmac::sign(&self.signing_key, payload_b64.as_bytes());
        Ok(format!("{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(signature.as_ref())))
    }

    /// Returns the user id the token was issued to, or `None` if it is forged, malformed or expired.
    pub fn validate_token(&self, token: &str) -> Option<UserId> {
        let (payload_b64, signature_b64) = token.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
        hmac::verify(&self.signing_key, payload_b64.as_bytes(), &signature).ok()?;

        let payload_json = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let payload: TokenPayload = serde_json::from_slice(&payload_json).ok()?;
        if unix_now().ok()? > payload.exp {
            return None;
        }
        Some(payload.sub)
    }

    /// Resolves "self" from an `Authorization: Bearer <token>` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<UserId> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AppError::Unauthorized("missing bearer token"))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("malformed authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthorized("missing bearer token"))?;
        self.validate_token(token)
            .ok_or(AppError::Unauthorized("invalid or expired token"))
    }

    /// Base64url of salt followed by the derived key.
    pub fn hash_password(password: &str) -> Result<String> {
        let rng = ring_rand::SystemRandom::new();
        let mut salt = [0u8; SALT_LENGTH];
        ring_rand::SecureRandom::fill(&rng, &mut salt)
            .map_err(|_| anyhow::anyhow!("Failed to generate salt"))?;

        let mut derived_key = [0u8; CREDENTIAL_LENGTH];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            &salt,
            password.as_bytes(),
            &mut derived_key,
        );

        let mut combined = Vec::with_capacity(SALT_LENGTH + CREDENTIAL_LENGTH);
        combined.extend_from_slice(&salt);
        combined.extend_from_slice(&derived_key);
        Ok(URL_SAFE_NO_PAD.encode(&combined))
    }

    pub fn verify_password(password_hash: &str, password: &str) -> bool {
        let Ok(stored) = URL_SAFE_NO_PAD.decode(password_hash) else {
            tracing::warn!("Stored password hash is not valid base64");
            return false;
        };
        if stored.len() != SALT_LENGTH + CREDENTIAL_LENGTH {
            tracing::warn!("Stored password hash has the wrong length");
            return false;
        }
        let (salt, key) = stored.split_at(SALT_LENGTH);
        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PBKDF2_ITERATIONS,
            salt,
            password.as_bytes(),
            key,
        )
        .is_ok()
    }
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow::anyhow!("System time before Unix epoch"))?
        .as_secs())
}

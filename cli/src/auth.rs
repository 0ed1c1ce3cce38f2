use anyhow::{Context, Result, anyhow};
use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::http::{HeaderMap, header};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use forkful_core::models::User;

/// Token lifetime: one hour.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Internal user id.
    pub sub: String,
    pub username: String,
    pub is_guest: bool,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(secret: &str, user: &User) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.internal_id.clone(),
        username: user.username.clone(),
        is_guest: user.is_guest,
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("failed to sign token")
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .context("invalid token")?;
    Ok(data.claims)
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            internal_id: "507f1f77bcf86cd799439011".to_string(),
            username: "alice".to_string(),
            email: Some("alice@example.test".to_string()),
            password_hash: None,
            is_guest: false,
            created_at: String::new(),
        }
    }

    #[test]
    fn token_roundtrip_preserves_claims() {
        let token = issue_token("secret", &sample_user()).unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "507f1f77bcf86cd799439011");
        assert_eq!(claims.username, "alice");
        assert!(!claims.is_guest);
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = issue_token("secret-a", &sample_user()).unwrap();
        assert!(verify_token("secret-b", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        // Signed well past expiry, beyond the default leeway.
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "x".to_string(),
            username: "x".to_string(),
            is_guest: false,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(verify_token("secret", &token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(verify_token("secret", "not-a-jwt").is_err());
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}

//! JWT token generation and validation

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use wastewise_shared::types::Role;

/// JWT claims carried by every WasteWise access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (actor ID)
    pub sub: Uuid,
    /// Organization the actor acts for, if any
    #[serde(default)]
    pub org_id: Option<Uuid>,
    /// Roles held by the actor
    pub roles: Vec<Role>,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Issue a token for `actor_id` holding `roles`
    pub fn generate_token(
        &self,
        actor_id: Uuid,
        org_id: Option<Uuid>,
        roles: &[Role],
    ) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + Duration::hours(self.expiry_hours);

        let claims = Claims {
            sub: actor_id,
            org_id,
            roles: roles.to_vec(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
        };

        // Pin the algorithm so a token cannot pick its own
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }

    /// Token lifetime in seconds
    pub fn expiry_seconds(&self) -> i64 {
        self.expiry_hours * 3600
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-chars!";

    #[test]
    fn test_token_generation_and_validation() {
        let jwt = JwtManager::new(SECRET, 24);
        let actor_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();

        let token = jwt
            .generate_token(actor_id, Some(org_id), &[Role::Organization])
            .expect("Failed to generate token");

        let claims = jwt.validate_token(&token).expect("Invalid token");
        assert_eq!(claims.sub, actor_id);
        assert_eq!(claims.org_id, Some(org_id));
        assert_eq!(claims.roles, vec![Role::Organization]);
        assert_eq!(claims.exp - claims.iat, jwt.expiry_seconds());
    }

    #[test]
    fn test_token_without_org() {
        let jwt = JwtManager::new(SECRET, 1);
        let token = jwt
            .generate_token(Uuid::new_v4(), None, &[Role::Driver])
            .expect("Failed to generate token");

        let claims = jwt.validate_token(&token).expect("Invalid token");
        assert_eq!(claims.org_id, None);
        assert_eq!(claims.roles, vec![Role::Driver]);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let issuer = JwtManager::new(SECRET, 24);
        let verifier = JwtManager::new("another-secret-key-at-least-32-chars", 24);

        let token = issuer
            .generate_token(Uuid::new_v4(), None, &[Role::Admin])
            .expect("Failed to generate token");
        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        // Expired well beyond the 60 second leeway
        let jwt = JwtManager::new(SECRET, -1);
        let token = jwt
            .generate_token(Uuid::new_v4(), None, &[Role::Admin])
            .expect("Failed to generate token");

        assert!(matches!(jwt.validate_token(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let jwt = JwtManager::new(SECRET, 24);
        assert!(jwt.validate_token("not-a-jwt").is_err());
    }
}

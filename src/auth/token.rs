//! Bearer token creation and verification (HS256 JWT).

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::aggregates::{Role, User};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    /// Role at issue time; requests re-read the user, so this is informational.
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// Issued token with its lifetime in seconds.
#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

pub fn issue(user: &User, config: &Config) -> Result<AccessToken> {
    let now = Utc::now();
    let lifetime = Duration::minutes(config.jwt_expiry_minutes);
    let claims = Claims {
        sub: user.id,
        role: user.role,
        exp: (now + lifetime).timestamp(),
        iat: now.timestamp(),
    };
    let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    let access_token =
        encode(&Header::default(), &claims, &key).map_err(|e| Error::internal(format!("create JWT: {e}")))?;
    Ok(AccessToken {
        access_token,
        token_type: "Bearer",
        expires_in: lifetime.num_seconds(),
    })
}

pub fn verify(token: &str, config: &Config) -> Result<Claims> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    decode::<Claims>(token, &key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::ExpiredSignature
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => Error::Unauthenticated,
            _ => Error::internal(format!("verify JWT: {e}")),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            jwt_secret: "test-secret-with-enough-entropy".into(),
            ..Config::default()
        }
    }

    #[test]
    fn issued_token_verifies() {
        let config = config();
        let user = User::new("Ada", "ada@example.com", String::new(), Role::Staff);
        let token = issue(&user, &config).unwrap();
        assert_eq!(token.expires_in, 3600);

        let claims = verify(&token.access_token, &config).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::Staff);
    }

    #[test]
    fn rejects_other_secret_and_garbage() {
        let user = User::new("Ada", "ada@example.com", String::new(), Role::Customer);
        let token = issue(&user, &config()).unwrap();
        let other = Config {
            jwt_secret: "another-secret".into(),
            ..Config::default()
        };
        assert!(matches!(verify(&token.access_token, &other), Err(Error::Unauthenticated)));
        assert!(matches!(verify("garbage", &config()), Err(Error::Unauthenticated)));
    }

    #[test]
    fn expired_token_is_unauthenticated() {
        let config = Config {
            jwt_expiry_minutes: -10,
            ..config()
        };
        let user = User::new("Ada", "ada@example.com", String::new(), Role::Customer);
        let token = issue(&user, &config).unwrap();
        assert!(matches!(verify(&token.access_token, &config), Err(Error::Unauthenticated)));
    }
}

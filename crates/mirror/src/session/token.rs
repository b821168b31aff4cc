//! Session tokens (HS256 JWT)

use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Account email
    sub: String,
    /// Token id, the revocation key
    jti: String,
    iat: i64,
    exp: i64,
}

/// A signed session token handed to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionToken {
    pub token: String,
    pub account_email: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Claims of a token whose signature and expiry checked out
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub account_email: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies session tokens
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, account_email: &str) -> Result<SessionToken, SessionError> {
        self.issue_at(account_email, Utc::now())
    }

    pub(crate) fn issue_at(
        &self,
        account_email: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, SessionError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: account_email.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign session token")?;

        Ok(SessionToken {
            token,
            account_email: claims.sub,
            token_id: claims.jti,
            expires_at: Utc.timestamp_opt(claims.exp, 0).single().unwrap_or(expires_at),
        })
    }

    /// Check signature and expiry. Revocation is checked by the caller.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionError::TokenExpired,
                _ => SessionError::TokenMalformed,
            },
        )?;

        let claims = data.claims;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(SessionError::TokenMalformed)?;

        Ok(VerifiedToken {
            account_email: claims.sub,
            token_id: claims.jti,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new("test-secret", Duration::hours(24))
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = issuer();
        let token = issuer.issue("me@gmail.com").unwrap();
        let verified = issuer.verify(&token.token).unwrap();

        assert_eq!(verified.account_email, "me@gmail.com");
        assert_eq!(verified.token_id, token.token_id);
        assert_eq!(verified.expires_at, token.expires_at);
    }

    #[test]
    fn test_token_ids_are_unique() {
        let issuer = issuer();
        let a = issuer.issue("me@gmail.com").unwrap();
        let b = issuer.issue("me@gmail.com").unwrap();
        assert_ne!(a.token_id, b.token_id);
    }

    #[test]
    fn test_expired_token() {
        let issuer = issuer();
        let token = issuer
            .issue_at("me@gmail.com", Utc::now() - Duration::hours(25))
            .unwrap();
        assert!(matches!(
            issuer.verify(&token.token),
            Err(SessionError::TokenExpired)
        ));
    }

    #[test]
    fn test_wrong_secret_is_malformed() {
        let token = issuer().issue("me@gmail.com").unwrap();
        let other = TokenIssuer::new("another-secret", Duration::hours(24));
        assert!(matches!(
            other.verify(&token.token),
            Err(SessionError::TokenMalformed)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            issuer().verify("not.a.jwt"),
            Err(SessionError::TokenMalformed)
        ));
        assert!(matches!(issuer().verify(""), Err(SessionError::TokenMalformed)));
    }
}

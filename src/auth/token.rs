//! Identity token issuance and verification
//!
//! Tokens are compact HS256 JWTs carrying three claims: `sub` (the user ID),
//! `iat` and `exp` (Unix seconds). A token is accepted at instant `now` only
//! if its signature matches the process signing secret and
//! `iat <= now < exp`. There is no leeway and no revocation list.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Default token lifetime (24 hours)
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by an identity token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
}

impl Claims {
    fn new(subject: &str, issued_at: DateTime<Utc>, ttl: Duration) -> Result<Self, TokenError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| TokenError::InvalidTtl)?;
        if ttl_secs <= 0 {
            return Err(TokenError::InvalidTtl);
        }

        let iat = issued_at.timestamp();
        let exp = iat.checked_add(ttl_secs).ok_or(TokenError::InvalidTtl)?;

        Ok(Self {
            sub: subject.to_string(),
            iat,
            exp,
        })
    }

    /// Issue instant
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    /// Expiry instant
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// A freshly issued token and the claims it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Issue a token for `subject`, signed with `secret`, valid for `ttl`
pub fn issue(subject: &str, secret: &[u8], ttl: Duration) -> Result<String, TokenError> {
    TokenManager::new(secret, ttl)?
        .issue(subject)
        .map(|issued| issued.token)
}

/// Verify `token` against `secret` at the current instant
pub fn verify(token: &str, secret: &[u8]) -> Result<Claims, TokenError> {
    TokenManager::new(secret, DEFAULT_TOKEN_TTL)?.verify(token)
}

/// Signs and verifies identity tokens with one process-wide secret
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenManager {
    /// Create a token manager
    ///
    /// # Errors
    ///
    /// Returns `EmptySecret` for an empty secret and `InvalidTtl` for a
    /// zero lifetime.
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Result<Self, TokenError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        if ttl.as_secs() == 0 {
            return Err(TokenError::InvalidTtl);
        }

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        // Time claims are checked against an explicit instant in `verify_at`
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        })
    }

    /// Token lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `subject` starting now
    pub fn issue(&self, subject: &str) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, Utc::now())
    }

    /// Issue a token for `subject` starting at `now`
    pub fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        let claims = Claims::new(subject, now, self.ttl)?;
        let token = encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    /// Verify a token at the current instant
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token at `now`
    ///
    /// The signature is checked before any claim, so a forged token is
    /// reported as `InvalidSignature` even when it has also expired.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(classify)?
            .claims;

        if claims.sub.is_empty() {
            return Err(TokenError::Malformed("empty subject".to_string()));
        }
        if claims.exp <= claims.iat {
            return Err(TokenError::Malformed("expiry precedes issue time".to_string()));
        }
        if claims.issued_at().is_none() || claims.expires_at().is_none() {
            return Err(TokenError::Malformed("timestamp out of range".to_string()));
        }

        let now = now.timestamp();
        if now < claims.iat {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("algorithm", &SIGNING_ALGORITHM)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        _ => TokenError::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const SECRET: &[u8] = b"unit-test-signing-secret";

    fn manager() -> TokenManager {
        TokenManager::new(SECRET, Duration::from_secs(3600)).unwrap()
    }

    // Test 1: issue then verify returns the same subject
    #[test]
    fn test_issue_and_verify() {
        let tokens = manager();
        let issued = tokens.issue("42").unwrap();

        let claims = tokens.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert_eq!(claims, issued.claims);
    }

    // Test 2: token has three dot-separated segments
    #[test]
    fn test_token_format() {
        let issued = manager().issue("42").unwrap();
        assert_eq!(issued.token.split('.').count(), 3);
    }

    // Test 3: a different secret is a signature failure
    #[test]
    fn test_wrong_secret() {
        let issued = manager().issue("42").unwrap();
        let other = TokenManager::new(b"another-secret", Duration::from_secs(3600)).unwrap();

        assert_eq!(other.verify(&issued.token), Err(TokenError::InvalidSignature));
    }

    // Test 4: expiry boundary is exclusive
    #[test]
    fn test_expiry_boundary() {
        let tokens = manager();
        let start = Utc::now();
        let issued = tokens.issue_at("42", start).unwrap();

        let just_before = start + ChronoDuration::seconds(3599);
        let at_expiry = start + ChronoDuration::seconds(3600);

        assert!(tokens.verify_at(&issued.token, start).is_ok());
        assert!(tokens.verify_at(&issued.token, just_before).is_ok());
        assert_eq!(
            tokens.verify_at(&issued.token, at_expiry),
            Err(TokenError::Expired)
        );
    }

    // Test 5: verification before the issue instant
    #[test]
    fn test_not_yet_valid() {
        let tokens = manager();
        let start = Utc::now();
        let issued = tokens.issue_at("42", start).unwrap();

        assert_eq!(
            tokens.verify_at(&issued.token, start - ChronoDuration::seconds(5)),
            Err(TokenError::NotYetValid)
        );
    }

    // Test 6: tampered payload fails the signature check
    #[test]
    fn test_tampered_payload() {
        let tokens = manager();
        let issued = tokens.issue("42").unwrap();
        let other = tokens.issue("43").unwrap();

        let parts: Vec<&str> = issued.token.split('.').collect();
        let other_parts: Vec<&str> = other.token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);

        assert_eq!(tokens.verify(&forged), Err(TokenError::InvalidSignature));
    }

    // Test 7: garbage is malformed
    #[test]
    fn test_malformed_tokens() {
        let tokens = manager();
        for garbage in ["", "abc", "a.b", "a.b.c", "not a token at all"] {
            assert!(
                matches!(tokens.verify(garbage), Err(TokenError::Malformed(_))),
                "expected malformed for {:?}",
                garbage
            );
        }
    }

    // Test 8: forged and expired still reports the signature first
    #[test]
    fn test_forged_and_expired() {
        let start = Utc::now() - ChronoDuration::hours(10);
        let other = TokenManager::new(b"attacker", Duration::from_secs(60)).unwrap();
        let issued = other.issue_at("42", start).unwrap();

        assert_eq!(manager().verify(&issued.token), Err(TokenError::InvalidSignature));
    }

    // Test 9: tokens with exp <= iat are malformed
    #[test]
    fn test_inconsistent_claims() {
        let claims = Claims {
            sub: "42".to_string(),
            iat: 1_700_000_100,
            exp: 1_700_000_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert!(matches!(
            manager().verify(&token),
            Err(TokenError::Malformed(_))
        ));
    }

    // Test 10: tokens signed with another algorithm are rejected
    #[test]
    fn test_algorithm_mismatch() {
        let claims = Claims::new("42", Utc::now(), Duration::from_secs(60)).unwrap();
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert!(manager().verify(&token).is_err());
    }

    #[test]
    fn test_constructor_validation() {
        assert!(matches!(
            TokenManager::new(b"", Duration::from_secs(60)),
            Err(TokenError::EmptySecret)
        ));
        assert!(matches!(
            TokenManager::new(SECRET, Duration::from_secs(0)),
            Err(TokenError::InvalidTtl)
        ));
    }

    #[test]
    fn test_free_functions() {
        let token = issue("7", SECRET, Duration::from_secs(60)).unwrap();
        let claims = verify(&token, SECRET).unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(verify(&token, b"nope"), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_debug_hides_keys() {
        let output = format!("{:?}", manager());
        assert!(output.contains("HS256"));
        assert!(!output.contains("unit-test-signing-secret"));
    }
}

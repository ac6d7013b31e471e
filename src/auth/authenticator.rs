//! Login flow
//!
//! Exchanges an email and password for a signed identity token. Callers see
//! one failure for both an unknown email and a wrong password; the two are
//! only told apart in the logs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use super::gate::VerifiedIdentity;
use super::password::PasswordHasher;
use super::token::{Claims, TokenManager};
use crate::database::CredentialStore;
use crate::error::AuthError;
use crate::models::CredentialRecord;

/// Password verified against the decoy digest when the identifier is unknown
const DECOY_PASSWORD: &str = "dvarapala-decoy-password";

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Authenticated user
    pub user_id: i64,
    pub app_id: i64,
    /// Signed bearer token
    pub token: String,
    pub claims: Claims,
}

impl AuthOutcome {
    /// Token subject
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    /// When the token stops being accepted
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims.expires_at()
    }
}

/// Authenticates users against a credential store
pub struct Authenticator<S: CredentialStore> {
    store: Arc<S>,
    hasher: PasswordHasher,
    tokens: Arc<TokenManager>,
    decoy_digest: OnceCell<String>,
}

impl<S: CredentialStore> Authenticator<S> {
    /// Create a new authenticator
    pub fn new(store: Arc<S>, hasher: PasswordHasher, tokens: Arc<TokenManager>) -> Self {
        Self {
            store,
            hasher,
            tokens,
            decoy_digest: OnceCell::new(),
        }
    }

    /// Hash the decoy digest ahead of the first login
    pub async fn warm_up(&self) -> Result<(), AuthError> {
        self.decoy_digest().await?;
        Ok(())
    }

    async fn decoy_digest(&self) -> Result<&String, AuthError> {
        let digest = self
            .decoy_digest
            .get_or_try_init(|| self.hasher.hash_blocking(DECOY_PASSWORD.to_string()))
            .await?;
        Ok(digest)
    }

    /// Authenticate `identifier` (email) with `password`
    ///
    /// # Errors
    ///
    /// - `InvalidCredentials` for an unknown identifier or a wrong password
    /// - `Infrastructure` for store, hashing or signing failures
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<AuthOutcome, AuthError> {
        let record = self.store.find_by_identifier(identifier).await?;

        let Some(record) = record else {
            // Spend the same hashing time as a real comparison
            match self.decoy_digest().await {
                Ok(digest) => {
                    let _ = self
                        .hasher
                        .verify_blocking(password.to_string(), digest.clone())
                        .await;
                }
                Err(e) => tracing::warn!(error = %e, "Failed to prepare decoy digest"),
            }

            tracing::info!(identifier = %identifier, "authentication failed: unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        let matched = self
            .hasher
            .verify_blocking(password.to_string(), record.password_hash.clone())
            .await?;

        if !matched {
            tracing::info!(user_id = record.id, "authentication failed: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let issued = self
            .tokens
            .issue(&record.id.to_string())
            .map_err(|e| AuthError::Infrastructure(e.to_string()))?;

        tracing::info!(user_id = record.id, app_id = record.app_id, "authentication succeeded");

        Ok(AuthOutcome {
            user_id: record.id,
            app_id: record.app_id,
            token: issued.token,
            claims: issued.claims,
        })
    }

    /// Map a verified identity back to its stored record
    ///
    /// `None` when the subject is not a user ID or the user no longer exists.
    pub async fn resolve(
        &self,
        identity: &VerifiedIdentity,
    ) -> Result<Option<CredentialRecord>, AuthError> {
        let Some(id) = identity.user_id() else {
            return Ok(None);
        };
        Ok(self.store.find_by_id(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockCredentialStore;
    use crate::error::DbError;
    use crate::models::{CredentialRecord, Status};
    use std::time::Duration;

    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::with_cost(1024, 1).unwrap()
    }

    fn tokens() -> Arc<TokenManager> {
        Arc::new(TokenManager::new(b"authenticator-secret", Duration::from_secs(600)).unwrap())
    }

    fn record(password: &str) -> CredentialRecord {
        CredentialRecord {
            id: 42,
            app_id: 7,
            email: "ada@example.com".to_string(),
            password_hash: fast_hasher().hash(password).unwrap(),
            status: Status::Active,
        }
    }

    fn create_test_authenticator(store: MockCredentialStore) -> Authenticator<MockCredentialStore> {
        Authenticator::new(Arc::new(store), fast_hasher(), tokens())
    }

    // Test 1: correct password yields a verifiable token
    #[tokio::test]
    async fn test_authenticate_success() {
        let stored = record("correct-password");
        let mut store = MockCredentialStore::new();
        store
            .expect_find_by_identifier()
            .withf(|identifier| identifier == "ada@example.com")
            .returning(move |_| Ok(Some(stored.clone())));

        let authenticator = create_test_authenticator(store);
        let outcome = authenticator
            .authenticate("ada@example.com", "correct-password")
            .await
            .unwrap();

        assert_eq!(outcome.user_id, 42);
        assert_eq!(outcome.app_id, 7);
        assert_eq!(outcome.subject(), "42");
        assert!(outcome.expires_at().is_some());

        let claims = tokens().verify(&outcome.token).unwrap();
        assert_eq!(claims.sub, "42");
    }

    // Test 2: wrong password
    #[tokio::test]
    async fn test_authenticate_wrong_password() {
        let stored = record("correct-password");
        let mut store = MockCredentialStore::new();
        store
            .expect_find_by_identifier()
            .returning(move |_| Ok(Some(stored.clone())));

        let authenticator = create_test_authenticator(store);
        let result = authenticator
            .authenticate("ada@example.com", "wrong-password")
            .await;

        assert_eq!(result, Err(AuthError::InvalidCredentials));
    }

    // Test 3: unknown identifier is indistinguishable from a wrong password
    #[tokio::test]
    async fn test_authenticate_unknown_identifier() {
        let mut store = MockCredentialStore::new();
        store.expect_find_by_identifier().returning(|_| Ok(None));

        let authenticator = create_test_authenticator(store);
        let result = authenticator
            .authenticate("nobody@example.com", "whatever-password")
            .await;

        assert_eq!(result, Err(AuthError::InvalidCredentials));
    }

    // Test 4: store failures are infrastructure errors
    #[tokio::test]
    async fn test_authenticate_store_failure() {
        let mut store = MockCredentialStore::new();
        store
            .expect_find_by_identifier()
            .returning(|_| Err(DbError::Migration("database is locked".to_string())));

        let authenticator = create_test_authenticator(store);
        let result = authenticator
            .authenticate("ada@example.com", "correct-password")
            .await;

        assert!(matches!(result, Err(AuthError::Infrastructure(_))));
    }

    // Test 5: a corrupt stored digest is not a credential failure
    #[tokio::test]
    async fn test_authenticate_corrupt_digest() {
        let mut store = MockCredentialStore::new();
        store.expect_find_by_identifier().returning(|_| {
            Ok(Some(CredentialRecord {
                id: 1,
                app_id: 1,
                email: "ada@example.com".to_string(),
                password_hash: "plaintext-password".to_string(),
                status: Status::Active,
            }))
        });

        let authenticator = create_test_authenticator(store);
        let result = authenticator
            .authenticate("ada@example.com", "plaintext-password")
            .await;

        assert!(matches!(result, Err(AuthError::Infrastructure(_))));
    }

    // Test 6: verified identities resolve to their stored record
    #[tokio::test]
    async fn test_resolve_identity() {
        let stored = record("correct-password");
        let mut store = MockCredentialStore::new();
        store
            .expect_find_by_id()
            .times(2)
            .returning(move |id| Ok((id == 42).then(|| stored.clone())));

        let authenticator = create_test_authenticator(store);
        let identity = |subject: &str| VerifiedIdentity {
            subject: subject.to_string(),
            issued_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now(),
        };

        let found = authenticator.resolve(&identity("42")).await.unwrap().unwrap();
        assert_eq!(found.email, "ada@example.com");
        assert!(authenticator.resolve(&identity("7")).await.unwrap().is_none());
        assert!(authenticator.resolve(&identity("svc")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_warm_up_is_idempotent() {
        let authenticator = create_test_authenticator(MockCredentialStore::new());
        authenticator.warm_up().await.unwrap();
        authenticator.warm_up().await.unwrap();
    }

    #[tokio::test]
    async fn test_each_login_issues_a_token_for_the_same_subject() {
        let stored = record("correct-password");
        let mut store = MockCredentialStore::new();
        store
            .expect_find_by_identifier()
            .times(2)
            .returning(move |_| Ok(Some(stored.clone())));

        let authenticator = create_test_authenticator(store);
        let first = authenticator
            .authenticate("ada@example.com", "correct-password")
            .await
            .unwrap();
        let second = authenticator
            .authenticate("ada@example.com", "correct-password")
            .await
            .unwrap();

        assert_eq!(first.subject(), second.subject());
    }
}

//! Password hashing and verification
//!
//! Passwords are stored as Argon2id digests in PHC string format. Each call to
//! [`PasswordHasher::hash`] draws a fresh salt from the OS RNG, so hashing the
//! same password twice yields two different digests that both verify.
//!
//! Verification compares in constant time. The cost parameters used for
//! verification are the ones embedded in the stored digest, so raising the
//! work factor does not invalidate existing passwords.

use argon2::{
    password_hash::{
        Error as PasswordHashError, PasswordHash, PasswordHasher as _, PasswordVerifier,
        SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;

use crate::error::HashError;

/// Default Argon2 iteration count
pub const DEFAULT_WORK_FACTOR: u32 = Params::DEFAULT_T_COST;

/// Default Argon2 memory cost in KiB
pub const DEFAULT_MEMORY_KIB: u32 = Params::DEFAULT_M_COST;

const PARALLELISM: u32 = Params::DEFAULT_P_COST;

/// Argon2id password hasher
///
/// Cheap to clone and immutable once built; share it freely between tasks.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// Create a hasher with the given iteration count and default memory cost
    pub fn new(work_factor: u32) -> Result<Self, HashError> {
        Self::with_cost(DEFAULT_MEMORY_KIB, work_factor)
    }

    /// Create a hasher with explicit memory (KiB) and iteration costs
    pub fn with_cost(memory_kib: u32, work_factor: u32) -> Result<Self, HashError> {
        let params = Params::new(memory_kib, work_factor, PARALLELISM, None)
            .map_err(|e| HashError::InvalidParams(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password
    ///
    /// # Returns
    ///
    /// The Argon2id digest in PHC format (`$argon2id$v=19$...`)
    ///
    /// # Example
    ///
    /// ```
    /// use dvarapala::auth::PasswordHasher;
    ///
    /// let hasher = PasswordHasher::with_cost(1024, 1).unwrap();
    /// let digest = hasher.hash("correct horse").unwrap();
    /// assert!(digest.starts_with("$argon2id$"));
    /// assert!(hasher.verify("correct horse", &digest).unwrap());
    /// ```
    pub fn hash(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| HashError::HashFailed(e.to_string()))
    }

    /// Verify a password against a stored digest
    ///
    /// Returns `Ok(false)` on a mismatch. An unparsable digest or an engine
    /// failure is an error, not a mismatch.
    pub fn verify(&self, password: &str, digest: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(digest)
            .map_err(|e| HashError::InvalidDigest(e.to_string()))?;

        match self.argon2().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(PasswordHashError::Password) => Ok(false),
            Err(e) => Err(HashError::HashFailed(e.to_string())),
        }
    }

    /// Hash on the blocking thread pool
    pub async fn hash_blocking(&self, password: String) -> Result<String, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| HashError::TaskFailed(e.to_string()))?
    }

    /// Verify on the blocking thread pool
    pub async fn verify_blocking(
        &self,
        password: String,
        digest: String,
    ) -> Result<bool, HashError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &digest))
            .await
            .map_err(|e| HashError::TaskFailed(e.to_string()))?
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

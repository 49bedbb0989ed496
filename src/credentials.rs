//! Password hashing and the account operations that touch a hash.
//!
//! Hashes are PHC strings produced by PBKDF2-SHA256 with a random salt.
//! The iteration count is fixed when [`Credentials`] is built and is
//! recorded inside every hash, so verification keeps working if the
//! configured count later changes.

use chrono::Utc;
use pbkdf2::password_hash::{
    Error as HashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use pbkdf2::{Params, Pbkdf2};
use rand_core::OsRng;
use uuid::Uuid;

use crate::models::{normalize_email, Account, NewAccount, Role, MIN_PASSWORD_LEN};
use crate::store::{Store, StoreError};

pub const DEFAULT_ROUNDS: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Please provide name, email and password")]
    Missing,
    #[error("Password must be at least 6 characters")]
    TooShort,
    #[error("Please add a valid email")]
    InvalidEmail,
    #[error("email is already registered")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("stored password hash is corrupt: {0}")]
    Corrupt(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CredentialError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => CredentialError::EmailTaken,
            other => CredentialError::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    params: Params,
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(DEFAULT_ROUNDS)
    }
}

impl Credentials {
    pub fn new(rounds: u32) -> Self {
        Self {
            params: Params {
                rounds,
                ..Params::default()
            },
        }
    }

    pub fn rounds(&self) -> u32 {
        self.params.rounds
    }

    pub fn hash_password(&self, plaintext: &str) -> Result<String, CredentialError> {
        if plaintext.chars().count() < MIN_PASSWORD_LEN {
            return Err(CredentialError::TooShort);
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = Pbkdf2
            .hash_password_customized(plaintext.as_bytes(), None, None, self.params, &salt)
            .map_err(|err| CredentialError::Hashing(err.to_string()))?;
        Ok(hash.to_string())
    }

    /// Returns `Ok(false)` on mismatch. Only an unparseable or foreign
    /// stored hash is an error.
    pub fn verify_password(
        &self,
        plaintext: &str,
        stored_hash: &str,
    ) -> Result<bool, CredentialError> {
        let hash = PasswordHash::new(stored_hash)
            .map_err(|err| CredentialError::Corrupt(err.to_string()))?;
        match Pbkdf2.verify_password(plaintext.as_bytes(), &hash) {
            Ok(()) => Ok(true),
            Err(HashError::Password) => Ok(false),
            Err(err) => Err(CredentialError::Corrupt(err.to_string())),
        }
    }

    /// Hashes the password and stores the new account. Nothing is written
    /// unless hashing succeeded.
    pub async fn create_account(
        &self,
        store: &dyn Store,
        registration: Registration,
    ) -> Result<Account, CredentialError> {
        let name = registration.name.trim().to_string();
        if name.is_empty() || registration.email.trim().is_empty() || registration.password.is_empty()
        {
            return Err(CredentialError::Missing);
        }
        let email = normalize_email(&registration.email).ok_or(CredentialError::InvalidEmail)?;
        let password_hash = self.hash_password(&registration.password)?;

        let account = store
            .insert_account(NewAccount {
                id: Uuid::new_v4(),
                name,
                email,
                role: registration.role,
                password_hash,
                created_at: Utc::now(),
            })
            .await?;
        log::info!("registered {} account {}", account.role, account.id);
        Ok(account)
    }

    /// Looks up the account by email and checks the password. Unknown
    /// email and wrong password are indistinguishable to the caller.
    pub async fn authenticate(
        &self,
        store: &dyn Store,
        email: &str,
        password: &str,
    ) -> Result<Account, CredentialError> {
        let email = match normalize_email(email) {
            Some(email) => email,
            None => return Err(CredentialError::InvalidCredentials),
        };
        let stored = match store.account_by_email(&email).await? {
            Some(stored) => stored,
            None => {
                log::debug!("login attempt for unknown email");
                return Err(CredentialError::InvalidCredentials);
            }
        };
        if !self.verify_password(password, &stored.password_hash)? {
            log::debug!("password mismatch for account {}", stored.account.id);
            return Err(CredentialError::InvalidCredentials);
        }
        Ok(stored.account)
    }
}

//! Process configuration, read once from the environment at startup.

use std::fmt;
use std::net::SocketAddr;

use anyhow::{bail, Context};
use chrono::Duration;

use crate::credentials::DEFAULT_ROUNDS;
use crate::token::DEFAULT_LIFETIME_DAYS;

pub const MIN_SECRET_LEN: usize = 32;

/// Upper bound on `TOKEN_LIFETIME_DAYS`; expiry timestamps must stay representable.
pub const MAX_TOKEN_LIFETIME_DAYS: i64 = 3_650;

/// `DATABASE_URL` value selecting the in-process store.
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_lifetime: Duration,
    pub hash_rounds: u32,
    pub max_connections: u32,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &"<redacted>")
            .field("jwt_secret", &"<redacted>")
            .field("token_lifetime", &self.token_lifetime)
            .field("hash_rounds", &self.hash_rounds)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("`{}` has an invalid value", key)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. There is no default
    /// signing secret: a missing or short `JWT_SECRET` is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = match lookup("JWT_SECRET") {
            Some(secret) if !secret.trim().is_empty() => secret,
            _ => bail!("`JWT_SECRET` must be set; refusing to issue tokens without a signing secret"),
        };
        if jwt_secret.len() < MIN_SECRET_LEN {
            bail!("`JWT_SECRET` must be at least {} bytes long", MIN_SECRET_LEN);
        }

        let database_url = match lookup("DATABASE_URL") {
            Some(url) if !url.trim().is_empty() => url,
            _ => bail!(
                "`DATABASE_URL` must be set (use `{}` for the in-process store)",
                MEMORY_DATABASE
            ),
        };

        let lifetime_days: i64 = parsed(&lookup, "TOKEN_LIFETIME_DAYS", DEFAULT_LIFETIME_DAYS)?;
        if !(1..=MAX_TOKEN_LIFETIME_DAYS).contains(&lifetime_days) {
            bail!(
                "`TOKEN_LIFETIME_DAYS` must be between 1 and {}",
                MAX_TOKEN_LIFETIME_DAYS
            );
        }

        let hash_rounds: u32 = parsed(&lookup, "PASSWORD_HASH_ROUNDS", DEFAULT_ROUNDS)?;
        if hash_rounds < 1_000 {
            bail!("`PASSWORD_HASH_ROUNDS` must be at least 1000");
        }

        Ok(Self {
            bind_addr: parsed(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 5000)))?,
            database_url,
            jwt_secret,
            token_lifetime: Duration::days(lifetime_days),
            hash_rounds,
            max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 5)?,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE
    }
}

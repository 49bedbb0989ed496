//! Stateless session tokens.
//!
//! Tokens are HS256 JWTs (`header.claims.signature`, base64url without
//! padding) carrying the account id and the issue/expiry instants.
//! Verification never touches the store.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

pub const DEFAULT_LIFETIME_DAYS: i64 = 30;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token signature does not match")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("could not sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenService {
    secret: Vec<u8>,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

fn b64url_decode(s: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(s.as_bytes())
        .map_err(|_| TokenError::Malformed)
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>, lifetime: Duration) -> Self {
        Self {
            secret: secret.into(),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn mac(&self) -> Result<Hmac<Sha256>, TokenError> {
        Hmac::<Sha256>::new_from_slice(&self.secret)
            .map_err(|err| TokenError::Signing(err.to_string()))
    }

    pub fn issue(&self, account_id: Uuid) -> Result<IssuedToken, TokenError> {
        self.issue_at(account_id, Utc::now())
    }

    pub fn issue_at(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| TokenError::Signing("token lifetime overflows the expiry".to_string()))?;
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let claims = Claims {
            sub: account_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let header_json =
            serde_json::to_vec(&header).map_err(|err| TokenError::Signing(err.to_string()))?;
        let claims_json =
            serde_json::to_vec(&claims).map_err(|err| TokenError::Signing(err.to_string()))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{}.{}", signing_input, signature),
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Checks structure, then signature, then expiry, in that order.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid, TokenError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) if !h.is_empty() && !c.is_empty() => (h, c, s),
                _ => return Err(TokenError::Malformed),
            };

        let header: Header =
            serde_json::from_slice(&b64url_decode(header_b64)?).map_err(|_| TokenError::Malformed)?;
        if header.alg != "HS256" || !header.typ.eq_ignore_ascii_case("JWT") {
            return Err(TokenError::Malformed);
        }

        let signature = b64url_decode(sig_b64)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Invalid)?;

        let claims: Claims =
            serde_json::from_slice(&b64url_decode(claims_b64)?).map_err(|_| TokenError::Malformed)?;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims.sub)
    }

    /// Verifies the value of an `Authorization` header.
    pub fn verify_bearer(&self, header: &str) -> Result<Uuid, TokenError> {
        let token = header
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(TokenError::Malformed)?;
        self.verify(token)
    }
}

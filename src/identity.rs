//! Turns an `Authorization` header into an authenticated [`Principal`].

use async_trait::async_trait;
use axum::extract::{Extension, FromRequest, RequestParts};
use axum::http::header::AUTHORIZATION;
use uuid::Uuid;

use crate::models::Role;
use crate::store::{Store, StoreError};
use crate::token::{TokenError, TokenService};
use crate::{AppState, Error};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no bearer credentials supplied")]
    MissingCredentials,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("token refers to an account that no longer exists")]
    UnknownAccount,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The account a request acts as. Built once per request and only ever
/// handed out by shared reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    pub email: String,
    pub name: String,
}

pub async fn resolve(
    store: &dyn Store,
    tokens: &TokenService,
    header: Option<&str>,
) -> Result<Principal, IdentityError> {
    let header = header.ok_or(IdentityError::MissingCredentials)?;
    let account_id = tokens.verify_bearer(header)?;
    let account = store
        .account_by_id(account_id)
        .await?
        .ok_or(IdentityError::UnknownAccount)?;
    Ok(Principal {
        id: account.id,
        role: account.role,
        email: account.email,
        name: account.name,
    })
}

#[async_trait]
impl<B> FromRequest<B> for Principal
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Extension(state) = Extension::<AppState>::from_request(req)
            .await
            .map_err(|err| Error::internal("StateError", err))?;

        let header = match req.headers().get(AUTHORIZATION) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| Error::from(TokenError::Malformed))?
                    .to_string(),
            ),
            None => None,
        };

        match resolve(state.store.as_ref(), &state.tokens, header.as_deref()).await {
            Ok(principal) => Ok(principal),
            Err(err) => {
                log::debug!("rejected credentials on {}: {}", req.uri(), err);
                Err(err.into())
            }
        }
    }
}

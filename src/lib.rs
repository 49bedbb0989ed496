pub mod config;
pub mod credentials;
pub mod enrollment;
pub mod err;
pub mod identity;
pub mod models;
pub mod policy;
pub mod routes;
pub mod seed;
pub mod store;
pub mod token;

use std::sync::Arc;

use axum::handler::Handler;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;

use crate::config::Config;
use crate::credentials::Credentials;
pub use crate::err::{Error, Success};
use crate::store::Store;
use crate::token::TokenService;

pub type Payload<T> = Result<Json<Success<T>>, Error>;
pub type Created<T> = Result<(StatusCode, Json<Success<T>>), Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Success::of(value)))
}

pub fn created<V>(value: V) -> Created<V>
where
    V: Serialize,
{
    Ok((StatusCode::CREATED, Json(Success::of(value))))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Err(err)
}

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tokens: Arc<TokenService>,
    pub credentials: Credentials,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, tokens: TokenService, credentials: Credentials) -> Self {
        Self {
            store,
            tokens: Arc::new(tokens),
            credentials,
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Self {
        Self::new(
            store,
            TokenService::new(config.jwt_secret.as_bytes(), config.token_lifetime),
            Credentials::new(config.hash_rounds),
        )
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/test", get(routes::health))
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/me", get(routes::auth::me))
        .route("/api/auth/students", get(routes::auth::students))
        .route(
            "/api/courses",
            get(routes::courses::list).post(routes::courses::create),
        )
        .route(
            "/api/courses/:id",
            get(routes::courses::read)
                .put(routes::courses::update)
                .delete(routes::courses::delete),
        )
        .route("/api/courses/:id/join", post(routes::courses::join))
        .route("/api/join/:code", post(routes::courses::join_by_code))
        .route("/api/courses/:id/students", post(routes::courses::enroll_students))
        .fallback(err::handler404.into_service())
        .layer(Extension(state))
}

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use serde::Serialize;

use crate::credentials::CredentialError;
use crate::enrollment::EnrollmentError;
use crate::identity::IdentityError;
use crate::store::StoreError;
use crate::token::TokenError;

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        message: format!("Invalid path: {}", path),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

/// Error kinds surfaced to API callers.
///
/// Internal failures never carry the underlying detail, it is logged
/// when the error is constructed through [`Error::internal`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "error")]
pub enum Error {
    ValidationError { message: String },
    Unauthenticated { reason: &'static str, message: String },
    Forbidden { message: String },
    NotFound { message: String },
    Conflict { message: String },
    InternalError { kind: &'static str, message: String },
}

impl Error {
    pub fn validation<S: Into<String>>(msg: S) -> Error {
        Error::ValidationError {
            message: msg.into(),
        }
    }

    pub fn unauthenticated<S: Into<String>>(reason: &'static str, msg: S) -> Error {
        Error::Unauthenticated {
            reason,
            message: msg.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Error {
        Error::Forbidden {
            message: msg.into(),
        }
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound {
            message: msg.into(),
        }
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Error {
        Error::Conflict {
            message: msg.into(),
        }
    }

    pub fn internal(kind: &'static str, detail: impl std::fmt::Display) -> Error {
        log::error!("{}: {}", kind, detail);
        Error::InternalError {
            kind,
            message: "Internal server error".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::ValidationError { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => Error::conflict(format!("{} already exists", what)),
            StoreError::NotFound(what) => Error::not_found(format!("{} not found", what)),
            other => Error::internal("DatabaseError", other),
        }
    }
}

impl From<CredentialError> for Error {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::TooShort | CredentialError::InvalidEmail | CredentialError::Missing => {
                Error::validation(err.to_string())
            }
            CredentialError::EmailTaken => Error::conflict("User already exists"),
            CredentialError::InvalidCredentials => {
                Error::unauthenticated("invalid_credentials", "Invalid credentials")
            }
            CredentialError::Corrupt(_) | CredentialError::Hashing(_) => {
                Error::internal("CredentialError", err)
            }
            CredentialError::Store(err) => err.into(),
        }
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => Error::unauthenticated("invalid_token", "Token is not valid"),
            TokenError::Expired => Error::unauthenticated("expired_token", "Token has expired"),
            TokenError::Malformed => {
                Error::unauthenticated("malformed_token", "Token is malformed")
            }
            TokenError::Signing(_) => Error::internal("TokenError", err),
        }
    }
}

impl From<IdentityError> for Error {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::MissingCredentials => Error::unauthenticated(
                "missing_credentials",
                "No token, authorization denied",
            ),
            IdentityError::UnknownAccount => {
                Error::unauthenticated("unknown_account", "User not found")
            }
            IdentityError::Token(err) => err.into(),
            IdentityError::Store(err) => err.into(),
        }
    }
}

impl From<EnrollmentError> for Error {
    fn from(err: EnrollmentError) -> Self {
        match err {
            EnrollmentError::CourseNotFound => Error::not_found("Course not found"),
            EnrollmentError::Forbidden(message) => Error::forbidden(message),
            EnrollmentError::AlreadyEnrolled => {
                Error::conflict("Already enrolled in this course")
            }
            EnrollmentError::NotStudents(ids) => Error::validation(format!(
                "Not student accounts: {}",
                ids.iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            EnrollmentError::Store(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_status_codes() {
        assert_eq!(Error::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::unauthenticated("invalid_token", "x").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            Error::internal("Test", "boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_hide_detail() {
        let err = Error::internal("DatabaseError", "relation \"accounts\" does not exist");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "InternalError");
        assert_eq!(json["kind"], "DatabaseError");
        assert_eq!(json["message"], "Internal server error");
    }

    #[test]
    fn token_errors_are_unauthenticated() {
        let err: Error = TokenError::Expired.into();
        assert_eq!(
            err,
            Error::unauthenticated("expired_token", "Token has expired")
        );
    }
}

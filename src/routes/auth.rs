use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::Registration;
use crate::identity::Principal;
use crate::models::{Account, Role};
use crate::{breaks, created, proceeds, AppState, Created, Error, Payload};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAccount {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginAccount {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIssued {
    token: String,
    expires_at: DateTime<Utc>,
    user: Account,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    user: AccountWithCourses,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountWithCourses {
    #[serde(flatten)]
    account: Account,
    courses: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentList {
    students: Vec<Account>,
}

fn session_for(state: &AppState, user: Account) -> Result<SessionIssued, Error> {
    let issued = state.tokens.issue(user.id)?;
    Ok(SessionIssued {
        token: issued.token,
        expires_at: issued.expires_at,
        user,
    })
}

pub async fn register(
    Extension(state): Extension<AppState>,
    Json(body): Json<RegisterAccount>,
) -> Created<SessionIssued> {
    let role = match body.role.as_deref() {
        None | Some("") => Role::Student,
        Some(role) => role.parse()?,
    };

    let account = state
        .credentials
        .create_account(
            state.store.as_ref(),
            Registration {
                name: body.name,
                email: body.email,
                password: body.password,
                role,
            },
        )
        .await?;

    created(session_for(&state, account)?)
}

pub async fn login(
    Extension(state): Extension<AppState>,
    Json(body): Json<LoginAccount>,
) -> Payload<SessionIssued> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return breaks(Error::validation("Please provide email and password"));
    }

    let account = state
        .credentials
        .authenticate(state.store.as_ref(), &body.email, &body.password)
        .await?;
    log::info!("account {} logged in", account.id);

    proceeds(session_for(&state, account)?)
}

pub async fn me(principal: Principal, Extension(state): Extension<AppState>) -> Payload<CurrentUser> {
    let account = match state.store.account_by_id(principal.id).await? {
        Some(account) => account,
        None => return breaks(Error::unauthenticated("unknown_account", "User not found")),
    };
    let courses = state.store.courses_of_account(account.id).await?;

    proceeds(CurrentUser {
        user: AccountWithCourses { account, courses },
    })
}

/// Student directory for teachers picking whom to enroll.
pub async fn students(
    principal: Principal,
    Extension(state): Extension<AppState>,
) -> Payload<StudentList> {
    if principal.role != Role::Teacher {
        return breaks(Error::forbidden("Only teachers can list students"));
    }
    proceeds(StudentList {
        students: state.store.list_students().await?,
    })
}

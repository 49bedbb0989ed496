use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::Path;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::enrollment;
use crate::identity::Principal;
use crate::models::{
    generate_join_code, validate_assignments, validate_description, validate_materials,
    validate_title, AccountSummary, Assignment, Course, CourseChanges, EnrollmentEntry, Material,
    NewCourse,
};
use crate::policy::{authorize, Action};
use crate::store::StoreError;
use crate::{breaks, created, proceeds, AppState, Created, Error, Payload};

const JOIN_CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourse {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

/// Only title, description, materials and assignments are writable; any
/// other fields in the body (owner, students, code) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCourse {
    pub title: Option<String>,
    pub description: Option<String>,
    pub materials: Option<Vec<Material>>,
    pub assignments: Option<Vec<Assignment>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollStudents {
    #[serde(default)]
    pub student_ids: Vec<String>,
}

/// A course as returned to clients: owner and members are expanded to
/// their name and email.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseView {
    id: Uuid,
    title: String,
    description: String,
    teacher: AccountSummary,
    students: Vec<AccountSummary>,
    materials: Vec<Material>,
    assignments: Vec<Assignment>,
    enrollment_history: Vec<EnrollmentEntry>,
    code: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseBody {
    course: CourseView,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseList {
    courses: Vec<CourseView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentReport {
    course_id: Uuid,
    students: Vec<Uuid>,
    added: Vec<Uuid>,
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, Error> {
    Uuid::from_str(raw).map_err(|_| Error::validation(format!("Invalid {} id `{}`", what, raw)))
}

/// Expands teacher and student ids with one account lookup for all courses.
async fn present(state: &AppState, courses: Vec<Course>) -> Result<Vec<CourseView>, Error> {
    let mut ids: Vec<Uuid> = Vec::new();
    for course in &courses {
        for id in std::iter::once(&course.teacher).chain(&course.students) {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
    }
    let accounts: HashMap<Uuid, AccountSummary> = state
        .store
        .accounts_by_ids(&ids)
        .await?
        .iter()
        .map(|account| (account.id, AccountSummary::from(account)))
        .collect();

    courses
        .into_iter()
        .map(|course| -> Result<CourseView, Error> {
            let teacher = accounts.get(&course.teacher).cloned().ok_or_else(|| {
                Error::internal(
                    "StoreError",
                    format!("course {} references missing teacher {}", course.id, course.teacher),
                )
            })?;
            Ok(CourseView {
                id: course.id,
                title: course.title,
                description: course.description,
                teacher,
                students: course
                    .students
                    .iter()
                    .filter_map(|id| accounts.get(id).cloned())
                    .collect(),
                materials: course.materials,
                assignments: course.assignments,
                enrollment_history: course.enrollment_history,
                code: course.code,
                created_at: course.created_at,
            })
        })
        .collect()
}

async fn present_one(state: &AppState, course: Course) -> Result<CourseBody, Error> {
    let course = present(state, vec![course])
        .await?
        .pop()
        .ok_or_else(|| Error::internal("StoreError", "course vanished while presenting it"))?;
    Ok(CourseBody { course })
}

async fn load(state: &AppState, id: Uuid) -> Result<Course, Error> {
    state
        .store
        .course_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Course not found"))
}

pub async fn list(principal: Principal, Extension(state): Extension<AppState>) -> Payload<CourseList> {
    let courses = state.store.courses_visible_to(principal.id).await?;
    proceeds(CourseList {
        courses: present(&state, courses).await?,
    })
}

pub async fn create(
    principal: Principal,
    Extension(state): Extension<AppState>,
    Json(body): Json<CreateCourse>,
) -> Created<CourseBody> {
    authorize(&principal, Action::CreateCourse, None)?;
    let title = validate_title(&body.title)?;
    let description = validate_description(&body.description)?;
    let materials = validate_materials(body.materials)?;
    let assignments = validate_assignments(body.assignments)?;

    for _ in 0..JOIN_CODE_ATTEMPTS {
        let insert = state
            .store
            .insert_course(NewCourse {
                id: Uuid::new_v4(),
                title: title.clone(),
                description: description.clone(),
                teacher: principal.id,
                materials: materials.clone(),
                assignments: assignments.clone(),
                code: generate_join_code(),
                created_at: Utc::now(),
            })
            .await;
        match insert {
            Ok(course) => {
                log::info!("teacher {} created course {}", principal.id, course.id);
                return created(present_one(&state, course).await?);
            }
            Err(StoreError::Conflict(_)) => {
                log::debug!("join code collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(Error::internal(
        "JoinCodeError",
        "exhausted attempts to generate a unique join code",
    ))
}

pub async fn read(
    principal: Principal,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Payload<CourseBody> {
    let course = load(&state, parse_id(&id, "course")?).await?;
    authorize(&principal, Action::ViewCourse, Some(&course))?;
    proceeds(present_one(&state, course).await?)
}

pub async fn update(
    principal: Principal,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateCourse>,
) -> Payload<CourseBody> {
    let course = load(&state, parse_id(&id, "course")?).await?;
    authorize(&principal, Action::MutateCourse, Some(&course))?;

    let changes = CourseChanges {
        title: body.title.as_deref().map(validate_title).transpose()?,
        description: body
            .description
            .as_deref()
            .map(validate_description)
            .transpose()?,
        materials: body.materials.map(validate_materials).transpose()?,
        assignments: body.assignments.map(validate_assignments).transpose()?,
    };

    match state.store.update_course(course.id, changes).await? {
        Some(course) => proceeds(present_one(&state, course).await?),
        None => breaks(Error::not_found("Course not found")),
    }
}

pub async fn delete(
    principal: Principal,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Payload<Value> {
    let course = load(&state, parse_id(&id, "course")?).await?;
    authorize(&principal, Action::MutateCourse, Some(&course))?;

    if !state.store.delete_course(course.id).await? {
        return breaks(Error::not_found("Course not found"));
    }
    log::info!("teacher {} deleted course {}", principal.id, course.id);
    proceeds(json!({ "message": "Course deleted successfully" }))
}

pub async fn join(
    principal: Principal,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Payload<CourseBody> {
    let course =
        enrollment::self_enroll(state.store.as_ref(), &principal, parse_id(&id, "course")?).await?;
    proceeds(present_one(&state, course).await?)
}

pub async fn join_by_code(
    principal: Principal,
    Extension(state): Extension<AppState>,
    Path(code): Path<String>,
) -> Payload<CourseBody> {
    let course = enrollment::self_enroll_by_code(state.store.as_ref(), &principal, &code).await?;
    proceeds(present_one(&state, course).await?)
}

pub async fn enroll_students(
    principal: Principal,
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EnrollStudents>,
) -> Payload<EnrollmentReport> {
    let course_id = parse_id(&id, "course")?;
    let student_ids = body
        .student_ids
        .iter()
        .map(|raw| parse_id(raw, "student"))
        .collect::<Result<Vec<_>, _>>()?;

    let outcome =
        enrollment::bulk_enroll(state.store.as_ref(), &principal, course_id, &student_ids).await?;
    proceeds(EnrollmentReport {
        course_id: outcome.course.id,
        students: outcome.course.students,
        added: outcome.added,
    })
}

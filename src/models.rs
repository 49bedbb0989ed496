use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_TITLE_LEN: usize = 50;
pub const JOIN_CODE_LEN: usize = 6;

const JOIN_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[\w.+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$").unwrap();
}

/// Account role. Fixed when the account is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(Error::validation(format!(
                "`role` must be `teacher` or `student`, got `{}`",
                other
            ))),
        }
    }
}

/// Outward view of an account. The password hash lives only in
/// [`StoredCredential`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// An account together with its password hash, as handed to login.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub account: Account,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Public contact details of an account, as shown on a course page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            name: account.name.clone(),
            email: account.email.clone(),
        }
    }
}

/// A reading or file attached to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_url: String,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub points: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentEntry {
    pub student: Uuid,
    pub enrolled_by: Uuid,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub teacher: Uuid,
    pub students: Vec<Uuid>,
    pub materials: Vec<Material>,
    pub assignments: Vec<Assignment>,
    pub enrollment_history: Vec<EnrollmentEntry>,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

impl Course {
    pub fn is_enrolled(&self, student: Uuid) -> bool {
        self.students.contains(&student)
    }
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub teacher: Uuid,
    pub materials: Vec<Material>,
    pub assignments: Vec<Assignment>,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// Fields a course owner may change after creation. `Some` replaces the
/// whole value, including the material and assignment lists.
#[derive(Debug, Clone, Default)]
pub struct CourseChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub materials: Option<Vec<Material>>,
    pub assignments: Option<Vec<Assignment>>,
}

/// Result of an add-if-absent membership update.
#[derive(Debug, Clone)]
pub struct Enrolled {
    pub course: Course,
    pub added: Vec<Uuid>,
}

/// Trims and lowercases an email, rejecting anything that is not shaped
/// like `local@domain.tld`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    EMAIL.is_match(&email).then(|| email)
}

pub fn validate_title(raw: &str) -> Result<String, Error> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(Error::validation("Please add a course title"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::validation(format!(
            "Title cannot be more than {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

pub fn validate_description(raw: &str) -> Result<String, Error> {
    let description = raw.trim();
    if description.is_empty() {
        return Err(Error::validation("Please add a description"));
    }
    Ok(description.to_string())
}

pub fn validate_materials(materials: Vec<Material>) -> Result<Vec<Material>, Error> {
    materials
        .into_iter()
        .map(|material| {
            let title = material.title.trim();
            if title.is_empty() {
                return Err(Error::validation("Every material needs a title"));
            }
            Ok(Material {
                title: title.to_string(),
                description: material.description.trim().to_string(),
                file_url: material.file_url.trim().to_string(),
                uploaded_at: material.uploaded_at,
            })
        })
        .collect()
}

pub fn validate_assignments(assignments: Vec<Assignment>) -> Result<Vec<Assignment>, Error> {
    assignments
        .into_iter()
        .map(|assignment| {
            let title = assignment.title.trim();
            if title.is_empty() {
                return Err(Error::validation("Every assignment needs a title"));
            }
            if matches!(assignment.points, Some(points) if points < 0) {
                return Err(Error::validation("Assignment points cannot be negative"));
            }
            Ok(Assignment {
                title: title.to_string(),
                description: assignment.description.trim().to_string(),
                due_date: assignment.due_date,
                points: assignment.points,
            })
        })
        .collect()
}

pub fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_only_known_values() {
        assert_eq!("teacher".parse::<Role>().unwrap(), Role::Teacher);
        assert_eq!("student".parse::<Role>().unwrap(), Role::Student);
        assert!("admin".parse::<Role>().is_err());
        assert!("Teacher".parse::<Role>().is_err());
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(
            normalize_email("  T@Example.COM "),
            Some("t@example.com".to_string())
        );
        assert_eq!(normalize_email("not-an-email"), None);
        assert_eq!(normalize_email("a@b"), None);
    }

    #[test]
    fn titles_are_bounded() {
        assert_eq!(validate_title("  Intro ").unwrap(), "Intro");
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN)).is_ok());
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn course_content_is_validated() {
        let materials: Vec<Material> = serde_json::from_value(serde_json::json!([
            { "title": " Getting Started ", "fileUrl": "https://example.com/intro.pdf" }
        ]))
        .unwrap();
        let materials = validate_materials(materials).unwrap();
        assert_eq!(materials[0].title, "Getting Started");
        assert_eq!(materials[0].description, "");

        let untitled: Vec<Material> =
            serde_json::from_value(serde_json::json!([{ "description": "no title" }])).unwrap();
        assert!(validate_materials(untitled).is_err());

        let assignments: Vec<Assignment> = serde_json::from_value(serde_json::json!([
            { "title": "Calculator", "dueDate": "2024-03-30T00:00:00Z", "points": 100 }
        ]))
        .unwrap();
        let assignments = validate_assignments(assignments).unwrap();
        assert_eq!(assignments[0].points, Some(100));
        assert!(assignments[0].due_date.is_some());

        let negative = vec![Assignment {
            title: "Quiz".to_string(),
            description: String::new(),
            due_date: None,
            points: Some(-5),
        }];
        assert!(validate_assignments(negative).is_err());
    }

    #[test]
    fn join_codes_use_the_code_alphabet() {
        let code = generate_join_code();
        assert_eq!(code.len(), JOIN_CODE_LEN);
        assert!(code
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
    }

    #[test]
    fn account_never_serializes_a_hash() {
        let account = Account {
            id: Uuid::new_v4(),
            name: "T".to_string(),
            email: "t@example.com".to_string(),
            role: Role::Teacher,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["role"], "teacher");
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password").is_none());
    }
}

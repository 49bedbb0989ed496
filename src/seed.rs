//! Demo data: one teacher, one student and two courses owned by the
//! teacher. Seeding is idempotent; accounts and courses that already exist
//! are left as they are.

use anyhow::{anyhow, Context};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::credentials::{CredentialError, Credentials, Registration};
use crate::models::{Account, Assignment, Material, NewCourse, Role};
use crate::store::{Store, StoreError};

pub const DEMO_PASSWORD: &str = "password123";

struct DemoCourse {
    title: &'static str,
    description: &'static str,
    code: &'static str,
    material: (&'static str, &'static str, &'static str),
    assignment: (&'static str, &'static str, (i32, u32, u32), i32),
}

const DEMO_COURSES: [DemoCourse; 2] = [
    DemoCourse {
        title: "Introduction to Programming",
        description: "Learn the basics of programming with JavaScript",
        code: "PROG101",
        material: (
            "Getting Started",
            "Introduction to programming concepts",
            "https://example.com/materials/intro.pdf",
        ),
        assignment: (
            "First Assignment",
            "Create a simple calculator",
            (2024, 3, 30),
            100,
        ),
    },
    DemoCourse {
        title: "Web Development Fundamentals",
        description: "Learn HTML, CSS, and JavaScript",
        code: "WEB101",
        material: (
            "HTML Basics",
            "Introduction to HTML structure",
            "https://example.com/materials/html.pdf",
        ),
        assignment: (
            "Build a Website",
            "Create a simple personal website",
            (2024, 4, 15),
            100,
        ),
    },
];

#[derive(Debug, Clone)]
pub struct Seeded {
    pub teacher: Account,
    pub student: Account,
    pub courses: Vec<Uuid>,
}

fn midnight(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()
}

/// Creates the account unless its email is already registered.
async fn demo_account(
    store: &dyn Store,
    credentials: &Credentials,
    name: &str,
    email: &str,
    role: Role,
) -> anyhow::Result<Account> {
    let created = credentials
        .create_account(
            store,
            Registration {
                name: name.to_string(),
                email: email.to_string(),
                password: DEMO_PASSWORD.to_string(),
                role,
            },
        )
        .await;
    match created {
        Ok(account) => Ok(account),
        Err(CredentialError::EmailTaken) => {
            log::info!("demo account {} already exists", email);
            let stored = store
                .account_by_email(email)
                .await?
                .ok_or_else(|| anyhow!("demo account {} vanished", email))?;
            if stored.account.role != role {
                return Err(anyhow!("{} is registered as a {}", email, stored.account.role));
            }
            Ok(stored.account)
        }
        Err(err) => Err(err).with_context(|| format!("creating demo account {}", email)),
    }
}

pub async fn seed(store: &dyn Store, credentials: &Credentials) -> anyhow::Result<Seeded> {
    let teacher = demo_account(
        store,
        credentials,
        "Teacher Demo",
        "teacher@example.com",
        Role::Teacher,
    )
    .await?;
    let student = demo_account(
        store,
        credentials,
        "Student Demo",
        "student@example.com",
        Role::Student,
    )
    .await?;

    let mut courses = Vec::with_capacity(DEMO_COURSES.len());
    for demo in &DEMO_COURSES {
        if let Some(existing) = store.course_by_code(demo.code).await? {
            log::info!("demo course {} already exists", demo.code);
            courses.push(existing.id);
            continue;
        }

        let (m_title, m_description, file_url) = demo.material;
        let (a_title, a_description, (year, month, day), points) = demo.assignment;
        let now = Utc::now();
        let inserted = store
            .insert_course(NewCourse {
                id: Uuid::new_v4(),
                title: demo.title.to_string(),
                description: demo.description.to_string(),
                teacher: teacher.id,
                materials: vec![Material {
                    title: m_title.to_string(),
                    description: m_description.to_string(),
                    file_url: file_url.to_string(),
                    uploaded_at: now,
                }],
                assignments: vec![Assignment {
                    title: a_title.to_string(),
                    description: a_description.to_string(),
                    due_date: midnight(year, month, day),
                    points: Some(points),
                }],
                code: demo.code.to_string(),
                created_at: now,
            })
            .await;
        match inserted {
            Ok(course) => courses.push(course.id),
            Err(StoreError::Conflict(_)) => {
                log::warn!("demo course code {} was taken concurrently", demo.code)
            }
            Err(err) => return Err(err).context("creating demo course"),
        }
    }

    log::info!(
        "seeded demo data: teacher {}, student {}, {} courses",
        teacher.id,
        student.id,
        courses.len()
    );
    Ok(Seeded {
        teacher,
        student,
        courses,
    })
}

//! Enrollment transitions for (course, student) pairs.
//!
//! A pair is either not enrolled or enrolled. The only transition is into
//! the enrolled state and it is always carried out by
//! [`Store::add_students`], so membership and history move together and
//! concurrent requests cannot lose or duplicate an entry.

use uuid::Uuid;

use crate::identity::Principal;
use crate::models::{Course, Role};
use crate::policy::{can_mutate_course, can_self_enroll};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("course not found")]
    CourseNotFound,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("student is already enrolled")]
    AlreadyEnrolled,
    #[error("not student accounts: {0:?}")]
    NotStudents(Vec<Uuid>),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EnrollmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound("course") => EnrollmentError::CourseNotFound,
            other => EnrollmentError::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BulkOutcome {
    pub course: Course,
    /// Students that were newly enrolled by this call.
    pub added: Vec<Uuid>,
}

/// Student-initiated join of a course looked up by id.
pub async fn self_enroll(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
) -> Result<Course, EnrollmentError> {
    let course = store
        .course_by_id(course_id)
        .await?
        .ok_or(EnrollmentError::CourseNotFound)?;
    join(store, principal, course).await
}

/// Student-initiated join of a course looked up by its join code.
pub async fn self_enroll_by_code(
    store: &dyn Store,
    principal: &Principal,
    code: &str,
) -> Result<Course, EnrollmentError> {
    let code = code.trim().to_ascii_uppercase();
    let course = store
        .course_by_code(&code)
        .await?
        .ok_or(EnrollmentError::CourseNotFound)?;
    join(store, principal, course).await
}

async fn join(
    store: &dyn Store,
    principal: &Principal,
    course: Course,
) -> Result<Course, EnrollmentError> {
    if !can_self_enroll(principal, Some(&course)) {
        return Err(if principal.role != Role::Student {
            EnrollmentError::Forbidden("Only students can join courses")
        } else {
            EnrollmentError::AlreadyEnrolled
        });
    }

    let enrolled = store
        .add_students(course.id, &[principal.id], principal.id)
        .await?;
    // a concurrent join may have won between the read and the insert
    if enrolled.added.is_empty() {
        return Err(EnrollmentError::AlreadyEnrolled);
    }
    log::info!("student {} joined course {}", principal.id, course.id);
    Ok(enrolled.course)
}

/// Teacher-initiated enrollment of several students. Students already in
/// the course are skipped; every listed id must belong to a student
/// account or nothing is enrolled.
pub async fn bulk_enroll(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
    student_ids: &[Uuid],
) -> Result<BulkOutcome, EnrollmentError> {
    let course = store
        .course_by_id(course_id)
        .await?
        .ok_or(EnrollmentError::CourseNotFound)?;
    if !can_mutate_course(principal, Some(&course)) {
        return Err(EnrollmentError::Forbidden(
            "Only the course teacher can enroll students",
        ));
    }

    let mut requested: Vec<Uuid> = Vec::with_capacity(student_ids.len());
    for id in student_ids {
        if !requested.contains(id) {
            requested.push(*id);
        }
    }

    let mut not_students = Vec::new();
    for id in &requested {
        match store.account_by_id(*id).await? {
            Some(account) if account.role == Role::Student => {}
            _ => not_students.push(*id),
        }
    }
    if !not_students.is_empty() {
        return Err(EnrollmentError::NotStudents(not_students));
    }

    if requested.is_empty() {
        return Ok(BulkOutcome {
            course,
            added: Vec::new(),
        });
    }

    let enrolled = store
        .add_students(course.id, &requested, principal.id)
        .await?;
    log::info!(
        "teacher {} enrolled {} of {} requested students into course {}",
        principal.id,
        enrolled.added.len(),
        requested.len(),
        course.id
    );
    Ok(BulkOutcome {
        course: enrolled.course,
        added: enrolled.added,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::models::{Account, NewAccount, NewCourse};
    use crate::store::MemoryStore;

    async fn account(store: &MemoryStore, role: Role) -> Principal {
        let id = Uuid::new_v4();
        let Account {
            id,
            role,
            email,
            name,
            ..
        } = store
            .insert_account(NewAccount {
                id,
                name: format!("{} {}", role, id),
                email: format!("{}@example.com", id),
                role,
                password_hash: "$pbkdf2-sha256$unused".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        Principal {
            id,
            role,
            email,
            name,
        }
    }

    async fn course(store: &MemoryStore, teacher: &Principal) -> Course {
        store
            .insert_course(NewCourse {
                id: Uuid::new_v4(),
                title: "Intro".to_string(),
                description: "Basics".to_string(),
                teacher: teacher.id,
                materials: Vec::new(),
                assignments: Vec::new(),
                code: "INTRO1".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn self_enroll_records_one_entry() {
        let store = MemoryStore::new();
        let teacher = account(&store, Role::Teacher).await;
        let student = account(&store, Role::Student).await;
        let course = course(&store, &teacher).await;

        let joined = self_enroll(&store, &student, course.id).await.unwrap();
        assert_eq!(joined.students, vec![student.id]);
        assert_eq!(joined.enrollment_history.len(), 1);
        assert_eq!(joined.enrollment_history[0].student, student.id);
        assert_eq!(joined.enrollment_history[0].enrolled_by, student.id);
    }

    #[tokio::test]
    async fn second_self_enroll_is_already_enrolled() {
        let store = MemoryStore::new();
        let teacher = account(&store, Role::Teacher).await;
        let student = account(&store, Role::Student).await;
        let course = course(&store, &teacher).await;

        self_enroll(&store, &student, course.id).await.unwrap();
        assert!(matches!(
            self_enroll(&store, &student, course.id).await,
            Err(EnrollmentError::AlreadyEnrolled)
        ));

        let course = store.course_by_id(course.id).await.unwrap().unwrap();
        assert_eq!(course.students.len(), 1);
        assert_eq!(course.enrollment_history.len(), 1);
    }

    #[tokio::test]
    async fn teachers_cannot_self_enroll() {
        let store = MemoryStore::new();
        let teacher = account(&store, Role::Teacher).await;
        let other = account(&store, Role::Teacher).await;
        let course = course(&store, &teacher).await;

        assert!(matches!(
            self_enroll(&store, &other, course.id).await,
            Err(EnrollmentError::Forbidden(_))
        ));
        assert!(matches!(
            self_enroll(&store, &other, Uuid::new_v4()).await,
            Err(EnrollmentError::CourseNotFound)
        ));
    }

    #[tokio::test]
    async fn join_by_code_ignores_case() {
        let store = MemoryStore::new();
        let teacher = account(&store, Role::Teacher).await;
        let student = account(&store, Role::Student).await;
        let course = course(&store, &teacher).await;

        let joined = self_enroll_by_code(&store, &student, " intro1 ").await.unwrap();
        assert_eq!(joined.id, course.id);
        assert!(joined.is_enrolled(student.id));
    }

    #[tokio::test]
    async fn bulk_enroll_skips_existing_members() {
        let store = MemoryStore::new();
        let teacher = account(&store, Role::Teacher).await;
        let existing = account(&store, Role::Student).await;
        let fresh = account(&store, Role::Student).await;
        let course = course(&store, &teacher).await;
        self_enroll(&store, &existing, course.id).await.unwrap();

        let outcome = bulk_enroll(&store, &teacher, course.id, &[fresh.id, existing.id, fresh.id])
            .await
            .unwrap();
        assert_eq!(outcome.added, vec![fresh.id]);
        assert_eq!(outcome.course.students.len(), 2);
        assert_eq!(outcome.course.enrollment_history.len(), 2);

        let last = outcome.course.enrollment_history.last().unwrap();
        assert_eq!(last.student, fresh.id);
        assert_eq!(last.enrolled_by, teacher.id);
    }

    #[tokio::test]
    async fn bulk_enroll_requires_ownership() {
        let store = MemoryStore::new();
        let owner = account(&store, Role::Teacher).await;
        let other = account(&store, Role::Teacher).await;
        let student = account(&store, Role::Student).await;
        let course = course(&store, &owner).await;

        assert!(matches!(
            bulk_enroll(&store, &other, course.id, &[student.id]).await,
            Err(EnrollmentError::Forbidden(_))
        ));
        assert!(matches!(
            bulk_enroll(&store, &student, course.id, &[student.id]).await,
            Err(EnrollmentError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn bulk_enroll_rejects_non_students_entirely() {
        let store = MemoryStore::new();
        let teacher = account(&store, Role::Teacher).await;
        let other_teacher = account(&store, Role::Teacher).await;
        let student = account(&store, Role::Student).await;
        let course = course(&store, &teacher).await;
        let ghost = Uuid::new_v4();

        match bulk_enroll(
            &store,
            &teacher,
            course.id,
            &[student.id, other_teacher.id, ghost],
        )
        .await
        {
            Err(EnrollmentError::NotStudents(ids)) => {
                assert_eq!(ids, vec![other_teacher.id, ghost])
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let course = store.course_by_id(course.id).await.unwrap().unwrap();
        assert!(course.students.is_empty());
        assert!(course.enrollment_history.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_enroll_once() {
        let store = Arc::new(MemoryStore::new());
        let teacher = account(&store, Role::Teacher).await;
        let student = account(&store, Role::Student).await;
        let course = course(&store, &teacher).await;

        let course_id = course.id;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let student = student.clone();
            handles.push(tokio::spawn(async move {
                self_enroll(store.as_ref(), &student, course_id).await
            }));
        }

        let mut joined = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => joined += 1,
                Err(EnrollmentError::AlreadyEnrolled) => {}
                Err(err) => panic!("unexpected error: {}", err),
            }
        }
        assert_eq!(joined, 1);

        let course = store.course_by_id(course_id).await.unwrap().unwrap();
        assert_eq!(course.students, vec![student.id]);
        assert_eq!(course.enrollment_history.len(), 1);
    }
}

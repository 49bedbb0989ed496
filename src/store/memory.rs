use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::{
    Account, Course, CourseChanges, Enrolled, EnrollmentEntry, NewAccount, NewCourse, Role,
    StoredCredential,
};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, StoredCredential>,
    emails: HashMap<String, Uuid>,
    courses: HashMap<Uuid, Course>,
    codes: HashMap<String, Uuid>,
}

/// In-process store. Every operation runs under one lock, which is what
/// makes `add_students` atomic here.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut courses: Vec<Course>) -> Vec<Course> {
    courses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    courses
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut inner = self.inner.write();
        if inner.emails.contains_key(&account.email) {
            return Err(StoreError::Conflict("account"));
        }
        let public = Account {
            id: account.id,
            name: account.name,
            email: account.email,
            role: account.role,
            created_at: account.created_at,
        };
        inner.emails.insert(public.email.clone(), public.id);
        inner.accounts.insert(
            public.id,
            StoredCredential {
                account: public.clone(),
                password_hash: account.password_hash,
            },
        );
        Ok(public)
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self
            .inner
            .read()
            .accounts
            .get(&id)
            .map(|stored| stored.account.clone()))
    }

    async fn account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StoredCredential>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .emails
            .get(email)
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Account>, StoreError> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.accounts.get(id))
            .map(|stored| stored.account.clone())
            .collect())
    }

    async fn list_students(&self) -> Result<Vec<Account>, StoreError> {
        let mut students: Vec<Account> = self
            .inner
            .read()
            .accounts
            .values()
            .filter(|stored| stored.account.role == Role::Student)
            .map(|stored| stored.account.clone())
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(students)
    }

    async fn courses_of_account(&self, account_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let courses = self.courses_visible_to(account_id).await?;
        Ok(courses.into_iter().map(|course| course.id).collect())
    }

    async fn insert_course(&self, course: NewCourse) -> Result<Course, StoreError> {
        let mut inner = self.inner.write();
        if inner.codes.contains_key(&course.code) {
            return Err(StoreError::Conflict("course code"));
        }
        match inner.accounts.get(&course.teacher) {
            Some(stored) if stored.account.role == Role::Teacher => {}
            _ => return Err(StoreError::NotFound("teacher")),
        }
        let course = Course {
            id: course.id,
            title: course.title,
            description: course.description,
            teacher: course.teacher,
            students: Vec::new(),
            materials: course.materials,
            assignments: course.assignments,
            enrollment_history: Vec::new(),
            code: course.code,
            created_at: course.created_at,
        };
        inner.codes.insert(course.code.clone(), course.id);
        inner.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn course_by_id(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        Ok(self.inner.read().courses.get(&id).cloned())
    }

    async fn course_by_code(&self, code: &str) -> Result<Option<Course>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .codes
            .get(code)
            .and_then(|id| inner.courses.get(id))
            .cloned())
    }

    async fn courses_visible_to(&self, account_id: Uuid) -> Result<Vec<Course>, StoreError> {
        let courses = self
            .inner
            .read()
            .courses
            .values()
            .filter(|course| course.teacher == account_id || course.is_enrolled(account_id))
            .cloned()
            .collect();
        Ok(newest_first(courses))
    }

    async fn update_course(
        &self,
        id: Uuid,
        changes: CourseChanges,
    ) -> Result<Option<Course>, StoreError> {
        let mut inner = self.inner.write();
        let course = match inner.courses.get_mut(&id) {
            Some(course) => course,
            None => return Ok(None),
        };
        if let Some(title) = changes.title {
            course.title = title;
        }
        if let Some(description) = changes.description {
            course.description = description;
        }
        if let Some(materials) = changes.materials {
            course.materials = materials;
        }
        if let Some(assignments) = changes.assignments {
            course.assignments = assignments;
        }
        Ok(Some(course.clone()))
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        match inner.courses.remove(&id) {
            Some(course) => {
                inner.codes.remove(&course.code);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_students(
        &self,
        course_id: Uuid,
        students: &[Uuid],
        enrolled_by: Uuid,
    ) -> Result<Enrolled, StoreError> {
        let mut inner = self.inner.write();
        let course = inner
            .courses
            .get_mut(&course_id)
            .ok_or(StoreError::NotFound("course"))?;

        let now = Utc::now();
        let mut added = Vec::new();
        for &student in students {
            if course.is_enrolled(student) {
                continue;
            }
            course.students.push(student);
            course.enrollment_history.push(EnrollmentEntry {
                student,
                enrolled_by,
                enrolled_at: now,
            });
            added.push(student);
        }

        Ok(Enrolled {
            course: course.clone(),
            added,
        })
    }
}

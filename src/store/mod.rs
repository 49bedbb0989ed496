//! Persistence boundary for accounts and courses.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Account, Course, CourseChanges, Enrolled, NewAccount, NewCourse, StoredCredential,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the email is taken.
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn account_by_email(&self, email: &str)
        -> Result<Option<StoredCredential>, StoreError>;

    /// Accounts for the given ids; unknown ids are skipped.
    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Account>, StoreError>;

    async fn list_students(&self) -> Result<Vec<Account>, StoreError>;

    /// Ids of courses the account teaches or is enrolled in.
    async fn courses_of_account(&self, account_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the join code is taken.
    async fn insert_course(&self, course: NewCourse) -> Result<Course, StoreError>;

    async fn course_by_id(&self, id: Uuid) -> Result<Option<Course>, StoreError>;

    async fn course_by_code(&self, code: &str) -> Result<Option<Course>, StoreError>;

    /// Courses the account teaches or is enrolled in, newest first.
    async fn courses_visible_to(&self, account_id: Uuid) -> Result<Vec<Course>, StoreError>;

    async fn update_course(
        &self,
        id: Uuid,
        changes: CourseChanges,
    ) -> Result<Option<Course>, StoreError>;

    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Adds every student not yet in the course's membership set and
    /// appends one history entry per student actually added. Membership and
    /// history change together or not at all. Fails with
    /// [`StoreError::NotFound`] if the course does not exist.
    async fn add_students(
        &self,
        course_id: Uuid,
        students: &[Uuid],
        enrolled_by: Uuid,
    ) -> Result<Enrolled, StoreError>;
}

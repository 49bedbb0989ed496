use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::{
    Account, Assignment, Course, CourseChanges, Enrolled, EnrollmentEntry, Material, NewAccount,
    NewCourse, Role, StoredCredential,
};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_stored(self) -> Result<StoredCredential, StoreError> {
        let role = match self.role.as_str() {
            "teacher" => Role::Teacher,
            "student" => Role::Student,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "account {} has unknown role `{}`",
                    self.id, other
                )))
            }
        };
        Ok(StoredCredential {
            account: Account {
                id: self.id,
                name: self.name,
                email: self.email,
                role,
                created_at: self.created_at,
            },
            password_hash: self.password_hash,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    description: String,
    teacher_id: Uuid,
    materials: Json<Vec<Material>>,
    assignments: Json<Vec<Assignment>>,
    code: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    student_id: Uuid,
    enrolled_by: Uuid,
    enrolled_at: DateTime<Utc>,
}

fn unique_violation(err: sqlx::Error, what: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(what)
        }
        _ => StoreError::Database(err),
    }
}

/// Loads a course with its membership set and history on one connection,
/// so a caller holding a transaction sees its own writes.
async fn load_course(conn: &mut PgConnection, row: CourseRow) -> Result<Course, StoreError> {
    let students: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT student_id FROM course_students WHERE course_id = $1 ORDER BY enrolled_at, student_id",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    let history = sqlx::query_as::<_, HistoryRow>(
        "SELECT student_id, enrolled_by, enrolled_at FROM enrollment_history WHERE course_id = $1 ORDER BY id",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Course {
        id: row.id,
        title: row.title,
        description: row.description,
        teacher: row.teacher_id,
        students: students.into_iter().map(|(id,)| id).collect(),
        materials: row.materials.0,
        assignments: row.assignments.0,
        enrollment_history: history
            .into_iter()
            .map(|h| EnrollmentEntry {
                student: h.student_id,
                enrolled_by: h.enrolled_by,
                enrolled_at: h.enrolled_at,
            })
            .collect(),
        code: row.code,
        created_at: row.created_at,
    })
}

/// Postgres-backed store. Membership is the `course_students` table keyed
/// by `(course_id, student_id)`, so add-if-absent is an
/// `INSERT .. ON CONFLICT DO NOTHING`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        sqlx::query(
            "INSERT INTO accounts (id, name, email, password_hash, role, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "account"))?;

        Ok(Account {
            id: account.id,
            name: account.name,
            email: account.email,
            role: account.role,
            created_at: account.created_at,
        })
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1 LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.into_stored().map(|stored| stored.account))
            .transpose()
    }

    async fn account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StoredCredential>, StoreError> {
        let row =
            sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE email = $1 LIMIT 1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        row.map(AccountRow::into_stored).transpose()
    }

    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.into_stored().map(|stored| stored.account))
            .collect()
    }

    async fn list_students(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE role = 'student' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.into_stored().map(|stored| stored.account))
            .collect()
    }

    async fn courses_of_account(&self, account_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM courses WHERE teacher_id = $1 \
             UNION SELECT course_id FROM course_students WHERE student_id = $1",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_course(&self, course: NewCourse) -> Result<Course, StoreError> {
        // the teacher must exist and hold the teacher role
        let result = sqlx::query(
            "INSERT INTO courses (id, title, description, teacher_id, materials, assignments, code, created_at) \
             SELECT $1, $2, $3, $4, $5, $6, $7, $8 WHERE EXISTS \
             (SELECT 1 FROM accounts WHERE id = $4 AND role = 'teacher')",
        )
        .bind(course.id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.teacher)
        .bind(Json(&course.materials))
        .bind(Json(&course.assignments))
        .bind(&course.code)
        .bind(course.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "course code"))?;

        if result.rows_affected() < 1 {
            return Err(StoreError::NotFound("teacher"));
        }

        Ok(Course {
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
        })
    }

    async fn course_by_id(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, title, description, teacher_id, materials, assignments, code, created_at FROM courses WHERE id = $1 LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            Some(row) => Ok(Some(load_course(&mut *conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn course_by_code(&self, code: &str) -> Result<Option<Course>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, title, description, teacher_id, materials, assignments, code, created_at FROM courses WHERE code = $1 LIMIT 1",
        )
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            Some(row) => Ok(Some(load_course(&mut *conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn courses_visible_to(&self, account_id: Uuid) -> Result<Vec<Course>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, CourseRow>(
            "SELECT id, title, description, teacher_id, materials, assignments, code, created_at FROM courses \
             WHERE teacher_id = $1 \
             OR id IN (SELECT course_id FROM course_students WHERE student_id = $1) \
             ORDER BY created_at DESC",
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut courses = Vec::with_capacity(rows.len());
        for row in rows {
            courses.push(load_course(&mut *conn, row).await?);
        }
        Ok(courses)
    }

    async fn update_course(
        &self,
        id: Uuid,
        changes: CourseChanges,
    ) -> Result<Option<Course>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, CourseRow>(
            "UPDATE courses SET title = COALESCE($2, title), description = COALESCE($3, description), \
             materials = COALESCE($4, materials), assignments = COALESCE($5, assignments) \
             WHERE id = $1 \
             RETURNING id, title, description, teacher_id, materials, assignments, code, created_at",
        )
        .bind(id)
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.materials.map(Json))
        .bind(changes.assignments.map(Json))
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            Some(row) => Ok(Some(load_course(&mut *conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() >= 1)
    }

    async fn add_students(
        &self,
        course_id: Uuid,
        students: &[Uuid],
        enrolled_by: Uuid,
    ) -> Result<Enrolled, StoreError> {
        let mut tx = self.pool.begin().await?;

        // FOR SHARE keeps the course from being deleted mid-enrollment
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, title, description, teacher_id, materials, assignments, code, created_at FROM courses \
             WHERE id = $1 FOR SHARE",
        )
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("course"))?;

        let now = Utc::now();
        let inserted: Vec<(Uuid,)> = sqlx::query_as(
            "INSERT INTO course_students (course_id, student_id, enrolled_at) \
             SELECT $1, s.student_id, $3 FROM UNNEST($2::uuid[]) WITH ORDINALITY AS s (student_id, n) \
             ORDER BY s.n \
             ON CONFLICT (course_id, student_id) DO NOTHING \
             RETURNING student_id",
        )
        .bind(course_id)
        .bind(students.to_vec())
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        let inserted: Vec<Uuid> = inserted.into_iter().map(|(id,)| id).collect();

        // RETURNING order is not guaranteed; report additions in request order
        let mut added = Vec::with_capacity(inserted.len());
        for id in students {
            if inserted.contains(id) && !added.contains(id) {
                added.push(*id);
            }
        }

        if !added.is_empty() {
            sqlx::query(
                "INSERT INTO enrollment_history (course_id, student_id, enrolled_by, enrolled_at) \
                 SELECT $1, s.student_id, $3, $4 FROM UNNEST($2::uuid[]) WITH ORDINALITY AS s (student_id, n) \
                 ORDER BY s.n",
            )
            .bind(course_id)
            .bind(added.clone())
            .bind(enrolled_by)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let course = load_course(&mut *tx, row).await?;
        tx.commit().await?;

        Ok(Enrolled { course, added })
    }
}

/// These need a live database: run with `DATABASE_URL` set and
/// `cargo test -- --ignored`. Every test uses fresh emails and join codes,
/// so they can share one database.
#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Option<PgStore> {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) if url.starts_with("postgres") => url,
            _ => {
                eprintln!("DATABASE_URL is not a Postgres url; skipping");
                return None;
            }
        };
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .unwrap();
        let store = PgStore::from_pool(pool);
        store.migrate().await.unwrap();
        Some(store)
    }

    fn unique_code() -> String {
        Uuid::new_v4().simple().to_string()[..10].to_uppercase()
    }

    async fn account(store: &PgStore, role: Role) -> Account {
        store
            .insert_account(NewAccount {
                id: Uuid::new_v4(),
                name: format!("{} demo", role),
                email: format!("{}-{}@example.com", role, Uuid::new_v4()),
                role,
                password_hash: "$pbkdf2-sha256$unused".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    fn new_course(teacher: Uuid, code: &str) -> NewCourse {
        NewCourse {
            id: Uuid::new_v4(),
            title: "Intro".to_string(),
            description: "Basics".to_string(),
            teacher,
            materials: vec![Material {
                title: "Getting Started".to_string(),
                description: String::new(),
                file_url: "https://example.com/materials/intro.pdf".to_string(),
                uploaded_at: Utc::now(),
            }],
            assignments: Vec::new(),
            code: code.to_string(),
            created_at: Utc::now(),
        }
    }

    async fn seeded(store: &PgStore) -> (Account, Course) {
        let teacher = account(store, Role::Teacher).await;
        let course = store
            .insert_course(new_course(teacher.id, &unique_code()))
            .await
            .unwrap();
        (teacher, course)
    }

    #[tokio::test]
    #[ignore]
    async fn add_students_is_add_if_absent() {
        let store = match store().await {
            Some(store) => store,
            None => return,
        };
        let (teacher, course) = seeded(&store).await;
        let a = account(&store, Role::Student).await.id;
        let b = account(&store, Role::Student).await.id;
        let c = account(&store, Role::Student).await.id;

        let first = store.add_students(course.id, &[a, a], teacher.id).await.unwrap();
        assert_eq!(first.added, vec![a]);
        assert_eq!(first.course.students, vec![a]);
        assert_eq!(first.course.enrollment_history.len(), 1);

        let second = store
            .add_students(course.id, &[c, a, b, c], teacher.id)
            .await
            .unwrap();
        assert_eq!(second.added, vec![c, b]);
        assert_eq!(second.course.students.len(), 3);
        let history: Vec<Uuid> = second
            .course
            .enrollment_history
            .iter()
            .map(|entry| entry.student)
            .collect();
        assert_eq!(history, vec![a, c, b]);
        assert!(second
            .course
            .enrollment_history
            .iter()
            .all(|entry| entry.enrolled_by == teacher.id));

        let none = store.add_students(course.id, &[b], teacher.id).await.unwrap();
        assert!(none.added.is_empty());
        assert_eq!(none.course.enrollment_history.len(), 3);
    }

    #[tokio::test]
    #[ignore]
    async fn add_students_to_missing_course_fails() {
        let store = match store().await {
            Some(store) => store,
            None => return,
        };
        let teacher = account(&store, Role::Teacher).await;
        let student = account(&store, Role::Student).await;
        assert!(matches!(
            store
                .add_students(Uuid::new_v4(), &[student.id], teacher.id)
                .await,
            Err(StoreError::NotFound("course"))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn unique_violations_are_conflicts() {
        let store = match store().await {
            Some(store) => store,
            None => return,
        };
        let (teacher, course) = seeded(&store).await;

        let duplicate = store
            .insert_course(new_course(teacher.id, &course.code))
            .await;
        assert!(matches!(duplicate, Err(StoreError::Conflict("course code"))));

        let taken = store
            .insert_account(NewAccount {
                id: Uuid::new_v4(),
                name: "Again".to_string(),
                email: teacher.email.clone(),
                role: Role::Student,
                password_hash: "$pbkdf2-sha256$unused".to_string(),
                created_at: Utc::now(),
            })
            .await;
        assert!(matches!(taken, Err(StoreError::Conflict("account"))));
    }

    #[tokio::test]
    #[ignore]
    async fn only_teachers_own_courses() {
        let store = match store().await {
            Some(store) => store,
            None => return,
        };
        let student = account(&store, Role::Student).await;
        assert!(matches!(
            store.insert_course(new_course(student.id, &unique_code())).await,
            Err(StoreError::NotFound("teacher"))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn course_content_round_trips() {
        let store = match store().await {
            Some(store) => store,
            None => return,
        };
        let (teacher, course) = seeded(&store).await;

        let loaded = store.course_by_code(&course.code).await.unwrap().unwrap();
        assert_eq!(loaded.materials.len(), 1);
        assert_eq!(loaded.materials[0].title, "Getting Started");

        let updated = store
            .update_course(
                course.id,
                CourseChanges {
                    assignments: Some(vec![Assignment {
                        title: "First Assignment".to_string(),
                        description: "Create a simple calculator".to_string(),
                        due_date: None,
                        points: Some(100),
                    }]),
                    ..CourseChanges::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Intro");
        assert_eq!(updated.materials.len(), 1);
        assert_eq!(updated.assignments[0].points, Some(100));

        let people = store
            .accounts_by_ids(&[teacher.id, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].email, teacher.email);
    }

    #[tokio::test]
    #[ignore]
    async fn deleting_a_course_cascades() {
        let store = match store().await {
            Some(store) => store,
            None => return,
        };
        let (teacher, course) = seeded(&store).await;
        let student = account(&store, Role::Student).await;
        store
            .add_students(course.id, &[student.id], teacher.id)
            .await
            .unwrap();
        assert_eq!(
            store.courses_of_account(student.id).await.unwrap(),
            vec![course.id]
        );

        assert!(store.delete_course(course.id).await.unwrap());
        assert!(!store.delete_course(course.id).await.unwrap());
        assert!(store.course_by_id(course.id).await.unwrap().is_none());
        assert!(store.courses_of_account(student.id).await.unwrap().is_empty());

        let (orphans,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM enrollment_history WHERE course_id = $1",
        )
        .bind(course.id)
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(orphans, 0);

        // the join code is free again
        store
            .insert_course(new_course(teacher.id, &course.code))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn concurrent_joins_record_one_entry() {
        let store = match store().await {
            Some(store) => store,
            None => return,
        };
        let (_, course) = seeded(&store).await;
        let student = account(&store, Role::Student).await.id;
        let course_id = course.id;

        let joins: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.add_students(course_id, &[student], student).await
                })
            })
            .collect();

        let mut added = 0;
        for join in joins {
            added += join.await.unwrap().unwrap().added.len();
        }
        assert_eq!(added, 1);

        let course = store.course_by_id(course_id).await.unwrap().unwrap();
        assert_eq!(course.students, vec![student]);
        assert_eq!(course.enrollment_history.len(), 1);
    }
}

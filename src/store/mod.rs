//! Persistence boundary: the content store (sessions, lesson plans, generated
//! content, per-student records) and the roster directory.
//!
//! Both traits are `?Send`: the daemon runs on a single-threaded `LocalSet`.

mod http;
mod local;

pub use http::HttpStore;
pub use local::LocalStore;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::model::{
    Anchor, AnchorKey, GeneratedContent, Group, NewContent, PerStudentRecord, RecordDraft,
    SessionScalars, Student, TeacherProfile,
};

#[async_trait(?Send)]
pub trait ContentStore {
    async fn find_anchor(&self, key: &AnchorKey) -> Result<Option<Anchor>, ClientError>;

    /// Creates or updates the anchor for `key`; never creates a second record
    /// for the same key.
    async fn upsert_anchor(
        &self,
        key: &AnchorKey,
        teacher_id: &str,
        scalars: &SessionScalars,
    ) -> Result<Anchor, ClientError>;

    async fn find_content(&self, key: &AnchorKey) -> Result<Option<GeneratedContent>, ClientError>;

    /// Replaces any content (and its resources) stored under the same key.
    async fn upsert_content(&self, content: &NewContent) -> Result<GeneratedContent, ClientError>;

    async fn list_records(
        &self,
        key: &AnchorKey,
        anchor_id: &str,
    ) -> Result<Vec<PerStudentRecord>, ClientError>;

    /// Upserts by `(student_id, anchor_id)`.
    async fn save_records(
        &self,
        key: &AnchorKey,
        records: &[RecordDraft],
    ) -> Result<Vec<PerStudentRecord>, ClientError>;

    async fn list_lesson_plans(&self, teacher_id: &str) -> Result<Vec<Anchor>, ClientError>;
}

/// Roster and teacher lookups owned by the CRUD backend.
#[async_trait(?Send)]
pub trait Directory {
    async fn teacher_profile(&self, teacher_id: &str)
        -> Result<Option<TeacherProfile>, ClientError>;

    async fn list_groups(&self, teacher_id: &str) -> Result<Vec<Group>, ClientError>;

    async fn list_students(&self, teacher_id: &str) -> Result<Vec<Student>, ClientError>;
}

/// Resolves a group's roster in membership order. Member ids without a
/// matching student are skipped.
pub fn roster_for(group: &Group, students: &[Student]) -> Vec<Student> {
    group
        .member_ids
        .iter()
        .filter_map(|id| students.iter().find(|s| &s.id == id).cloned())
        .collect()
}

use serde::Serialize;

use crate::error::{LessonError, Stage};
use crate::store::{ContentStore, Directory};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStatus {
    pub has_students: bool,
    pub has_groups: bool,
    pub has_lesson_plans: bool,
}

/// Computes the three "has data" flags for a teacher. The reads are
/// independent and run concurrently; if any one fails, all flags are false.
pub async fn dashboard_status(
    directory: &dyn Directory,
    store: &dyn ContentStore,
    teacher_id: &str,
) -> (DashboardStatus, Option<LessonError>) {
    let (students, groups, plans) = tokio::join!(
        directory.list_students(teacher_id),
        directory.list_groups(teacher_id),
        store.list_lesson_plans(teacher_id),
    );
    match (students, groups, plans) {
        (Ok(s), Ok(g), Ok(p)) => (
            DashboardStatus {
                has_students: !s.is_empty(),
                has_groups: !g.is_empty(),
                has_lesson_plans: !p.is_empty(),
            },
            None,
        ),
        (s, g, p) => {
            let e = s.err().or(g.err()).or(p.err());
            tracing::warn!(teacher = teacher_id, error = ?e, "dashboard read failed; clearing flags");
            (
                DashboardStatus::default(),
                e.map(|e| LessonError::at(Stage::FetchDashboard, e)),
            )
        }
    }
}

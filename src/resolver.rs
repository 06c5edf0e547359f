use serde::Serialize;

use crate::error::{LessonError, Stage};
use crate::model::{Anchor, AnchorKey, GeneratedContent, PerStudentRecord};
use crate::store::ContentStore;

/// Persisted state for one (group, date) selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved {
    pub anchor: Option<Anchor>,
    pub content: Option<GeneratedContent>,
    pub records: Vec<PerStudentRecord>,
}

/// Loads content, then the anchor, then (only when an anchor exists) the
/// per-student records scoped to it. The reads are sequential: records are
/// never requested before the anchor id is known.
pub async fn resolve(store: &dyn ContentStore, key: &AnchorKey) -> Result<Resolved, LessonError> {
    let fetch = |e| LessonError::at(Stage::FetchSession, e);

    let content = store.find_content(key).await.map_err(fetch)?;
    let Some(anchor) = store.find_anchor(key).await.map_err(fetch)? else {
        tracing::debug!(group = %key.group_id, date = %key.date_str(), "no session for key");
        return Ok(Resolved {
            anchor: None,
            content,
            records: Vec::new(),
        });
    };
    let records = store.list_records(key, &anchor.id).await.map_err(fetch)?;
    Ok(Resolved {
        anchor: Some(anchor),
        content,
        records,
    })
}

/// Like [`resolve`], but a failed read degrades to the empty state and the
/// error is handed back for display.
pub async fn resolve_or_empty(
    store: &dyn ContentStore,
    key: &AnchorKey,
) -> (Resolved, Option<LessonError>) {
    match resolve(store, key).await {
        Ok(r) => (r, None),
        Err(e) => {
            tracing::warn!(group = %key.group_id, date = %key.date_str(), error = %e, "session read degraded to empty state");
            (Resolved::default(), Some(e))
        }
    }
}

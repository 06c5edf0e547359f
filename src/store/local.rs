use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{ContentStore, Directory};
use crate::error::ClientError;
use crate::model::{
    Anchor, AnchorKey, GeneratedContent, GeneratedResource, Group, NewContent, PerStudentRecord,
    RecordDraft, SessionScalars, Student, TeacherProfile, TeachingStandard, WorkflowKind,
};

/// Workspace-backed store over the sidecar's SQLite database.
pub struct LocalStore {
    conn: Connection,
}

fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

fn parse_kind(raw: &str) -> rusqlite::Result<WorkflowKind> {
    WorkflowKind::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown workflow kind {:?}", raw).into(),
        )
    })
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

const ANCHOR_COLUMNS: &str = "id, kind, group_id, session_date, discriminator, teacher_id, book_title, reading_level, duration_minutes, updated_at";

fn anchor_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Anchor> {
    let kind: String = row.get(1)?;
    let date: String = row.get(3)?;
    Ok(Anchor {
        id: row.get(0)?,
        key: AnchorKey {
            kind: parse_kind(&kind)?,
            group_id: row.get(2)?,
            date: parse_date(&date)?,
            discriminator: row.get(4)?,
        },
        teacher_id: row.get(5)?,
        scalars: SessionScalars {
            book_title: row.get(6)?,
            reading_level: row.get(7)?,
            duration_minutes: row.get(8)?,
        },
        updated_at: row.get(9)?,
    })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PerStudentRecord> {
    Ok(PerStudentRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        anchor_id: row.get(2)?,
        content_id: row.get(3)?,
        primary: row.get(4)?,
        secondary: row.get(5)?,
        duration_minutes: row.get(6)?,
    })
}

impl LocalStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn upsert_teacher(&self, profile: &TeacherProfile) -> Result<(), ClientError> {
        let standards = serde_json::to_string(&profile.standards)?;
        self.conn.execute(
            "INSERT INTO teachers(id, name, grade_level, standards_json) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               grade_level = excluded.grade_level,
               standards_json = excluded.standards_json",
            params![profile.id, profile.name, profile.grade_level, standards],
        )?;
        Ok(())
    }

    pub fn create_student(
        &self,
        teacher_id: &str,
        name: &str,
        grade: Option<&str>,
        reading_level: Option<&str>,
    ) -> Result<Student, ClientError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO students(id, teacher_id, name, grade, reading_level) VALUES(?, ?, ?, ?, ?)",
            params![id, teacher_id, name, grade, reading_level],
        )?;
        Ok(Student {
            id,
            name: name.to_string(),
            grade: grade.map(str::to_string),
            reading_level: reading_level.map(str::to_string),
        })
    }

    /// Creates a group; `member_ids` order becomes roster order.
    pub fn create_group(
        &self,
        teacher_id: &str,
        name: &str,
        group_type: &str,
        member_ids: &[String],
    ) -> Result<Group, ClientError> {
        let id = Uuid::new_v4().to_string();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO student_groups(id, teacher_id, name, group_type) VALUES(?, ?, ?, ?)",
            params![id, teacher_id, name, group_type],
        )?;
        for (i, sid) in member_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO group_members(group_id, student_id, sort_order) VALUES(?, ?, ?)",
                params![id, sid, i as i64],
            )?;
        }
        tx.commit()?;
        Ok(Group {
            id,
            name: name.to_string(),
            group_type: group_type.to_string(),
            teacher_id: teacher_id.to_string(),
            member_ids: member_ids.to_vec(),
        })
    }

    fn load_resources(&self, content_id: &str) -> rusqlite::Result<Vec<GeneratedResource>> {
        let mut stmt = self.conn.prepare(
            "SELECT resource_type, title, content, metadata_json
             FROM generated_resources
             WHERE content_id = ?
             ORDER BY sort_order",
        )?;
        let rows = stmt.query_map([content_id], |row| {
            let metadata: Option<String> = row.get(3)?;
            Ok(GeneratedResource {
                resource_type: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                // Unreadable metadata is dropped rather than failing the read.
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            })
        })?;
        rows.collect()
    }

    fn content_by_key(&self, key: &AnchorKey) -> rusqlite::Result<Option<GeneratedContent>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, anchor_id, content_type, plan_text, prompt_sha256, updated_at
                 FROM generated_content
                 WHERE kind = ? AND group_id = ? AND session_date = ? AND discriminator = ?",
                params![key.kind.as_str(), key.group_id, key.date_str(), key.discriminator],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, anchor_id, content_type, plan_text, prompt_sha256, updated_at)) = row else {
            return Ok(None);
        };
        let resources = self.load_resources(&id)?;
        Ok(Some(GeneratedContent {
            id,
            key: key.clone(),
            anchor_id,
            content_type,
            plan_text,
            resources,
            prompt_sha256,
            updated_at: Some(updated_at),
        }))
    }

    fn anchor_by_key(&self, key: &AnchorKey) -> rusqlite::Result<Option<Anchor>> {
        let sql = format!(
            "SELECT {} FROM anchors
             WHERE kind = ? AND group_id = ? AND session_date = ? AND discriminator = ?",
            ANCHOR_COLUMNS
        );
        self.conn
            .query_row(
                &sql,
                params![key.kind.as_str(), key.group_id, key.date_str(), key.discriminator],
                anchor_from_row,
            )
            .optional()
    }
}

#[async_trait(?Send)]
impl ContentStore for LocalStore {
    async fn find_anchor(&self, key: &AnchorKey) -> Result<Option<Anchor>, ClientError> {
        Ok(self.anchor_by_key(key)?)
    }

    async fn upsert_anchor(
        &self,
        key: &AnchorKey,
        teacher_id: &str,
        scalars: &SessionScalars,
    ) -> Result<Anchor, ClientError> {
        let ts = now_ts();
        self.conn.execute(
            "INSERT INTO anchors(
                id, kind, group_id, session_date, discriminator, teacher_id,
                book_title, reading_level, duration_minutes, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(kind, group_id, session_date, discriminator) DO UPDATE SET
               teacher_id = excluded.teacher_id,
               book_title = excluded.book_title,
               reading_level = excluded.reading_level,
               duration_minutes = excluded.duration_minutes,
               updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                key.kind.as_str(),
                key.group_id,
                key.date_str(),
                key.discriminator,
                teacher_id,
                scalars.book_title.trim(),
                scalars.reading_level.trim(),
                scalars.duration_minutes,
                ts,
                ts
            ],
        )?;
        self.anchor_by_key(key)?
            .ok_or_else(|| ClientError::Storage("anchor missing after upsert".into()))
    }

    async fn find_content(&self, key: &AnchorKey) -> Result<Option<GeneratedContent>, ClientError> {
        Ok(self.content_by_key(key)?)
    }

    async fn upsert_content(&self, content: &NewContent) -> Result<GeneratedContent, ClientError> {
        let key = &content.key;
        let ts = now_ts();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO generated_content(
                id, kind, group_id, session_date, discriminator, anchor_id,
                content_type, plan_text, prompt_sha256, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(kind, group_id, session_date, discriminator) DO UPDATE SET
               anchor_id = excluded.anchor_id,
               content_type = excluded.content_type,
               plan_text = excluded.plan_text,
               prompt_sha256 = excluded.prompt_sha256,
               updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                key.kind.as_str(),
                key.group_id,
                key.date_str(),
                key.discriminator,
                content.anchor_id,
                content.content_type,
                content.plan_text,
                content.prompt_sha256,
                ts,
                ts
            ],
        )?;
        let content_id: String = tx.query_row(
            "SELECT id FROM generated_content
             WHERE kind = ? AND group_id = ? AND session_date = ? AND discriminator = ?",
            params![key.kind.as_str(), key.group_id, key.date_str(), key.discriminator],
            |r| r.get(0),
        )?;
        // Resources belong to exactly one content record; replace them wholesale.
        tx.execute(
            "DELETE FROM generated_resources WHERE content_id = ?",
            [&content_id],
        )?;
        for (i, r) in content.resources.iter().enumerate() {
            let metadata = r
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO generated_resources(
                    id, content_id, sort_order, resource_type, title, content, metadata_json
                 ) VALUES(?, ?, ?, ?, ?, ?, ?)",
                params![
                    Uuid::new_v4().to_string(),
                    content_id,
                    i as i64,
                    r.resource_type,
                    r.title,
                    r.content,
                    metadata
                ],
            )?;
        }
        tx.commit()?;
        self.content_by_key(key)?
            .ok_or_else(|| ClientError::Storage("content missing after upsert".into()))
    }

    async fn list_records(
        &self,
        _key: &AnchorKey,
        anchor_id: &str,
    ) -> Result<Vec<PerStudentRecord>, ClientError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, anchor_id, content_id, primary_text, secondary_text, duration_minutes
             FROM student_records
             WHERE anchor_id = ?
             ORDER BY updated_at DESC, id",
        )?;
        let rows = stmt.query_map([anchor_id], record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_records(
        &self,
        _key: &AnchorKey,
        records: &[RecordDraft],
    ) -> Result<Vec<PerStudentRecord>, ClientError> {
        let ts = now_ts();
        let tx = self.conn.unchecked_transaction()?;
        let mut saved = Vec::with_capacity(records.len());
        for r in records {
            tx.execute(
                "INSERT INTO student_records(
                    id, student_id, anchor_id, content_id, primary_text, secondary_text, duration_minutes, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, anchor_id) DO UPDATE SET
                   content_id = excluded.content_id,
                   primary_text = excluded.primary_text,
                   secondary_text = excluded.secondary_text,
                   duration_minutes = excluded.duration_minutes,
                   updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    r.student_id,
                    r.anchor_id,
                    r.content_id,
                    r.primary,
                    r.secondary,
                    r.duration_minutes,
                    ts
                ],
            )?;
            let row = tx.query_row(
                "SELECT id, student_id, anchor_id, content_id, primary_text, secondary_text, duration_minutes
                 FROM student_records
                 WHERE student_id = ? AND anchor_id = ?",
                params![r.student_id, r.anchor_id],
                record_from_row,
            )?;
            saved.push(row);
        }
        tx.commit()?;
        Ok(saved)
    }

    async fn list_lesson_plans(&self, teacher_id: &str) -> Result<Vec<Anchor>, ClientError> {
        let sql = format!(
            "SELECT {} FROM anchors
             WHERE teacher_id = ? AND kind = ?
             ORDER BY session_date DESC, id",
            ANCHOR_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![teacher_id, WorkflowKind::Intervention.as_str()],
            anchor_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait(?Send)]
impl Directory for LocalStore {
    async fn teacher_profile(
        &self,
        teacher_id: &str,
    ) -> Result<Option<TeacherProfile>, ClientError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, grade_level, standards_json FROM teachers WHERE id = ?",
                [teacher_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, name, grade_level, standards_json)) = row else {
            return Ok(None);
        };
        let standards: Vec<TeachingStandard> = serde_json::from_str(&standards_json)?;
        Ok(Some(TeacherProfile {
            id,
            name,
            grade_level,
            standards,
        }))
    }

    async fn list_groups(&self, teacher_id: &str) -> Result<Vec<Group>, ClientError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, group_type, teacher_id
             FROM student_groups
             WHERE teacher_id = ?
             ORDER BY name, id",
        )?;
        let mut groups = stmt
            .query_map([teacher_id], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    group_type: row.get(2)?,
                    teacher_id: row.get(3)?,
                    member_ids: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut members = self.conn.prepare(
            "SELECT student_id FROM group_members WHERE group_id = ? ORDER BY sort_order",
        )?;
        for g in groups.iter_mut() {
            g.member_ids = members
                .query_map([&g.id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(groups)
    }

    async fn list_students(&self, teacher_id: &str) -> Result<Vec<Student>, ClientError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, grade, reading_level
             FROM students
             WHERE teacher_id = ?
             ORDER BY name, id",
        )?;
        let rows = stmt.query_map([teacher_id], |row| {
            Ok(Student {
                id: row.get(0)?,
                name: row.get(1)?,
                grade: row.get(2)?,
                reading_level: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::workflow::GUIDED_READING;

    fn store() -> LocalStore {
        LocalStore::new(db::open_in_memory().expect("open db"))
    }

    fn key() -> AnchorKey {
        GUIDED_READING
            .key(
                "g1",
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                "t1",
                None,
            )
            .unwrap()
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(f)
    }

    #[test]
    fn anchor_upsert_is_idempotent_per_key() {
        let s = store();
        let k = key();
        let first = block_on(s.upsert_anchor(
            &k,
            "t1",
            &SessionScalars {
                book_title: "Frog and Toad".into(),
                reading_level: "J".into(),
                duration_minutes: Some(20),
            },
        ))
        .unwrap();
        let second = block_on(s.upsert_anchor(
            &k,
            "t1",
            &SessionScalars {
                book_title: "Owl at Home".into(),
                reading_level: "K".into(),
                duration_minutes: None,
            },
        ))
        .unwrap();
        assert_eq!(first.id, second.id);
        let count: i64 = s
            .conn()
            .query_row("SELECT COUNT(*) FROM anchors", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let found = block_on(s.find_anchor(&k)).unwrap().expect("anchor");
        assert_eq!(found.scalars.book_title, "Owl at Home");
        assert_eq!(found.scalars.duration_minutes, None);
    }

    #[test]
    fn content_upsert_replaces_resources() {
        let s = store();
        let k = key();
        let anchor = block_on(s.upsert_anchor(&k, "t1", &SessionScalars::default())).unwrap();
        let resource = |title: &str| GeneratedResource {
            resource_type: "worksheet".into(),
            title: title.into(),
            content: "# body".into(),
            metadata: Some(serde_json::json!({ "pages": 1 })),
        };
        let mut content = NewContent {
            key: k.clone(),
            anchor_id: anchor.id.clone(),
            content_type: "next_steps".into(),
            plan_text: "plan v1".into(),
            resources: vec![resource("A"), resource("B")],
            prompt_sha256: None,
        };
        let first = block_on(s.upsert_content(&content)).unwrap();
        content.plan_text = "plan v2".into();
        content.resources = vec![resource("C")];
        let second = block_on(s.upsert_content(&content)).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.plan_text, "plan v2");
        assert_eq!(second.resources.len(), 1);
        assert_eq!(second.resources[0].title, "C");
        assert_eq!(
            second.resources[0].metadata,
            Some(serde_json::json!({ "pages": 1 }))
        );
    }

    #[test]
    fn groups_keep_member_order() {
        let s = store();
        s.upsert_teacher(&TeacherProfile {
            id: "t1".into(),
            name: "T".into(),
            grade_level: "3".into(),
            standards: vec![],
        })
        .unwrap();
        let b = s.create_student("t1", "Bea", None, Some("H")).unwrap();
        let a = s.create_student("t1", "Abe", Some("3"), None).unwrap();
        s.create_group("t1", "Bluebirds", "Guided Reading", &[b.id.clone(), a.id.clone()])
            .unwrap();

        let groups = block_on(s.list_groups("t1")).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].member_ids, vec![b.id, a.id]);
    }
}

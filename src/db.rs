use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "lessond.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade_level TEXT NOT NULL DEFAULT '',
            standards_json TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_groups(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            group_type TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_groups_teacher ON student_groups(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            grade TEXT,
            reading_level TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_teacher ON students(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_members(
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(group_id, student_id),
            FOREIGN KEY(group_id) REFERENCES student_groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    // Sessions (guided reading) and lesson plans (intervention) share one
    // table; the natural key is (kind, group_id, date, discriminator).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS anchors(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            group_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            discriminator TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            book_title TEXT NOT NULL DEFAULT '',
            reading_level TEXT NOT NULL DEFAULT '',
            duration_minutes INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(kind, group_id, session_date, discriminator)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_anchors_teacher ON anchors(teacher_id, kind)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS generated_content(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            group_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            discriminator TEXT NOT NULL,
            anchor_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            plan_text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(kind, group_id, session_date, discriminator),
            FOREIGN KEY(anchor_id) REFERENCES anchors(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS generated_resources(
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            resource_type TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT,
            FOREIGN KEY(content_id) REFERENCES generated_content(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_generated_resources_content ON generated_resources(content_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            anchor_id TEXT NOT NULL,
            content_id TEXT,
            primary_text TEXT NOT NULL,
            secondary_text TEXT NOT NULL,
            duration_minutes INTEGER,
            updated_at TEXT NOT NULL,
            UNIQUE(student_id, anchor_id),
            FOREIGN KEY(anchor_id) REFERENCES anchors(id),
            FOREIGN KEY(content_id) REFERENCES generated_content(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_records_anchor ON student_records(anchor_id)",
        [],
    )?;

    // Workspaces created before prompt fingerprints were recorded.
    ensure_content_prompt_sha(conn)?;

    Ok(())
}

fn ensure_content_prompt_sha(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "generated_content", "prompt_sha256")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE generated_content ADD COLUMN prompt_sha256 TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let conn = open_in_memory().expect("open");
        assert_eq!(settings_get_json(&conn, "setup.generation").unwrap(), None);
        settings_set_json(&conn, "setup.generation", &json!({ "timeoutSecs": 30 })).unwrap();
        settings_set_json(&conn, "setup.generation", &json!({ "timeoutSecs": 45 })).unwrap();
        assert_eq!(
            settings_get_json(&conn, "setup.generation").unwrap(),
            Some(json!({ "timeoutSecs": 45 }))
        );
    }

    #[test]
    fn schema_is_reentrant() {
        let conn = open_in_memory().expect("open");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "generated_content", "prompt_sha256").unwrap());
    }
}

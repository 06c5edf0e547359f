use std::collections::HashMap;

use crate::model::{MergedRecord, PerStudentRecord, Student};

/// Projects persisted per-student records onto the roster.
///
/// Output has exactly one entry per roster student, in roster order. Students
/// without a record get empty text and no linkage ids; records for students
/// no longer on the roster are dropped. When a student has several records the
/// first one in `records` wins.
pub fn merge(roster: &[Student], records: &[PerStudentRecord]) -> Vec<MergedRecord> {
    let mut by_student: HashMap<&str, &PerStudentRecord> = HashMap::new();
    for r in records {
        by_student.entry(r.student_id.as_str()).or_insert(r);
    }

    roster
        .iter()
        .map(|s| match by_student.get(s.id.as_str()) {
            Some(r) => MergedRecord {
                student_id: s.id.clone(),
                student_name: s.name.clone(),
                record_id: Some(r.id.clone()),
                content_id: r.content_id.clone(),
                primary: r.primary.clone(),
                secondary: r.secondary.clone(),
                duration_minutes: r.duration_minutes,
            },
            None => MergedRecord {
                student_id: s.id.clone(),
                student_name: s.name.clone(),
                record_id: None,
                content_id: None,
                primary: String::new(),
                secondary: String::new(),
                duration_minutes: None,
            },
        })
        .collect()
}

//! Teacher, group and student fixtures for the workspace backend. In remote
//! mode the directory belongs to the CRUD service and only reads are served.

use crate::config::StoreBackend;
use crate::error::{LessonError, Stage};
use crate::ipc::error::{err, lesson_err, ok};
use crate::ipc::helpers::{
    parse_opt_string, parse_string_array, required_str, services, workspace_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{TeacherProfile, TeachingStandard};
use crate::store::LocalStore;
use serde_json::json;
use std::rc::Rc;

fn writable_db(state: &AppState, req: &Request) -> Result<Rc<LocalStore>, serde_json::Value> {
    if matches!(state.config.borrow().store, StoreBackend::Remote { .. }) {
        return Err(err(
            &req.id,
            "read_only_directory",
            "the roster is managed by the remote backend",
            None,
        ));
    }
    workspace_db(state, req)
}

fn handle_teachers_upsert(state: &AppState, req: &Request) -> serde_json::Value {
    let db = match writable_db(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match parse_opt_string(req.params.get("name")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("name {}", m), None),
    };
    let grade_level = match parse_opt_string(req.params.get("gradeLevel")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("gradeLevel {}", m), None),
    };
    let standards: Vec<TeachingStandard> = match req.params.get("standards") {
        None => Vec::new(),
        Some(v) if v.is_null() => Vec::new(),
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(s) => s,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("standards must be [{{code, description}}]: {}", e),
                    None,
                )
            }
        },
    };

    let profile = TeacherProfile {
        id,
        name,
        grade_level,
        standards,
    };
    if let Err(e) = db.upsert_teacher(&profile) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "teacher": profile }))
}

fn handle_students_create(state: &AppState, req: &Request) -> serde_json::Value {
    let db = match writable_db(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade = match parse_opt_string(req.params.get("grade")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("grade {}", m), None),
    };
    let reading_level = match parse_opt_string(req.params.get("readingLevel")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("readingLevel {}", m), None),
    };
    match db.create_student(&teacher_id, &name, grade.as_deref(), reading_level.as_deref()) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_groups_create(state: &AppState, req: &Request) -> serde_json::Value {
    let db = match writable_db(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_type = match parse_opt_string(req.params.get("groupType")) {
        Ok(v) => v.unwrap_or_else(|| "guided_reading".to_string()),
        Err(m) => return err(&req.id, "bad_params", format!("groupType {}", m), None),
    };
    let member_ids = match parse_string_array(req.params.get("memberIds")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("memberIds {}", m), None),
    };
    match db.create_group(&teacher_id, &name, &group_type, &member_ids) {
        Ok(group) => ok(&req.id, json!({ "group": group })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

async fn handle_groups_list(state: &AppState, req: &Request) -> serde_json::Value {
    let svc = match services(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match svc.directory.list_groups(&teacher_id).await {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => lesson_err(&req.id, &LessonError::at(Stage::FetchGroups, e)),
    }
}

async fn handle_students_list(state: &AppState, req: &Request) -> serde_json::Value {
    let svc = match services(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match svc.directory.list_students(&teacher_id).await {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => lesson_err(&req.id, &LessonError::at(Stage::FetchStudents, e)),
    }
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.upsert" => Some(handle_teachers_upsert(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req).await),
        "groups.create" => Some(handle_groups_create(state, req)),
        "groups.list" => Some(handle_groups_list(state, req).await),
        _ => None,
    }
}

mod test_support;

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use test_support::{
    next_event, request_err, request_ok, spawn_sidecar, spawn_sidecar_with_env, str_field,
    temp_dir,
};

/// Accepts generator connections and never answers them. Returns the base
/// URL and a count of accepted connections.
fn silent_generator() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });
    (url, accepted)
}

#[test]
fn guided_reading_session_open_edit_and_failed_generation() {
    let workspace = temp_dir("lessond-session-ipc");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["storeBackend"], "workspace");
    assert_eq!(health["ready"], false);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "session.view",
        json!({}),
    );
    assert_eq!(e["code"], "no_session");

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.upsert",
        json!({
            "id": "t1",
            "name": "Ms. Rivera",
            "gradeLevel": "2",
            "standards": [{ "code": "RL.2.1", "description": "Ask and answer questions" }]
        }),
    );
    let ana = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "teacherId": "t1", "name": "Ana", "readingLevel": "J" }),
    );
    let ben = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "teacherId": "t1", "name": "Ben" }),
    );
    let ana_id = str_field(&ana["student"], "id");
    let ben_id = str_field(&ben["student"], "id");

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "groups.create",
        json!({ "teacherId": "t1", "name": "Blue", "memberIds": [ben_id, ana_id] }),
    );
    let group_id = str_field(&group["group"], "id");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "groups.list",
        json!({ "teacherId": "t1" }),
    );
    assert_eq!(listed["groups"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(listed["groups"][0]["memberIds"], json!([ben_id, ana_id]));

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "session.open",
        json!({
            "workflow": "guided_reading",
            "teacherId": "t1",
            "groupId": group_id,
            "date": "2024-03-01T15:30:00Z"
        }),
    );
    let session = &opened["session"];
    assert_eq!(session["date"], "2024-03-01");
    assert!(session["anchorId"].is_null());
    assert!(session["content"].is_null());
    assert_eq!(opened["warnings"], json!([]));
    let records = session["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["studentId"], json!(ben_id));
    assert_eq!(records[0]["activity"], "");
    assert_eq!(records[1]["name"], "Ana");

    let e = request_err(&mut stdin, &mut reader, "10", "generation.start", json!({}));
    assert_eq!(e["code"], "validation_failed");
    assert!(e["message"].as_str().unwrap_or("").contains("bookTitle"));

    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "session.updateScalars",
        json!({ "bookTitle": "Frog and Toad", "readingLevel": "J" }),
    );
    let e = request_err(&mut stdin, &mut reader, "12", "generation.start", json!({}));
    assert_eq!(e["code"], "validation_failed");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "session.updateRecord",
        json!({ "studentId": ana_id, "field": "intervention", "value": "x" }),
    );
    assert_eq!(e["code"], "bad_params");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "session.updateRecord",
        json!({ "studentId": ana_id, "field": "activity", "value": "Retold chapter 1" }),
    );
    assert_eq!(updated["record"]["activity"], "Retold chapter 1");

    let started = request_ok(&mut stdin, &mut reader, "15", "generation.start", json!({}));
    assert_eq!(started["started"], true);
    let settled = next_event(&mut reader, "generation.settled");
    assert_eq!(settled["ok"], false);
    assert_eq!(settled["persisted"], false);
    assert_eq!(settled["error"]["stage"], "generate_plan");
    assert!(settled["error"]["message"]
        .as_str()
        .unwrap_or("")
        .starts_with("failed to generate plan"));

    let status = request_ok(&mut stdin, &mut reader, "16", "generation.status", json!({}));
    assert_eq!(status["phase"], "settled_error");
    assert_eq!(status["busy"], false);
    assert_eq!(status["hasDraft"], false);

    let e = request_err(&mut stdin, &mut reader, "17", "generation.save", json!({}));
    assert_eq!(e["code"], "no_draft");

    // Nothing was persisted, so reopening shows the empty session again.
    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "session.open",
        json!({
            "workflow": "guided_reading",
            "teacherId": "t1",
            "groupId": group_id,
            "date": "2024-03-01"
        }),
    );
    assert!(reopened["session"]["anchorId"].is_null());
    assert_eq!(reopened["session"]["records"][1]["activity"], "");
    assert!(reopened["epoch"].as_u64() > opened["epoch"].as_u64());

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "dashboard.status",
        json!({ "teacherId": "t1" }),
    );
    assert_eq!(dash["hasStudents"], true);
    assert_eq!(dash["hasGroups"], true);
    assert_eq!(dash["hasLessonPlans"], false);
}

#[test]
fn intervention_session_requires_lesson_type_and_uses_its_field_names() {
    let workspace = temp_dir("lessond-intervention-ipc");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.upsert",
        json!({ "id": "t9", "gradeLevel": "3" }),
    );
    let s = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "teacherId": "t9", "name": "Cy" }),
    );
    let cy = str_field(&s["student"], "id");
    let g = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.create",
        json!({ "teacherId": "t9", "name": "Tier 2", "groupType": "intervention", "memberIds": [cy] }),
    );
    let group_id = str_field(&g["group"], "id");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "session.open",
        json!({ "workflow": "intervention", "teacherId": "t9", "groupId": group_id, "date": "2024-04-02" }),
    );
    assert_eq!(e["code"], "validation_failed");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "session.open",
        json!({ "workflow": "intervention", "teacherId": "t9", "groupId": group_id, "date": "not a date", "lessonType": "phonics" }),
    );
    assert_eq!(e["code"], "validation_failed");

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.open",
        json!({ "workflow": "intervention", "teacherId": "t9", "groupId": group_id, "date": "2024-04-02", "lessonType": "phonics" }),
    );
    assert_eq!(opened["session"]["lessonType"], "phonics");
    assert_eq!(opened["session"]["records"][0]["intervention"], "");
    assert_eq!(opened["session"]["records"][0]["interventionResults"], "");

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "session.setRequirements",
        json!({ "additional": "Use short vowels only", "resource": "One worksheet" }),
    );
    let view = request_ok(&mut stdin, &mut reader, "9", "session.view", json!({}));
    assert_eq!(view["session"]["additionalRequirements"], "Use short vowels only");
    assert_eq!(view["session"]["resourceRequirements"], "One worksheet");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "session.open",
        json!({ "workflow": "intervention", "teacherId": "t9", "groupId": "nope", "date": "2024-04-02", "lessonType": "phonics" }),
    );
    assert_eq!(e["code"], "not_found");
}

#[test]
fn text_improve_failure_returns_field_to_idle() {
    let workspace = temp_dir("lessond-improve-ipc");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", "teachers.upsert", json!({ "id": "t1" }));
    let s = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "teacherId": "t1", "name": "Dee" }),
    );
    let dee = str_field(&s["student"], "id");
    let g = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.create",
        json!({ "teacherId": "t1", "name": "Red", "memberIds": [dee] }),
    );
    let group_id = str_field(&g["group"], "id");
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.open",
        json!({ "workflow": "guided_reading", "teacherId": "t1", "groupId": group_id, "date": "2024-05-06" }),
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "text.improve",
        json!({ "studentId": dee, "field": "comments" }),
    );
    assert_eq!(e["code"], "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.updateRecord",
        json!({ "studentId": dee, "field": "comments", "value": "good job reading" }),
    );
    let started = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "text.improve",
        json!({ "studentId": dee, "field": "comments" }),
    );
    assert_eq!(started["started"], true);
    let done = next_event(&mut reader, "text.improved");
    assert_eq!(done["ok"], false);
    assert_eq!(done["error"]["stage"], "improve_text");

    let status = request_ok(&mut stdin, &mut reader, "9", "text.status", json!({}));
    assert_eq!(status["improve"][&dee]["comments"], "idle");
}

#[test]
fn generation_setup_change_keeps_in_flight_run_busy() {
    let workspace = temp_dir("lessond-busy-rebuild");
    let (generator_url, accepted) = silent_generator();
    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&[
        ("LESSOND_GENERATOR_URL", generator_url.as_str()),
        ("LESSOND_HTTP_TIMEOUT_SECS", "20"),
    ]);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.upsert",
        json!({ "id": "t1", "name": "Ms. Rivera", "gradeLevel": "2" }),
    );
    let ana = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "teacherId": "t1", "name": "Ana" }),
    );
    let ana_id = str_field(&ana["student"], "id");
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.create",
        json!({ "teacherId": "t1", "name": "Blue", "memberIds": [ana_id] }),
    );
    let group_id = str_field(&group["group"], "id");
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.open",
        json!({
            "workflow": "guided_reading",
            "teacherId": "t1",
            "groupId": group_id,
            "date": "2024-03-01"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.updateScalars",
        json!({ "bookTitle": "Frog and Toad", "readingLevel": "J" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.updateRecord",
        json!({ "studentId": ana_id, "field": "activity", "value": "Retold chapter 1" }),
    );

    let started = request_ok(&mut stdin, &mut reader, "8", "generation.start", json!({}));
    assert_eq!(started["started"], true);
    let deadline = Instant::now() + Duration::from_secs(5);
    while accepted.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "generator never contacted");
        std::thread::sleep(Duration::from_millis(20));
    }

    // Rebuilds the generator client while the plan call is still pending.
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "setup.update",
        json!({ "section": "generation", "patch": { "timeoutSecs": 30 } }),
    );

    let status = request_ok(&mut stdin, &mut reader, "10", "generation.status", json!({}));
    assert_eq!(status["busy"], true);
    assert_eq!(status["phase"], "generating_plan");

    let again = request_ok(&mut stdin, &mut reader, "11", "generation.start", json!({}));
    assert_eq!(again["started"], false);
    assert_eq!(again["busy"], true);

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

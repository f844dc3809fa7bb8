use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>, what: &str) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", what);
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader, method);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schoold-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    // Everything school-scoped needs a workspace first.
    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "classrooms.list",
        json!({ "caller": { "schoolId": "s", "profileId": "p", "role": "principal" } }),
    );
    assert_eq!(error_code(&early), Some("no_workspace"));
    assert_eq!(early["status"], 400);

    let selected = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);
    assert!(workspace.join("school.sqlite3").is_file());

    let registered = request(
        &mut stdin,
        &mut reader,
        "4",
        "schools.register",
        json!({
            "name": "Smoke School",
            "principal": { "name": "Pat", "email": "pat@smoke.test", "password": "pw-123456" }
        }),
    );
    assert_eq!(registered["status"], 201);
    let principal = json!({
        "schoolId": registered["result"]["schoolId"],
        "profileId": registered["result"]["principalId"],
        "role": "principal",
    });
    let student_caller = json!({
        "schoolId": registered["result"]["schoolId"],
        "profileId": "nobody",
        "role": "student",
    });

    let methods = [
        "subjects.create",
        "subjects.list",
        "teachers.create",
        "teachers.createBulk",
        "teachers.update",
        "teachers.remove",
        "teachers.list",
        "students.create",
        "students.list",
        "students.remove",
        "classrooms.create",
        "classrooms.assignTeacher",
        "classrooms.list",
        "classrooms.assignStudents",
        "classrooms.kickStudent",
        "classrooms.update",
        "classrooms.delete",
        "timetable.setPeriods",
        "attendance.subjectSummary",
        "teachers.schedule",
    ];
    for (i, method) in methods.iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("forbidden-{i}"),
            method,
            json!({ "caller": student_caller }),
        );
        assert_eq!(error_code(&resp), Some("forbidden"), "{method}: {resp}");
        assert_eq!(resp["status"], 403);
    }

    for (i, method) in [
        "teachers.myClassroom",
        "teachers.attendanceClasses",
        "attendance.take",
    ]
    .iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("teacher-only-{i}"),
            method,
            json!({ "caller": principal }),
        );
        assert_eq!(error_code(&resp), Some("forbidden"), "{method}: {resp}");
    }

    // Read-only classroom views accept any role and fall through to the lookup.
    for (i, method) in ["classrooms.details", "classrooms.subjects", "timetable.get"]
        .iter()
        .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("any-{i}"),
            method,
            json!({ "caller": student_caller, "classroomId": "missing" }),
        );
        assert_eq!(error_code(&resp), Some("not_found"), "{method}: {resp}");
        assert_eq!(resp["status"], 404);
    }

    let missing_caller = request(&mut stdin, &mut reader, "5", "subjects.list", json!({}));
    assert_eq!(error_code(&missing_caller), Some("bad_params"));

    let unknown = {
        writeln!(stdin, "{}", json!({ "id": "6", "method": "grades.compute", "params": {} }))
            .expect("write request");
        stdin.flush().expect("flush request");
        read_response(&mut reader, "grades.compute")
    };
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let garbage = read_response(&mut reader, "garbage");
    assert_eq!(error_code(&garbage), Some("bad_json"));
    assert!(garbage.get("id").is_none());

    let health = request(&mut stdin, &mut reader, "7", "health", json!({}));
    assert_eq!(
        health["result"]["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );

    drop(stdin);
    let _ = child.wait();
}

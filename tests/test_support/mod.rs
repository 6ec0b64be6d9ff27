#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_EMAIL: &str = "admin@college.local";
pub const ADMIN_PASSWORD: &str = "admin123";

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_colleged");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn colleged");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    token: Option<&str>,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(t) = token {
        payload["token"] = json!(t);
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    token: Option<&str>,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params, token);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// One sidecar process plus a request id counter.
pub struct Sidecar {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let (child, stdin, reader) = spawn_sidecar();
        Sidecar {
            _child: child,
            stdin,
            reader,
            next_id: 0,
        }
    }

    fn id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    pub fn call(&mut self, method: &str, params: serde_json::Value, token: Option<&str>) -> serde_json::Value {
        let id = self.id();
        request(&mut self.stdin, &mut self.reader, &id, method, params, token)
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value, token: Option<&str>) -> serde_json::Value {
        let id = self.id();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params, token)
    }

    /// Error code of a call expected to fail.
    pub fn err_code(&mut self, method: &str, params: serde_json::Value, token: Option<&str>) -> String {
        let resp = self.call(method, params, token);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp.pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    }

    pub fn select_workspace(&mut self, path: &Path) {
        let _ = self.ok(
            "workspace.select",
            json!({ "path": path.to_string_lossy() }),
            None,
        );
    }

    pub fn login(&mut self, email: &str, password: &str) -> String {
        let res = self.ok(
            "auth.login",
            json!({ "email": email, "password": password }),
            None,
        );
        res.get("token")
            .and_then(|v| v.as_str())
            .expect("token")
            .to_string()
    }

    pub fn login_admin(&mut self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD)
    }
}

pub fn str_at<'a>(v: &'a serde_json::Value, pointer: &str) -> &'a str {
    v.pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
}

pub fn f64_at(v: &serde_json::Value, pointer: &str) -> f64 {
    v.pointer(pointer)
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("missing number at {} in {}", pointer, v))
}

/// Department CSE, semester-3 subjects DS (id returned first) and OS, and
/// one semester-3 student. Returns `(dept_id, [subject ids], student_id)`.
pub fn seed_basic(sc: &mut Sidecar, admin: &str) -> (String, Vec<String>, String) {
    let dept = sc.ok(
        "departments.create",
        json!({ "code": "cse", "name": "Computer Science" }),
        Some(admin),
    );
    let dept_id = str_at(&dept, "/department/id").to_string();

    let mut subjects = Vec::new();
    for (code, name, credits) in [("CS301", "Data Structures", 4), ("CS302", "Operating Systems", 3)] {
        let s = sc.ok(
            "subjects.create",
            json!({
                "code": code,
                "name": name,
                "departmentId": dept_id,
                "semester": 3,
                "credits": credits,
            }),
            Some(admin),
        );
        subjects.push(str_at(&s, "/subject/id").to_string());
    }

    let student = sc.ok(
        "students.create",
        json!({
            "email": "asha@college.local",
            "password": "asha-pass",
            "fullName": "Asha Rao",
            "rollNumber": "CSE-001",
            "departmentCode": "CSE",
            "currentSemester": "3",
            "admissionYear": 2023,
        }),
        Some(admin),
    );
    let student_id = str_at(&student, "/student/id").to_string();
    (dept_id, subjects, student_id)
}

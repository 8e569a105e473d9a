#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const INIT_TOKEN: &str = "init-secret";
pub const ENCODING_LEN: usize = 128;

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

/// A running `attendd` driven over its stdin/stdout pipes.
pub struct Sidecar {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_attendd");
        let mut child = Command::new(exe)
            .env_remove("ATTENDD_WORKSPACE")
            .env("ATTENDD_SEED_DEFAULTS", "true")
            .env("ATTENDD_INIT_TOKEN", INIT_TOKEN)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn attendd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            _child: child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Spawns a sidecar with a fresh workspace already selected.
    pub fn with_workspace(prefix: &str) -> (Self, PathBuf) {
        let workspace = temp_dir(prefix);
        let mut sidecar = Self::spawn();
        sidecar.ok(
            None,
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        (sidecar, workspace)
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, token: Option<&str>, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(t) = token {
            payload["token"] = json!(t);
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, token: Option<&str>, method: &str, params: Value) -> Value {
        let value = self.request(token, method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Error code of a request expected to fail.
    pub fn error_code(&mut self, token: Option<&str>, method: &str, params: Value) -> String {
        let value = self.request(token, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"]
            .as_str()
            .expect("error code")
            .to_string()
    }

    pub fn login(&mut self, user_type: &str, login: &str, password: &str) -> String {
        let res = self.ok(
            None,
            "auth.login",
            json!({ "userType": user_type, "login": login, "password": password }),
        );
        res["token"].as_str().expect("token").to_string()
    }

    pub fn admin(&mut self) -> String {
        self.login("admin", "admin@college.edu", "admin123")
    }

    pub fn default_faculty(&mut self) -> String {
        self.login("faculty", "faculty@college.edu", "faculty123")
    }

    pub fn subject_id(&mut self, token: &str, name: &str) -> String {
        let res = self.ok(Some(token), "subjects.list", json!({}));
        res["subjects"]
            .as_array()
            .expect("subjects")
            .iter()
            .find(|s| s["name"] == name)
            .and_then(|s| s["id"].as_str())
            .unwrap_or_else(|| panic!("subject {} not seeded", name))
            .to_string()
    }

    pub fn enroll(&mut self, admin: &str, name: &str, enrollment: &str, class_name: &str, seed: f64) -> String {
        let res = self.ok(
            Some(admin),
            "students.create",
            json!({
                "name": name,
                "enrollmentNumber": enrollment,
                "className": class_name,
                "dob": "2005-06-15",
                "faceEncoding": encoding(seed),
            }),
        );
        res["studentId"].as_str().expect("studentId").to_string()
    }
}

/// Encoding that differs from the zero vector only in its first component.
pub fn encoding(first: f64) -> Vec<f64> {
    let mut v = vec![0.0; ENCODING_LEN];
    v[0] = first;
    v
}

pub fn smiling() -> Value {
    json!({
        "top_lip": [[10.0, 40.0], [20.0, 46.0], [30.0, 47.0], [40.0, 46.0], [50.0, 40.0]],
        "bottom_lip": [[10.0, 40.0], [30.0, 60.0], [50.0, 40.0]]
    })
}

pub fn neutral() -> Value {
    json!({
        "top_lip": [[10.0, 50.0], [20.0, 50.0], [30.0, 50.0]],
        "bottom_lip": [[10.0, 50.0], [20.0, 70.0], [30.0, 50.0]]
    })
}

mod common;

use common::{Sidecar, INIT_TOKEN};
use serde_json::json;

#[test]
fn health_works_before_a_workspace_is_selected() {
    let mut sc = Sidecar::spawn();
    let res = sc.ok(None, "health", json!({}));
    assert!(res["version"].is_string());
    assert!(res["workspacePath"].is_null());
    assert_eq!(
        sc.error_code(None, "auth.login", json!({ "userType": "admin", "login": "a", "password": "b" })),
        "no_workspace"
    );
}

#[test]
fn workspace_select_seeds_default_accounts_once() {
    let workspace = common::temp_dir("attendd-seed");
    let mut sc = Sidecar::spawn();
    let first = sc.ok(None, "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let seeded: Vec<&str> = first["seeded"]
        .as_array()
        .expect("seeded")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(seeded.contains(&"admin"));
    assert!(seeded.contains(&"faculty"));
    assert!(seeded.contains(&"subject:Mathematics-I"));

    let again = sc.ok(None, "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    assert_eq!(again["seeded"], json!([]));
    assert!(workspace.join("attendance.sqlite3").is_file());
}

#[test]
fn login_rejects_bad_credentials_uniformly() {
    let (mut sc, _ws) = Sidecar::with_workspace("attendd-login");
    let unknown = sc.request(
        None,
        "auth.login",
        json!({ "userType": "admin", "login": "nobody@college.edu", "password": "admin123" }),
    );
    let wrong = sc.request(
        None,
        "auth.login",
        json!({ "userType": "admin", "login": "admin@college.edu", "password": "nope" }),
    );
    assert_eq!(unknown["error"]["code"], "unauthenticated");
    assert_eq!(unknown["error"], wrong["error"]);

    // Faculty accounts are not admins.
    assert_eq!(
        sc.error_code(
            None,
            "auth.login",
            json!({ "userType": "admin", "login": "faculty@college.edu", "password": "faculty123" })
        ),
        "unauthenticated"
    );
    assert_eq!(
        sc.error_code(
            None,
            "auth.login",
            json!({ "userType": "parent", "login": "x", "password": "y" })
        ),
        "bad_params"
    );
}

#[test]
fn role_guard_and_token_lifecycle() {
    let (mut sc, _ws) = Sidecar::with_workspace("attendd-roles");
    assert_eq!(sc.error_code(None, "students.list", json!({})), "unauthenticated");
    assert_eq!(
        sc.error_code(Some("made-up"), "students.list", json!({})),
        "unauthenticated"
    );

    let admin = sc.admin();
    let faculty = sc.default_faculty();
    let who = sc.ok(Some(&faculty), "auth.whoami", json!({}));
    assert_eq!(who["role"], "faculty");
    assert_eq!(who["name"], "Dr. Smith");

    sc.ok(Some(&admin), "students.list", json!({}));
    assert_eq!(sc.error_code(Some(&faculty), "students.list", json!({})), "forbidden");
    assert_eq!(
        sc.error_code(Some(&admin), "sessions.start", json!({ "className": "FY", "subjectId": "x" })),
        "forbidden"
    );

    let out = sc.ok(Some(&faculty), "auth.logout", json!({}));
    assert_eq!(out["loggedOut"], true);
    assert_eq!(sc.error_code(Some(&faculty), "auth.whoami", json!({})), "unauthenticated");
}

#[test]
fn students_sign_in_with_enrollment_number() {
    let (mut sc, _ws) = Sidecar::with_workspace("attendd-student-login");
    let admin = sc.admin();
    sc.enroll(&admin, "Asha Patel", "EN001", "FY", 0.1);
    let token = sc.login("student", "EN001", "123456");
    let who = sc.ok(Some(&token), "auth.whoami", json!({}));
    assert_eq!(who["role"], "student");
    assert_eq!(who["name"], "Asha Patel");
}

#[test]
fn change_password_requires_current_password() {
    let (mut sc, _ws) = Sidecar::with_workspace("attendd-passwd");
    let faculty = sc.default_faculty();
    assert_eq!(
        sc.error_code(
            Some(&faculty),
            "auth.changePassword",
            json!({ "currentPassword": "wrong", "newPassword": "n3w" })
        ),
        "forbidden"
    );
    assert_eq!(
        sc.error_code(
            Some(&faculty),
            "auth.changePassword",
            json!({ "currentPassword": "faculty123", "newPassword": "" })
        ),
        "bad_params"
    );
    sc.ok(
        Some(&faculty),
        "auth.changePassword",
        json!({ "currentPassword": "faculty123", "newPassword": "n3w" }),
    );
    assert_eq!(
        sc.error_code(
            None,
            "auth.login",
            json!({ "userType": "faculty", "login": "faculty@college.edu", "password": "faculty123" })
        ),
        "unauthenticated"
    );
    sc.login("faculty", "faculty@college.edu", "n3w");
}

#[test]
fn create_defaults_needs_the_init_token() {
    let (mut sc, _ws) = Sidecar::with_workspace("attendd-init-token");
    assert_eq!(
        sc.error_code(None, "admin.createDefaults", json!({ "initToken": "guess" })),
        "unauthenticated"
    );
    assert_eq!(
        sc.error_code(None, "admin.createDefaults", json!({})),
        "unauthenticated"
    );
    let res = sc.ok(None, "admin.createDefaults", json!({ "initToken": INIT_TOKEN }));
    assert_eq!(res["created"], json!([]));
}

mod common;

use common::Sidecar;
use serde_json::{json, Value};

fn ids(res: &Value) -> Vec<String> {
    res["leaves"]
        .as_array()
        .expect("leaves")
        .iter()
        .map(|l| l["id"].as_str().expect("id").to_string())
        .collect()
}

#[test]
fn leave_workflow_from_application_to_attendance_record() {
    let (mut sc, _ws) = Sidecar::with_workspace("attendd-leaves");
    let admin = sc.admin();
    let maths = sc.subject_id(&admin, "Mathematics-I");
    let physics = sc.subject_id(&admin, "Physics-I");
    let cs = sc.subject_id(&admin, "Computer Science-I");

    let smith_id = sc.ok(Some(&admin), "faculty.list", json!({}))["faculty"][0]["id"]
        .as_str()
        .expect("smith id")
        .to_string();
    let nair_id = sc.ok(
        Some(&admin),
        "faculty.create",
        json!({ "name": "Dr. Nair", "email": "nair@college.edu", "password": "nair", "contactNo": 5550007777_i64 }),
    )["facultyId"]
        .as_str()
        .expect("facultyId")
        .to_string();
    sc.ok(
        Some(&admin),
        "timetable.addSlot",
        json!({ "className": "FY", "subjectId": maths, "facultyId": smith_id,
                "dayOfWeek": 1, "startTime": "09:00", "endTime": "10:00" }),
    );
    sc.ok(
        Some(&admin),
        "timetable.addSlot",
        json!({ "className": "FY", "subjectId": physics, "facultyId": nair_id,
                "dayOfWeek": 1, "startTime": "10:00", "endTime": "11:00" }),
    );

    sc.enroll(&admin, "Nisha", "EN040", "FY", 0.1);
    let student = sc.login("student", "EN040", "123456");
    let smith = sc.default_faculty();
    let nair = sc.login("faculty", "nair@college.edu", "nair");

    let maths_leave = sc.ok(
        Some(&student),
        "leaves.apply",
        json!({ "subjectId": maths, "leaveDate": "2025-01-10", "reason": "fever" }),
    );
    assert_eq!(maths_leave["status"], "Pending");
    let maths_leave = maths_leave["leaveId"].as_str().expect("leaveId").to_string();
    assert_eq!(
        sc.error_code(
            Some(&student),
            "leaves.apply",
            json!({ "subjectId": maths, "leaveDate": "2025-01-10", "reason": "again" })
        ),
        "conflict"
    );
    assert_eq!(
        sc.error_code(
            Some(&student),
            "leaves.apply",
            json!({ "subjectId": maths, "leaveDate": "10-01-2025", "reason": "fever" })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.error_code(
            Some(&smith),
            "leaves.apply",
            json!({ "subjectId": maths, "leaveDate": "2025-01-10", "reason": "x" })
        ),
        "forbidden"
    );
    let physics_leave = sc.ok(
        Some(&student),
        "leaves.apply",
        json!({ "subjectId": physics, "leaveDate": "2025-01-11", "reason": "family" }),
    )["leaveId"]
        .as_str()
        .expect("leaveId")
        .to_string();
    let cs_leave = sc.ok(
        Some(&student),
        "leaves.apply",
        json!({ "subjectId": cs, "leaveDate": "2025-01-12", "reason": "exam" }),
    )["leaveId"]
        .as_str()
        .expect("leaveId")
        .to_string();

    let mine = sc.ok(Some(&student), "leaves.mine", json!({}));
    assert_eq!(ids(&mine), vec![cs_leave.clone(), physics_leave.clone(), maths_leave.clone()]);

    assert_eq!(ids(&sc.ok(Some(&smith), "leaves.pending", json!({}))), vec![maths_leave.clone()]);
    assert_eq!(ids(&sc.ok(Some(&nair), "leaves.pending", json!({}))), vec![physics_leave.clone()]);
    assert_eq!(ids(&sc.ok(Some(&admin), "leaves.pending", json!({}))).len(), 3);

    assert_eq!(
        sc.error_code(Some(&nair), "leaves.approve", json!({ "leaveId": maths_leave })),
        "forbidden"
    );
    let approved = sc.ok(
        Some(&smith),
        "leaves.approve",
        json!({ "leaveId": maths_leave, "remarks": "get well" }),
    );
    assert_eq!(approved["status"], "Approved");
    assert_eq!(approved["recordCreated"], true);
    assert_eq!(
        sc.error_code(Some(&smith), "leaves.approve", json!({ "leaveId": maths_leave })),
        "invalid_state"
    );
    assert_eq!(
        sc.error_code(Some(&smith), "leaves.reject", json!({ "leaveId": maths_leave })),
        "invalid_state"
    );

    let history = sc.ok(Some(&smith), "leaves.history", json!({}));
    assert_eq!(ids(&history), vec![maths_leave.clone()]);
    let decided = &history["leaves"][0];
    assert_eq!(decided["approvedBy"], smith_id.as_str());
    assert_eq!(decided["remarks"], "get well");
    assert!(decided["approvalDate"].is_string());
    assert_eq!(sc.ok(Some(&smith), "leaves.pending", json!({}))["leaves"], json!([]));

    let rejected = sc.ok(Some(&nair), "leaves.reject", json!({ "leaveId": physics_leave }));
    assert_eq!(rejected["status"], "Rejected");
    assert_eq!(rejected["recordCreated"], false);

    // Admin approval of an untimetabled subject falls back to the first faculty member.
    let by_admin = sc.ok(Some(&admin), "leaves.approve", json!({ "leaveId": cs_leave }));
    assert_eq!(by_admin["recordCreated"], true);
    let admin_history = sc.ok(Some(&admin), "leaves.history", json!({}));
    let cs_row = admin_history["leaves"]
        .as_array()
        .expect("leaves")
        .iter()
        .find(|l| l["id"] == cs_leave.as_str())
        .expect("cs leave");
    assert!(cs_row["approvedBy"].is_null());

    let records = sc.ok(Some(&admin), "attendance.query", json!({}));
    let rows = records["records"].as_array().expect("records");
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row["status"], "Leave");
        assert_eq!(row["method"], "Leave");
        assert_eq!(row["facultyName"], "Dr. Smith");
    }
    assert!(rows.iter().any(|r| r["date"] == "2025-01-10"));
    assert!(rows.iter().any(|r| r["date"] == "2025-01-12"));

    assert_eq!(
        sc.error_code(Some(&admin), "leaves.approve", json!({ "leaveId": "ghost" })),
        "not_found"
    );
}

#[test]
fn approving_keeps_an_existing_attendance_record() {
    let (mut sc, _ws) = Sidecar::with_workspace("attendd-leave-existing");
    let admin = sc.admin();
    let faculty = sc.default_faculty();
    let cs = sc.subject_id(&admin, "Computer Science-I");
    let student_id = sc.enroll(&admin, "Om", "EN041", "FY", 0.1);
    let student = sc.login("student", "EN041", "123456");
    sc.ok(
        Some(&faculty),
        "attendance.markManual",
        json!({ "studentId": student_id, "subjectId": cs, "status": "Absent" }),
    );
    let today = sc.ok(Some(&admin), "attendance.query", json!({}))["records"][0]["date"]
        .as_str()
        .expect("date")
        .to_string();

    let leave = sc.ok(
        Some(&student),
        "leaves.apply",
        json!({ "subjectId": cs, "leaveDate": today, "reason": "doctor" }),
    )["leaveId"]
        .as_str()
        .expect("leaveId")
        .to_string();
    let res = sc.ok(Some(&admin), "leaves.approve", json!({ "leaveId": leave }));
    assert_eq!(res["recordCreated"], false);

    let records = sc.ok(Some(&admin), "attendance.query", json!({}));
    assert_eq!(records["records"].as_array().expect("records").len(), 1);
    assert_eq!(records["records"][0]["status"], "Absent");
}

#[test]
fn leave_listings_put_the_latest_application_first() {
    let (mut sc, _ws) = Sidecar::with_workspace("attendd-leave-order");
    let admin = sc.admin();
    let maths = sc.subject_id(&admin, "Mathematics-I");
    sc.enroll(&admin, "Pia", "EN043", "FY", 0.1);
    let student = sc.login("student", "EN043", "123456");

    let mut applied = Vec::new();
    for date in ["2025-03-20", "2025-03-05", "2025-03-12"] {
        let res = sc.ok(
            Some(&student),
            "leaves.apply",
            json!({ "subjectId": maths, "leaveDate": date, "reason": "travel" }),
        );
        applied.push(res["leaveId"].as_str().expect("leaveId").to_string());
    }
    applied.reverse();

    let mine = sc.ok(Some(&student), "leaves.mine", json!({}));
    assert_eq!(ids(&mine), applied);
    assert_eq!(ids(&sc.ok(Some(&admin), "leaves.pending", json!({}))), applied);
    let applied_on = mine["leaves"][0]["appliedOn"].as_str().expect("appliedOn");
    assert_eq!(applied_on.len(), "YYYY-MM-DD HH:MM:SS".len());
}

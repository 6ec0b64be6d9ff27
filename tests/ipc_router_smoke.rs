mod test_support;

use serde_json::json;
use test_support::{seed_basic, str_at, temp_dir, Sidecar};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("colleged-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let mut sc = Sidecar::spawn();

    let health = sc.ok("health", json!({}), None);
    assert!(health.get("version").is_some());
    assert_eq!(
        sc.err_code("departments.list", json!({}), Some("nope")),
        "no_workspace"
    );

    sc.select_workspace(&workspace);
    let admin = sc.login_admin();
    let me = sc.ok("auth.me", json!({}), Some(&admin));
    assert_eq!(str_at(&me, "/user/role"), "admin");

    let (_dept, subjects, student_id) = seed_basic(&mut sc, &admin);
    let faculty = sc.ok(
        "faculty.create",
        json!({
            "email": "kumar@college.local",
            "password": "kumar-pass",
            "fullName": "R. Kumar",
            "employeeId": "EMP-01",
            "departmentCode": "CSE",
        }),
        Some(&admin),
    );
    let faculty_id = str_at(&faculty, "/faculty/id").to_string();

    let calls = [
        ("departments.list", json!({})),
        ("subjects.list", json!({ "semester": 3 })),
        ("students.list", json!({})),
        ("students.get", json!({ "studentId": student_id })),
        ("faculty.list", json!({})),
        (
            "faculty.assignSubject",
            json!({ "facultyId": faculty_id, "subjectId": subjects[0] }),
        ),
        (
            "marks.upsert",
            json!({
                "studentId": student_id,
                "subjectId": subjects[0],
                "examType": "internal1",
                "marksObtained": 18,
                "maxMarks": 20,
            }),
        ),
        ("marks.list", json!({ "studentId": student_id })),
        ("marks.publish", json!({ "subjectId": subjects[0] })),
        ("marks.cgpa", json!({ "studentId": student_id })),
        ("marks.semesterSummary", json!({ "studentId": student_id })),
        ("marks.breakdown", json!({ "studentId": student_id })),
        (
            "attendance.mark",
            json!({
                "studentId": student_id,
                "subjectId": subjects[0],
                "date": "2024-08-01",
                "status": "present",
            }),
        ),
        ("attendance.list", json!({ "studentId": student_id })),
        ("attendance.summary", json!({ "studentId": student_id })),
        (
            "fees.upsert",
            json!({ "studentId": student_id, "semester": 3, "tuitionFee": 1000 }),
        ),
        ("fees.summary", json!({ "studentId": student_id })),
        (
            "backup.exportBundle",
            json!({ "outPath": bundle_out.to_string_lossy() }),
        ),
    ];
    for (method, params) in calls {
        let _ = sc.ok(method, params, Some(&admin));
    }
    assert!(bundle_out.is_file());

    let unknown = sc.call("classes.list", json!({}), Some(&admin));
    assert_eq!(
        unknown.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    assert_eq!(sc.err_code("auth.me", json!({}), None), "unauthorized");
    let _ = sc.ok("auth.logout", json!({}), Some(&admin));
    assert_eq!(sc.err_code("auth.me", json!({}), Some(&admin)), "unauthorized");
}

#[test]
fn bad_login_and_unknown_token_are_unauthorized() {
    let workspace = temp_dir("colleged-router-auth");
    let mut sc = Sidecar::spawn();
    sc.select_workspace(&workspace);

    let code = sc.err_code(
        "auth.login",
        json!({ "email": "admin@college.local", "password": "wrong" }),
        None,
    );
    assert_eq!(code, "unauthorized");
    assert_eq!(
        sc.err_code("marks.list", json!({}), Some("not-a-session")),
        "unauthorized"
    );
}

mod test_support;

use serde_json::json;
use test_support::{seed_basic, str_at, temp_dir, Sidecar};

#[test]
fn faculty_reaches_only_assigned_subjects() {
    let workspace = temp_dir("colleged-faculty-scope");
    let mut sc = Sidecar::spawn();
    sc.select_workspace(&workspace);
    let admin = sc.login_admin();
    let (_dept, subjects, student_id) = seed_basic(&mut sc, &admin);
    let (assigned, other) = (subjects[0].clone(), subjects[1].clone());

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
    let _ = sc.ok(
        "faculty.assignSubject",
        json!({ "facultyId": faculty_id, "subjectId": assigned }),
        Some(&admin),
    );
    for subject in [&assigned, &other] {
        let _ = sc.ok(
            "marks.upsert",
            json!({
                "studentId": student_id,
                "subjectId": subject,
                "examType": "final",
                "marksObtained": 60,
                "maxMarks": 100,
            }),
            Some(&admin),
        );
    }

    let teacher = sc.login("kumar@college.local", "kumar-pass");

    let denied = sc.call(
        "marks.upsert",
        json!({
            "studentId": student_id,
            "subjectId": other,
            "examType": "internal1",
            "marksObtained": 10,
            "maxMarks": 20,
        }),
        Some(&teacher),
    );
    assert_eq!(
        denied.pointer("/error/code").and_then(|v| v.as_str()),
        Some("forbidden")
    );
    assert_eq!(
        denied.pointer("/error/message").and_then(|v| v.as_str()),
        Some("You are not assigned to this subject")
    );

    let written = sc.ok(
        "marks.upsert",
        json!({
            "studentId": student_id,
            "subjectId": assigned,
            "examType": "internal1",
            "marksObtained": "15",
            "maxMarks": 20,
        }),
        Some(&teacher),
    );
    assert_eq!(str_at(&written, "/mark/subject_id"), assigned);

    let listed = sc.ok("marks.list", json!({}), Some(&teacher));
    let marks = listed["marks"].as_array().expect("marks");
    assert_eq!(marks.len(), 2);
    assert!(marks
        .iter()
        .all(|m| m["subject_id"].as_str() == Some(assigned.as_str())));

    assert_eq!(
        sc.err_code("marks.list", json!({ "subjectId": other }), Some(&teacher)),
        "forbidden"
    );
    assert_eq!(
        sc.err_code(
            "attendance.bulkMark",
            json!({
                "subjectId": other,
                "date": "2024-08-01",
                "entries": [{ "studentId": student_id, "status": "present" }],
            }),
            Some(&teacher),
        ),
        "forbidden"
    );

    let mine = sc.ok("faculty.mySubjects", json!({}), Some(&teacher));
    let mine = mine["subjects"].as_array().expect("subjects");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["id"].as_str(), Some(assigned.as_str()));

    let cohort = sc.ok("students.list", json!({}), Some(&teacher));
    let cohort = cohort["students"].as_array().expect("students");
    assert_eq!(cohort.len(), 1);
    assert_eq!(cohort[0]["id"].as_str(), Some(student_id.as_str()));

    // Nothing published yet; drafts only show on request.
    let cgpa = sc.ok("marks.cgpa", json!({ "studentId": student_id }), Some(&teacher));
    assert_eq!(cgpa["total_subjects"].as_u64(), Some(0));
    let drafts = sc.ok(
        "marks.cgpa",
        json!({ "studentId": student_id, "includeDrafts": true }),
        Some(&teacher),
    );
    assert_eq!(drafts["total_subjects"].as_u64(), Some(1));

    let mark_id = marks[0]["id"].as_str().expect("mark id").to_string();
    assert_eq!(
        sc.err_code("marks.delete", json!({ "markId": mark_id }), Some(&teacher)),
        "forbidden"
    );
    assert_eq!(
        sc.err_code("marks.publish", json!({ "subjectId": assigned }), Some(&teacher)),
        "forbidden"
    );
    assert_eq!(
        sc.err_code("fees.summary", json!({ "studentId": student_id }), Some(&teacher)),
        "forbidden"
    );
    assert_eq!(
        sc.err_code("subjects.create", json!({ "code": "X1", "name": "X" }), Some(&teacher)),
        "forbidden"
    );
}

mod test_support;

use serde_json::json;
use std::io::Read;
use test_support::{seed_basic, str_at, temp_dir, Sidecar};

#[test]
fn export_then_import_restores_the_workspace() {
    let workspace = temp_dir("colleged-backup-roundtrip");
    let bundle = workspace.join("exports").join("college-backup.zip");
    let mut sc = Sidecar::spawn();
    sc.select_workspace(&workspace);
    let admin = sc.login_admin();
    let _ = seed_basic(&mut sc, &admin);

    let exported = sc.ok(
        "backup.exportBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
        Some(&admin),
    );
    assert_eq!(str_at(&exported, "/bundleFormat"), "colleged-workspace-v1");
    let sha = str_at(&exported, "/dbSha256").to_string();
    assert_eq!(sha.len(), 64);

    let file = std::fs::File::open(&bundle).expect("open bundle");
    let mut zip = zip::ZipArchive::new(file).expect("zip");
    let mut manifest = String::new();
    zip.by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["dbSha256"].as_str(), Some(sha.as_str()));
    assert!(zip.by_name("db/college.sqlite3").is_ok());

    let _ = sc.ok(
        "departments.create",
        json!({ "code": "ME", "name": "Mechanical" }),
        Some(&admin),
    );
    let before = sc.ok("departments.list", json!({}), Some(&admin));
    assert_eq!(before["departments"].as_array().map(|a| a.len()), Some(2));

    let imported = sc.ok(
        "backup.importBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
        Some(&admin),
    );
    assert_eq!(str_at(&imported, "/dbSha256"), sha);

    let admin = sc.login_admin();
    let after = sc.ok("departments.list", json!({}), Some(&admin));
    let departments = after["departments"].as_array().expect("departments");
    assert_eq!(departments.len(), 1);
    assert_eq!(departments[0]["code"].as_str(), Some("CSE"));
    let students = sc.ok("students.list", json!({}), Some(&admin));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn bundles_are_admin_only_and_bad_bundles_leave_workspace_usable() {
    let workspace = temp_dir("colleged-backup-guard");
    let mut sc = Sidecar::spawn();
    sc.select_workspace(&workspace);
    let admin = sc.login_admin();
    let _ = seed_basic(&mut sc, &admin);

    let student = sc.login("asha@college.local", "asha-pass");
    let out = workspace.join("student.zip");
    assert_eq!(
        sc.err_code(
            "backup.exportBundle",
            json!({ "outPath": out.to_string_lossy() }),
            Some(&student),
        ),
        "forbidden"
    );
    assert!(!out.exists());

    let junk = workspace.join("junk.zip");
    std::fs::write(&junk, b"not a zip").expect("write junk");
    assert_eq!(
        sc.err_code(
            "backup.importBundle",
            json!({ "inPath": junk.to_string_lossy() }),
            Some(&admin),
        ),
        "io_failed"
    );

    let listed = sc.ok("students.list", json!({}), Some(&admin));
    assert_eq!(listed["students"].as_array().map(|a| a.len()), Some(1));
}

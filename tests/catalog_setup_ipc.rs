mod test_support;

use serde_json::json;
use test_support::{
    bootstrap, request_err, request_ok, spawn_sidecar, temp_dir, ADMIN, ADMIN_PASSWORD,
};

#[test]
fn catalog_seed_is_idempotent() {
    let workspace = temp_dir("schoold-catalog-seed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = bootstrap(&mut stdin, &mut reader, &workspace);

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "catalog.seed",
        json!({ "actor": ADMIN }),
    );
    assert_eq!(again["classroomsCreated"], 0);
    assert_eq!(again["streamsCreated"], 0);
    assert_eq!(again["subjectsCreated"], 0);

    let classes = request_ok(&mut stdin, &mut reader, "2", "classes.list", json!({}));
    let classes = classes["classes"].as_array().expect("classes");
    // 15 seeded grades plus the bootstrap 10th A.
    assert_eq!(classes.len(), 16);
    assert_eq!(classes[0]["label"], "Nursery");

    let subjects = request_ok(&mut stdin, &mut reader, "3", "subjects.list", json!({}));
    assert_eq!(subjects["subjects"].as_array().map(|s| s.len()), Some(9));
    let streams = request_ok(&mut stdin, &mut reader, "4", "streams.list", json!({}));
    assert_eq!(streams["streams"].as_array().map(|s| s.len()), Some(4));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "classes.create",
        json!({ "actor": ADMIN, "grade": "10th", "section": "A" }),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn first_run_only_creates_the_admin_once() {
    let workspace = temp_dir("schoold-first-run");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "setup.firstRun",
        json!({ "username": ADMIN, "password": "short" }),
    );
    assert_eq!(code, "bad_params");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.firstRun",
        json!({ "username": ADMIN, "password": ADMIN_PASSWORD }),
    );
    assert_eq!(first["created"], true);
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.firstRun",
        json!({ "username": ADMIN, "password": ADMIN_PASSWORD }),
    );
    assert_eq!(second["created"], false);

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "username": ADMIN, "password": ADMIN_PASSWORD }),
    );
    assert_eq!(login["role"], "Admin");

    // A configured workspace does not hand out further Admins.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.firstRun",
        json!({ "username": "intruder", "password": "intruder-pass" }),
    );
    assert_eq!(other["created"], false);
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "auth.login",
        json!({ "username": "intruder", "password": "intruder-pass" }),
    );
    assert_eq!(code, "unauthorized");
}

#[test]
fn setup_sections_drive_identifier_generation() {
    let workspace = temp_dir("schoold-setup-sections");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = bootstrap(&mut stdin, &mut reader, &workspace);

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(setup["students"]["institutionCode"], "HBR");
    assert_eq!(setup["students"]["errorPreviewLimit"], 10);
    assert_eq!(setup["security"]["minPasswordLength"], 8);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "actor": ADMIN, "section": "students", "patch": { "institutionCode": "X" } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "actor": ADMIN, "section": "weather", "patch": {} }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "actor": ADMIN, "section": "students", "patch": { "institutionCode": "dps" } }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({
            "actor": ADMIN,
            "classroomId": class_id,
            "firstName": "Asha",
            "lastName": "Khan",
        }),
    );
    let adm = created["student"]["admissionNo"].as_str().expect("admissionNo");
    assert!(adm.starts_with("DPS"), "{adm}");
    assert_eq!(adm.len(), 11);
}

#[test]
fn demo_seed_is_repeatable_and_signs_in() {
    let workspace = temp_dir("schoold-demo-seed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(&mut stdin, &mut reader, "2", "setup.demoSeed", json!({}));
    assert_eq!(first["accountsCreated"], 3);
    assert_eq!(first["studentCreated"], true);
    let code = request_err(&mut stdin, &mut reader, "3a", "setup.demoSeed", json!({}));
    assert_eq!(code, "unauthorized");
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.demoSeed",
        json!({ "actor": "demo_admin" }),
    );
    assert_eq!(second["accountsCreated"], 0);
    assert_eq!(second["studentCreated"], false);
    assert_eq!(second["classroomId"], first["classroomId"]);

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "username": "demo_teacher", "password": "demo1234" }),
    );
    assert_eq!(login["role"], "Teacher");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "actor": "demo_teacher", "classroomIds": [first["classroomId"]] }),
    );
    let students = listed["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["admissionNo"], "DEM0001");
    assert_eq!(students[0]["rollNo"], "01A001");
    assert_eq!(students[0]["classroom"], "1st A");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "setup.demoSeed",
        json!({ "reset": true, "actor": "demo_teacher" }),
    );
    assert_eq!(code, "forbidden");
    let reset = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.demoSeed",
        json!({ "reset": true, "actor": "demo_admin" }),
    );
    assert_eq!(reset["studentsRemoved"], 1);
    assert_eq!(reset["accountsCreated"], 1);
    assert_eq!(reset["studentCreated"], true);
}

#[test]
fn demo_seed_needs_an_admin_once_one_exists() {
    let workspace = temp_dir("schoold-demo-seed-guard");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = bootstrap(&mut stdin, &mut reader, &workspace);

    let code = request_err(&mut stdin, &mut reader, "1", "setup.demoSeed", json!({}));
    assert_eq!(code, "unauthorized");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "setup.demoSeed",
        json!({ "actor": "demo_admin" }),
    );
    assert_eq!(code, "unauthorized");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "username": "demo_admin", "password": "demo1234" }),
    );
    assert_eq!(code, "unauthorized");

    let seeded = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.demoSeed",
        json!({ "actor": ADMIN }),
    );
    assert_eq!(seeded["accountsCreated"], 3);
}

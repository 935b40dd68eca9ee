mod test_support;

use serde_json::json;
use sha2::{Digest, Sha256};
use test_support::{
    bootstrap, list_students, request_ok, spawn_sidecar, temp_dir, ADMIN,
};

const EXPORT_HEADER: &str = "Admission No,Roll No,First Name,Last Name,Username,Email,\
Father Name,Mother Name,Date of Birth,Mobile No,Category,Gender,Classroom,Stream,Subjects,\
Current Address,Permanent Address,Weight,Height";

fn seed_students(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    workspace: &std::path::Path,
    class_id: &str,
) {
    let csv_path = workspace.join("seed.csv");
    std::fs::write(
        &csv_path,
        "First Name,Last Name,Father Name,Date of Birth,Mobile No,Category,Gender,Stream,Subjects,Weight,Height\n\
         Asha,Khan,Imran Khan,2010-04-23,98765 43210,obc,female,science,\"English, Maths\",38.50,142\n\
         Ravi,Verma,,,,,,,,,\n\
         Meera,Iyer,Suresh Iyer,2009-12-01,,GENERAL,F,,Computer,38.1234,151.56789\n",
    )
    .expect("write seed csv");
    let res = request_ok(
        stdin,
        reader,
        "seed-import",
        "students.import",
        json!({
            "actor": ADMIN,
            "classroomId": class_id,
            "inPath": csv_path.to_string_lossy(),
        }),
    );
    assert_eq!(res["created"], 3);
}

#[test]
fn csv_export_reimports_as_updates_only() {
    let workspace = temp_dir("schoold-export-csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = bootstrap(&mut stdin, &mut reader, &workspace);
    seed_students(&mut stdin, &mut reader, &workspace, &class_id);

    let out = workspace.join("out").join("students.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.export",
        json!({
            "actor": ADMIN,
            "classroomIds": [class_id],
            "outPath": out.to_string_lossy(),
        }),
    );
    assert_eq!(exported["rowsExported"], 3);
    assert_eq!(exported["format"], "csv");

    let bytes = std::fs::read(&out).expect("read export");
    assert_eq!(exported["bytes"], bytes.len());
    assert_eq!(exported["sha256"], format!("{:x}", Sha256::digest(&bytes)));
    let text = String::from_utf8(bytes).expect("utf8");
    assert_eq!(text.lines().next(), Some(EXPORT_HEADER));
    let asha_line = text
        .lines()
        .find(|l| l.contains(",Asha,"))
        .expect("Asha line");
    assert!(asha_line.contains(",2010-04-23,9876543210,OBC,FEMALE,10th A,SCIENCE,\"ENGLISH, MATHS\",,,38.5,142"), "{asha_line}");
    let meera_line = text
        .lines()
        .find(|l| l.contains(",Meera,"))
        .expect("Meera line");
    assert!(meera_line.ends_with(",38.1234,151.56789"), "{meera_line}");

    let before = list_students(&mut stdin, &mut reader, "2", &class_id);
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.import",
        json!({
            "actor": ADMIN,
            "classroomId": class_id,
            "inPath": out.to_string_lossy(),
            "overwriteExisting": true,
        }),
    );
    assert_eq!(res["created"], 0);
    assert_eq!(res["updated"], 3);
    assert_eq!(res["skipped"], 0);

    let after = list_students(&mut stdin, &mut reader, "4", &class_id);
    assert_eq!(after.len(), before.len());
    for (a, b) in before.iter().zip(after.iter()) {
        for key in [
            "id", "username", "admissionNo", "rollNo", "dob", "mobileNo", "category", "gender",
            "stream", "subjects", "weight", "height", "fatherName",
        ] {
            assert_eq!(a[key], b[key], "{key} changed for {}", a["firstName"]);
        }
    }
}

#[test]
fn xlsx_export_reimports_into_a_fresh_workspace() {
    let workspace = temp_dir("schoold-export-xlsx");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = bootstrap(&mut stdin, &mut reader, &workspace);
    seed_students(&mut stdin, &mut reader, &workspace, &class_id);

    let out = workspace.join("students.xlsx");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.export",
        json!({
            "actor": ADMIN,
            "classroomId": class_id,
            "outPath": out.to_string_lossy(),
            "format": "excel",
        }),
    );
    assert_eq!(exported["format"], "xlsx");
    assert_eq!(exported["rowsExported"], 3);
    let original = list_students(&mut stdin, &mut reader, "2", &class_id);

    let fresh = temp_dir("schoold-export-xlsx-fresh");
    let (_child2, mut stdin2, mut reader2) = spawn_sidecar();
    let fresh_class = bootstrap(&mut stdin2, &mut reader2, &fresh);
    let res = request_ok(
        &mut stdin2,
        &mut reader2,
        "3",
        "students.import",
        json!({
            "actor": ADMIN,
            "classroomId": fresh_class,
            "inPath": out.to_string_lossy(),
        }),
    );
    assert_eq!(res["created"], 3);
    assert_eq!(res["skipped"], 0);

    let copied = list_students(&mut stdin2, &mut reader2, "4", &fresh_class);
    assert_eq!(copied.len(), 3);
    for a in &original {
        let b = copied
            .iter()
            .find(|s| s["admissionNo"] == a["admissionNo"])
            .expect("same admission number");
        for key in [
            "rollNo", "username", "firstName", "lastName", "dob", "mobileNo", "category",
            "gender", "stream", "subjects", "weight", "height", "fatherName",
        ] {
            assert_eq!(a[key], b[key], "{key} differs for {}", a["firstName"]);
        }
    }
}

#[test]
fn empty_selection_exports_header_only() {
    let workspace = temp_dir("schoold-export-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = bootstrap(&mut stdin, &mut reader, &workspace);

    let out = workspace.join("empty.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.export",
        json!({
            "actor": ADMIN,
            "classroomIds": [class_id],
            "search": "nobody",
            "outPath": out.to_string_lossy(),
        }),
    );
    assert_eq!(exported["rowsExported"], 0);
    let text = std::fs::read_to_string(&out).expect("read export");
    assert_eq!(text.trim_end(), EXPORT_HEADER);
}

#[test]
fn search_filters_by_name_or_username() {
    let workspace = temp_dir("schoold-export-search");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = bootstrap(&mut stdin, &mut reader, &workspace);
    seed_students(&mut stdin, &mut reader, &workspace, &class_id);

    let out = workspace.join("search.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.export",
        json!({
            "actor": ADMIN,
            "search": "IYER",
            "outPath": out.to_string_lossy(),
        }),
    );
    assert_eq!(exported["rowsExported"], 1);
    let text = std::fs::read_to_string(&out).expect("read export");
    assert!(text.contains(",Meera,Iyer,"));

    // Wildcard characters are matched literally.
    for (id, search) in [("2", "_"), ("3", "%"), ("4", "a_h")] {
        let exported = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "students.export",
            json!({
                "actor": ADMIN,
                "search": search,
                "outPath": workspace.join(format!("wild-{id}.csv")).to_string_lossy(),
            }),
        );
        assert_eq!(exported["rowsExported"], 0, "search {search:?}");
    }
}

#[test]
fn template_imports_its_sample_rows() {
    let workspace = temp_dir("schoold-export-template");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let class_id = bootstrap(&mut stdin, &mut reader, &workspace);

    for (id, format, name) in [("1", "csv", "template.csv"), ("2", "xlsx", "template.xlsx")] {
        let out = workspace.join(name);
        let written = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "students.importTemplate",
            json!({ "actor": ADMIN, "outPath": out.to_string_lossy(), "format": format }),
        );
        assert_eq!(written["rowsExported"], 2);
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.import",
        json!({
            "actor": ADMIN,
            "classroomId": class_id,
            "inPath": workspace.join("template.xlsx").to_string_lossy(),
        }),
    );
    assert_eq!(res["created"], 2);
    let students = list_students(&mut stdin, &mut reader, "4", &class_id);
    let ravi = students
        .iter()
        .find(|s| s["firstName"] == "Ravi")
        .expect("Ravi");
    assert_eq!(ravi["dob"], "2010-04-23");
    assert_eq!(ravi["category"], "OBC");
}

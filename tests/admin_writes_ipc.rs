use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn spawn(workspace: &Path) -> Self {
        let exe = env!("CARGO_BIN_EXE_smartqd");
        let mut child = Command::new(exe)
            .env("SMARTQ_WORKSPACE", workspace)
            .env("SMARTQ_JWT_SECRET", "test-access-secret")
            .env("SMARTQ_JWT_REFRESH_SECRET", "test-refresh-secret")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn smartqd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    fn call(
        &mut self,
        method: &str,
        params: serde_json::Value,
        token: Option<&str>,
    ) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({ "id": id, "method": method, "params": params });
        if let Some(t) = token {
            payload["authorization"] = json!(format!("Bearer {t}"));
        }
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn call_ok(&mut self, method: &str, params: serde_json::Value, token: &str) -> serde_json::Value {
        let value = self.call(method, params, Some(token));
        assert_eq!(
            value.get("success").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("data").cloned().unwrap_or(serde_json::Value::Null)
    }

    fn status(&mut self, method: &str, params: serde_json::Value, token: &str) -> u64 {
        let value = self.call(method, params, Some(token));
        value.get("status").and_then(|v| v.as_u64()).unwrap_or(0)
    }

    fn register(&mut self, email: &str, role: &str) -> i64 {
        let value = self.call(
            "auth.register",
            json!({ "name": email, "email": email, "password": "pw-123", "role": role }),
            None,
        );
        assert_eq!(value["success"], true, "register {email}: {value}");
        value["data"]["id"].as_i64().expect("user id")
    }

    fn token(&mut self, email: &str) -> String {
        let value = self.call(
            "auth.login",
            json!({ "email": email, "password": "pw-123" }),
            None,
        );
        assert_eq!(value["success"], true, "login {email}: {value}");
        value["data"]["accessToken"]
            .as_str()
            .expect("access token")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn id_of(v: &serde_json::Value) -> i64 {
    v["id"].as_i64().expect("id")
}

#[test]
fn only_admins_write_and_nobody_deletes_people() {
    let workspace = temp_dir("smartq-writes-roles");
    let mut sc = Sidecar::spawn(&workspace);

    sc.register("admin@example.com", "admin");
    let m1 = sc.register("m1@example.com", "manager");
    sc.register("t1@example.com", "teacher");
    let admin = sc.token("admin@example.com");

    let school = id_of(&sc.call_ok(
        "schools.create",
        json!({ "name": "North", "managerId": m1 }),
        &admin,
    ));
    let teacher = id_of(&sc.call_ok(
        "teachers.create",
        json!({ "name": "T1", "schoolId": school, "className": "5A" }),
        &admin,
    ));
    let parent = id_of(&sc.call_ok("parents.create", json!({ "name": "P1" }), &admin));
    let student = id_of(&sc.call_ok(
        "students.create",
        json!({ "name": "S1", "grade": "5A", "schoolId": school, "parentId": parent }),
        &admin,
    ));

    // A manager who can read their whole school still cannot write to it.
    let manager = sc.token("m1@example.com");
    let teacher_tok = sc.token("t1@example.com");
    for tok in [&manager, &teacher_tok] {
        assert_eq!(sc.status("schools.create", json!({ "name": "X" }), tok), 403);
        assert_eq!(
            sc.status("schools.update", json!({ "id": school, "name": "Renamed" }), tok),
            403
        );
        assert_eq!(sc.status("schools.delete", json!({ "id": school }), tok), 403);
        assert_eq!(
            sc.status(
                "teachers.create",
                json!({ "name": "T", "schoolId": school, "className": "1A" }),
                tok,
            ),
            403
        );
        assert_eq!(
            sc.status("teachers.update", json!({ "id": teacher, "className": "1A" }), tok),
            403
        );
        assert_eq!(sc.status("teachers.delete", json!({ "id": teacher }), tok), 403);
        assert_eq!(
            sc.status(
                "students.create",
                json!({ "name": "S", "grade": "5A", "schoolId": school }),
                tok,
            ),
            403
        );
        assert_eq!(
            sc.status("students.update", json!({ "id": student, "grade": "6B" }), tok),
            403
        );
        assert_eq!(sc.status("parents.create", json!({ "name": "P" }), tok), 403);
        assert_eq!(
            sc.status("parents.update", json!({ "id": parent, "phone": "555" }), tok),
            403
        );
    }

    for tok in [&admin, &manager] {
        assert_eq!(sc.status("students.delete", json!({ "id": student }), tok), 403);
        assert_eq!(sc.status("parents.delete", json!({ "id": parent }), tok), 403);
    }
    // The refused deletes left the rows in place.
    sc.call_ok("students.get", json!({ "id": student }), &admin);
    sc.call_ok("parents.get", json!({ "id": parent }), &admin);

    let unchanged = sc.call_ok("schools.get", json!({ "id": school }), &admin);
    assert_eq!(unchanged["name"], "North");
}

#[test]
fn admin_updates_validate_references() {
    let workspace = temp_dir("smartq-writes-refs");
    let mut sc = Sidecar::spawn(&workspace);

    sc.register("admin@example.com", "admin");
    let m1 = sc.register("m1@example.com", "manager");
    let m2 = sc.register("m2@example.com", "manager");
    let t_user = sc.register("t1@example.com", "teacher");
    let p_user = sc.register("p1@example.com", "parent");
    let admin = sc.token("admin@example.com");

    // Manager linkage: role must match and one school per manager.
    let not_manager = sc.call(
        "schools.create",
        json!({ "name": "Bad", "managerId": t_user }),
        Some(&admin),
    );
    assert_eq!(not_manager["status"], 400);
    assert_eq!(
        sc.status("schools.create", json!({ "name": "Ghost", "managerId": 999 }), &admin),
        404
    );
    let north = id_of(&sc.call_ok(
        "schools.create",
        json!({ "name": "North", "managerId": m1 }),
        &admin,
    ));
    let taken = sc.call(
        "schools.create",
        json!({ "name": "South", "managerId": m1 }),
        Some(&admin),
    );
    assert_eq!(taken["status"], 409);
    let south = id_of(&sc.call_ok("schools.create", json!({ "name": "South" }), &admin));
    let south_row = sc.call_ok(
        "schools.update",
        json!({ "id": south, "managerId": m2, "name": "South Campus" }),
        &admin,
    );
    assert_eq!(south_row["name"], "South Campus");
    assert_eq!(south_row["manager"]["id"], m2);
    assert_eq!(
        sc.status("schools.update", json!({ "id": 999, "name": "X" }), &admin),
        404
    );
    assert_eq!(
        sc.status("schools.create", json!({ "name": "   " }), &admin),
        400
    );

    // Teacher rows.
    assert_eq!(
        sc.status(
            "teachers.create",
            json!({ "name": "T", "schoolId": 999, "className": "5A" }),
            &admin,
        ),
        404
    );
    assert_eq!(
        sc.status(
            "teachers.create",
            json!({ "name": "T", "schoolId": north, "className": "5A", "userId": p_user }),
            &admin,
        ),
        400
    );
    let teacher = id_of(&sc.call_ok(
        "teachers.create",
        json!({ "name": "T1", "schoolId": north, "className": "5A", "userId": t_user }),
        &admin,
    ));
    assert_eq!(
        sc.status(
            "teachers.create",
            json!({ "name": "T1b", "schoolId": north, "className": "5B", "userId": t_user }),
            &admin,
        ),
        409
    );
    let moved = sc.call_ok(
        "teachers.update",
        json!({ "id": teacher, "schoolId": south, "className": "6B" }),
        &admin,
    );
    assert_eq!(moved["schoolId"], south);
    assert_eq!(moved["className"], "6B");

    // Student rows.
    let parent = id_of(&sc.call_ok(
        "parents.create",
        json!({ "name": "P1", "email": " p1@home.example ", "userId": p_user }),
        &admin,
    ));
    assert_eq!(
        sc.status(
            "students.create",
            json!({ "name": "S", "grade": "5A", "schoolId": north, "parentId": 999 }),
            &admin,
        ),
        404
    );
    let student = sc.call_ok(
        "students.create",
        json!({ "name": "S1", "grade": "5A", "section": "B", "schoolId": north, "parentId": parent }),
        &admin,
    );
    assert_eq!(student["section"], "B");
    let updated = sc.call_ok(
        "students.update",
        json!({ "id": id_of(&student), "grade": "6B", "schoolId": south }),
        &admin,
    );
    assert_eq!(updated["grade"], "6B");
    assert_eq!(updated["schoolId"], south);
    assert_eq!(updated["parentId"], parent);

    let p = sc.call_ok(
        "parents.update",
        json!({ "id": parent, "phone": "555-0100" }),
        &admin,
    );
    assert_eq!(p["phone"], "555-0100");
    assert_eq!(p["email"], "p1@home.example");

    // Unknown fields are rejected rather than ignored.
    assert_eq!(
        sc.status("parents.update", json!({ "id": parent, "nickname": "x" }), &admin),
        400
    );
}

#[test]
fn school_delete_requires_empty_school() {
    let workspace = temp_dir("smartq-writes-delete");
    let mut sc = Sidecar::spawn(&workspace);

    sc.register("admin@example.com", "admin");
    let admin = sc.token("admin@example.com");

    let school = id_of(&sc.call_ok("schools.create", json!({ "name": "North" }), &admin));
    let teacher = id_of(&sc.call_ok(
        "teachers.create",
        json!({ "name": "T1", "schoolId": school, "className": "5A" }),
        &admin,
    ));

    let blocked = sc.call("schools.delete", json!({ "id": school }), Some(&admin));
    assert_eq!(blocked["status"], 409);
    assert_eq!(blocked["code"], "conflict");

    sc.call_ok("teachers.delete", json!({ "id": teacher }), &admin);
    assert_eq!(sc.status("teachers.get", json!({ "id": teacher }), &admin), 404);
    sc.call_ok("schools.delete", json!({ "id": school }), &admin);
    assert_eq!(sc.status("schools.get", json!({ "id": school }), &admin), 404);
    assert_eq!(sc.status("schools.delete", json!({ "id": school }), &admin), 404);
}

#[test]
fn dashboards_are_role_bound() {
    let workspace = temp_dir("smartq-dashboards");
    let mut sc = Sidecar::spawn(&workspace);

    sc.register("admin@example.com", "admin");
    let m1 = sc.register("m1@example.com", "manager");
    sc.register("m2@example.com", "manager");
    let admin = sc.token("admin@example.com");

    let north = id_of(&sc.call_ok(
        "schools.create",
        json!({ "name": "North", "managerId": m1 }),
        &admin,
    ));
    let south = id_of(&sc.call_ok("schools.create", json!({ "name": "South" }), &admin));
    sc.call_ok(
        "teachers.create",
        json!({ "name": "T1", "schoolId": north, "className": "5A" }),
        &admin,
    );
    let p1 = id_of(&sc.call_ok("parents.create", json!({ "name": "P1" }), &admin));
    let p2 = id_of(&sc.call_ok("parents.create", json!({ "name": "P2" }), &admin));
    sc.call_ok("parents.create", json!({ "name": "P3" }), &admin);
    for (school, parent) in [(north, p1), (north, p1), (north, p2), (south, p2)] {
        sc.call_ok(
            "students.create",
            json!({ "name": "S", "grade": "5A", "schoolId": school, "parentId": parent }),
            &admin,
        );
    }

    let overview = sc.call_ok("dashboard.overview", json!({}), &admin);
    assert_eq!(
        overview,
        json!({ "totalSchools": 2, "totalTeachers": 1, "totalStudents": 4, "totalParents": 3 })
    );

    let m1_tok = sc.token("m1@example.com");
    let stats = sc.call_ok("dashboard.schoolStats", json!({}), &m1_tok);
    assert_eq!(
        stats,
        json!({ "school": "North", "teachers": 1, "students": 3, "parents": 2 })
    );
    assert_eq!(sc.status("dashboard.overview", json!({}), &m1_tok), 403);
    assert_eq!(sc.status("dashboard.schoolStats", json!({}), &admin), 403);

    // A manager without a school gets NotFound, not an empty record.
    let m2_tok = sc.token("m2@example.com");
    assert_eq!(sc.status("dashboard.schoolStats", json!({}), &m2_tok), 404);
}

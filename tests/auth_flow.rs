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

    fn call_ok(
        &mut self,
        method: &str,
        params: serde_json::Value,
        token: Option<&str>,
    ) -> serde_json::Value {
        let value = self.call(method, params, token);
        assert_eq!(
            value.get("success").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("data").cloned().unwrap_or(serde_json::Value::Null)
    }

    fn status(&mut self, method: &str, params: serde_json::Value, token: Option<&str>) -> u64 {
        let value = self.call(method, params, token);
        value.get("status").and_then(|v| v.as_u64()).unwrap_or(0)
    }

    fn login(&mut self, email: &str, password: &str) -> serde_json::Value {
        self.call_ok(
            "auth.login",
            json!({ "email": email, "password": password }),
            None,
        )
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn register_login_refresh_and_password_change() {
    let workspace = temp_dir("smartq-auth-flow");
    let mut sc = Sidecar::spawn(&workspace);

    let admin = sc.call_ok(
        "auth.register",
        json!({ "name": "Root", "email": "Root@Example.com", "password": "pw-admin", "role": "admin" }),
        None,
    );
    assert_eq!(admin["role"], "admin");
    assert_eq!(admin["email"], "root@example.com");
    assert!(admin.get("passwordHash").is_none());
    assert!(admin.get("password_hash").is_none());

    // The bootstrap path closes once any user exists.
    assert_eq!(
        sc.status(
            "auth.register",
            json!({ "name": "Other", "email": "other@example.com", "password": "pw", "role": "admin" }),
            None,
        ),
        403
    );

    sc.call_ok(
        "auth.register",
        json!({ "name": "Tina", "email": "tina@example.com", "password": "pw-teacher", "role": "teacher" }),
        None,
    );
    let dup = sc.call(
        "auth.register",
        json!({ "name": "Tina 2", "email": "TINA@example.com", "password": "pw", "role": "teacher" }),
        None,
    );
    assert_eq!(dup["status"], 409);
    assert_eq!(dup["code"], "conflict");
    assert_eq!(
        sc.status(
            "auth.register",
            json!({ "name": "X", "email": "x@example.com", "password": "pw", "role": "janitor" }),
            None,
        ),
        400
    );
    // Role names are matched exactly: no trimming, no case folding.
    for role in [" teacher ", "Teacher", "teacher\n"] {
        let value = sc.call(
            "auth.register",
            json!({ "name": "Y", "email": "y@example.com", "password": "pw", "role": role }),
            None,
        );
        assert_eq!(value["status"], 400, "{role:?}: {value}");
        assert_eq!(value["code"], "bad_params", "{role:?}");
    }
    let me_check = sc.call(
        "auth.login",
        json!({ "email": "y@example.com", "password": "pw" }),
        None,
    );
    assert_eq!(me_check["status"], 404);

    let wrong = sc.call(
        "auth.login",
        json!({ "email": "root@example.com", "password": "nope" }),
        None,
    );
    assert_eq!(wrong["status"], 401);
    assert_eq!(wrong["code"], "invalid_credential");
    assert_eq!(
        sc.status(
            "auth.login",
            json!({ "email": "ghost@example.com", "password": "pw" }),
            None,
        ),
        404
    );

    let session = sc.login("root@example.com", "pw-admin");
    let access = session["accessToken"].as_str().expect("access").to_string();
    let refresh = session["refreshToken"].as_str().expect("refresh").to_string();
    assert_eq!(session["user"]["role"], "admin");

    let me = sc.call_ok("auth.me", json!({}), Some(&access));
    assert_eq!(me["email"], "root@example.com");
    assert_eq!(sc.status("auth.me", json!({}), None), 401);
    assert_eq!(sc.status("auth.me", json!({}), Some("not-a-jwt")), 401);

    // Refresh and access tokens are not interchangeable.
    assert_eq!(sc.status("auth.me", json!({}), Some(&refresh)), 401);
    assert_eq!(
        sc.status("auth.refresh", json!({ "refreshToken": access }), None),
        401
    );

    let renewed = sc.call_ok("auth.refresh", json!({ "refreshToken": refresh }), None);
    let renewed_access = renewed["accessToken"].as_str().expect("renewed").to_string();
    let me_again = sc.call_ok("auth.me", json!({}), Some(&renewed_access));
    assert_eq!(me_again["id"], me["id"]);

    let bad_change = sc.call(
        "auth.changePassword",
        json!({ "oldPassword": "wrong", "newPassword": "pw-new" }),
        Some(&access),
    );
    assert_eq!(bad_change["status"], 401);
    sc.call_ok(
        "auth.changePassword",
        json!({ "oldPassword": "pw-admin", "newPassword": "pw-new" }),
        Some(&access),
    );
    assert_eq!(
        sc.status(
            "auth.login",
            json!({ "email": "root@example.com", "password": "pw-admin" }),
            None,
        ),
        401
    );
    sc.login("root@example.com", "pw-new");

    sc.call_ok("auth.logout", json!({}), Some(&access));
}

#[test]
fn admin_can_register_admins_after_bootstrap() {
    let workspace = temp_dir("smartq-auth-admin");
    let mut sc = Sidecar::spawn(&workspace);

    sc.call_ok(
        "auth.register",
        json!({ "name": "Root", "email": "root@example.com", "password": "pw", "role": "admin" }),
        None,
    );
    let access = sc.login("root@example.com", "pw")["accessToken"]
        .as_str()
        .expect("access")
        .to_string();

    let second = sc.call_ok(
        "auth.register",
        json!({ "name": "Deputy", "email": "deputy@example.com", "password": "pw", "role": "admin" }),
        Some(&access),
    );
    assert_eq!(second["role"], "admin");

    // A garbage token on an otherwise anonymous call is still rejected.
    assert_eq!(
        sc.status(
            "auth.register",
            json!({ "name": "P", "email": "p@example.com", "password": "pw", "role": "parent" }),
            Some("garbage"),
        ),
        401
    );
}

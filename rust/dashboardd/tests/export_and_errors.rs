use rusqlite::Connection;
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

fn seed_db(dir: &Path) -> PathBuf {
    let path = dir.join("submissions.sqlite3");
    let conn = Connection::open(&path).expect("create db");
    conn.execute_batch(
        r#"CREATE TABLE DAT2(id INTEGER, time INTEGER, answer1 TEXT, feedback1 TEXT,
                            answer2 TEXT, feedback2 TEXT);
           INSERT INTO DAT2 VALUES (10130, 1740000000, '응고', '{"score": 3, "max": 4, "feedback": "응고열 언급", "detected": {"freezing": true, "heat_release": false}}',
                                    '승화', '{"score": 2, "max": 4, "feedback": "차이를, 더 설명"}');
           INSERT INTO DAT2 VALUES (10131, 1740000500, '모름', '', '모름', NULL);
           CREATE TABLE DATX(id INTEGER, opinion1 TEXT, answer2 TEXT, feedback2 TEXT);
           INSERT INTO DATX VALUES (20001, '문항이 없어요', '답', '{"score": 1}');
           CREATE TABLE roster_names(name TEXT, answer1 TEXT, feedback1 TEXT);"#,
    )
    .expect("seed");
    path
}

fn spawn_with_env(vars: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_dashboardd");
    let mut cmd = Command::new(exe);
    cmd.env_remove("DASHBOARDD_DB").env_remove("DASHBOARDD_CONFIG");
    for (k, v) in vars {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn dashboardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_with_env(&[])
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value["ok"], json!(false), "expected failure: {}", value);
    value["error"]["code"].as_str().expect("error code")
}

#[test]
fn offline_requests_fail_closed() {
    let dir = temp_dir("dashboardd-offline");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["dbStatus"].as_str().unwrap().starts_with("OFFLINE"));

    let resp = request(&mut stdin, &mut reader, "2", "submissions.query", json!({ "table": "DAT2" }));
    assert_eq!(error_code(&resp), "db_offline");
    assert!(resp.get("result").is_none());

    let missing = dir.join("nope.sqlite3");
    let resp = request(&mut stdin, &mut reader, "3", "db.open", json!({ "path": missing }));
    assert_eq!(error_code(&resp), "db_open_failed");

    let health = request_ok(&mut stdin, &mut reader, "4", "health", json!({}));
    let status = health["dbStatus"].as_str().unwrap();
    assert!(status.starts_with("OFFLINE: failed to open database"), "{}", status);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn bad_requests_are_reported() {
    let dir = temp_dir("dashboardd-bad-requests");
    let db = seed_db(&dir);
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(&mut stdin, &mut reader, "1", "db.open", json!({ "path": db }));

    let resp = request(&mut stdin, &mut reader, "2", "grades.delete", json!({}));
    assert_eq!(error_code(&resp), "not_implemented");

    let resp = request(&mut stdin, &mut reader, "3", "db.open", json!({}));
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(&mut stdin, &mut reader, "4", "submissions.query", json!({ "table": "roster" }));
    assert_eq!(error_code(&resp), "not_found");

    let resp = request(&mut stdin, &mut reader, "5", "submissions.query", json!({ "table": "DAT2", "limit": "all" }));
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(&mut stdin, &mut reader, "6", "submissions.detail", json!({ "table": "DAT2" }));
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(&mut stdin, &mut reader, "7", "submissions.query", json!({ "tables": [] }));
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(&mut stdin, &mut reader, "8", "submissions.query", json!({ "table": "roster_names" }));
    assert_eq!(error_code(&resp), "not_a_submission_table");

    // the process keeps serving after errors
    request_ok(&mut stdin, &mut reader, "9", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn export_writes_csv_with_bom_and_relabelled_rubric() {
    let dir = temp_dir("dashboardd-export");
    let db = seed_db(&dir);
    let out = dir.join("out").join("dat2.csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(&mut stdin, &mut reader, "1", "db.open", json!({ "path": db }));
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.exportCsv",
        json!({ "table": "DAT2", "outPath": out, "includeRaw": true }),
    );
    assert_eq!(exported["rowsExported"], json!(2));
    assert_eq!(exported["fileName"], json!("main.DAT2_dashboard.csv"));

    let bytes = std::fs::read(&out).expect("read export");
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
    let text = String::from_utf8(bytes[3..].to_vec()).expect("utf8");
    let mut lines = text.lines();
    let header = lines.next().expect("header");
    assert!(header.starts_with("table,student_id,submitted_at,total_score,total_max,item1_score"));
    assert!(header.ends_with("item2_answer,item2_payload,item2_reason"));
    // newest first; the empty submission has blank item cells
    let first = lines.next().expect("row 1");
    assert!(first.starts_with("main.DAT2,10131,2025-02-19 21:28:20,,,,,,,,,,,"), "{}", first);
    let second = lines.next().expect("row 2");
    assert!(second.starts_with("main.DAT2,10130,2025-02-19 21:20:00,5,8,3,4,,응고열 언급,"), "{}", second);
    assert!(second.contains("\"차이를, 더 설명\""));
    assert!(lines.next().is_none());

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.detail",
        json!({ "table": "DAT2", "studentId": "10130" }),
    );
    assert_eq!(
        detail["items"][0]["grading"]["detected"],
        json!([
            { "key": "응고/얼음", "value": true },
            { "key": "열 방출(응고열)", "value": false }
        ])
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn inline_export_honours_keyword() {
    let dir = temp_dir("dashboardd-export-inline");
    let db = seed_db(&dir);
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(&mut stdin, &mut reader, "1", "db.open", json!({ "path": db }));
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.exportCsv",
        json!({ "table": "DAT2", "keyword": "응고열" }),
    );
    assert_eq!(exported["rowsExported"], json!(1));
    let csv = exported["csv"].as_str().expect("csv");
    assert_eq!(csv.trim_start_matches('\u{feff}').lines().count(), 2);
    assert!(csv.contains("10130"));
    assert!(!csv.contains("10131"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn database_from_environment_is_opened_at_startup() {
    let dir = temp_dir("dashboardd-env-db");
    let db = seed_db(&dir);
    let config = dir.join("dashboard.json");
    std::fs::write(&config, r#"{ "maxItems": 1 }"#).expect("write config");

    let (mut child, mut stdin, mut reader) = spawn_with_env(&[
        ("DASHBOARDD_DB", db.to_str().unwrap()),
        ("DASHBOARDD_CONFIG", config.to_str().unwrap()),
    ]);

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["dbStatus"], json!("ONLINE"));
    let listed = request_ok(&mut stdin, &mut reader, "2", "tables.list", json!({}));
    assert_eq!(listed["tables"][0]["itemCount"], json!(1));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn table_without_item_columns_has_no_items() {
    let dir = temp_dir("dashboardd-no-items");
    let db = seed_db(&dir);
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(&mut stdin, &mut reader, "1", "db.open", json!({ "path": db }));

    let listed = request_ok(&mut stdin, &mut reader, "2", "tables.list", json!({}));
    let names: Vec<&str> = listed["tables"]
        .as_array()
        .expect("tables")
        .iter()
        .map(|t| t["table"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["DAT2"]);

    let described = request_ok(&mut stdin, &mut reader, "3", "tables.describe", json!({ "table": "DATX" }));
    assert_eq!(described["itemCount"], json!(0));
    assert_eq!(described["hasOpinion"], json!(true));

    let q = request_ok(&mut stdin, &mut reader, "4", "submissions.query", json!({ "table": "DATX" }));
    assert_eq!(q["itemCount"], json!(0));
    assert_eq!(q["itemLabels"], json!([]));
    assert_eq!(q["matchedCount"], json!(1));
    assert_eq!(q["rows"][0]["studentId"], json!("20001"));
    assert_eq!(q["rows"][0]["items"], json!([]));
    assert_eq!(q["rows"][0]["totalScore"], json!(null));

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "submissions.detail",
        json!({ "table": "DATX", "studentId": "20001" }),
    );
    assert_eq!(detail["found"], json!(true));
    assert_eq!(detail["items"], json!([]));
    assert_eq!(detail["opinion"], json!("문항이 없어요"));

    let exported = request_ok(&mut stdin, &mut reader, "6", "submissions.exportCsv", json!({ "table": "DATX" }));
    assert_eq!(exported["rowsExported"], json!(1));
    let csv = exported["csv"].as_str().expect("csv");
    let header = csv.trim_start_matches('\u{feff}').lines().next().expect("header");
    assert_eq!(header, "table,student_id,submitted_at,total_score,total_max,opinion");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn query_without_keyword_reads_only_the_limit() {
    let dir = temp_dir("dashboardd-limit");
    let path = dir.join("many.sqlite3");
    {
        let conn = Connection::open(&path).expect("create db");
        conn.execute_batch("CREATE TABLE DAT1(id INTEGER, answer1 TEXT, feedback1 TEXT);")
            .expect("schema");
        for id in 1..=12 {
            conn.execute(
                "INSERT INTO DAT1 VALUES (?1, 'a', ?2)",
                (id, if id == 12 { r#"{"feedback": "last one"}"# } else { "" }),
            )
            .expect("insert");
        }
    }
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "db.open", json!({ "path": path }));

    let q = request_ok(&mut stdin, &mut reader, "2", "submissions.query", json!({ "table": "DAT1", "limit": 10 }));
    assert_eq!(q["limit"], json!(10));
    assert_eq!(q["matchedCount"], json!(12));
    let ids: Vec<&str> = q["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|r| r["studentId"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]);

    // a keyword still searches every row, past the limit
    let q = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.query",
        json!({ "table": "DAT1", "limit": 10, "keyword": "LAST" }),
    );
    assert_eq!(q["matchedCount"], json!(1));
    assert_eq!(q["rows"][0]["studentId"], json!("12"));

    drop(stdin);
    let _ = child.wait();
}

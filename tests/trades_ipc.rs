use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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

fn fixture(rel: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(rel)
        .to_string_lossy()
        .to_string()
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn spawn() -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_tradejournald"))
            .env_remove("TRADEJOURNAL_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn tradejournald");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        writeln!(
            self.stdin,
            "{}",
            json!({ "id": id, "method": method, "params": params })
        )
        .expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        let v: serde_json::Value = serde_json::from_str(line.trim()).expect("response json");
        assert_eq!(v["id"], id.as_str());
        v
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let v = self.call(method, params);
        assert_eq!(v["ok"], true, "{method} failed: {v}");
        v["result"].clone()
    }

    fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let v = self.call(method, params);
        assert_eq!(v["ok"], false, "{method} unexpectedly succeeded: {v}");
        v["error"]["code"].as_str().unwrap_or_default().to_string()
    }

    fn select(&mut self, ws: &PathBuf) {
        self.ok("workspace.select", json!({ "path": ws.to_string_lossy() }));
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn storage_methods_need_a_workspace() {
    let mut sc = Sidecar::spawn();
    assert_eq!(
        sc.err_code("trades.save", json!({ "fields": { "header": "x" } })),
        "no_workspace"
    );
    let listed = sc.ok("trades.list", json!({}));
    assert_eq!(listed["trades"], json!([]));
    assert_eq!(sc.err_code("workspace.select", json!({})), "bad_params");
}

#[test]
fn batch_import_survives_a_broken_file() {
    let mut sc = Sidecar::spawn();
    let result = sc.ok(
        "trades.importFiles",
        json!({
            "paths": [
                fixture("trades/broken.json"),
                fixture("trades/orders_export.txt"),
                fixture("trades/trade_list.json"),
                fixture("trades/notes.csv"),
            ]
        }),
    );
    let files = result["files"].as_array().expect("files");
    assert_eq!(files.len(), 4);

    assert_eq!(files[0]["ok"], false);
    assert_eq!(files[0]["error"]["code"], "bad_json");
    assert_eq!(files[1]["ok"], true);
    assert_eq!(files[1]["trades"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(files[1]["trades"][0]["missing"], json!([]));
    assert_eq!(files[2]["trades"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(files[3]["error"]["code"], "unsupported_file");

    assert_eq!(result["tradeCount"], 4);
    assert_eq!(result["failedFiles"], 2);
}

#[test]
fn parse_json_reports_bad_shape_and_syntax() {
    let mut sc = Sidecar::spawn();
    assert_eq!(sc.err_code("trades.parseJson", json!({ "text": "[1, 2" })), "bad_json");
    assert_eq!(sc.err_code("trades.parseJson", json!({ "text": "42" })), "bad_shape");
    assert_eq!(
        sc.err_code("trades.parseJson", json!({ "path": fixture("trades/missing.json") })),
        "not_found"
    );
    assert_eq!(sc.err_code("trades.parseText", json!({})), "bad_params");
}

#[test]
fn json_trade_saved_then_listed_keeps_every_value() {
    let ws = temp_dir("tradejournal-ipc-roundtrip");
    let mut sc = Sidecar::spawn();
    sc.select(&ws);

    let parsed = sc.ok("trades.parseJson", json!({ "path": fixture("trades/single_trade.json") }));
    assert_eq!(parsed["name"], "single_trade.json");
    let original = parsed["trades"][0]["fields"].clone();

    let saved = sc.ok(
        "trades.save",
        json!({
            "fields": original,
            "suggestion": "wait for the retest",
            "comment": "  ",
            "source": "json",
            "sourceName": "single_trade.json",
        }),
    );
    assert_eq!(saved["comment"], serde_json::Value::Null);

    let listed = sc.ok("trades.list", json!({}));
    let got = &listed["trades"][0];
    assert_eq!(got["fields"], original);
    assert_eq!(got["fields"]["Quantity"], 4);
    assert_eq!(got["fields"]["Limit price"], 0.53);
    assert_eq!(got["suggestion"], "wait for the retest");
    assert_eq!(got["source"], "json");
    assert_eq!(got["sourceName"], "single_trade.json");

    drop(sc);
    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn edits_override_parsed_fields_on_save() {
    let ws = temp_dir("tradejournal-ipc-edits");
    let mut sc = Sidecar::spawn();
    sc.select(&ws);

    let saved = sc.ok(
        "trades.save",
        json!({
            "fields": { "header": "AAPL BUY", "cost": "150.25", "Status": "Pending" },
            "edits": { "Status": "Filled", "Venue": "IEX" },
        }),
    );
    assert_eq!(
        saved["fields"],
        json!({ "header": "AAPL BUY", "cost": "150.25", "Status": "Filled", "Venue": "IEX" })
    );
    assert_eq!(saved["source"], "manual");

    assert_eq!(
        sc.err_code("trades.save", json!({ "fields": { "legs": [1, 2] } })),
        "bad_params"
    );
    assert_eq!(
        sc.err_code("trades.save", json!({ "fields": { "header": "x" }, "source": "fax" })),
        "bad_params"
    );

    drop(sc);
    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn list_is_newest_first_across_many_saves() {
    let ws = temp_dir("tradejournal-ipc-order");
    let mut sc = Sidecar::spawn();
    sc.select(&ws);

    let mut ids = Vec::new();
    for i in 0..5 {
        let saved = sc.ok(
            "trades.save",
            json!({ "fields": { "header": format!("trade {i}"), "Quantity": i } }),
        );
        ids.push(saved["id"].as_str().expect("id").to_string());
    }
    let listed = sc.ok("trades.list", json!({}));
    let got: Vec<String> = listed["trades"]
        .as_array()
        .expect("trades")
        .iter()
        .map(|t| t["id"].as_str().expect("id").to_string())
        .collect();
    ids.reverse();
    assert_eq!(got, ids);

    drop(sc);
    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn convert_text_writes_json_file() {
    let dir = temp_dir("tradejournal-ipc-convert");
    let out = dir.join("orders.json");
    let mut sc = Sidecar::spawn();
    let result = sc.ok(
        "trades.convertText",
        json!({ "path": fixture("trades/orders_export.txt"), "outPath": out.to_string_lossy() }),
    );
    assert_eq!(result["tradeCount"], 2);
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).expect("read out")).expect("json");
    assert_eq!(written[1]["header"], "Sell SPY $645 Call 7/31");

    drop(sc);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn backup_restore_brings_back_saved_trades() {
    let ws = temp_dir("tradejournal-ipc-backup");
    let ws2 = temp_dir("tradejournal-ipc-backup-restored");
    let bundle = ws.join("journal.zip");
    let mut sc = Sidecar::spawn();
    sc.select(&ws);

    sc.ok("trades.save", json!({ "fields": { "header": "kept" } }));
    let export = sc.ok(
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], "tradejournal-workspace-v1");
    assert_eq!(export["tradeCount"], 1);

    let import = sc.ok(
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy(), "workspacePath": ws2.to_string_lossy() }),
    );
    assert_eq!(import["bundleFormatDetected"], "tradejournal-workspace-v1");
    assert_eq!(import["tradeCount"], 1);

    let health = sc.ok("health", json!({}));
    assert_eq!(health["workspacePath"], ws2.to_string_lossy().to_string());
    let listed = sc.ok("trades.list", json!({}));
    assert_eq!(listed["trades"][0]["fields"]["header"], "kept");

    drop(sc);
    let _ = std::fs::remove_dir_all(ws);
    let _ = std::fs::remove_dir_all(ws2);
}

#[test]
fn unopenable_workspace_reports_storage_code_without_details() {
    let dir = temp_dir("tradejournal-ipc-blocked");
    let blocked = dir.join("not-a-dir");
    std::fs::write(&blocked, b"plain file").expect("write blocker");

    let mut sc = Sidecar::spawn();
    let v = sc.call("workspace.select", json!({ "path": blocked.to_string_lossy() }));
    assert_eq!(v["ok"], false);
    assert_eq!(v["error"]["code"], "db_open_failed");
    assert!(v["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .starts_with("failed to open journal database"));
    assert!(v["error"].get("details").is_none(), "{v}");

    drop(sc);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn parse_text_keeps_colon_headers_and_pairs_after_stray_lines() {
    let mut sc = Sidecar::spawn();
    let parsed = sc.ok(
        "trades.parseText",
        json!({ "text": "AAPL BUY 10:30\n150.25\n10 @ 150.00\n\nNotes\n\nExchange: NASDAQ\n" }),
    );
    let fields = &parsed["trades"][0]["fields"];
    assert_eq!(fields["header"], "AAPL BUY 10:30");
    assert_eq!(fields["Exchange"], "NASDAQ");
    assert_eq!(parsed["warnings"][0]["code"], "malformed_line");
    assert_eq!(parsed["warnings"][0]["line"], 5);
    assert_eq!(parsed["warnings"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn restoring_a_foreign_database_keeps_the_open_journal() {
    let ws = temp_dir("tradejournal-ipc-foreign");
    let foreign = ws.join("other.db");
    std::fs::write(&foreign, b"").expect("write empty db");

    let mut sc = Sidecar::spawn();
    sc.select(&ws);
    sc.ok("trades.save", json!({ "fields": { "header": "stays" } }));

    assert_eq!(
        sc.err_code(
            "backup.importWorkspaceBundle",
            json!({ "inPath": foreign.to_string_lossy() }),
        ),
        "io_failed"
    );
    let listed = sc.ok("trades.list", json!({}));
    assert_eq!(listed["trades"][0]["fields"]["header"], "stays");

    drop(sc);
    let _ = std::fs::remove_dir_all(ws);
}

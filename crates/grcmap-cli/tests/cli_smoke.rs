use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "grcmap-cli-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../grcmap-kernel/tests/fixtures/soc2_sample")
        .join(name)
        .display()
        .to_string()
}

fn run_grcmap<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = env!("CARGO_BIN_EXE_grcmap");
    Command::new(bin)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("grcmap command should execute")
}

fn assert_success(output: &Output) {
    if !output.status.success() {
        panic!(
            "command failed with status {:?}\nstdout:\n{}\nstderr:\n{}",
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn assert_failure(output: &Output) {
    if output.status.success() {
        panic!(
            "command unexpectedly succeeded\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn parse_json_stdout(output: &Output) -> Value {
    serde_json::from_slice::<Value>(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout should be valid JSON: {e}\nstdout:\n{}",
            stdout_text(output)
        )
    })
}

#[test]
fn status_prints_label() {
    let output = run_grcmap(["status", "--implemented", "50"]);
    assert_success(&output);
    assert_eq!(stdout_text(&output).trim(), "partially implemented");

    let output = run_grcmap(["status", "--implemented", "0", "--not-applicable", "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["status"], "not_applicable");
    assert_eq!(payload["label"], "not applicable");
}

#[test]
fn status_rejects_out_of_range_percentage() {
    let output = run_grcmap(["status", "--implemented", "150"]);
    assert_failure(&output);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_text(&output).contains("invalid percentage"));

    let output = run_grcmap(["status", "--implemented", "-1"]);
    assert_failure(&output);
}

#[test]
fn classify_reports_family_and_unclassified() {
    let output = run_grcmap([
        "classify",
        "CN07 - Incident Management Policy",
        "Board minutes",
        "--json",
    ]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["results"][0]["familyTag"], "CC1");
    assert_eq!(payload["results"][0]["token"]["number"], 7);
    assert!(payload["results"][1]["familyTag"].is_null());
    assert_eq!(payload["unclassified"], 1);
}

#[test]
fn table_check_accepts_embedded_table() {
    let output = run_grcmap(["table-check", "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["result"], "accepted");
    assert_eq!(payload["families"], 12);
    assert_eq!(payload["span"], serde_json::json!([1, 72]));
}

#[test]
fn table_check_rejects_overlapping_ranges() {
    let tmp = TempDirGuard::new("table-overlap");
    let path = tmp.path().join("table.toml");
    fs::write(
        &path,
        r#"
schema = 1
table_kind = "grcmap.family_mapping.v1"

[[families]]
range_start = 1
range_end = 10
family_tag = "CC1"
ref_prefix = "cc1"
patterns = ["Conduct"]

[[families]]
range_start = 8
range_end = 12
family_tag = "CC2"
ref_prefix = "cc2"
patterns = ["Information"]
"#,
    )
    .expect("table should be written");

    let output = run_grcmap([
        "table-check",
        "--table",
        path.to_str().expect("utf-8 path"),
        "--json",
    ]);
    assert_failure(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["result"], "rejected");
    assert!(
        payload["failureClasses"]
            .as_array()
            .expect("failure classes")
            .iter()
            .any(|class| class == "range_overlap")
    );
}

#[test]
fn plan_lists_new_associations() {
    let output = run_grcmap([
        "plan",
        "--controls",
        &fixture("controls.json"),
        "--evidence",
        &fixture("evidence.json"),
        "--json",
    ]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    let plan = &payload["plan"];
    assert_eq!(plan["planKind"], "grcmap.association_plan.v1");
    assert_eq!(plan["stats"]["planned"], 5);
    assert_eq!(plan["entries"][0]["evidenceId"], "ev-07");
    assert_eq!(plan["entries"][0]["subcontrolId"], "sc-103");
    assert_eq!(payload["diagnosticCounts"]["unclassifiable_evidence"], 1);
    assert!(payload["run"].is_null());
}

#[test]
fn plan_write_evidence_applies_links() {
    let tmp = TempDirGuard::new("plan-write");
    let out = tmp.path().join("evidence.out.json");
    let output = run_grcmap([
        "plan",
        "--controls",
        &fixture("controls.json"),
        "--evidence",
        &fixture("evidence.json"),
        "--write-evidence",
        out.to_str().expect("utf-8 path"),
    ]);
    assert_success(&output);
    assert!(stdout_text(&output).contains("Links added: 5"));

    let written: Value =
        serde_json::from_str(&fs::read_to_string(&out).expect("evidence export written"))
            .expect("evidence export should be JSON");
    let ev07 = written
        .as_array()
        .expect("array export")
        .iter()
        .find(|item| item["id"] == "ev-07")
        .expect("ev-07 present");
    assert_eq!(
        ev07["associations"],
        serde_json::json!([{"control_id": "sc-103"}])
    );
    assert_eq!(ev07["project_id"], "proj-1");

    // a second pass over the written export plans nothing new
    let output = run_grcmap([
        "plan",
        "--controls",
        &fixture("controls.json"),
        "--evidence",
        out.to_str().expect("utf-8 path"),
        "--json",
    ]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["plan"]["stats"]["planned"], 0);
    assert_eq!(payload["plan"]["stats"]["alreadyAssociated"], 6);
}

#[test]
fn plan_write_evidence_keeps_envelope_and_association_records() {
    let tmp = TempDirGuard::new("plan-envelope");
    let input = tmp.path().join("evidence.json");
    let out = tmp.path().join("evidence.out.json");
    fs::write(
        &input,
        serde_json::to_string_pretty(&serde_json::json!({
            "evidence": [
                {
                    "id": "ev-07",
                    "name": "CN07 - Incident Management Policy",
                    "associations": [
                        {"control_id": "sc-101", "id": "assoc-1", "created_by": "auditor"}
                    ]
                }
            ],
            "total": 1,
            "page": {"offset": 0, "limit": 100}
        }))
        .expect("evidence should render"),
    )
    .expect("evidence should be written");

    let output = run_grcmap([
        "plan",
        "--controls",
        &fixture("controls.json"),
        "--evidence",
        input.to_str().expect("utf-8 path"),
        "--write-evidence",
        out.to_str().expect("utf-8 path"),
    ]);
    assert_success(&output);

    let written: Value =
        serde_json::from_str(&fs::read_to_string(&out).expect("evidence export written"))
            .expect("evidence export should be JSON");
    assert_eq!(written["total"], 1);
    assert_eq!(written["page"]["limit"], 100);
    assert_eq!(
        written["evidence"][0]["associations"],
        serde_json::json!([
            {"control_id": "sc-101", "id": "assoc-1", "created_by": "auditor"},
            {"control_id": "sc-103"}
        ])
    );
}

#[test]
fn report_inherits_control_applicability() {
    let tmp = TempDirGuard::new("report-soa");
    let controls = tmp.path().join("controls.json");
    fs::write(
        &controls,
        serde_json::to_string_pretty(&serde_json::json!([
            {
                "id": "ctl-p1",
                "ref_code": "pi1.1",
                "is_applicable": false,
                "subcontrols": [{"id": "sc-pi", "implemented": 0}]
            },
            {
                "id": "ctl-cc1",
                "ref_code": "cc1.1",
                "is_applicable": true,
                "subcontrols": [
                    {"id": "sc-ok", "implemented": 100},
                    {"id": "sc-frac", "implemented": 50.5}
                ]
            },
            {
                "id": "ctl-cc2",
                "ref_code": "cc2.1",
                "subcontrols": [{"id": "sc-cc2", "implemented": 100}]
            }
        ]))
        .expect("controls should render"),
    )
    .expect("controls should be written");

    let output = run_grcmap([
        "report",
        "--controls",
        controls.to_str().expect("utf-8 path"),
        "--json",
    ]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["overall"]["total"], 3);
    assert_eq!(payload["overall"]["notApplicable"], 1);
    assert_eq!(payload["overall"]["completionPercentage"], 100);
    assert_eq!(payload["skipped"][0]["subject"], "sc-frac");
    assert_eq!(
        payload["applicability"],
        serde_json::json!({"total": 3, "applicable": 1, "notApplicable": 1, "pending": 1})
    );

    let output = run_grcmap(["report", "--controls", controls.to_str().expect("utf-8 path")]);
    assert_success(&output);
    assert!(
        stdout_text(&output).contains("Applicability: 1 applicable, 1 not applicable, 1 pending")
    );
}

#[test]
fn report_rolls_up_per_family() {
    let output = run_grcmap([
        "report",
        "--controls",
        &fixture("controls.json"),
        "--evidence",
        &fixture("evidence.json"),
        "--json",
    ]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["byFamily"]["CC1"]["completionPercentage"], 50);
    assert_eq!(payload["byFamily"]["A1"]["completionPercentage"], 0);
    assert_eq!(payload["overall"]["total"], 9);
    assert_eq!(payload["overall"]["completionPercentage"], 50);
    assert_eq!(payload["unmapped"]["fullyImplemented"], 1);
    assert_eq!(payload["applicability"]["pending"], 5);
}

#[test]
fn coverage_and_assess_read_fixtures() {
    let output = run_grcmap(["coverage", "--evidence", &fixture("evidence.json"), "--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["coverage"]["covered"], 6);
    assert_eq!(payload["coverage"]["expected"], 72);

    let output = run_grcmap([
        "assess",
        "--controls",
        &fixture("controls.json"),
        "--evidence",
        &fixture("evidence.json"),
        "--json",
    ]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    // only sc-102 carries evidence before the plan is applied
    assert_eq!(payload["assessment"]["counts"]["evidencePresent"], 1);
    assert_eq!(payload["updates"].as_array().map(Vec::len), Some(0));
}

#[test]
fn missing_export_exits_with_input_error() {
    let output = run_grcmap([
        "report",
        "--controls",
        "/nonexistent/grcmap/controls.json",
    ]);
    assert_failure(&output);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_text(&output).contains("error: controls export: failed to read file"));
}

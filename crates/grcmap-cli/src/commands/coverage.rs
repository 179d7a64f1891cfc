use crate::support::{emit_json_or_exit, generated_at, load_evidence_or_exit, load_table_or_exit};
use grcmap_kernel::coverage_report;
use serde_json::json;

pub fn run(evidence: String, table: Option<String>, json_output: bool) {
    let mapping = load_table_or_exit(table.as_deref());
    let rows = load_evidence_or_exit(&evidence);
    let report = coverage_report(&rows, &mapping);

    if json_output {
        let payload = json!({
            "schema": 1,
            "generatedAt": generated_at(),
            "evidencePath": evidence,
            "coverage": report,
        });
        emit_json_or_exit(&payload, "coverage");
        return;
    }

    println!("grcmap coverage");
    println!("  Evidence: {}", rows.len());
    println!("  Covered: {}/{}", report.covered, report.expected);
    println!("  Coverage rate: {}%", report.coverage_percentage);
    if !report.missing.is_empty() {
        println!("  Missing: {}", report.missing.join(", "));
    }
    if !report.unclassified.is_empty() {
        println!("  Unclassified: {}", report.unclassified.join(", "));
    }
}

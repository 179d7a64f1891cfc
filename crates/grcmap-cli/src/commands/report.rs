use crate::support::{
    emit_json_or_exit, generated_at, load_controls_or_exit, load_evidence_or_exit,
    load_table_or_exit, print_diagnostics, table_label,
};
use grcmap_kernel::{Counts, aggregate};
use serde_json::json;

const COMPLETION_REPORT_KIND: &str = "grcmap.completion_report.v1";
const DIAGNOSTIC_SAMPLE_LIMIT: usize = 25;

pub fn run(controls: String, evidence: Option<String>, table: Option<String>, json_output: bool) {
    let mapping = load_table_or_exit(table.as_deref());
    let control_rows = load_controls_or_exit(&controls);
    let evidence_rows = evidence
        .as_deref()
        .map(load_evidence_or_exit)
        .unwrap_or_default();

    let aggregation = aggregate(&control_rows, &evidence_rows, &mapping);

    if json_output {
        let payload = json!({
            "schema": 1,
            "reportKind": COMPLETION_REPORT_KIND,
            "generatedAt": generated_at(),
            "tablePath": table_label(table.as_deref()),
            "controlsPath": controls,
            "evidencePath": evidence,
            "byFamily": aggregation.by_family,
            "overall": aggregation.overall,
            "unmapped": aggregation.unmapped,
            "skipped": aggregation.skipped,
            "applicability": aggregation.applicability,
        });
        emit_json_or_exit(&payload, "report");
        return;
    }

    println!("grcmap report");
    println!("  Controls: {}", control_rows.len());
    let applicability = &aggregation.applicability;
    println!(
        "  Applicability: {} applicable, {} not applicable, {} pending",
        applicability.applicable, applicability.not_applicable, applicability.pending
    );
    for (family, counts) in &aggregation.by_family {
        print_counts(family.as_str(), counts, evidence.is_some());
    }
    if aggregation.unmapped.total > 0 {
        print_counts("unmapped", &aggregation.unmapped, evidence.is_some());
    }
    print_counts("overall", &aggregation.overall, evidence.is_some());
    if !aggregation.skipped.is_empty() {
        println!("  Skipped: {}", aggregation.skipped.len());
        print_diagnostics(&aggregation.skipped, DIAGNOSTIC_SAMPLE_LIMIT);
    }
}

fn print_counts(label: &str, counts: &Counts, with_evidence: bool) {
    println!(
        "  {label}: {}% ({} fully / {} applicable; {} partial, {} not implemented, {} n/a)",
        counts.completion_percentage,
        counts.fully_implemented,
        counts.applicable(),
        counts.partially_implemented,
        counts.not_implemented,
        counts.not_applicable,
    );
    if with_evidence {
        println!("    with evidence: {}/{}", counts.with_evidence, counts.total);
    }
}

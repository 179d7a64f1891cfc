use crate::support::{
    emit_json_or_exit, generated_at, load_controls_or_exit, load_evidence_or_exit,
    load_table_or_exit, print_diagnostics,
};
use grcmap_kernel::assess_subcontrols;
use serde_json::json;

const DIAGNOSTIC_SAMPLE_LIMIT: usize = 25;

pub fn run(controls: String, evidence: String, table: Option<String>, json_output: bool) {
    let mapping = load_table_or_exit(table.as_deref());
    let control_rows = load_controls_or_exit(&controls);
    let evidence_rows = load_evidence_or_exit(&evidence);
    let assessment = assess_subcontrols(&control_rows, &evidence_rows, &mapping);

    if json_output {
        let updates: Vec<_> = assessment
            .updates()
            .map(|(subcontrol_id, update)| json!({ "subcontrolId": subcontrol_id, "update": update }))
            .collect();
        let payload = json!({
            "schema": 1,
            "generatedAt": generated_at(),
            "controlsPath": controls,
            "evidencePath": evidence,
            "assessment": assessment,
            "updates": updates,
        });
        emit_json_or_exit(&payload, "assess");
        return;
    }

    let counts = assessment.counts;
    println!("grcmap assess");
    println!("  Assessed: {}", counts.assessed);
    println!("  Completion indicated: {}", counts.completion_indicated);
    println!("  Evidence without indicator: {}", counts.evidence_present);
    println!("  No evidence: {}", counts.no_evidence);
    println!("  Not applicable: {}", counts.not_applicable);
    println!("  Suggested updates: {}", counts.updates);
    for item in &assessment.assessments {
        let Some(update) = &item.update else {
            continue;
        };
        println!(
            "    {} ({}): {} -> {} [implemented={}]",
            item.subcontrol_id,
            item.control_ref,
            item.current_status,
            item.suggested_status,
            update.implemented_value().unwrap_or_default(),
        );
    }
    if !assessment.diagnostics.is_empty() {
        print_diagnostics(&assessment.diagnostics, DIAGNOSTIC_SAMPLE_LIMIT);
    }
}

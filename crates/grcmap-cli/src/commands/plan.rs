use crate::support::{
    emit_json_or_exit, generated_at, load_controls_or_exit, load_evidence_document_or_exit,
    load_table_or_exit, print_diagnostics, table_label, write_json_file_or_exit,
};
use grcmap_kernel::error::count_by_kind;
use grcmap_kernel::{AssociationLedger, MatchPolicy, RunSummary, execute_plan, plan_associations};
use serde_json::json;

const DIAGNOSTIC_SAMPLE_LIMIT: usize = 25;

pub struct Args {
    pub controls: String,
    pub evidence: String,
    pub table: Option<String>,
    pub best_effort: bool,
    pub write_evidence: Option<String>,
    pub json: bool,
}

pub fn run(args: Args) {
    let table = load_table_or_exit(args.table.as_deref());
    let controls = load_controls_or_exit(&args.controls);
    let mut export = load_evidence_document_or_exit(&args.evidence);

    let policy = if args.best_effort {
        MatchPolicy::BEST_EFFORT
    } else {
        table.match_policy()
    };
    let plan = plan_associations(&export.rows, &controls, &table, policy);

    let summary: Option<RunSummary> = args.write_evidence.as_deref().map(|out| {
        let mut ledger = AssociationLedger::from_exports(&export.rows, &controls);
        let summary = execute_plan(&plan, &mut ledger);
        ledger.apply_to(&mut export.rows);
        let rewritten = export.to_value().unwrap_or_else(|err| {
            eprintln!("error: failed to render evidence export: {err}");
            std::process::exit(2);
        });
        write_json_file_or_exit(out, &rewritten, "evidence export");
        tracing::info!(path = out, added = summary.links_added, "evidence export written");
        summary
    });

    if args.json {
        let payload = json!({
            "generatedAt": generated_at(),
            "tablePath": table_label(args.table.as_deref()),
            "controlsPath": args.controls,
            "evidencePath": args.evidence,
            "plan": plan,
            "batches": plan.batches(),
            "diagnosticCounts": count_by_kind(&plan.diagnostics),
            "writeEvidence": args.write_evidence,
            "run": summary,
        });
        emit_json_or_exit(&payload, "plan");
    } else {
        println!("grcmap plan");
        println!("  Table: {}", table_label(args.table.as_deref()));
        println!(
            "  Policy: {}",
            if plan.strict_match { "strict" } else { "best-effort" }
        );
        println!("  Evidence: {}", plan.stats.evidence_total);
        println!("  Classified: {}", plan.stats.classified);
        println!("  Planned associations: {}", plan.stats.planned);
        println!("  Already associated: {}", plan.stats.already_associated);
        if plan.stats.fallbacks > 0 {
            println!("  Fallback associations: {}", plan.stats.fallbacks);
        }
        for (family, count) in plan.family_counts() {
            println!("    {family}: {count}");
        }
        println!("  Plan digest: {}", plan.plan_digest);
        println!("  Diagnostics: {}", plan.diagnostics.len());
        print_diagnostics(&plan.diagnostics, DIAGNOSTIC_SAMPLE_LIMIT);
        if let (Some(out), Some(summary)) = (args.write_evidence.as_deref(), &summary) {
            println!("  Wrote: {out}");
            println!(
                "  Batches: {} succeeded, {} failed",
                summary.batches_succeeded, summary.batches_failed
            );
            println!("  Links added: {}", summary.links_added);
        }
    }

    if summary.as_ref().is_some_and(|summary| !summary.is_clean()) {
        std::process::exit(1);
    }
}

use crate::support::{emit_json_or_exit, table_label};
use grcmap_kernel::mapping::{
    FamilyMappingTable, reference_table, reference_table_source, validate_family_table,
};
use grcmap_kernel::{GrcMapError, ValidationReport};
use serde_json::json;

const TABLE_CHECK_KIND: &str = "grcmap.table_check.v1";

pub fn run(table: Option<String>, json_output: bool) {
    let (report, parsed) = match table.as_deref() {
        Some(path) => check_path(path),
        None => {
            let parsed = reference_table();
            (validate_family_table(parsed), Some(parsed.clone()))
        }
    };
    let label = table_label(table.as_deref());

    if json_output {
        let payload = json!({
            "schema": 1,
            "checkKind": TABLE_CHECK_KIND,
            "tablePath": label,
            "result": report.result,
            "failureClasses": report.failure_classes,
            "issues": report.issues,
            "families": parsed.as_ref().map(|t| t.families.len()),
            "span": parsed.as_ref().and_then(FamilyMappingTable::span),
            "gaps": parsed.as_ref().map(FamilyMappingTable::gaps),
            "embeddedBytes": table.is_none().then(|| reference_table_source().len()),
        });
        emit_json_or_exit(&payload, "table-check");
    } else {
        println!("grcmap table-check");
        println!("  Table: {label}");
        println!("  Result: {}", report.result);
        if let Some(parsed) = &parsed {
            println!("  Families: {}", parsed.families.len());
            if let Some((start, end)) = parsed.span() {
                println!(
                    "  Span: {}..{}",
                    parsed.evidence_label(start),
                    parsed.evidence_label(end)
                );
            }
            for (start, end) in parsed.gaps() {
                println!("  Gap: {start}..={end}");
            }
        }
        println!("  Failure classes: {}", report.failure_classes.len());
        for issue in &report.issues {
            println!("    - {} [{}]: {}", issue.path, issue.failure_class, issue.message);
        }
    }

    if !report.is_accepted() {
        std::process::exit(1);
    }
}

fn check_path(path: &str) -> (ValidationReport, Option<FamilyMappingTable>) {
    match FamilyMappingTable::load(path) {
        Ok(parsed) => (validate_family_table(&parsed), Some(parsed)),
        Err(GrcMapError::InvalidTable(report)) => (report, None),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

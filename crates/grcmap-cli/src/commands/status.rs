use crate::support::emit_json_or_exit;
use grcmap_kernel::derive_status;
use serde_json::json;

const STATUS_KIND: &str = "grcmap.status.v1";

pub fn run(implemented: i64, not_applicable: bool, json_output: bool) {
    let status = derive_status(implemented, !not_applicable).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    if json_output {
        let payload = json!({
            "schema": 1,
            "reportKind": STATUS_KIND,
            "implemented": implemented,
            "isApplicable": !not_applicable,
            "status": status,
            "label": status.label(),
        });
        emit_json_or_exit(&payload, "status");
        return;
    }

    println!("{}", status.label());
}

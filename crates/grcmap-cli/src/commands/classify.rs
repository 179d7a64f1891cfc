use crate::support::{emit_json_or_exit, load_table_or_exit, table_label};
use grcmap_kernel::classify::locate;
use grcmap_kernel::parse_evidence_token;
use serde_json::json;

const CLASSIFY_KIND: &str = "grcmap.classify.v1";

pub fn run(names: Vec<String>, table: Option<String>, json_output: bool) {
    let mapping = load_table_or_exit(table.as_deref());

    let rows: Vec<_> = names
        .iter()
        .map(|name| {
            let located = locate(name, &mapping);
            let token = parse_evidence_token(name);
            json!({
                "name": name,
                "token": token,
                "familyTag": located.as_ref().map(|(_, rule)| rule.family_tag.clone()),
                "patterns": located.as_ref().map(|(token, rule)| rule.patterns_for(token.number)),
            })
        })
        .collect();
    let unclassified = rows.iter().filter(|row| row["familyTag"].is_null()).count();

    if json_output {
        let payload = json!({
            "schema": 1,
            "reportKind": CLASSIFY_KIND,
            "tablePath": table_label(table.as_deref()),
            "results": rows,
            "unclassified": unclassified,
        });
        emit_json_or_exit(&payload, "classify");
        return;
    }

    println!("grcmap classify");
    for row in &rows {
        let family = row["familyTag"].as_str().unwrap_or("unclassified");
        println!("  {} -> {family}", row["name"].as_str().unwrap_or_default());
    }
    println!("  Unclassified: {unclassified}/{}", rows.len());
}

use chrono::{SecondsFormat, Utc};
use grcmap_kernel::model::{
    Export, load_controls_export, load_evidence_document, load_evidence_export,
};
use grcmap_kernel::{Control, Diagnostic, Evidence, FamilyMappingTable, reference_table};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EMBEDDED_TABLE_LABEL: &str = "<embedded soc2 reference>";

/// Load `--table`, or the embedded reference table when absent.
pub fn load_table_or_exit(table: Option<&str>) -> FamilyMappingTable {
    let Some(path) = table else {
        return reference_table().clone();
    };
    FamilyMappingTable::load(path).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    })
}

pub fn table_label(table: Option<&str>) -> &str {
    table.unwrap_or(EMBEDDED_TABLE_LABEL)
}

pub fn load_controls_or_exit(path: &str) -> Vec<Control> {
    load_controls_export(path).unwrap_or_else(|e| {
        eprintln!("error: controls export: {e}");
        std::process::exit(1);
    })
}

pub fn load_evidence_or_exit(path: &str) -> Vec<Evidence> {
    load_evidence_export(path).unwrap_or_else(|e| {
        eprintln!("error: evidence export: {e}");
        std::process::exit(1);
    })
}

/// Load an evidence export together with its envelope, for rewriting.
pub fn load_evidence_document_or_exit(path: &str) -> Export<Evidence> {
    load_evidence_document(path).unwrap_or_else(|e| {
        eprintln!("error: evidence export: {e}");
        std::process::exit(1);
    })
}

pub fn emit_json_or_exit<T: Serialize>(payload: &T, label: &str) {
    let rendered = serde_json::to_string_pretty(payload).unwrap_or_else(|err| {
        eprintln!("error: failed to render {label} payload: {err}");
        std::process::exit(2);
    });
    println!("{rendered}");
}

pub fn generated_at() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn print_diagnostics(diagnostics: &[Diagnostic], limit: usize) {
    for diagnostic in diagnostics.iter().take(limit) {
        println!(
            "    - [{}] {}: {}",
            diagnostic.kind, diagnostic.subject, diagnostic.message
        );
    }
    if diagnostics.len() > limit {
        println!("    ... {} more", diagnostics.len() - limit);
    }
}

/// Replace `path` with pretty JSON via a temp file and rename.
pub fn write_json_file_or_exit<T: Serialize>(path: &str, payload: &T, label: &str) {
    if let Err(e) = write_json_atomically(Path::new(path), payload) {
        eprintln!("error: failed to write {label} at {path}: {e}");
        std::process::exit(1);
    }
}

fn write_json_atomically<T: Serialize>(path: &Path, payload: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut rendered = serde_json::to_vec_pretty(payload).map_err(std::io::Error::other)?;
    rendered.push(b'\n');

    let tmp_path = tmp_write_path(path);
    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&rendered)?;
        file.sync_all()
    })();
    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }
    fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp_path);
    })
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export.json".to_string());
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

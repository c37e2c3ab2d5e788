//! Project maintenance pass: keep copyright years current.
//!
//! Runs on the current branch right before the dirty-tree check, so any
//! rewrite rides the same auto-commit as other local edits. Scans the
//! working copy for manifest/readme/license files and rewrites the last
//! year mentioned on each copyright line to the current year.

use std::fs;
use std::path::Path;

use chrono::{Datelike, Local};
use regex::Regex;
use tracing::warn;
use walkdir::WalkDir;

use crate::events::EventLog;

const CANDIDATE_NAMES: [&str; 3] = ["Cargo.toml", "README.md", "LICENSE"];

fn is_candidate(name: &str) -> bool {
    CANDIDATE_NAMES.contains(&name) || name.starts_with("LICENSE-")
}

/// Rewrite the last `20xx` year on each copyright line of `text` to
/// `year`. Returns the rewritten text, or `None` when nothing changed.
pub fn bump_copyright_year(text: &str, year: i32) -> Option<String> {
    let year_re = Regex::new(r"20\d{2}").expect("year pattern");
    let target = year.to_string();
    let mut changed = false;

    let mut lines: Vec<String> = Vec::with_capacity(text.lines().count());
    for line in text.lines() {
        if line.to_lowercase().contains("copyright") {
            if let Some(m) = year_re.find_iter(line).last() {
                if m.as_str() != target {
                    let mut rewritten = String::with_capacity(line.len());
                    rewritten.push_str(&line[..m.start()]);
                    rewritten.push_str(&target);
                    rewritten.push_str(&line[m.end()..]);
                    lines.push(rewritten);
                    changed = true;
                    continue;
                }
            }
        }
        lines.push(line.to_string());
    }

    if !changed {
        return None;
    }

    let mut out = lines.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}

/// Update copyright years across a working copy. Returns the number of
/// files rewritten. Unreadable files are skipped with a warning.
pub fn update_copyright_years(root: &Path, log: &EventLog) -> usize {
    let year = Local::now().year();
    let mut updated = 0;

    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        name != ".git" && name != "target"
    });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !is_candidate(&name) {
            continue;
        }

        let path = entry.path();
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        };

        if let Some(rewritten) = bump_copyright_year(&text, year) {
            match fs::write(path, rewritten) {
                Ok(()) => {
                    log.write(
                        "maintenance",
                        &format!("[{}] copyright year -> {year}", path.display()),
                    );
                    updated += 1;
                }
                Err(e) => warn!("failed to rewrite {}: {e}", path.display()),
            }
        }
    }

    updated
}

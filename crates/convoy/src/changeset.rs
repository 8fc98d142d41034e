//! Changeset records: pending-bump declarations per repository.
//!
//! A record is a Markdown file in the repository's `.changeset/` directory
//! with a `---`-delimited header mapping package names to bump kinds,
//! followed by free-form summary text:
//!
//! ```markdown
//! ---
//! "pkg-a": minor
//! "pkg-b": patch
//! ---
//!
//! Added the thing.
//! ```
//!
//! Parsing is deliberately lenient: header lines that do not look like
//! `<package>: <bump>` are skipped, and a record with no valid package line
//! is discarded without an error, so unrelated header keys never abort a run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use semver::Version;
use sha2::{Digest, Sha256};

use crate::types::BumpKind;

pub const CHANGESET_DIR: &str = ".changeset";

/// One parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetRecord {
    pub bumps: BTreeMap<String, BumpKind>,
    pub summary: String,
}

/// Aggregated view of a repository's pending bumps: when several records
/// target the same package, the highest bump wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesetAnalysis {
    pub has_changesets: bool,
    pub bumps: BTreeMap<String, BumpKind>,
}

impl ChangesetAnalysis {
    pub fn absorb(&mut self, record: &ChangesetRecord) {
        self.has_changesets = true;
        for (name, kind) in &record.bumps {
            self.bumps
                .entry(name.clone())
                .and_modify(|existing| *existing = (*existing).max(*kind))
                .or_insert(*kind);
        }
    }
}

/// Parse one record body. Returns `None` when the record carries no valid
/// package line.
pub fn parse_record(content: &str) -> Option<ChangesetRecord> {
    let mut lines = content.lines();

    // Skip leading blanks, then require the opening delimiter.
    let first = lines.by_ref().find(|l| !l.trim().is_empty())?;
    if first.trim() != "---" {
        return None;
    }

    let mut bumps = BTreeMap::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line.trim() == "---" {
            closed = true;
            break;
        }
        let Some((name, kind)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().trim_matches('"').trim_matches('\'');
        let Ok(kind) = kind.parse::<BumpKind>() else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        bumps.insert(name.to_string(), kind);
    }

    if !closed || bumps.is_empty() {
        return None;
    }

    let summary = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    Some(ChangesetRecord { bumps, summary })
}

/// Read and aggregate every record in a repository's changeset directory.
/// A missing directory means no changesets.
pub fn read_changesets(repo_dir: &Path) -> Result<ChangesetAnalysis> {
    let dir = repo_dir.join(CHANGESET_DIR);
    let mut analysis = ChangesetAnalysis::default();
    if !dir.exists() {
        return Ok(analysis);
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
        .with_context(|| format!("failed to read changeset directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("md")
                && p.file_name().and_then(|n| n.to_str()) != Some("README.md")
        })
        .collect();
    paths.sort();

    for path in paths {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read changeset {}", path.display()))?;
        if let Some(record) = parse_record(&content) {
            analysis.absorb(&record);
        }
    }

    Ok(analysis)
}

/// Write a synthesized record for a package whose dependencies were updated
/// after a publish wave. The file name is derived from the content so the
/// operation is deterministic and re-runs do not pile up duplicates.
pub fn synthesize_record(
    repo_dir: &Path,
    package: &str,
    bump: BumpKind,
    updated: &BTreeMap<String, Version>,
) -> Result<PathBuf> {
    let mut body = String::new();
    body.push_str("---\n");
    body.push_str(&format!("\"{package}\": {bump}\n"));
    body.push_str("---\n\nUpdate dependencies after publishing:\n\n");
    for (name, version) in updated {
        body.push_str(&format!("- `{name}@{version}`\n"));
    }

    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let safe_name: String = package
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();

    let dir = repo_dir.join(CHANGESET_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create changeset directory {}", dir.display()))?;
    let path = dir.join(format!("{safe_name}-{}.md", &digest[..8]));
    fs::write(&path, body)
        .with_context(|| format!("failed to write changeset {}", path.display()))?;
    Ok(path)
}

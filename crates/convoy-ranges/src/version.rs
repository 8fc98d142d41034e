use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{Prerelease, Version};
use serde::{Deserialize, Serialize};

/// The kind of version bump a changeset asks for.
///
/// Ordered so that `Patch < Minor < Major`; aggregation ("highest bump wins")
/// and escalation both rely on this ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BumpKind {
    Patch,
    Minor,
    Major,
}

impl fmt::Display for BumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BumpKind::Patch => "patch",
            BumpKind::Minor => "minor",
            BumpKind::Major => "major",
        };
        f.write_str(s)
    }
}

impl FromStr for BumpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "patch" => Ok(BumpKind::Patch),
            "minor" => Ok(BumpKind::Minor),
            "major" => Ok(BumpKind::Major),
            other => Err(format!("unknown bump kind: {other}")),
        }
    }
}

/// Apply a bump to a version: the chosen field is incremented, lower fields
/// are zeroed, prerelease and build metadata are dropped.
pub fn bump(v: &Version, kind: BumpKind) -> Version {
    match kind {
        BumpKind::Major => Version::new(v.major + 1, 0, 0),
        BumpKind::Minor => Version::new(v.major, v.minor + 1, 0),
        BumpKind::Patch => Version::new(v.major, v.minor, v.patch + 1),
    }
}

/// SemVer 2.0.0 precedence comparison. Build metadata is ignored; prerelease
/// identifiers compare field-wise with numeric < alphanumeric.
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp_precedence(b)
}

/// The highest field that differs between two versions, or `None` when the
/// release triples are equal (prerelease and build differences do not count).
pub fn detect_bump_type(old: &Version, new: &Version) -> Option<BumpKind> {
    if old.major != new.major {
        Some(BumpKind::Major)
    } else if old.minor != new.minor {
        Some(BumpKind::Minor)
    } else if old.patch != new.patch {
        Some(BumpKind::Patch)
    } else {
        None
    }
}

/// Whether applying `kind` to `old` is breaking for dependents.
///
/// While the major version is zero, every minor (and major) is breaking; from
/// 1.0.0 onward only majors are. This is the sole source of the "breaking"
/// classification used by the cascade planner.
pub fn is_breaking(old: &Version, kind: BumpKind) -> bool {
    if old.major == 0 {
        matches!(kind, BumpKind::Minor | BumpKind::Major)
    } else {
        kind == BumpKind::Major
    }
}

/// Parse a version, tolerating the partial forms that show up inside range
/// texts (`0.9`, `1`): missing minor/patch components are padded with zeros.
pub fn parse_lenient(s: &str) -> Option<Version> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }

    // Partial triple, optionally with a prerelease on the last component.
    let (numbers, pre) = match s.split_once('-') {
        Some((n, p)) => (n, Some(p)),
        None => (s, None),
    };
    let mut parts = [0u64; 3];
    let mut count = 0;
    for piece in numbers.split('.') {
        if count >= 3 {
            return None;
        }
        parts[count] = piece.parse().ok()?;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let mut v = Version::new(parts[0], parts[1], parts[2]);
    if let Some(pre) = pre {
        v.pre = Prerelease::new(pre).ok()?;
    }
    Some(v)
}

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::version::{compare, parse_lenient};

/// A parsed dependency range.
///
/// Only the grammar the planner reasons about is modelled; anything else is
/// kept as [`Range::Opaque`] and never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Range {
    /// `*` (or an empty constraint) — matches anything, pinned on update.
    Wildcard,
    /// `X.Y.Z` — exact match.
    Exact(Version),
    /// `^X.Y.Z` — compatible within major for >=1.0, within minor for 0.x,
    /// within patch for 0.0.x.
    Caret(Version),
    /// `~X.Y.Z` — compatible within minor.
    Tilde(Version),
    /// `>=X.Y.Z`.
    AtLeast(Version),
    /// Anything we do not resolve; carried verbatim.
    Opaque(String),
}

impl Range {
    pub fn parse(text: &str) -> Range {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Range::Wildcard;
        }
        if let Some(rest) = trimmed.strip_prefix(">=") {
            return match parse_lenient(rest) {
                Some(v) => Range::AtLeast(v),
                None => Range::Opaque(text.to_string()),
            };
        }
        if let Some(rest) = trimmed.strip_prefix('^') {
            return match parse_lenient(rest) {
                Some(v) => Range::Caret(v),
                None => Range::Opaque(text.to_string()),
            };
        }
        if let Some(rest) = trimmed.strip_prefix('~') {
            return match parse_lenient(rest) {
                Some(v) => Range::Tilde(v),
                None => Range::Opaque(text.to_string()),
            };
        }
        match parse_lenient(trimmed) {
            Some(v) => Range::Exact(v),
            None => Range::Opaque(text.to_string()),
        }
    }

    /// The bare version embedded in the range, if the grammar has one.
    pub fn bare_version(&self) -> Option<&Version> {
        match self {
            Range::Exact(v) | Range::Caret(v) | Range::Tilde(v) | Range::AtLeast(v) => Some(v),
            Range::Wildcard | Range::Opaque(_) => None,
        }
    }

    /// Whether `v` satisfies this range. Opaque ranges satisfy nothing — the
    /// caller treats them as constraints it must not touch.
    pub fn satisfies(&self, v: &Version) -> bool {
        match self {
            Range::Wildcard => true,
            Range::Exact(base) => compare(v, base) == Ordering::Equal,
            Range::Caret(base) => {
                if compare(v, base) == Ordering::Less {
                    return false;
                }
                if base.major > 0 {
                    v.major == base.major
                } else if base.minor > 0 {
                    v.major == 0 && v.minor == base.minor
                } else {
                    v.major == 0 && v.minor == 0 && v.patch == base.patch
                }
            }
            Range::Tilde(base) => {
                compare(v, base) != Ordering::Less
                    && v.major == base.major
                    && v.minor == base.minor
            }
            Range::AtLeast(base) => compare(v, base) != Ordering::Less,
            Range::Opaque(_) => false,
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Range::Wildcard => f.write_str("*"),
            Range::Exact(v) => write!(f, "{v}"),
            Range::Caret(v) => write!(f, "^{v}"),
            Range::Tilde(v) => write!(f, "~{v}"),
            Range::AtLeast(v) => write!(f, ">={v}"),
            Range::Opaque(s) => f.write_str(s),
        }
    }
}

/// The prefix applied when a dependency range is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeStrategy {
    /// Pin to the exact version, no prefix.
    Exact,
    #[default]
    Caret,
    Tilde,
}

impl RangeStrategy {
    pub fn prefix(self) -> &'static str {
        match self {
            RangeStrategy::Exact => "",
            RangeStrategy::Caret => "^",
            RangeStrategy::Tilde => "~",
        }
    }
}

impl fmt::Display for RangeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RangeStrategy::Exact => "exact",
            RangeStrategy::Caret => "caret",
            RangeStrategy::Tilde => "tilde",
        };
        f.write_str(s)
    }
}

impl FromStr for RangeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "exact" => Ok(RangeStrategy::Exact),
            "caret" => Ok(RangeStrategy::Caret),
            "tilde" => Ok(RangeStrategy::Tilde),
            other => Err(format!("unknown range strategy: {other}")),
        }
    }
}

/// Whether a declared range must be rewritten for a newly published version.
///
/// Wildcards always update (they get pinned). Prefixed and `>=` ranges update
/// when the bare version differs from the new one. Exact ranges compare
/// directly. Opaque ranges are never updated.
pub fn needs_update(range_text: &str, new_version: &Version) -> bool {
    match Range::parse(range_text) {
        Range::Wildcard => true,
        Range::Opaque(_) => false,
        range => match range.bare_version() {
            Some(bare) => compare(bare, new_version) != Ordering::Equal,
            None => false,
        },
    }
}

/// The prefix a rewritten range carries.
///
/// Wildcards take the configured wildcard strategy; existing `^`/`~`/`>=`
/// prefixes are preserved; a bare exact range takes the update strategy.
pub fn update_prefix(
    current: &str,
    strategy: RangeStrategy,
    wildcard_strategy: RangeStrategy,
) -> &'static str {
    match Range::parse(current) {
        Range::Wildcard => wildcard_strategy.prefix(),
        Range::Caret(_) => "^",
        Range::Tilde(_) => "~",
        Range::AtLeast(_) => ">=",
        Range::Exact(_) | Range::Opaque(_) => strategy.prefix(),
    }
}

/// The replacement range text for a dependency update.
pub fn rewritten_range(
    current: &str,
    new_version: &Version,
    strategy: RangeStrategy,
    wildcard_strategy: RangeStrategy,
) -> String {
    format!(
        "{}{}",
        update_prefix(current, strategy, wildcard_strategy),
        new_version
    )
}

//! Semver bump classification and the dependency-range grammar used by convoy.
//!
//! This crate is deliberately small and dependency-light. It answers four
//! questions the release planner asks constantly:
//!
//! - What does a `major`/`minor`/`patch` bump do to a version?
//! - Is a given bump *breaking* for dependents? (The 0.x convention: while the
//!   major is zero, every minor is breaking.)
//! - Does a declared dependency range still cover a newly published version?
//! - When a range must be rewritten, which prefix does the new range carry?
//!
//! Range texts follow the package-manifest grammar: wildcard `*`, exact
//! `1.2.3`, caret `^1.2.3`, tilde `~1.2.3`, and `>=1.2.3`. Anything else is
//! carried opaquely and never rewritten.
//!
//! # Example
//!
//! ```
//! use convoy_ranges::{BumpKind, Range, bump, is_breaking};
//! use semver::Version;
//!
//! let old = Version::new(0, 1, 0);
//! let new = bump(&old, BumpKind::Minor);
//! assert_eq!(new, Version::new(0, 2, 0));
//! assert!(is_breaking(&old, BumpKind::Minor));
//! assert!(!Range::parse("^0.1.0").satisfies(&new));
//! ```

mod range;
mod version;

pub use range::{Range, RangeStrategy, needs_update, rewritten_range, update_prefix};
pub use version::{BumpKind, bump, compare, detect_bump_type, is_breaking, parse_lenient};

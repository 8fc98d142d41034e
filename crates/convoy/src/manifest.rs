//! Repository manifest handling.
//!
//! Each sibling repository carries a `package.json`-shaped manifest with at
//! least `name` and `version`, an optional `private` marker, and up to three
//! dependency tables. Rewrites preserve key order exactly and emit tab
//! indentation with a trailing newline, so a manifest we did not change
//! re-renders byte-identically.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use semver::Version;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use crate::types::{DependencySpec, DependencyType, Package};

pub const MANIFEST_FILE: &str = "package.json";

/// The dependency tables in the order sibling lookups prefer them: a name
/// declared in several tables counts once, production first.
pub const TABLE_ORDER: [DependencyType; 3] = [
    DependencyType::Production,
    DependencyType::Peer,
    DependencyType::Development,
];

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    root: Map<String, Value>,
}

impl Manifest {
    /// Load the manifest from a repository directory.
    pub fn load(repo_dir: &Path) -> Result<Self> {
        let path = repo_dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(path, &content)
    }

    pub fn parse(path: PathBuf, content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        let Value::Object(root) = value else {
            bail!("manifest {} is not a JSON object", path.display());
        };
        Ok(Self { path, root })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> Result<&str> {
        self.root
            .get("name")
            .and_then(Value::as_str)
            .with_context(|| format!("manifest {} has no string `name`", self.path.display()))
    }

    pub fn version(&self) -> Result<Version> {
        let raw = self
            .root
            .get("version")
            .and_then(Value::as_str)
            .with_context(|| format!("manifest {} has no string `version`", self.path.display()))?;
        Version::parse(raw).with_context(|| {
            format!(
                "manifest {} has invalid version {raw}",
                self.path.display()
            )
        })
    }

    pub fn is_private(&self) -> bool {
        self.root
            .get("private")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// A copy of one dependency table, name -> range text. Missing tables
    /// read as empty.
    pub fn dependency_table(&self, kind: DependencyType) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Some(Value::Object(table)) = self.root.get(kind.manifest_table()) {
            for (name, range) in table {
                if let Some(range) = range.as_str() {
                    out.insert(name.clone(), range.to_string());
                }
            }
        }
        out
    }

    pub fn set_version(&mut self, version: &Version) {
        self.root
            .insert("version".to_string(), Value::String(version.to_string()));
    }

    /// Replace one range in one table. Returns whether anything changed;
    /// absent names and absent tables are left untouched.
    pub fn set_dependency_range(
        &mut self,
        kind: DependencyType,
        name: &str,
        range: &str,
    ) -> bool {
        let Some(Value::Object(table)) = self.root.get_mut(kind.manifest_table()) else {
            return false;
        };
        match table.get_mut(name) {
            Some(existing) if existing.as_str() == Some(range) => false,
            Some(existing) => {
                *existing = Value::String(range.to_string());
                true
            }
            None => false,
        }
    }

    /// Collapse the manifest into the planner's package descriptor.
    pub fn to_package(&self, repo_dir: &Path) -> Result<Package> {
        let mut dependencies: BTreeMap<String, DependencySpec> = BTreeMap::new();
        for kind in TABLE_ORDER {
            for (name, range) in self.dependency_table(kind) {
                dependencies
                    .entry(name)
                    .or_insert(DependencySpec { range, kind });
            }
        }

        Ok(Package {
            name: self.name()?.to_string(),
            version: self.version()?,
            publishable: !self.is_private(),
            dependencies,
            repo_dir: repo_dir.to_path_buf(),
        })
    }

    /// Render with tab indentation and a trailing newline, keys in their
    /// original order.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"\t");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        Value::Object(self.root.clone())
            .serialize(&mut ser)
            .context("failed to serialize manifest")?;
        let mut out = String::from_utf8(buf).context("manifest is not valid UTF-8")?;
        out.push('\n');
        Ok(out)
    }

    pub fn write(&self) -> Result<()> {
        let content = self.render()?;
        fs::write(&self.path, content)
            .with_context(|| format!("failed to write manifest {}", self.path.display()))
    }
}

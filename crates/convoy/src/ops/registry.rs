//! The npm-compatible registry capability.
//!
//! Reads (availability, reachability) go straight to the registry's HTTP API;
//! mutations and authenticated calls (publish, install, whoami, cache clean)
//! go through the package manager binary, which owns credentials. The binary
//! defaults to `npm` and can be redirected with `CONVOY_NPM_BIN`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use semver::Version;
use serde::Deserialize;

use super::{RegistryOps, run_command_with_timeout};

#[derive(Debug, Clone)]
pub struct NpmRegistry {
    registry_url: String,
    program: String,
    http: Client,
}

impl NpmRegistry {
    pub fn new(registry_url: &str) -> Result<Self> {
        let program = std::env::var("CONVOY_NPM_BIN").unwrap_or_else(|_| "npm".to_string());
        Self::with_program(registry_url, program)
    }

    /// Use an explicit package-manager binary instead of the environment
    /// lookup.
    pub fn with_program(registry_url: &str, program: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("convoy/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            registry_url: registry_url.trim_end_matches('/').to_string(),
            program: program.into(),
            http,
        })
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Packument URL; the slash in scoped names must be escaped.
    fn packument_url(&self, name: &str) -> String {
        format!("{}/{}", self.registry_url, name.replace('/', "%2f"))
    }

    fn registry_arg(&self) -> [String; 2] {
        ["--registry".to_string(), self.registry_url.clone()]
    }
}

#[derive(Debug, Deserialize)]
struct Packument {
    #[serde(default)]
    versions: BTreeMap<String, serde_json::Value>,
}

impl RegistryOps for NpmRegistry {
    fn publish(&self, package_dir: &Path, timeout: Duration) -> Result<()> {
        let reg = self.registry_arg();
        let args: Vec<&str> = vec!["publish", reg[0].as_str(), reg[1].as_str()];
        let out = run_command_with_timeout(&self.program, &args, package_dir, Some(timeout))?;
        if out.exit_code != 0 {
            bail!(
                "publish failed in {} (exit={}): {}",
                package_dir.display(),
                out.exit_code,
                out.stderr.trim()
            );
        }
        Ok(())
    }

    fn is_available(&self, name: &str, version: &Version) -> Result<bool> {
        let url = self.packument_url(name);
        let resp = self
            .http
            .get(url)
            .send()
            .context("registry request failed")?;
        match resp.status() {
            StatusCode::OK => {
                // A stale packument that does not list the version yet reads
                // as "not yet available", same as ETARGET from the client.
                let packument: Packument = match resp.json() {
                    Ok(p) => p,
                    Err(_) => return Ok(false),
                };
                Ok(packument.versions.contains_key(&version.to_string()))
            }
            StatusCode::NOT_FOUND => Ok(false),
            s => bail!("unexpected status while checking availability: {s}"),
        }
    }

    fn check_auth(&self) -> Result<Option<String>> {
        let reg = self.registry_arg();
        let args: Vec<&str> = vec!["whoami", reg[0].as_str(), reg[1].as_str()];
        let out = run_command_with_timeout(&self.program, &args, Path::new("."), None)?;
        if out.exit_code != 0 {
            bail!("registry authentication check failed: {}", out.stderr.trim());
        }
        let identity = out.stdout.trim().to_string();
        Ok(if identity.is_empty() {
            None
        } else {
            Some(identity)
        })
    }

    fn check_reachable(&self) -> Result<()> {
        let url = format!("{}/-/ping", self.registry_url);
        let resp = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("registry {} is unreachable", self.registry_url))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            bail!(
                "registry {} answered ping with {}",
                self.registry_url,
                resp.status()
            )
        }
    }

    fn install(&self, repo_dir: &Path, timeout: Duration) -> Result<()> {
        let reg = self.registry_arg();
        let args: Vec<&str> = vec!["install", reg[0].as_str(), reg[1].as_str()];
        let out = run_command_with_timeout(&self.program, &args, repo_dir, Some(timeout))?;
        if out.exit_code != 0 {
            // stderr is part of the message so callers can classify ETARGET.
            bail!(
                "install failed in {} (exit={}): {}",
                repo_dir.display(),
                out.exit_code,
                out.stderr.trim()
            );
        }
        Ok(())
    }

    fn cache_clean(&self) -> Result<()> {
        let args: Vec<&str> = vec!["cache", "clean", "--force"];
        let out = run_command_with_timeout(&self.program, &args, Path::new("."), None)?;
        if out.exit_code != 0 {
            bail!("cache clean failed: {}", out.stderr.trim());
        }
        Ok(())
    }
}

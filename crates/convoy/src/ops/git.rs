//! Subprocess-backed git operations.
//!
//! The program defaults to `git` on the `PATH` and can be redirected with
//! `CONVOY_GIT_BIN`, which is how tests substitute a fake.

use std::path::Path;

use anyhow::{Result, bail};

use super::{CommandOutput, GitOps, run_command_with_timeout};

#[derive(Debug, Clone)]
pub struct SystemGit {
    program: String,
}

impl SystemGit {
    pub fn new() -> Self {
        Self {
            program: std::env::var("CONVOY_GIT_BIN").unwrap_or_else(|_| "git".to_string()),
        }
    }

    /// Use an explicit program instead of the environment lookup.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, repo: &Path, args: &[&str]) -> Result<CommandOutput> {
        run_command_with_timeout(&self.program, args, repo, None)
    }

    fn run_ok(&self, repo: &Path, args: &[&str]) -> Result<CommandOutput> {
        let out = self.run(repo, args)?;
        if out.exit_code != 0 {
            bail!(
                "git {} failed in {} (exit={}): {}",
                args.join(" "),
                repo.display(),
                out.exit_code,
                out.stderr.trim()
            );
        }
        Ok(out)
    }
}

impl Default for SystemGit {
    fn default() -> Self {
        Self::new()
    }
}

impl GitOps for SystemGit {
    fn current_branch(&self, repo: &Path) -> Result<String> {
        let out = self.run_ok(repo, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = out.stdout.trim().to_string();
        if branch == "HEAD" {
            bail!("repository {} is in detached HEAD state", repo.display());
        }
        Ok(branch)
    }

    fn head_commit(&self, repo: &Path) -> Result<String> {
        let out = self.run_ok(repo, &["rev-parse", "HEAD"])?;
        Ok(out.stdout.trim().to_string())
    }

    fn is_clean(&self, repo: &Path) -> Result<bool> {
        let out = self.run_ok(repo, &["status", "--porcelain"])?;
        Ok(out.stdout.trim().is_empty())
    }

    fn changed_files(&self, repo: &Path) -> Result<Vec<String>> {
        let out = self.run_ok(repo, &["status", "--porcelain"])?;
        Ok(out
            .stdout
            .lines()
            .filter_map(|line| line.get(3..).map(str::to_string))
            .collect())
    }

    fn checkout(&self, repo: &Path, branch: &str) -> Result<()> {
        self.run_ok(repo, &["checkout", branch])?;
        Ok(())
    }

    fn add(&self, repo: &Path, paths: &[&Path]) -> Result<()> {
        let mut args = vec!["add", "--"];
        let rendered: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        args.extend(rendered.iter().map(String::as_str));
        self.run_ok(repo, &args)?;
        Ok(())
    }

    fn commit(&self, repo: &Path, message: &str) -> Result<()> {
        self.run_ok(repo, &["commit", "-m", message])?;
        Ok(())
    }

    fn tag(&self, repo: &Path, tag: &str) -> Result<()> {
        self.run_ok(repo, &["tag", tag])?;
        Ok(())
    }

    fn push_tag(&self, repo: &Path, tag: &str) -> Result<()> {
        self.run_ok(repo, &["push", "origin", tag])?;
        Ok(())
    }

    fn remote_reachable(&self, repo: &Path) -> Result<bool> {
        let out = self.run(repo, &["ls-remote", "--heads", "origin"])?;
        Ok(out.exit_code == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::*;

    /// A fake git that answers from environment-free canned behaviour keyed
    /// by first argument.
    #[cfg(unix)]
    fn write_fake_git(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("git");
        fs::write(
            &path,
            concat!(
                "#!/usr/bin/env sh\n",
                "case \"$1\" in\n",
                "  rev-parse)\n",
                "    if [ \"$2\" = \"--abbrev-ref\" ]; then echo main; else echo abc123; fi\n",
                "    ;;\n",
                "  status)\n",
                "    if [ -f .fake-dirty ]; then echo ' M package.json'; fi\n",
                "    ;;\n",
                "  add|commit|tag|checkout)\n",
                "    echo \"$@\" >> .fake-git-log\n",
                "    ;;\n",
                "  push)\n",
                "    echo \"$@\" >> .fake-git-log\n",
                "    ;;\n",
                "  ls-remote)\n",
                "    exit 0\n",
                "    ;;\n",
                "  *)\n",
                "    echo \"unexpected: $@\" >&2\n",
                "    exit 1\n",
                "    ;;\n",
                "esac\n",
            ),
        )
        .expect("write fake git");
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[cfg(unix)]
    #[test]
    fn system_git_parses_branch_commit_and_cleanliness() {
        let td = tempdir().expect("tempdir");
        let fake = write_fake_git(td.path());
        let git = SystemGit::with_program(fake.to_string_lossy());

        assert_eq!(git.current_branch(td.path()).expect("branch"), "main");
        assert_eq!(git.head_commit(td.path()).expect("commit"), "abc123");
        assert!(git.is_clean(td.path()).expect("clean"));

        fs::write(td.path().join(".fake-dirty"), "").expect("mark dirty");
        assert!(!git.is_clean(td.path()).expect("dirty"));
        assert_eq!(
            git.changed_files(td.path()).expect("changed"),
            vec!["package.json".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn mutations_are_forwarded_to_git() {
        let td = tempdir().expect("tempdir");
        let fake = write_fake_git(td.path());
        let git = SystemGit::with_program(fake.to_string_lossy());

        git.add(td.path(), &[Path::new("package.json")]).expect("add");
        git.commit(td.path(), "update dependencies after publishing")
            .expect("commit");
        git.tag(td.path(), "v1.2.3").expect("tag");
        git.push_tag(td.path(), "v1.2.3").expect("push");

        let log = fs::read_to_string(td.path().join(".fake-git-log")).expect("log");
        assert!(log.contains("add -- package.json"));
        assert!(log.contains("commit -m update dependencies after publishing"));
        assert!(log.contains("tag v1.2.3"));
        assert!(log.contains("push origin v1.2.3"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_git_surfaces_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let td = tempdir().expect("tempdir");
        let path = td.path().join("git");
        fs::write(&path, "#!/usr/bin/env sh\necho 'fatal: broken' >&2\nexit 1\n")
            .expect("write fake git");
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");

        let git = SystemGit::with_program(path.to_string_lossy());
        let err = git.head_commit(td.path()).expect_err("must fail");
        assert!(format!("{err:#}").contains("fatal: broken"));
    }
}

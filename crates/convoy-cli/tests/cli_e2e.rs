use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn write_repo(repos_dir: &Path, name: &str, manifest: &str, changeset: Option<&str>) {
    let dir = repos_dir.join(name);
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("package.json"), manifest).expect("manifest");
    if let Some(record) = changeset {
        let cs = dir.join(".changeset");
        fs::create_dir_all(&cs).expect("mkdir changeset");
        fs::write(cs.join("pending.md"), record).expect("changeset");
    }
}

/// lib (minor changeset) <- app, both 0.1.0, config in a sibling project
/// directory.
fn fixture() -> (tempfile::TempDir, std::path::PathBuf) {
    let td = tempdir().expect("tempdir");
    let project = td.path().join("gitops");
    fs::create_dir_all(&project).expect("mkdir project");
    fs::write(
        project.join("convoy.toml"),
        r#"
repos_dir = ".."

[[repos]]
url = "https://github.com/acme/lib"

[[repos]]
url = "https://github.com/acme/app"
"#,
    )
    .expect("config");

    write_repo(
        td.path(),
        "lib",
        "{\n\t\"name\": \"lib\",\n\t\"version\": \"0.1.0\"\n}\n",
        Some("---\n\"lib\": minor\n---\nfeat"),
    );
    write_repo(
        td.path(),
        "app",
        "{\n\t\"name\": \"app\",\n\t\"version\": \"0.1.0\",\n\t\"dependencies\": {\n\t\t\"lib\": \"^0.1.0\"\n\t}\n}\n",
        None,
    );

    let config = project.join("convoy.toml");
    (td, config)
}

#[test]
fn help_lists_the_three_commands() {
    Command::cargo_bin("convoy")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("publish"));
}

#[test]
fn plan_prints_the_wave_in_text_form() {
    let (_td, config) = fixture();

    Command::cargo_bin("convoy")
        .expect("binary")
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("Publishing order:"))
        .stdout(predicate::str::contains("1. lib"))
        .stdout(predicate::str::contains("2. app"))
        .stdout(predicate::str::contains("lib: 0.1.0 -> 0.2.0"))
        .stdout(predicate::str::contains("Breaking cascades:"))
        .stdout(predicate::str::contains("lib -> app"));
}

#[test]
fn plan_emits_machine_readable_json() {
    let (_td, config) = fixture();

    let assert = Command::cargo_bin("convoy")
        .expect("binary")
        .arg("--config")
        .arg(&config)
        .arg("--format")
        .arg("json")
        .arg("plan")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let plan: serde_json::Value = serde_json::from_str(&stdout).expect("json");
    assert_eq!(
        plan["publishing_order"],
        serde_json::json!(["lib", "app"])
    );
    assert_eq!(plan["version_changes"]["lib"]["to"], "0.2.0");
    assert_eq!(plan["version_changes"]["app"]["origin"], "auto");
}

#[test]
fn analyze_reports_the_graph() {
    let (_td, config) = fixture();

    Command::cargo_bin("convoy")
        .expect("binary")
        .arg("--config")
        .arg(&config)
        .arg("analyze")
        .assert()
        .success()
        .stdout(predicate::str::contains("Packages:"))
        .stdout(predicate::str::contains("lib 0.1.0"))
        .stdout(predicate::str::contains("Publishing order:"));
}

#[test]
fn production_cycles_fail_the_plan_with_nonzero_exit() {
    let td = tempdir().expect("tempdir");
    let project = td.path().join("gitops");
    fs::create_dir_all(&project).expect("mkdir project");
    fs::write(
        project.join("convoy.toml"),
        r#"
repos_dir = ".."

[[repos]]
url = "https://github.com/acme/pkg_a"

[[repos]]
url = "https://github.com/acme/pkg_b"
"#,
    )
    .expect("config");

    write_repo(
        td.path(),
        "pkg_a",
        "{\n\t\"name\": \"pkg_a\",\n\t\"version\": \"0.1.0\",\n\t\"peerDependencies\": {\n\t\t\"pkg_b\": \"^0.1.0\"\n\t}\n}\n",
        None,
    );
    write_repo(
        td.path(),
        "pkg_b",
        "{\n\t\"name\": \"pkg_b\",\n\t\"version\": \"0.1.0\",\n\t\"dependencies\": {\n\t\t\"pkg_a\": \"^0.1.0\"\n\t}\n}\n",
        None,
    );

    Command::cargo_bin("convoy")
        .expect("binary")
        .arg("--config")
        .arg(project.join("convoy.toml"))
        .arg("plan")
        .assert()
        .failure()
        .stdout(predicate::str::contains("error[graph_cycle]"))
        .stdout(predicate::str::contains("error[sort]"));
}

#[test]
fn missing_config_is_a_clean_error() {
    Command::cargo_bin("convoy")
        .expect("binary")
        .arg("--config")
        .arg("/definitely/not/here/convoy.toml")
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

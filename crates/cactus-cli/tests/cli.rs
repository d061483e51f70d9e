use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process;
use tempfile::{tempdir, TempDir};

fn git_available() -> bool {
    process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[allow(deprecated)]
fn cactus(dir: &Path, home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cactus").expect("binary");
    cmd.current_dir(dir)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("OPENAI_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .arg("--no-color");
    cmd
}

/// Repository with one commit and three staged hunks across two files
fn staged_repo() -> TempDir {
    let temp = tempdir().unwrap();
    let root = temp.path();
    git(root, &["init", "-q"]);
    git(root, &["config", "user.name", "Test"]);
    git(root, &["config", "user.email", "test@example.com"]);
    git(root, &["config", "commit.gpgsign", "false"]);

    let lines: Vec<String> = (1..=40).map(|i| format!("line {}", i)).collect();
    fs::write(root.join("notes.txt"), lines.join("\n") + "\n").unwrap();
    git(root, &["add", "notes.txt"]);
    git(root, &["commit", "-q", "-m", "Initial"]);

    let mut changed = lines.clone();
    changed[2] = "line three, reworded".to_string();
    changed[34] = "line thirty-five, reworded".to_string();
    fs::write(root.join("notes.txt"), changed.join("\n") + "\n").unwrap();
    fs::write(root.join("todo.md"), "- write tests\n").unwrap();
    git(root, &["add", "-A"]);
    temp
}

#[test]
fn help_lists_commands() {
    let home = tempdir().unwrap();
    cactus(home.path(), home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("doctor"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn zero_commits_is_rejected() {
    let home = tempdir().unwrap();
    cactus(home.path(), home.path())
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1"));
}

#[test]
fn outside_repository_fails() {
    if !git_available() {
        return;
    }
    let dir = tempdir().unwrap();
    cactus(dir.path(), dir.path())
        .args(["--local", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("git repository"));
}

#[test]
fn nothing_staged_fails() {
    if !git_available() {
        return;
    }
    let repo = staged_repo();
    git(repo.path(), &["commit", "-q", "-m", "Everything"]);

    cactus(repo.path(), repo.path())
        .args(["--local", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No staged changes"));
}

#[test]
fn remote_without_key_fails_before_touching_repository() {
    if !git_available() {
        return;
    }
    let repo = staged_repo();
    let before = git(repo.path(), &["diff", "--cached"]);

    cactus(repo.path(), repo.path())
        .args(["--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENAI_API_KEY"));

    assert_eq!(git(repo.path(), &["diff", "--cached"]), before);
    assert_eq!(git(repo.path(), &["rev-list", "--count", "HEAD"]), "1");
}

#[test]
fn review_requires_terminal() {
    if !git_available() {
        return;
    }
    let repo = staged_repo();
    cactus(repo.path(), repo.path())
        .arg("--local")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn local_run_commits_every_hunk() {
    if !git_available() {
        return;
    }
    let repo = staged_repo();

    cactus(repo.path(), repo.path())
        .args(["2", "--local", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 commits created"));

    assert_eq!(git(repo.path(), &["rev-list", "--count", "HEAD"]), "3");
    assert_eq!(git(repo.path(), &["diff", "--cached"]), "");
    assert_eq!(git(repo.path(), &["status", "--porcelain"]), "");
    assert!(!repo.path().join(".git/cactus.lock").exists());
}

#[test]
fn config_show_json_prints_defaults() {
    if !git_available() {
        return;
    }
    let repo = staged_repo();
    cactus(repo.path(), repo.path())
        .args(["config", "show", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"backend\": \"remote\""));
}

#[test]
fn config_reset_writes_project_file() {
    if !git_available() {
        return;
    }
    let repo = staged_repo();
    cactus(repo.path(), repo.path())
        .args(["config", "reset", "--force"])
        .assert()
        .success();
    assert!(repo.path().join(".cactus/config.toml").exists());

    cactus(repo.path(), repo.path())
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn explicit_config_is_used() {
    if !git_available() {
        return;
    }
    let repo = staged_repo();
    let config = repo.path().join("custom.toml");
    fs::write(&config, "[cluster]\nbackend = \"local\"\n").unwrap();

    cactus(repo.path(), repo.path())
        .args(["--config", config.to_str().unwrap(), "--yes"])
        .assert()
        .success();
    assert_eq!(git(repo.path(), &["diff", "--cached"]), "");
}

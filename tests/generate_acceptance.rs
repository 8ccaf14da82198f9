//! Acceptance tests for fixture generation
//!
//! Each test writes a manifest and a handful of bash scripts into a temporary
//! project and drives the `fixturegen` binary against it.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Helper to set up a test project
struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    fn new(manifest: &str) -> Self {
        let project = Self {
            temp_dir: TempDir::new().unwrap(),
        };
        project.create_file("fixturegen.toml", manifest);
        project
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn fixturegen(&self) -> Command {
        let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_fixturegen"));
        cmd.current_dir(self.path())
            .env_remove("FIXTUREGEN_CONFIG")
            .env_remove("FIXTUREGEN_JOBS")
            .env("FIXTUREGEN_LOG_FORMAT", "compact");
        cmd
    }

    fn script(&self, name: &str, body: &str) {
        self.create_file(&format!("scripts/{}", name), body);
    }

    fn create_file(&self, path: &str, content: &str) {
        let file_path = self.path().join(path);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }

        fs::write(file_path, content).unwrap();
    }

    fn exists(&self, path: &str) -> bool {
        self.path().join(path).exists()
    }

    fn read_file(&self, path: &str) -> String {
        fs::read_to_string(self.path().join(path)).unwrap()
    }

    fn read_bytes(&self, path: &str) -> Vec<u8> {
        fs::read(self.path().join(path)).unwrap()
    }
}

const SVN_LIKE: &str = r#"
resources = ["scripts"]

[defaults]
output_dir = "dumps"
work_dir = "build/svn"
dependencies = ["bash/setup.sh"]

[[workspace]]
path = "build/svn"
bootstrap = "clean"

[[scenario]]
name = "empty"

[[scenario]]
name = "first_commit"
after = ["empty"]

[[scenario]]
name = "many_branches"
after = ["first_commit"]

[[post_process]]
name = "many_branches_renamed"
input = "many_branches.dump"
output = "many_branches_renamed.dump"

[[post_process.edit]]
kind = "substitute"
pattern = "/branch2"
replacement = "/newbranchname"
occurrence = "first-per-line"

[[post_process.edit]]
kind = "edit-line"
line = 3
old = "45"
new = "51"
"#;

fn svn_like() -> TestProject {
    let project = TestProject::new(SVN_LIKE);
    project.script("bash/setup.sh", "set -e\nREPO=repo\n");
    project.script(
        "bash/empty.sh",
        "source \"$(dirname \"$0\")/setup.sh\"\nmkdir -p \"$REPO\"\necho 0 > \"$REPO/rev\"\necho \"SVN-fs-dump-format-version: 2\"\n",
    );
    project.script(
        "bash/first_commit.sh",
        "source \"$(dirname \"$0\")/setup.sh\"\necho 1 > \"$REPO/rev\"\necho \"Revision-number: $(cat \"$REPO/rev\")\"\n",
    );
    project.script(
        "bash/many_branches.sh",
        "source \"$(dirname \"$0\")/setup.sh\"\necho \"Node-path: /branch2/README /branch2\"\necho \"Revision-number: $(cat \"$REPO/rev\")\"\necho \"rev 45 committed\"\n",
    );
    project
}

#[test]
fn test_make_a_produces_exact_output() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "make_a"
output = "a.dump"
"#,
    );
    project.script("bash/make_a.sh", "echo A\n");

    project.fixturegen().arg("all").assert().success();

    assert_eq!(project.read_bytes("a.dump"), b"A\n");
}

#[test]
fn test_all_generates_chain_and_post_processes() {
    let project = svn_like();

    project
        .fixturegen()
        .arg("all")
        .assert()
        .success()
        .stderr(predicate::str::contains("5 succeeded"));

    assert_eq!(
        project.read_file("dumps/empty.dump"),
        "SVN-fs-dump-format-version: 2\n"
    );
    // first_commit sees the state empty left behind
    assert_eq!(project.read_file("dumps/first_commit.dump"), "Revision-number: 1\n");
    assert_eq!(
        project.read_file("dumps/many_branches_renamed.dump"),
        "Node-path: /newbranchname/README /branch2\nRevision-number: 1\nrev 51 committed\n"
    );
    // Scripts and their dependencies were materialized into the cache
    assert!(project.exists(".fixturegen/cache/bash/setup.sh"));
}

#[test]
fn test_all_is_deterministic() {
    let project = svn_like();

    project.fixturegen().arg("all").assert().success();
    let first: Vec<Vec<u8>> = ["empty", "first_commit", "many_branches", "many_branches_renamed"]
        .iter()
        .map(|name| project.read_bytes(&format!("dumps/{}.dump", name)))
        .collect();

    project.fixturegen().args(["all", "--jobs", "4"]).assert().success();
    let second: Vec<Vec<u8>> = ["empty", "first_commit", "many_branches", "many_branches_renamed"]
        .iter()
        .map(|name| project.read_bytes(&format!("dumps/{}.dump", name)))
        .collect();

    assert_eq!(first, second);
}

#[test]
fn test_cycle_is_rejected_before_anything_runs() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "a"
after = ["c"]

[[scenario]]
name = "b"
after = ["a"]

[[scenario]]
name = "c"
after = ["b"]
"#,
    );
    for name in ["a", "b", "c"] {
        project.script(&format!("bash/{}.sh", name), "echo ran\n");
    }

    project
        .fixturegen()
        .arg("all")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cycle detected"));

    for name in ["a", "b", "c"] {
        assert!(!project.exists(&format!("{}.dump", name)));
    }
}

#[test]
fn test_missing_dependency_fails_without_output() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "needs_helper"
dependencies = ["bash/missing.sh"]
"#,
    );
    project.script("bash/needs_helper.sh", "echo should not run\n");

    project
        .fixturegen()
        .arg("all")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("needs_helper"))
        .stderr(predicate::str::contains("Resource not found: bash/missing.sh"));

    assert!(!project.exists("needs_helper.dump"));
}

#[test]
fn test_failure_reports_task_and_stderr() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "broken"
"#,
    );
    project.script("bash/broken.sh", "echo partial\necho 'svnadmin: E160000' >&2\nexit 3\n");

    project
        .fixturegen()
        .arg("all")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Task broken failed"))
        .stderr(predicate::str::contains("exit code 3"))
        .stderr(predicate::str::contains("svnadmin: E160000"));

    assert!(!project.exists("broken.dump"));
}

#[test]
fn test_keep_going_runs_independent_tasks_and_writes_report() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "bad"
work_dir = "w1"

[[scenario]]
name = "after_bad"
work_dir = "w2"
after = ["bad"]

[[scenario]]
name = "independent"
work_dir = "w3"
"#,
    );
    project.script("bash/bad.sh", "exit 1\n");
    project.script("bash/after_bad.sh", "echo never\n");
    project.script("bash/independent.sh", "echo fine\n");

    project
        .fixturegen()
        .args(["all", "--keep-going", "--jobs", "1", "--report", "report.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("after_bad skipped (depends on bad)"));

    assert_eq!(project.read_file("independent.dump"), "fine\n");
    assert!(!project.exists("after_bad.dump"));

    let report: serde_json::Value =
        serde_json::from_str(&project.read_file("report.json")).unwrap();
    let status = |id: &str| {
        report["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["id"] == id)
            .map(|t| t["status"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(status("bad"), "failed");
    assert_eq!(status("after_bad"), "skipped");
    assert_eq!(status("independent"), "succeeded");
}

#[test]
fn test_run_executes_closure_only() {
    let project = svn_like();

    project
        .fixturegen()
        .args(["run", "first_commit"])
        .assert()
        .success();

    assert!(project.exists("dumps/empty.dump"));
    assert!(project.exists("dumps/first_commit.dump"));
    assert!(!project.exists("dumps/many_branches.dump"));
}

#[test]
fn test_run_only_skips_dependencies() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "base"

[[scenario]]
name = "derived"
after = ["base"]
"#,
    );
    project.script("bash/base.sh", "echo base\n");
    project.script("bash/derived.sh", "echo derived\n");

    project
        .fixturegen()
        .args(["run", "derived", "--only"])
        .assert()
        .success();

    assert!(project.exists("derived.dump"));
    assert!(!project.exists("base.dump"));
}

#[test]
fn test_variants_share_work_dir_in_file_order() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "file_content"

[[scenario.variant]]
name = "before"
args = ["this is some file content"]

[[scenario.variant]]
name = "after"
args = ["i replaced the content"]
"#,
    );
    project.script(
        "bash/file_content.sh",
        "if [ -f content ]; then echo \"was: $(cat content)\"; fi\necho \"$1\" > content\necho \"now: $1\"\n",
    );

    project
        .fixturegen()
        .args(["run", "file_content", "--jobs", "4"])
        .assert()
        .success();

    assert_eq!(
        project.read_file("file_content.before.dump"),
        "now: this is some file content\n"
    );
    assert_eq!(
        project.read_file("file_content.after.dump"),
        "was: this is some file content\nnow: i replaced the content\n"
    );
}

#[test]
fn test_timeout_fails_and_leaves_no_output() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "sleepy"
timeout = "1s"
"#,
    );
    project.script("bash/sleepy.sh", "echo started\nsleep 30\n");

    let start = Instant::now();
    project
        .fixturegen()
        .arg("all")
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out"));

    assert!(start.elapsed() < Duration::from_secs(15));
    assert!(!project.exists("sleepy.dump"));
}

#[test]
fn test_plan_prints_order_without_running() {
    let project = svn_like();

    project
        .fixturegen()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. bootstrap:"))
        .stdout(predicate::str::contains("2. empty"))
        .stdout(predicate::str::contains("3. first_commit  (after: bootstrap:"))
        .stdout(predicate::str::contains(", empty)"))
        .stdout(predicate::str::contains("5. many_branches_renamed  (after: many_branches)"));

    assert!(!project.exists("dumps"));
}

#[test]
fn test_list_tasks_and_resources() {
    let project = svn_like();

    project
        .fixturegen()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("many_branches_renamed"))
        .stdout(predicate::str::contains("post-process"))
        .stdout(predicate::str::contains("bash/first_commit.sh"));

    project
        .fixturegen()
        .args(["list", "--resources"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bash/setup.sh\n"))
        .stdout(predicate::str::contains("bash/many_branches.sh\n"));
}

#[test]
fn test_config_flag_and_discovery_from_subdirectory() {
    let project = TestProject::new(
        r#"
resources = ["scripts"]

[[scenario]]
name = "make_a"
output = "a.dump"
"#,
    );
    project.script("bash/make_a.sh", "echo A\n");
    fs::create_dir_all(project.path().join("nested/deeper")).unwrap();

    project
        .fixturegen()
        .current_dir(project.path().join("nested/deeper"))
        .arg("all")
        .assert()
        .success();
    assert_eq!(project.read_file("a.dump"), "A\n");

    let elsewhere = TempDir::new().unwrap();
    project
        .fixturegen()
        .current_dir(elsewhere.path())
        .args(["all", "-c"])
        .arg(project.path().join("fixturegen.toml"))
        .assert()
        .success();
}

#[test]
fn test_missing_manifest_fails() {
    let empty = TempDir::new().unwrap();
    Command::new(std::env!("CARGO_BIN_EXE_fixturegen"))
        .current_dir(empty.path())
        .env_remove("FIXTUREGEN_CONFIG")
        .args(["-c", "nope.toml", "all"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Manifest not found"));
}

#[test]
fn test_init_writes_example_and_refuses_overwrite() {
    let temp = TempDir::new().unwrap();
    let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_fixturegen"));
    cmd.current_dir(temp.path()).arg("init").assert().success();

    let manifest = fs::read_to_string(temp.path().join("fixturegen.toml")).unwrap();
    assert!(manifest.contains("[[scenario]]"));

    Command::new(std::env!("CARGO_BIN_EXE_fixturegen"))
        .current_dir(temp.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    Command::new(std::env!("CARGO_BIN_EXE_fixturegen"))
        .current_dir(temp.path())
        .args(["init", "--force"])
        .assert()
        .success();

    // The example manifest plans cleanly
    Command::new(std::env!("CARGO_BIN_EXE_fixturegen"))
        .current_dir(temp.path())
        .env_remove("FIXTUREGEN_CONFIG")
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("file_content.after"));
}

#[cfg(unix)]
#[test]
fn test_interrupt_stops_running_script_and_discards_output() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::process::Stdio;

    let project = TestProject::new(
        r#"
resources = ["scripts"]

[defaults]
work_dir = "w"

[[scenario]]
name = "slow"
"#,
    );
    project.script("bash/slow.sh", "echo partial\nsleep 2\necho late > marker\n");

    let mut child = std::process::Command::new(std::env!("CARGO_BIN_EXE_fixturegen"))
        .arg("all")
        .current_dir(project.path())
        .env_remove("FIXTUREGEN_CONFIG")
        .env_remove("FIXTUREGEN_JOBS")
        .env("FIXTUREGEN_LOG_FORMAT", "compact")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(700));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(130));

    // Long enough for the script to have finished had it survived
    std::thread::sleep(Duration::from_secs(3));
    assert!(!project.exists("w/marker"));
    assert!(!project.exists("slow.dump"));

    let leftovers: Vec<String> = fs::read_dir(project.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".fixturegen-"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

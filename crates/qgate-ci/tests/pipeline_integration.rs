//! Integration tests for the quality gate against real subprocesses.

use qgate_ci::{
    write_failure_artifacts, Category, CheckDefinition, CheckOutcome, GateConfig, GateExit,
    GatePipeline, GatePolicy, ProcessExecutor, QualityGate, RetentionPolicy, RunReport, Scope,
};
use std::path::Path;
use std::process::Command;

/// `sh -c <script> <id>`: the id fills `$0` so appended file names land in `$@`.
fn sh(id: &str, script: &str) -> CheckDefinition {
    CheckDefinition::custom(
        id,
        vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            id.to_string(),
        ],
    )
}

/// Upper-cases every file it is given, like a formatter would rewrite them.
fn upcase_formatter(id: &str) -> CheckDefinition {
    CheckDefinition::custom(
        id,
        vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"for f in "$@"; do tr a-z A-Z < "$f" > "$f.tmp" && mv "$f.tmp" "$f"; done"#
                .to_string(),
            "upcase".to_string(),
        ],
    )
    .with_category(Category::AutoFix)
    .passing_filenames(true)
    .with_files(r"\.py$")
}

fn abc_config(fail_fast: bool) -> GateConfig {
    let mut config = GateConfig::with_checks(vec![
        sh("A", "exit 0"),
        sh("B", "echo 'line too long' >&2; exit 1"),
        sh("C", "touch ran-c"),
    ]);
    config.fail_fast = fail_fast;
    config
}

async fn run(config: &GateConfig, target: &Path) -> RunReport {
    GatePipeline::run(&ProcessExecutor, config, target)
        .await
        .expect("pipeline failed")
}

fn make_git_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path();
    run_git(repo, &["init"]);
    run_git(repo, &["config", "user.name", "test-user"]);
    run_git(repo, &["config", "user.email", "test@example.com"]);
    for (name, content) in files {
        std::fs::write(repo.join(name), content).unwrap();
    }
    run_git(repo, &["add", "."]);
    run_git(repo, &["commit", "-m", "initial"]);
    dir
}

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Test: without fail-fast every check runs and the failure is aggregated
#[tokio::test]
async fn test_failure_in_middle_without_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let config = abc_config(false);

    let report = run(&config, dir.path()).await;

    let passed: Vec<bool> = report.results.iter().map(|r| r.passed).collect();
    assert_eq!(passed, vec![true, false, true]);
    assert!(dir.path().join("ran-c").exists(), "C should have run");
    assert!(report.results[1].stderr.contains("line too long"));

    let verdict = QualityGate::evaluate(&report, GatePolicy::from(&config));
    assert_eq!(verdict.exit.code(), 1);
}

/// Test: fail-fast stops before C and never executes it
#[tokio::test]
async fn test_failure_in_middle_with_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let config = abc_config(true);

    let report = run(&config, dir.path()).await;

    let passed: Vec<bool> = report.results.iter().map(|r| r.passed).collect();
    assert_eq!(passed, vec![true, false]);
    assert_eq!(report.not_run, vec!["C".to_string()]);
    assert!(!dir.path().join("ran-c").exists(), "C must not run");

    let verdict = QualityGate::evaluate(&report, GatePolicy::from(&config));
    assert_eq!(verdict.exit, GateExit::Failed);
}

/// Test: an absent tool is reported as tooling unavailable; exit code depends on policy
#[tokio::test]
async fn test_absent_tool_binary() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GateConfig::with_checks(vec![
        CheckDefinition::custom("ghost", vec!["qgate-ghost-linter".to_string()]),
        sh("after", "exit 0"),
    ]);

    let report = run(&config, dir.path()).await;
    assert!(matches!(
        report.results[0].outcome,
        CheckOutcome::ToolingUnavailable { .. }
    ));
    assert!(report.results[1].passed, "later checks still run");
    assert_eq!(
        QualityGate::evaluate(&report, GatePolicy::from(&config)).exit.code(),
        1
    );

    config.tooling_unavailable_fatal = true;
    assert_eq!(
        QualityGate::evaluate(&report, GatePolicy::from(&config)).exit.code(),
        2
    );
}

/// Test: two runs over an unchanged tree with read-only checks agree
#[tokio::test]
async fn test_read_only_runs_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "print('a')\n").unwrap();
    std::fs::write(dir.path().join("b.py"), "print('b')\n").unwrap();

    let config = GateConfig::with_checks(vec![
        sh("list", r#"echo "$@""#).passing_filenames(true),
        sh("fail", "cat a.py; exit 4"),
    ]);

    let first = run(&config, dir.path()).await;
    let second = run(&config, dir.path()).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.config_digest, second.config_digest);
    assert_eq!(first.results.len(), second.results.len());
    for (a, b) in first.results.iter().zip(&second.results) {
        assert_eq!(a.check_id, b.check_id);
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.passed, b.passed);
        assert_eq!(a.exit_code, b.exit_code);
        assert_eq!(a.stdout, b.stdout);
        assert_eq!(a.command, b.command);
    }
}

/// Test: an auto-fix check rewrites files once, then reports clean
#[tokio::test]
async fn test_auto_fix_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "hello\n").unwrap();
    std::fs::write(dir.path().join("b.py"), "WORLD\n").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "keep me\n").unwrap();

    let config = GateConfig::with_checks(vec![upcase_formatter("upcase")]);

    let first = run(&config, dir.path()).await;
    let fixed = &first.results[0];
    assert_eq!(fixed.outcome, CheckOutcome::Fixed);
    assert!(!fixed.passed, "fixes fail the gate unless allowed");
    assert_eq!(fixed.modified_files, vec!["a.py".to_string()]);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.py")).unwrap(),
        "HELLO\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "keep me\n"
    );

    let second = run(&config, dir.path()).await;
    assert_eq!(second.results[0].outcome, CheckOutcome::Passed);
    assert!(second.results[0].modified_files.is_empty());
    assert!(second.is_green());
}

/// Test: allow_fixes lets a successful fix pass the gate
#[tokio::test]
async fn test_allow_fixes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "hello\n").unwrap();

    let mut config = GateConfig::with_checks(vec![upcase_formatter("upcase")]);
    config.allow_fixes = true;

    let report = run(&config, dir.path()).await;
    assert_eq!(report.results[0].outcome, CheckOutcome::Fixed);
    assert!(report.is_green());
}

/// Test: a later check observes the fixes of an earlier auto-fix check
#[tokio::test]
async fn test_later_check_sees_earlier_fix() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "hello\n").unwrap();

    let mut config = GateConfig::with_checks(vec![
        upcase_formatter("upcase"),
        sh("shouting", "grep -q HELLO a.py"),
    ]);
    config.allow_fixes = true;

    let report = run(&config, dir.path()).await;
    assert!(report.results[1].passed, "second check must see the fixed file");
}

/// Test: a check exceeding its budget is killed and reported as timed out
#[tokio::test]
async fn test_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let config = GateConfig::with_checks(vec![
        sh("hang", "echo started; exec sleep 30").with_timeout(1),
        sh("next", "exit 0"),
    ]);

    let report = run(&config, dir.path()).await;
    assert_eq!(
        report.results[0].outcome,
        CheckOutcome::TimedOut { timeout_ms: 1000 }
    );
    assert_eq!(report.results[0].stdout, "started\n");
    assert!(report.results[0].stderr.ends_with("timed out after 1s\n"));
    assert!(report.results[1].passed);
    assert!(report.duration_ms < 30_000);
}

/// Test: secret scanner failures are classified separately
#[tokio::test]
async fn test_secret_scan_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = GateConfig::with_checks(vec![sh(
        "secrets",
        "echo 'AWS key found in config.py' ; exit 1",
    )
    .secret_scanner()]);

    let report = run(&config, dir.path()).await;
    assert_eq!(report.results[0].outcome, CheckOutcome::SecretDetected);
    assert!(report.results[0].stdout.contains("AWS key"));
}

/// Test: changed-files scope passes only files changed since the base ref
#[tokio::test]
async fn test_changed_files_scope() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path();
    run_git(repo, &["init"]);
    run_git(repo, &["config", "user.name", "test-user"]);
    run_git(repo, &["config", "user.email", "test@example.com"]);
    std::fs::write(repo.join("old.py"), "x = 1\n").unwrap();
    std::fs::write(repo.join("touched.py"), "y = 1\n").unwrap();
    run_git(repo, &["add", "."]);
    run_git(repo, &["commit", "-m", "initial"]);
    std::fs::write(repo.join("touched.py"), "y = 2\n").unwrap();

    let config = GateConfig::with_checks(vec![sh("list", r#"echo "$@""#)
        .passing_filenames(true)
        .with_scope(Scope::ChangedFiles)]);

    let report = run(&config, repo).await;
    assert!(report.results[0].passed);
    assert_eq!(report.results[0].stdout.trim(), "touched.py");

    run_git(repo, &["commit", "-am", "touch"]);
    let report = run(&config, repo).await;
    assert!(matches!(
        report.results[0].outcome,
        CheckOutcome::Skipped { .. }
    ));
}

/// Test: failure artifacts are written for a red run and pruned by retention
#[tokio::test]
async fn test_failure_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let config = abc_config(false);

    let mut run_ids = Vec::new();
    for _ in 0..3 {
        let report = run(&config, dir.path()).await;
        assert!(!report.is_green());
        let run_dir = write_failure_artifacts(&report, &config, artifacts.path())
            .expect("write artifacts");
        assert!(run_dir.join("report.json").exists());
        assert!(run_dir.join("config.toml").exists());
        let log = std::fs::read_to_string(run_dir.join("logs/B.log")).unwrap();
        assert!(log.contains("line too long"));
        run_ids.push(report.run_id);
    }

    let pruned = RetentionPolicy::keep(2).prune(artifacts.path()).unwrap();
    assert_eq!(pruned, 1);
    assert!(artifacts.path().join(&run_ids[2]).exists());
}

/// Test: non-ASCII file names reach tools and snapshots verbatim
#[tokio::test]
async fn test_non_ascii_file_names() {
    let dir = make_git_repo(&[("café.py", "x = 1\n"), ("base.py", "y = 2\n")]);
    let repo = dir.path();

    let exists = sh(
        "exists",
        r#"for f in "$@"; do test -f "$f" || { echo "missing $f"; exit 1; }; done"#,
    )
    .passing_filenames(true);
    let report = run(&GateConfig::with_checks(vec![exists]), repo).await;
    assert!(report.results[0].passed, "{}", report.results[0].stdout);
    assert!(report.results[0].command.ends_with("exists base.py café.py"));

    let report = run(&GateConfig::with_checks(vec![upcase_formatter("fmt")]), repo).await;
    assert_eq!(report.results[0].outcome, CheckOutcome::Fixed);
    assert_eq!(report.results[0].modified_files, vec!["base.py", "café.py"]);
    assert_eq!(std::fs::read_to_string(repo.join("café.py")).unwrap(), "X = 1\n");
}

/// Test: artifacts of an earlier red run are not in the next run's scope
#[tokio::test]
async fn test_artifacts_excluded_from_next_run() {
    let dir = make_git_repo(&[("app.py", "x = 1\n")]);
    let repo = dir.path();
    let config = GateConfig::with_checks(vec![
        sh("changed", r#"echo "$@"; exit 1"#)
            .passing_filenames(true)
            .with_scope(Scope::ChangedFiles),
        sh("boom", "exit 1"),
    ]);

    let first = run(&config, repo).await;
    assert!(!first.is_green());
    assert!(matches!(
        first.results[0].outcome,
        CheckOutcome::Skipped { .. }
    ));
    let run_dir = write_failure_artifacts(&first, &config, &config.artifacts_dir_in(repo))
        .expect("write artifacts");
    assert!(run_dir.starts_with(repo.join(".qgate/artifacts")));

    let second = run(&config, repo).await;
    assert!(
        matches!(second.results[0].outcome, CheckOutcome::Skipped { .. }),
        "artifacts leaked into scope: {}",
        second.results[0].command
    );

    std::fs::write(repo.join("app.py"), "x = 2\n").unwrap();
    let third = run(&config, repo).await;
    assert_eq!(third.results[0].stdout.trim(), "app.py");
}

/// Test: file lists beyond the argument size limit are split into batches
#[tokio::test]
async fn test_large_file_list_is_batched() {
    let dir = tempfile::tempdir().unwrap();
    let count = 25_000;
    for i in 0..count {
        std::fs::write(dir.path().join(format!("{i:0>116}.py")), "").unwrap();
    }
    let config =
        GateConfig::with_checks(vec![sh("count", r#"echo "$#""#).passing_filenames(true)]);

    let report = run(&config, dir.path()).await;
    let result = &report.results[0];
    assert_eq!(result.outcome, CheckOutcome::Passed, "{}", result.stderr);

    let batches: Vec<usize> = result
        .stdout
        .lines()
        .map(|l| l.trim().parse().unwrap())
        .collect();
    assert!(batches.len() > 1);
    assert_eq!(batches.iter().sum::<usize>(), count);
    let expected = format!("<{count} files in {} batches>", batches.len());
    assert!(result.command.ends_with(&expected));
}

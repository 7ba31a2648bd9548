// Task runner integration tests
//
// Drive TaskRunner against a stub restic executable so the full
// launch/stream/classify/retry path runs for real.

#![cfg(unix)]

use chrono::Local;
use resticmate::config::{parse_profiles, ProfileSet};
use resticmate::notify::Notifier;
use resticmate::runner::{RunStatus, TaskRunner};
use resticmate::state::StateStore;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<(String, Option<String>)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, title: Option<&str>) {
        self.events
            .lock()
            .unwrap()
            .push((message.to_string(), title.map(str::to_string)));
    }
}

fn write_stub(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("restic-stub.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn profile_set(stub: &Path, work: &Path, schedule: &str) -> ProfileSet {
    let schedule_line = if schedule.is_empty() {
        String::new()
    } else {
        format!("schedule = \"{schedule}\"\n")
    };
    parse_profiles(
        &format!(
            "[profiles.job]\nrestic-path = \"{}\"\nrepository-file = \"/dev/null\"\n\
             cache-dir = \"{}\"\ncommand = [\"backup\"]\n{}",
            stub.display(),
            work.display(),
            schedule_line
        ),
        Local::now().naive_local(),
    )
    .unwrap()
}

fn invocation_count(work: &Path, name: &str) -> usize {
    fs::read_to_string(work.join(name))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_successful_run_updates_state_and_notifies() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(
        dir.path(),
        "echo \"$1\" >> \"$RESTIC_CACHE_DIR/calls\"\necho \"snapshot saved\"\nexit 0\n",
    );
    let mut set = profile_set(&stub, dir.path(), "23:59");

    let mut state = StateStore::load(Some(dir.path().join("status.toml")));
    let notifier = RecordingNotifier::default();
    let mut runner = TaskRunner::new(&mut state, &notifier, Some(dir.path().to_path_buf()));

    let profile = set.get_mut("job").unwrap();
    let status = runner.run_task(profile).await.unwrap();
    assert_eq!(status, RunStatus::Finished);

    // Run record written as a unit
    let record = state.record("job").unwrap();
    assert_eq!(record.exit_code, 0);
    assert_eq!(record.pid, 0);
    assert_eq!(record.started, 0);
    assert!(record.last_run > 0.0);
    assert!(record.log_file.starts_with("job-"));

    // Rescheduled from the completion time
    let profile = set.get_mut("job").unwrap();
    assert!(profile.last_run.is_some());
    assert!(profile.next_run.unwrap() > Local::now().naive_local());

    // Notification carries the output tail and the status title
    let events = notifier.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].0.contains("snapshot saved"));
    assert_eq!(events[0].1.as_deref(), Some("task job finished"));

    assert_eq!(invocation_count(dir.path(), "calls"), 1);
}

#[tokio::test]
async fn test_log_artifact_has_header_lines_and_footer() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "echo \"processed 42 files\"\nexit 0\n");
    let mut set = profile_set(&stub, dir.path(), "");

    let mut state = StateStore::load(None);
    let notifier = RecordingNotifier::default();
    let mut runner = TaskRunner::new(&mut state, &notifier, Some(dir.path().to_path_buf()));
    runner.run_task(set.get_mut("job").unwrap()).await.unwrap();

    let log_file = state.record("job").unwrap().log_file.clone();
    let contents = fs::read_to_string(dir.path().join(&log_file)).unwrap();
    assert!(contents.contains("Repository: /dev/null"));
    assert!(contents.contains("Command line:"));
    assert!(contents.contains("processed 42 files"));
    assert!(contents.contains("Restic exit code: 0"));
}

#[tokio::test]
async fn test_stale_lock_unlock_and_retry_succeeds() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(
        dir.path(),
        r#"if [ "$1" = "unlock" ]; then
    echo unlock >> "$RESTIC_CACHE_DIR/unlocks"
    echo "repository unlocked"
    exit 0
fi
echo backup >> "$RESTIC_CACHE_DIR/backups"
if [ ! -f "$RESTIC_CACHE_DIR/locked-once" ]; then
    touch "$RESTIC_CACHE_DIR/locked-once"
    echo "Fatal: unable to open repository"
    echo "repository is already locked, remove stale locks with 'restic unlock'"
    exit 1
fi
echo "snapshot saved"
exit 0
"#,
    );
    let mut set = profile_set(&stub, dir.path(), "");

    let mut state = StateStore::load(None);
    let notifier = RecordingNotifier::default();
    let mut runner = TaskRunner::new(&mut state, &notifier, None);
    let status = runner.run_task(set.get_mut("job").unwrap()).await.unwrap();

    assert_eq!(status, RunStatus::Finished);
    assert_eq!(invocation_count(dir.path(), "unlocks"), 1);
    assert_eq!(invocation_count(dir.path(), "backups"), 2);
    assert_eq!(state.record("job").unwrap().exit_code, 0);
}

#[tokio::test]
async fn test_stale_lock_retry_fires_at_most_once() {
    // The repository stays "locked" forever: unlock succeeds, the retry
    // fails again, and no second unlock is attempted.
    let dir = TempDir::new().unwrap();
    let stub = write_stub(
        dir.path(),
        r#"if [ "$1" = "unlock" ]; then
    echo unlock >> "$RESTIC_CACHE_DIR/unlocks"
    exit 0
fi
echo backup >> "$RESTIC_CACHE_DIR/backups"
echo "repository is already locked, remove stale locks with 'restic unlock'"
exit 1
"#,
    );
    let mut set = profile_set(&stub, dir.path(), "");

    let mut state = StateStore::load(None);
    let notifier = RecordingNotifier::default();
    let mut runner = TaskRunner::new(&mut state, &notifier, None);
    let status = runner.run_task(set.get_mut("job").unwrap()).await.unwrap();

    assert_eq!(status, RunStatus::Failed(1));
    assert_eq!(invocation_count(dir.path(), "unlocks"), 1);
    assert_eq!(invocation_count(dir.path(), "backups"), 2);
}

#[tokio::test]
async fn test_no_retry_when_unlock_fails() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(
        dir.path(),
        r#"if [ "$1" = "unlock" ]; then
    echo unlock >> "$RESTIC_CACHE_DIR/unlocks"
    exit 1
fi
echo backup >> "$RESTIC_CACHE_DIR/backups"
echo "repository is already locked, remove stale locks with 'restic unlock'"
exit 1
"#,
    );
    let mut set = profile_set(&stub, dir.path(), "");

    let mut state = StateStore::load(None);
    let notifier = RecordingNotifier::default();
    let mut runner = TaskRunner::new(&mut state, &notifier, None);
    let status = runner.run_task(set.get_mut("job").unwrap()).await.unwrap();

    assert_eq!(status, RunStatus::Failed(1));
    assert_eq!(invocation_count(dir.path(), "backups"), 1);
}

#[tokio::test]
async fn test_backup_warning_exit_code() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "echo \"some files could not be read\"\nexit 3\n");
    let mut set = profile_set(&stub, dir.path(), "");

    let mut state = StateStore::load(None);
    let notifier = RecordingNotifier::default();
    let mut runner = TaskRunner::new(&mut state, &notifier, None);
    let status = runner.run_task(set.get_mut("job").unwrap()).await.unwrap();

    assert_eq!(status, RunStatus::FinishedWithWarnings);
    assert_eq!(state.record("job").unwrap().exit_code, 3);

    let events = notifier.events.lock().unwrap();
    assert_eq!(
        events[0].1.as_deref(),
        Some("task job finished with some warnings...")
    );
}

#[tokio::test]
async fn test_stderr_lines_are_captured() {
    let dir = TempDir::new().unwrap();
    let stub = write_stub(dir.path(), "echo \"warning on stderr\" >&2\nexit 2\n");
    let mut set = profile_set(&stub, dir.path(), "");

    let mut state = StateStore::load(None);
    let notifier = RecordingNotifier::default();
    let mut runner = TaskRunner::new(&mut state, &notifier, None);
    let status = runner.run_task(set.get_mut("job").unwrap()).await.unwrap();

    assert_eq!(status, RunStatus::Failed(2));
    let events = notifier.events.lock().unwrap();
    assert!(events[0].0.contains("warning on stderr"));
}

#[tokio::test]
async fn test_launch_failure_is_an_error_not_a_panic() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no-such-restic");
    let mut set = profile_set(&missing, dir.path(), "");

    let mut state = StateStore::load(None);
    let notifier = RecordingNotifier::default();
    let mut runner = TaskRunner::new(&mut state, &notifier, None);
    let err = runner.run_task(set.get_mut("job").unwrap()).await.unwrap_err();
    assert!(err.to_string().contains("Failed to start"));

    // Scheduling stays disabled so the task is not retried every tick
    assert!(set.get_mut("job").unwrap().next_run.is_none());
}

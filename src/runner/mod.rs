// Task execution
//
// One execution: launch restic, stream its merged output into the run log,
// classify the exit code, unlock-and-retry once on a stale lock, then
// persist the run record and notify.

pub mod launcher;
pub mod logsink;

use anyhow::{Context, Result};
use chrono::Local;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tracing::{info, warn};

use crate::config::Profile;
use crate::notify::Notifier;
use crate::state::{epoch_seconds, StateStore};
use launcher::{build_invocation, spawn};
use logsink::RunLog;

/// Restic's generic-error exit code, the only one eligible for the
/// stale-lock retry.
const GENERIC_ERROR: i32 = 1;
/// Exit code restic uses for "completed with warnings" on backup.
const WARNING_EXIT: i32 = 3;
/// Transient-failure signature in the final output line.
pub const STALE_LOCK_MARKER: &str = "remove stale locks";

/// Classification of one completed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    FinishedWithWarnings,
    Failed(i32),
}

impl RunStatus {
    pub fn describe(&self, task: &str) -> String {
        match self {
            RunStatus::Finished => format!("task {task} finished"),
            RunStatus::FinishedWithWarnings => {
                format!("task {task} finished with some warnings...")
            }
            RunStatus::Failed(code) => format!("task {task} FAILED! (exit code: {code})"),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failed(_))
    }
}

/// Executes one task at a time on behalf of the scheduler loop.
pub struct TaskRunner<'a> {
    state: &'a mut StateStore,
    notifier: &'a dyn Notifier,
    logs_dir: Option<PathBuf>,
}

impl<'a> TaskRunner<'a> {
    pub fn new(
        state: &'a mut StateStore,
        notifier: &'a dyn Notifier,
        logs_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            state,
            notifier,
            logs_dir,
        }
    }

    /// Run a task to completion and reschedule it from the completion time.
    pub async fn run_task(&mut self, profile: &mut Profile) -> Result<RunStatus> {
        let started = Local::now().naive_local();
        // Scheduling stays disabled while the task runs
        profile.next_run = None;

        let mut log = RunLog::create(self.logs_dir.as_deref(), &profile.name, started);
        let log_file = log.file_name().to_string();
        self.state.update(&profile.name, |record| {
            record.started = epoch_seconds(started) as i64;
            record.log_file = log_file;
        })?;

        let (mut output, mut code) = self.attempt(profile, &[], &mut log).await?;

        // One unlock-and-retry per execution; a second stale lock is a
        // normal failure.
        if code == GENERIC_ERROR
            && output
                .last()
                .is_some_and(|line| line.contains(STALE_LOCK_MARKER))
        {
            warn!(
                "task {} failed because of a stale lock, attempting unlock...",
                profile.name
            );
            let unlock = ["unlock".to_string()];
            if self.attempt(profile, &unlock, &mut log).await?.1 == 0 {
                (output, code) = self.attempt(profile, &[], &mut log).await?;
            }
        }

        let status = classify(code, profile.command());
        let finished = Local::now().naive_local();
        profile.set_last_run(finished);
        self.state.update(&profile.name, |record| {
            record.last_run = epoch_seconds(finished);
            record.exit_code = code;
            record.pid = 0;
            record.started = 0;
        })?;

        let status_text = status.describe(&profile.name);
        self.notifier.notify(&summary(&output), Some(&status_text));
        info!("{status_text}");
        Ok(status)
    }

    /// One launch attempt: spawn, record the pid, stream output to the log.
    async fn attempt(
        &mut self,
        profile: &Profile,
        override_args: &[String],
        log: &mut RunLog,
    ) -> Result<(Vec<String>, i32)> {
        let invocation = build_invocation(profile, override_args);
        info!("running: {}", invocation.command_line());

        let mut launched = spawn(&invocation, profile.cpu_priority())?;
        let pid = launched.pid;
        self.state.update(&profile.name, |record| record.pid = pid)?;

        let target = profile
            .repository()
            .or_else(|| profile.repository_file())
            .unwrap_or("");
        log.header(target, &invocation.command_line());

        let mut output = Vec::new();
        let code = drain(&mut launched.child, |line| {
            log.line(&line);
            output.push(line);
        })
        .await?;

        log.footer(code);
        Ok((output, code))
    }
}

/// Forward every stdout/stderr line as it arrives, then reap the exit code.
async fn drain(child: &mut Child, mut on_line: impl FnMut(String)) -> Result<i32> {
    let stdout = child.stdout.take().context("stdout was piped")?;
    let stderr = child.stderr.take().context("stderr was piped")?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let err_tx = tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if err_tx.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = rx.recv().await {
        on_line(line);
    }
    let status = child.wait().await?;
    Ok(status.code().unwrap_or(-1))
}

fn classify(code: i32, command: &[String]) -> RunStatus {
    match code {
        0 => RunStatus::Finished,
        WARNING_EXIT if command.iter().any(|c| c == "backup") => RunStatus::FinishedWithWarnings,
        other => RunStatus::Failed(other),
    }
}

/// Last four output lines, capped at 220 characters, for the notification.
fn summary(output: &[String]) -> String {
    let tail = output[output.len().saturating_sub(4)..].join("\n");
    let chars: Vec<char> = tail.chars().collect();
    let start = chars.len().saturating_sub(220);
    chars[start..].iter().collect::<String>().trim().to_string()
}

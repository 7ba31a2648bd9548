// Scheduler loop
//
// Single thread of control over the task list: run due tasks in enumeration
// order, compute the earliest pending time, sleep with a ten-second ceiling
// so externally-triggered changes are picked up promptly. UI/operator
// actions arrive as typed commands through a channel and are consumed at
// tick boundaries; nothing else mutates loop state.

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::{self, Paths, ProfileSet};
use crate::notify::Notifier;
use crate::runner::TaskRunner;
use crate::schedule::format_relative;
use crate::state::StateStore;

/// Sleep ceiling between ticks.
const IDLE_WAIT: Duration = Duration::from_secs(10);

/// Externally-triggered actions, consumed at tick boundaries. A run-now
/// request only marks the task due; it never interrupts a run in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    RunNow(String),
    Reload,
    Quit(i32),
}

/// Cloneable sender half for delivering commands into the loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn send(&self, command: SchedulerCommand) {
        // The loop owning the receiver may already have shut down
        let _ = self.tx.send(command);
    }
}

pub struct Scheduler {
    paths: Paths,
    profiles: ProfileSet,
    state: StateStore,
    notifier: Box<dyn Notifier>,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    handle: SchedulerHandle,
    status: Option<String>,
}

impl Scheduler {
    pub fn new(
        paths: Paths,
        profiles: ProfileSet,
        state: StateStore,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        Self {
            paths,
            profiles,
            state,
            notifier,
            commands,
            handle: SchedulerHandle { tx },
            status: None,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Drive the loop until a quit command arrives; returns the requested
    /// process exit code.
    pub async fn run(mut self) -> Result<i32> {
        self.state.set_scheduler_pid()?;
        self.set_status("service started".to_string());

        let now = Local::now().naive_local();
        for name in self.profiles.task_names() {
            let next = self.profiles.get(name).and_then(|p| p.next_run);
            info!("    > {name} will next run {}", format_relative(next, now));
        }

        loop {
            // A single task's failure never halts the scheduler
            if let Err(e) = self.tick().await {
                error!("scheduler iteration failed: {e:#}");
                self.notifier
                    .notify(&format!("{e:#}"), Some("unhandled scheduler error"));
            }

            let now = Local::now().naive_local();
            let upcoming = earliest_pending(&self.profiles)
                .map(|(name, next)| format!("{name} will run {}", format_relative(Some(next), now)));
            if let Some(status) = upcoming {
                self.set_status(status);
            }

            tokio::select! {
                _ = tokio::time::sleep(wake_after(&self.profiles, now)) => {}
                command = self.commands.recv() => {
                    let command = command.unwrap_or(SchedulerCommand::Quit(0));
                    if let Some(code) = self.handle_command(command) {
                        info!("shutting down...");
                        return Ok(code);
                    }
                }
            }
        }
    }

    /// Run every due task, in fixed task-list order, one at a time.
    async fn tick(&mut self) -> Result<()> {
        let task_names = self.profiles.task_names().to_vec();
        for name in &task_names {
            let now = Local::now().naive_local();
            if !self.profiles.get(name).is_some_and(|p| p.is_pending(now)) {
                continue;
            }
            self.set_status(format!("running task {name}"));
            let mut runner = TaskRunner::new(
                &mut self.state,
                self.notifier.as_ref(),
                self.paths.logs_dir.clone(),
            );
            let profile = self
                .profiles
                .get_mut(name)
                .expect("task names come from the profile map");
            let status = runner.run_task(profile).await?;
            self.set_status(status.describe(name));
        }
        Ok(())
    }

    fn handle_command(&mut self, command: SchedulerCommand) -> Option<i32> {
        match command {
            SchedulerCommand::Quit(code) => return Some(code),
            SchedulerCommand::RunNow(name) => match self.profiles.get_mut(&name) {
                Some(profile) => {
                    profile.next_run = Some(Local::now().naive_local());
                    self.notifier.notify(&format!("{name} will run next"), None);
                }
                None => warn!("run-now request for unknown task '{name}'"),
            },
            SchedulerCommand::Reload => self.reload(),
        }
        None
    }

    /// Full rebuild from disk. On failure the running configuration stays
    /// in effect.
    fn reload(&mut self) {
        let now = Local::now().naive_local();
        match config::load_profiles(&self.paths, now) {
            Ok(mut set) => {
                let mut state = StateStore::load(self.paths.state_file.clone());
                config::seed_from_state(&mut set, &mut state, now);
                self.profiles = set;
                self.state = state;
                info!("configuration reloaded");
            }
            Err(e) => {
                error!("configuration reload failed: {e:#}");
                self.notifier
                    .notify(&format!("{e:#}"), Some("configuration reload failed"));
            }
        }
    }

    fn set_status(&mut self, status: String) {
        if self.status.as_deref() != Some(status.as_str()) {
            info!("status: {status}");
            self.status = Some(status);
        }
    }
}

/// Earliest pending (name, next_run) across all tasks.
fn earliest_pending(set: &ProfileSet) -> Option<(&str, NaiveDateTime)> {
    set.task_names()
        .iter()
        .filter_map(|name| {
            set.get(name)
                .and_then(|p| p.next_run)
                .map(|next| (name.as_str(), next))
        })
        .min_by_key(|(_, next)| *next)
}

/// Time until the next wake-up, capped at the idle ceiling.
fn wake_after(set: &ProfileSet, now: NaiveDateTime) -> Duration {
    let until = match earliest_pending(set) {
        Some((_, next)) => Duration::from_millis((next - now).num_milliseconds().max(0) as u64),
        None => IDLE_WAIT,
    };
    until.min(IDLE_WAIT)
}

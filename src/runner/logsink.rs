// Per-run log artifact
//
// One append-only text file per execution, named from the task and its
// start time. Lines are flushed as they arrive so a crash mid-run leaves a
// partial but inspectable log. Without a logs directory (single-file
// config mode) the sink is a no-op that still reports an empty file name.

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

pub struct RunLog {
    file: Option<File>,
    file_name: String,
}

impl RunLog {
    /// Open the log artifact for a run starting at `started`.
    pub fn create(logs_dir: Option<&Path>, task_name: &str, started: NaiveDateTime) -> Self {
        let Some(dir) = logs_dir else {
            return Self {
                file: None,
                file_name: String::new(),
            };
        };
        let file_name = format!("{task_name}-{}.txt", started.format("%Y.%m.%d_%H.%M"));
        match File::create(dir.join(&file_name)) {
            Ok(file) => Self {
                file: Some(file),
                file_name,
            },
            Err(e) => {
                warn!("cannot create run log {file_name}: {e}");
                Self {
                    file: None,
                    file_name: String::new(),
                }
            }
        }
    }

    /// Name of the artifact, empty when logging is unavailable.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Header written once per launch attempt.
    pub fn header(&mut self, repository: &str, command_line: &str) {
        self.line(&format!("Repository: {repository}"));
        self.line(&format!("Command line: {command_line}"));
        self.line("Restic output:");
        self.line(" ");
    }

    /// Footer written after each launch attempt completes.
    pub fn footer(&mut self, exit_code: i32) {
        self.line(" ");
        self.line(&format!("Restic exit code: {exit_code}"));
        self.line(" ");
    }

    /// Append one output line, timestamped, and flush immediately.
    pub fn line(&mut self, line: &str) {
        info!("[task_log] {line}");
        if let Some(file) = &mut self.file {
            if let Err(e) = write_line(file, line) {
                warn!("run log write failed: {e}");
            }
        }
    }
}

fn write_line(file: &mut File, line: &str) -> Result<()> {
    writeln!(file, "[{}] {line}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    file.flush()?;
    Ok(())
}

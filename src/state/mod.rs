// Persistent run-state store
//
// One TOML table per task in status.toml, plus a reserved table holding the
// scheduler's own pid. Read once at startup, rewritten whole after every
// state-changing event. A corrupt field degrades to its default ("never
// run") instead of aborting the load.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Reserved section name for the scheduler process itself.
pub const SCHEDULER_SECTION: &str = "__resticmate__";

/// Durable record of one task's last execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunRecord {
    /// Epoch seconds when the current run started, 0 when not running.
    pub started: i64,
    /// Pid of the running restic process, 0 when not running.
    pub pid: u32,
    /// Log artifact of the last run, empty when logging was unavailable.
    pub log_file: String,
    /// Epoch seconds of the last completed run, 0 if never.
    pub last_run: f64,
    pub exit_code: i32,
}

impl RunRecord {
    /// Local wall-clock time of the last completed run.
    pub fn last_run_time(&self) -> Option<NaiveDateTime> {
        if self.last_run <= 0.0 {
            return None;
        }
        Local
            .timestamp_opt(self.last_run as i64, 0)
            .single()
            .map(|t| t.naive_local())
    }
}

/// Convert a local wall-clock time to epoch seconds.
pub fn epoch_seconds(time: NaiveDateTime) -> f64 {
    Local
        .from_local_datetime(&time)
        .earliest()
        .map(|t| t.timestamp() as f64)
        .unwrap_or(0.0)
}

/// Whole-record-set store backed by one TOML file. With no path (single
/// config file mode) the store is memory-only.
pub struct StateStore {
    path: Option<PathBuf>,
    records: BTreeMap<String, RunRecord>,
}

impl StateStore {
    pub fn load(path: Option<PathBuf>) -> Self {
        let records = match &path {
            Some(path) if path.exists() => read_records(path),
            _ => BTreeMap::new(),
        };
        Self { path, records }
    }

    pub fn record(&self, name: &str) -> Option<&RunRecord> {
        self.records.get(name)
    }

    /// Create the record for a task if it does not exist yet and clear any
    /// stale running markers left by a crash. Called once per task at load;
    /// does not touch the file.
    pub fn ensure(&mut self, name: &str) {
        let record = self.records.entry(name.to_string()).or_default();
        record.started = 0;
        record.pid = 0;
    }

    /// Mutate one record as a unit and persist the whole record set.
    pub fn update<F>(&mut self, name: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut RunRecord),
    {
        let record = self.records.entry(name.to_string()).or_default();
        apply(record);
        self.write()
    }

    /// Record our own pid in the reserved section.
    pub fn set_scheduler_pid(&mut self) -> Result<()> {
        let pid = std::process::id();
        self.update(SCHEDULER_SECTION, |record| record.pid = pid)
    }

    fn write(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = toml::to_string(&self.records).context("serialize run state")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write state file: {}", path.display()))
    }
}

fn read_records(path: &Path) -> BTreeMap<String, RunRecord> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("cannot read state file {}: {e}", path.display());
            return BTreeMap::new();
        }
    };
    let table: toml::Table = match contents.parse() {
        Ok(table) => table,
        Err(e) => {
            warn!("state file {} is corrupt, starting fresh: {e}", path.display());
            return BTreeMap::new();
        }
    };

    let mut records = BTreeMap::new();
    for (name, value) in table {
        match value.as_table() {
            Some(section) => {
                records.insert(name.clone(), lenient_record(&name, section));
            }
            None => warn!("ignoring non-table state entry '{name}'"),
        }
    }
    records
}

// Field-by-field so one bad value degrades to "never run" for that field
// only, not for the whole file.
fn lenient_record(name: &str, section: &toml::Table) -> RunRecord {
    let mut record = RunRecord::default();
    for (key, value) in section {
        let ok = match key.as_str() {
            "started" => value.as_integer().map(|v| record.started = v).is_some(),
            "pid" => value
                .as_integer()
                .and_then(|v| u32::try_from(v).ok())
                .map(|v| record.pid = v)
                .is_some(),
            "log_file" => value.as_str().map(|v| record.log_file = v.to_string()).is_some(),
            "last_run" => value
                .as_float()
                .or_else(|| value.as_integer().map(|v| v as f64))
                .map(|v| record.last_run = v)
                .is_some(),
            "exit_code" => value
                .as_integer()
                .and_then(|v| i32::try_from(v).ok())
                .map(|v| record.exit_code = v)
                .is_some(),
            _ => {
                warn!("state [{name}]: ignoring unknown key '{key}'");
                true
            }
        };
        if !ok {
            warn!("state [{name}]: invalid value for '{key}', using default");
        }
    }
    record
}

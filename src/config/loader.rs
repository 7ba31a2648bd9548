// Configuration loader
// Reads profiles from ~/.resticmate/config.toml (or an explicit --config
// path), resolves inheritance and promotes runnable profiles to tasks.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use super::profile::{Profile, Value};
use super::resolve::resolve_inheritance;
use crate::state::StateStore;

/// Filesystem layout of the program folder. A path pointing at a file (or
/// ending in .toml) selects single-file mode: no state persistence, no log
/// folder, matching a config tried out ad hoc.
#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
    pub config_file: PathBuf,
    pub state_file: Option<PathBuf>,
    pub logs_dir: Option<PathBuf>,
}

impl Paths {
    pub fn new(base: Option<PathBuf>) -> Result<Self> {
        let base = match base {
            Some(base) => base,
            None => dirs::home_dir()
                .context("Cannot determine home directory")?
                .join(".resticmate"),
        };

        if base.is_file() || base.extension().is_some_and(|ext| ext == "toml") {
            Ok(Self {
                config_file: base.clone(),
                state_file: None,
                logs_dir: None,
                base,
            })
        } else {
            Ok(Self {
                config_file: base.join("config.toml"),
                state_file: Some(base.join("status.toml")),
                logs_dir: Some(base.join("logs")),
                base,
            })
        }
    }

    /// Create the program folder skeleton.
    pub fn bootstrap(&self) -> Result<()> {
        if let Some(logs) = &self.logs_dir {
            fs::create_dir_all(logs)
                .with_context(|| format!("Failed to create directory: {}", logs.display()))?;
        }
        Ok(())
    }
}

/// Resolved profiles plus the runnable subset, in fixed enumeration order.
#[derive(Debug)]
pub struct ProfileSet {
    pub profiles: BTreeMap<String, Profile>,
    pub tasks: Vec<String>,
}

impl ProfileSet {
    pub fn task_names(&self) -> &[String] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Profile> {
        self.profiles.get_mut(name)
    }
}

/// Load and resolve all profiles. Inheritance errors are fatal; unknown or
/// mistyped property keys are warned about and skipped. `next_run` is seeded
/// from `now` here; `seed_from_state` then applies the persisted history.
pub fn load_profiles(paths: &Paths, now: NaiveDateTime) -> Result<ProfileSet> {
    let contents = fs::read_to_string(&paths.config_file).with_context(|| {
        format!(
            "Failed to read configuration file: {}",
            paths.config_file.display()
        )
    })?;
    let set = parse_profiles(&contents, now)?;
    info!(
        "configuration loaded from {} ({} profiles, {} tasks)",
        paths.config_file.display(),
        set.profiles.len(),
        set.tasks.len()
    );
    Ok(set)
}

/// Parse a TOML document with one `[profiles.<name>]` table per profile.
pub fn parse_profiles(contents: &str, now: NaiveDateTime) -> Result<ProfileSet> {
    let table: toml::Table = contents.parse().context("Invalid configuration TOML")?;

    let mut profiles: BTreeMap<String, Profile> = BTreeMap::new();
    profiles.insert("default".to_string(), Profile::new("default"));

    if let Some(section) = table.get("profiles") {
        let section = section
            .as_table()
            .context("'profiles' must be a table of profile tables")?;
        for (name, value) in section {
            let Some(body) = value.as_table() else {
                warn!("profile '{name}' is not a table, ignoring");
                continue;
            };
            profiles.insert(name.clone(), profile_from_table(name, body));
        }
    }
    for key in table.keys().filter(|k| *k != "profiles") {
        warn!("ignoring unknown top-level config key '{key}'");
    }

    resolve_inheritance(&mut profiles)?;

    for profile in profiles.values_mut() {
        profile.next_run = profile.find_next_run(now);
    }

    let tasks = profiles
        .values()
        .filter(|p| p.is_runnable())
        .map(|p| p.name.clone())
        .collect();

    Ok(ProfileSet { profiles, tasks })
}

fn profile_from_table(name: &str, body: &toml::Table) -> Profile {
    let mut profile = Profile::new(name);
    for (key, value) in body {
        if key == "inherit" {
            match value.as_str() {
                Some(parent) => profile.set_parent(parent),
                None => warn!("profile [{name}]: 'inherit' must be a profile name"),
            }
            continue;
        }
        let Some(raw) = raw_value(value) else {
            warn!("profile [{name}]: unsupported value for '{key}', ignoring");
            continue;
        };
        if let Err(e) = profile.set(key, raw) {
            warn!("profile [{name}]: {e}, ignoring");
        }
    }
    profile
}

fn raw_value(value: &toml::Value) -> Option<Value> {
    match value {
        toml::Value::String(s) => Some(Value::Str(s.clone())),
        toml::Value::Boolean(b) => Some(Value::Bool(*b)),
        toml::Value::Integer(i) => Some(Value::Str(i.to_string())),
        toml::Value::Float(f) => Some(Value::Str(f.to_string())),
        toml::Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    toml::Value::String(s) => list.push(s.clone()),
                    toml::Value::Integer(i) => list.push(i.to_string()),
                    toml::Value::Float(f) => list.push(f.to_string()),
                    _ => return None,
                }
            }
            Some(Value::List(list))
        }
        _ => None,
    }
}

/// Seed each task's `last_run`/`next_run` from the persisted record set.
///
/// A task reloads with `next_run` computed from its persisted `last_run`,
/// so a run missed while the scheduler was down is caught up. One
/// refinement, kept from long-standing behavior: when the missed occurrence
/// is less than a day old and the following occurrence is less than twelve
/// hours away, the fresh time wins and the missed run is skipped.
pub fn seed_from_state(set: &mut ProfileSet, state: &mut StateStore, now: NaiveDateTime) {
    for name in &set.tasks {
        state.ensure(name);
        let Some(last) = state.record(name).and_then(|r| r.last_run_time()) else {
            continue;
        };
        let profile = set
            .profiles
            .get_mut(name)
            .expect("task names come from the profile map");
        profile.set_last_run(last);

        if let Some(seeded) = profile.next_run {
            if seeded > now - Duration::days(1) {
                if let Some(fresh) = profile.find_next_run(now) {
                    if fresh < now + Duration::hours(12) {
                        profile.next_run = Some(fresh);
                    }
                }
            }
        }
    }
}

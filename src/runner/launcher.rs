// Restic invocation construction and process launch
//
// Argument vector and environment overlay are derived from the profile's
// property table; the process is spawned with stdout and stderr piped so
// the runner can stream both into one output log.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::warn;

use crate::config::profile::{Emission, Profile, Value, PROPERTIES};

/// A fully built restic command line: program, arguments and the
/// environment overlay applied on top of the inherited environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    /// Shell-quoted rendering for logs and the run-log header.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| shell_quote(s))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the argument vector and environment overlay for a profile.
///
/// Layout: `[restic-path] + global flags + property flags + (override args
/// if given, else command + args + flags)`. Boolean flag properties emit the
/// bare flag only when true; list properties repeat the flag per element;
/// string properties emit flag then value. Env-namespaced properties land in
/// the overlay instead.
pub fn build_invocation(profile: &Profile, override_args: &[String]) -> Invocation {
    let mut args: Vec<String> = profile.global_flags().to_vec();
    let mut env = BTreeMap::new();

    if let Some(username) = profile.password_keyring() {
        let exe = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| crate::notify::PROG_NAME.to_string());
        env.insert(
            "RESTIC_PASSWORD_COMMAND".to_string(),
            format!("{} keyring get {}", shell_quote(&exe), shell_quote(username)),
        );
        if !crate::secrets::available() {
            warn!(
                "keyring backend unavailable, required by profile {}",
                profile.name
            );
        }
    }

    for spec in PROPERTIES {
        let Some(value) = profile.value(spec.key) else {
            continue;
        };
        match (spec.emission, value) {
            (Emission::Env(name), Value::Str(s)) => {
                env.insert(name.to_string(), s.clone());
            }
            (Emission::Flag(name), Value::Bool(true)) => args.push(format!("--{name}")),
            (Emission::Flag(_), Value::Bool(false)) => {}
            (Emission::Flag(name), Value::Str(s)) => {
                args.push(format!("--{name}"));
                args.push(s.clone());
            }
            (Emission::Flag(name), Value::List(items)) => {
                for item in items {
                    args.push(format!("--{name}"));
                    args.push(item.clone());
                }
            }
            _ => {}
        }
    }

    if override_args.is_empty() {
        args.extend_from_slice(profile.command());
        args.extend_from_slice(profile.args());
        args.extend_from_slice(profile.flags());
    } else {
        args.extend_from_slice(override_args);
    }

    Invocation {
        program: profile.restic_path().to_string(),
        args,
        env,
    }
}

/// A launched restic process with its launch bookkeeping.
pub struct Launched {
    pub child: Child,
    pub pid: u32,
    pub started: NaiveDateTime,
}

/// Spawn the invocation with merged-capture plumbing (both streams piped).
/// On Windows the profile's cpu-priority hint maps to a process priority
/// class; elsewhere it is ignored.
pub fn spawn(invocation: &Invocation, cpu_priority: Option<&str>) -> Result<Launched> {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(windows)]
    {
        let priority: u32 = match cpu_priority {
            Some("idle") => 0x0040,
            Some("low") => 0x4000,
            Some("normal") => 0x0020,
            Some("high") => 0x0080,
            _ => 0,
        };
        // CREATE_NO_WINDOW: all output is captured, never show a console
        command.creation_flags(priority | 0x0800_0000);
    }
    #[cfg(not(windows))]
    let _ = cpu_priority;

    let child = command
        .spawn()
        .with_context(|| format!("Failed to start {}", invocation.program))?;
    let pid = child.id().unwrap_or(0);

    Ok(Launched {
        child,
        pid,
        started: Local::now().naive_local(),
    })
}

/// Quote a string for human-readable command-line rendering.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,%".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

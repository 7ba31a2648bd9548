// CLI module
// Mode selection: scheduler service, keyring management, or a one-shot
// restic command through a profile.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info};

use crate::config::{self, Paths};
use crate::notify::LogNotifier;
use crate::runner::launcher::build_invocation;
use crate::scheduler::{Scheduler, SchedulerCommand};
use crate::secrets::{KeyringStore, SecretStore, SERVICE};
use crate::state::StateStore;

#[derive(Parser, Debug)]
#[command(
    name = "resticmate",
    about = "Profile manager and task scheduler for restic",
    version
)]
pub struct Cli {
    /// Config file or directory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Profile to use
    #[arg(short, long, default_value = "default")]
    pub profile: String,

    /// Start the scheduler service
    #[arg(long)]
    pub service: bool,

    /// Keyring management (get|set|del <username>)
    #[arg(long)]
    pub keyring: bool,

    /// Restic command to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Dispatch the selected run mode; returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    let paths = Paths::new(cli.config)?;
    if cli.service {
        run_service(paths).await
    } else if cli.keyring {
        run_keyring(&KeyringStore, &cli.command)
    } else {
        run_command(&paths, &cli.profile, &cli.command).await
    }
}

/// Service mode: load configuration, seed run state, drive the scheduler
/// loop until quit. Ctrl-C arrives as a quit command through the handle.
async fn run_service(paths: Paths) -> Result<i32> {
    paths.bootstrap()?;
    let now = Local::now().naive_local();
    let mut profiles = config::load_profiles(&paths, now)?;
    let mut state = StateStore::load(paths.state_file.clone());
    config::seed_from_state(&mut profiles, &mut state, now);

    let scheduler = Scheduler::new(paths, profiles, state, Box::new(LogNotifier));
    let handle = scheduler.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.send(SchedulerCommand::Quit(0));
        }
    });

    scheduler.run().await
}

/// One-shot mode: run restic in the foreground with the profile's
/// arguments and environment, passing stdio through.
async fn run_command(paths: &Paths, profile_name: &str, args: &[String]) -> Result<i32> {
    let now = Local::now().naive_local();
    let set = config::load_profiles(paths, now)?;

    let Some(profile) = set.get(profile_name) else {
        error!("profile {profile_name} does not exist");
        println!("\nAvailable profiles:");
        for profile in set.profiles.values() {
            let Some(repository) = profile.repository().or_else(|| profile.repository_file())
            else {
                continue;
            };
            println!(
                "    > {} ({}) [{}] {}",
                profile.name,
                profile.description(),
                repository,
                profile.command().join(" ")
            );
        }
        return Ok(1);
    };

    info!("profile: {} ({})", profile.name, profile.description());
    let invocation = build_invocation(profile, args);
    let status = tokio::process::Command::new(&invocation.program)
        .args(&invocation.args)
        .envs(&invocation.env)
        .status()
        .await;
    match status {
        Ok(status) => Ok(status.code().unwrap_or(-1)),
        Err(e) => {
            error!("unable to start restic: {e}");
            Ok(1)
        }
    }
}

/// Keyring mode: minimal front end over the secrets store.
fn run_keyring(store: &dyn SecretStore, args: &[String]) -> Result<i32> {
    let usage = "Usage: resticmate --keyring get|set|del <username>";
    let [operation, username] = args else {
        bail!("{usage}");
    };
    match operation.as_str() {
        "get" => match store.get(SERVICE, username)? {
            Some(password) => {
                print!("{password}");
                std::io::stdout().flush().ok();
                Ok(0)
            }
            None => bail!("Error: Not found"),
        },
        "set" => {
            let password = prompt_password(username)?;
            store.set(SERVICE, username, &password)?;
            println!("OK");
            Ok(0)
        }
        "del" => {
            store.delete(SERVICE, username)?;
            println!("OK");
            Ok(0)
        }
        _ => bail!("{usage}"),
    }
}

fn prompt_password(username: &str) -> Result<String> {
    eprint!("Password for {username}: ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

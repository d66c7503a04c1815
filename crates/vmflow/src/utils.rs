use colored::Colorize;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vmflow_cloud::{CloudError, RemoteAccess};
use vmflow_config::ProjectConfig;

/// stderr logging (`RUST_LOG`, default `info`) plus an append-only log file
/// per project under `<work_dir>/logs/`.
pub fn init_logging(config: &ProjectConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // An invalid project name fails later with a proper message
    let file_layer = if config.validate_identity().is_ok() {
        let dir = config.log_dir();
        std::fs::create_dir_all(&dir)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.log", config.project_name)))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 3600 {
        format!("{}h {}m", total_secs / 3600, (total_secs % 3600) / 60)
    } else if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else if total_secs >= 1 {
        format!("{}.{}s", total_secs, millis / 100)
    } else {
        format!("{}ms", millis)
    }
}

pub fn format_millis(millis: u64) -> String {
    format_duration(Duration::from_millis(millis))
}

/// Ask on stdin, prompting on stderr. Only the full word `yes` confirms.
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    eprint!("{}: ", prompt);
    std::io::stderr().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("yes")
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_remote_access(access: &RemoteAccess) {
    println!();
    println!("{}", "Remote access:".bold());
    println!("  RDP:            {}", access.rdp.cyan());
    println!("  SSH (key):      {}", access.ssh_with_key.cyan());
    println!("  SSH (password): {}", access.ssh.cyan());
}

/// Print an error and, for lifecycle errors, what to do next.
pub fn print_error(error: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), error);
    if let Some(hint) = error.downcast_ref::<CloudError>().and_then(CloudError::hint) {
        eprintln!("{} {}", "Hint:".yellow(), hint);
    }
}

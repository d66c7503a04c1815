use crate::utils;
use colored::Colorize;
use vmflow_cloud::{BootstrapStatus, Orchestrator, ProvisionOutcome};

pub async fn handle(orchestrator: &mut Orchestrator, json: bool) -> anyhow::Result<()> {
    if !json {
        let names = orchestrator.names();
        println!(
            "{}",
            format!("Provisioning {} ...", orchestrator.config().project_name).yellow()
        );
        println!("  Resource group: {}", names.resource_group.cyan());
        println!("  Instance:       {}", names.instance.cyan());
        println!(
            "  Size:           {}{}",
            orchestrator.config().vm_size.cyan(),
            if orchestrator.config().spot { " (spot)" } else { "" }
        );
    }

    let outcome = orchestrator.create().await?;
    print_outcome(&outcome, json, "created")
}

/// Summary shared by `create` and `recreate`.
pub fn print_outcome(outcome: &ProvisionOutcome, json: bool, verb: &str) -> anyhow::Result<()> {
    if json {
        return utils::print_json(outcome);
    }

    match outcome {
        ProvisionOutcome::AlreadyRunning { state } => {
            println!(
                "{}",
                format!("ℹ Instance {} is already running", state.instance_name).blue()
            );
        }
        ProvisionOutcome::Provisioned(report) => {
            println!();
            println!(
                "{}",
                format!(
                    "✓ Instance {} {} ({})",
                    report.state.instance_name,
                    verb,
                    utils::format_millis(report.duration_ms)
                )
                .green()
                .bold()
            );
            println!("  Disk:           {}", report.state.disk_name);

            match &report.public_address {
                Some(address) => println!("  Public address: {}", address.cyan()),
                None => println!(
                    "  {}",
                    "Public address not assigned yet; run `vmflow info` later".yellow()
                ),
            }

            match &report.bootstrap {
                BootstrapStatus::Succeeded => println!("  Bootstrap:      {}", "succeeded".green()),
                BootstrapStatus::Skipped(reason) => {
                    println!("  Bootstrap:      {}", format!("skipped ({})", reason).dimmed())
                }
                BootstrapStatus::Failed(message) => {
                    println!("  Bootstrap:      {}", "failed".red());
                    println!("    {}", message);
                    println!(
                        "    {}",
                        "The instance is usable. Connect over RDP and check C:\\vmflow\\bootstrap.log"
                            .dimmed()
                    );
                }
            }

            if let Some(access) = &report.remote_access {
                utils::print_remote_access(access);
            }
        }
    }
    Ok(())
}

use crate::utils;
use colored::Colorize;
use vmflow_cloud::{DestroyVmOutcome, Orchestrator};

pub async fn handle(orchestrator: &mut Orchestrator, json: bool) -> anyhow::Result<()> {
    if !json {
        println!(
            "{}",
            format!("Deleting instance {} ...", orchestrator.names().instance).yellow()
        );
    }

    let outcome = orchestrator.destroy_vm().await?;
    if json {
        return utils::print_json(&outcome);
    }

    match outcome {
        DestroyVmOutcome::Destroyed { state, duration_ms } => {
            println!(
                "{}",
                format!(
                    "✓ Instance {} deleted ({})",
                    state.instance_name,
                    utils::format_millis(duration_ms)
                )
                .green()
                .bold()
            );
            println!("  Kept disk:      {}", state.disk_name.cyan());
            println!("  Kept network:   {}", state.network_interface_reference.dimmed());
            println!();
            println!("{}", "Run `vmflow recreate` to boot from the kept disk.".dimmed());
        }
        DestroyVmOutcome::NothingToDestroy { phase } => {
            println!(
                "{}",
                format!("ℹ No running instance to delete (phase: {})", phase).blue()
            );
        }
    }
    Ok(())
}

use crate::utils;
use colored::Colorize;
use vmflow_cloud::{DestroyAllOutcome, Orchestrator};

pub async fn handle(orchestrator: &mut Orchestrator, yes: bool, json: bool) -> anyhow::Result<()> {
    let resource_group = orchestrator.names().resource_group.clone();

    if !yes {
        eprintln!(
            "{}",
            format!(
                "⚠ This deletes resource group {} with every resource in it, including the disk.",
                resource_group
            )
            .red()
            .bold()
        );
        eprintln!("  The data cannot be recovered.");
        if !utils::confirm("Type 'yes' to continue")? {
            println!("{}", "Cancelled. Nothing was deleted.".yellow());
            return Ok(());
        }
    }

    let outcome = orchestrator.destroy_all().await?;
    if json {
        return utils::print_json(&outcome);
    }

    match outcome {
        DestroyAllOutcome::Destroyed(report) => {
            println!(
                "{}",
                format!(
                    "✓ Resource group {} deleted ({})",
                    report.resource_group,
                    utils::format_millis(report.duration_ms)
                )
                .green()
                .bold()
            );
            for resource in &report.deleted_resources {
                println!("  • {} {}", resource.name, resource.resource_type.dimmed());
            }
            if !report.group_deleted {
                println!("  {}", "Resource group was already gone".dimmed());
            }
            if report.state_deleted {
                println!("  Local state removed");
            }
        }
        DestroyAllOutcome::NothingToDestroy { resource_group } => {
            println!(
                "{}",
                format!("ℹ Nothing to delete: no state and no resource group {}", resource_group)
                    .blue()
            );
        }
    }
    Ok(())
}

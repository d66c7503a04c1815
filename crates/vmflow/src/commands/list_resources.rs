use crate::utils;
use colored::Colorize;
use vmflow_cloud::Orchestrator;

pub async fn handle(orchestrator: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let listing = orchestrator.list_resources().await?;
    if json {
        return utils::print_json(&listing);
    }

    println!(
        "{}",
        format!(
            "Resource group {} ({} resources)",
            listing.resource_group,
            listing.resources.len()
        )
        .bold()
    );
    if listing.resources.is_empty() {
        println!("  {}", "(empty or not created)".dimmed());
        return Ok(());
    }

    let width = listing
        .resources
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0);
    for resource in &listing.resources {
        println!(
            "  • {}  {}  {}",
            format!("{:<width$}", resource.name).cyan(),
            resource.resource_type,
            resource.location.as_deref().unwrap_or("-").dimmed()
        );
    }
    Ok(())
}

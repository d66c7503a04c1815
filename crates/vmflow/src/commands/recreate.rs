use super::create::print_outcome;
use colored::Colorize;
use vmflow_cloud::Orchestrator;

pub async fn handle(orchestrator: &mut Orchestrator, json: bool) -> anyhow::Result<()> {
    if !json {
        println!(
            "{}",
            format!(
                "Recreating {} from disk {} ...",
                orchestrator.names().instance,
                orchestrator.names().disk
            )
            .yellow()
        );
    }

    let outcome = orchestrator.recreate().await?;
    print_outcome(&outcome, json, "recreated")
}

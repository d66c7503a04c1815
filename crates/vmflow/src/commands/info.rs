use crate::utils;
use colored::{ColoredString, Colorize};
use vmflow_cloud::{InfoReport, Orchestrator, Probe};

fn probed(value: &Probe<Option<String>>) -> ColoredString {
    match value {
        Ok(Some(v)) => v.as_str().cyan(),
        Ok(None) => "-".dimmed(),
        Err(e) => format!("error: {}", e).red(),
    }
}

pub async fn handle(orchestrator: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let report = orchestrator.info().await?;
    if json {
        return utils::print_json(&report);
    }

    let info = match report {
        InfoReport::NoState { project } => {
            println!(
                "{}",
                format!("ℹ No state recorded for project {}", project).blue()
            );
            println!("{}", "Run `vmflow create` to provision it.".dimmed());
            return Ok(());
        }
        InfoReport::Info(info) => info,
    };

    let state = &info.state;
    println!("{}", format!("Project {}", orchestrator.config().project_name).bold());
    println!("  Phase:          {}", info.phase.green());
    println!("  Resource group: {}", state.resource_group_name);
    println!(
        "  Instance:       {} ({})",
        state.instance_name,
        probed(&info.instance_status)
    );
    println!("  Power state:    {}", probed(&info.power_state));
    println!("  Size:           {}", probed(&info.vm_size));
    println!("  Disk:           {}", state.disk_name);
    println!("  Public address: {}", probed(&info.public_address));
    println!(
        "  Created:        {}",
        state.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    match &info.resources {
        Ok(names) => {
            println!("  Resources ({}):", names.len());
            for name in names {
                println!("    • {}", name);
            }
        }
        Err(e) => println!("  Resources:      {}", format!("error: {}", e).red()),
    }

    if let Some(access) = &info.remote_access {
        utils::print_remote_access(access);
    }
    println!(
        "{}",
        format!("({})", utils::format_millis(info.duration_ms)).dimmed()
    );
    Ok(())
}

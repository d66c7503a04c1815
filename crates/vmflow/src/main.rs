mod commands;
mod utils;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use vmflow_cloud::{Orchestrator, ProvisioningClient};
use vmflow_cloud_azure::AzureProvider;
use vmflow_config::ConfigLayer;

#[derive(Parser)]
#[command(name = "vmflow")]
#[command(
    about = "Create, park and recreate a cloud workstation without losing its disk",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Print the structured result as JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Call-site overrides, the highest configuration layer
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Config file (default: ./config.yaml, ./.vmflow/config.yaml, ~/.config/vmflow/config.yaml)
    #[arg(long, global = true, env = "VMFLOW_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Secrets file with ADMIN_USERNAME / ADMIN_PASSWORD (default: ./.env.secret)
    #[arg(long, global = true, env = "VMFLOW_SECRETS_PATH")]
    secrets: Option<PathBuf>,

    /// Project identifier; every resource name derives from it
    #[arg(short = 'p', long, global = true, env = "VMFLOW_PROJECT")]
    project_name: Option<String>,

    #[arg(long, global = true, env = "VMFLOW_LOCATION")]
    location: Option<String>,

    #[arg(long, global = true, env = "VMFLOW_VM_SIZE")]
    vm_size: Option<String>,

    /// Use regular (non-spot) pricing
    #[arg(long, global = true)]
    no_spot: bool,

    #[arg(long, global = true, env = "VMFLOW_ADMIN_USERNAME")]
    admin_username: Option<String>,

    #[arg(long, global = true, env = "VMFLOW_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    #[arg(long, global = true, env = "AZURE_SUBSCRIPTION_ID")]
    subscription_id: Option<String>,

    /// Skip the in-guest bootstrap after create
    #[arg(long, global = true)]
    no_bootstrap: bool,

    /// Directory for state, logs, keys and output (default: ./var)
    #[arg(long, global = true, env = "VMFLOW_WORK_DIR")]
    work_dir: Option<PathBuf>,
}

impl ConfigArgs {
    fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            project_name: self.project_name.clone(),
            location: self.location.clone(),
            vm_size: self.vm_size.clone(),
            spot: self.no_spot.then_some(false),
            admin_username: self.admin_username.clone(),
            admin_password: self.admin_password.clone(),
            subscription_id: self.subscription_id.clone(),
            bootstrap_enabled: self.no_bootstrap.then_some(false),
            work_dir: self.work_dir.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the resource group, network, disk and instance, then bootstrap it
    Create,
    /// Delete the instance but keep its disk and network
    #[command(name = "destroy-vm")]
    DestroyVm,
    /// Boot a new instance from the preserved disk
    Recreate,
    /// Show the recorded state and what the provider reports
    Info,
    /// List every resource in the project's resource group
    #[command(name = "list-resources")]
    ListResources,
    /// Delete the whole resource group and the local state
    #[command(name = "destroy-all")]
    DestroyAll {
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // No configuration needed
    if matches!(cli.command, Commands::Version) {
        println!("vmflow {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if let Err(e) = run(cli).await {
        utils::print_error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let loaded = vmflow_config::load(
        cli.config.config.as_deref(),
        cli.config.secrets.as_deref(),
        cli.config.to_layer(),
    )?;
    utils::init_logging(&loaded.config)?;

    if let Some(path) = &loaded.sources.config_file {
        tracing::debug!(path = %path.display(), "config file");
    }
    if let Some(path) = &loaded.sources.secrets_file {
        tracing::debug!(path = %path.display(), "secrets file");
    }

    let client: Arc<dyn ProvisioningClient> =
        Arc::new(AzureProvider::new(loaded.config.subscription_id.clone()));
    let mut orchestrator = Orchestrator::load(loaded.config, client).await?;

    let json = cli.json;
    match cli.command {
        Commands::Create => commands::create::handle(&mut orchestrator, json).await?,
        Commands::DestroyVm => commands::destroy_vm::handle(&mut orchestrator, json).await?,
        Commands::Recreate => commands::recreate::handle(&mut orchestrator, json).await?,
        Commands::Info => commands::info::handle(&orchestrator, json).await?,
        Commands::ListResources => commands::list_resources::handle(&orchestrator, json).await?,
        Commands::DestroyAll { yes } => {
            commands::destroy_all::handle(&mut orchestrator, yes, json).await?
        }
        Commands::Version => unreachable!("Version is handled before config loading"),
    }

    Ok(())
}

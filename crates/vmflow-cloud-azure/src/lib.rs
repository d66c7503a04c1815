//! Azure provider for vmflow
//!
//! Implements [`vmflow_cloud::ProvisioningClient`] by driving the `az` CLI.
//!
//! # Requirements
//!
//! - `az` must be installed and on `PATH`
//! - Authentication is managed through `az login`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vmflow_cloud::{Orchestrator, ProvisioningClient};
//! use vmflow_cloud_azure::AzureProvider;
//! use vmflow_config::ProjectConfig;
//!
//! async fn create(config: ProjectConfig) -> vmflow_cloud::Result<()> {
//!     let client: Arc<dyn ProvisioningClient> = Arc::new(AzureProvider::new(None));
//!     let account = client.check_connectivity().await?;
//!     println!("signed in to {}", account);
//!
//!     let mut orchestrator = Orchestrator::load(config, client).await?;
//!     orchestrator.create().await?;
//!     Ok(())
//! }
//! ```

pub mod az;
pub mod error;
pub mod provider;

pub use az::Az;
pub use error::{AzureError, Result};
pub use provider::AzureProvider;

//! Structured results of lifecycle operations

use crate::state::{LifecyclePhase, LifecycleState};
use serde::Serialize;
use std::path::Path;

/// Result of the best-effort bootstrap step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BootstrapStatus {
    Succeeded,
    /// The instance is still usable; carries the failure message
    Failed(String),
    Skipped(String),
}

/// Ready-to-use remote access commands
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteAccess {
    pub address: String,
    pub rdp: String,
    pub ssh_with_key: String,
    pub ssh: String,
}

impl RemoteAccess {
    pub fn new(address: &str, admin_username: &str, private_key: &Path) -> Self {
        Self {
            address: address.to_string(),
            rdp: format!("mstsc /v:{}", address),
            ssh_with_key: format!(
                "ssh -i {} {}@{}",
                private_key.display(),
                admin_username,
                address
            ),
            ssh: format!("ssh {}@{}", admin_username, address),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub state: LifecycleState,
    /// `None` when no address was assigned within the polling window
    pub public_address: Option<String>,
    pub bootstrap: BootstrapStatus,
    pub remote_access: Option<RemoteAccess>,
    pub duration_ms: u64,
}

/// `create` / `recreate`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    Provisioned(ProvisionReport),
    AlreadyRunning { state: LifecycleState },
}

/// `destroy-vm`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DestroyVmOutcome {
    Destroyed {
        state: LifecycleState,
        duration_ms: u64,
    },
    NothingToDestroy { phase: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyAllReport {
    pub resource_group: String,
    /// Resources that were in the group when it was deleted
    pub deleted_resources: Vec<ResourceSummary>,
    pub group_deleted: bool,
    pub state_deleted: bool,
    pub duration_ms: u64,
}

/// `destroy-all`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DestroyAllOutcome {
    Destroyed(DestroyAllReport),
    NothingToDestroy { resource_group: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub name: String,
    pub resource_type: String,
    pub location: Option<String>,
}

/// `list-resources`
#[derive(Debug, Clone, Serialize)]
pub struct ResourceListing {
    pub resource_group: String,
    pub resources: Vec<ResourceSummary>,
    pub duration_ms: u64,
}

/// A value queried from the provider, or the error that query produced
pub type Probe<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub phase: String,
    pub state: LifecycleState,
    pub instance_status: Probe<Option<String>>,
    pub power_state: Probe<Option<String>>,
    pub vm_size: Probe<Option<String>>,
    pub public_address: Probe<Option<String>>,
    pub resources: Probe<Vec<String>>,
    pub remote_access: Option<RemoteAccess>,
    pub duration_ms: u64,
}

impl InstanceInfo {
    pub fn lifecycle_phase(&self) -> LifecyclePhase {
        self.state.phase()
    }
}

/// `info`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InfoReport {
    NoState { project: String },
    Info(Box<InstanceInfo>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_access_commands() {
        let access = RemoteAccess::new("20.1.2.3", "azureuser", Path::new("var/keys/demo-ssh-key"));
        assert_eq!(access.rdp, "mstsc /v:20.1.2.3");
        assert_eq!(access.ssh_with_key, "ssh -i var/keys/demo-ssh-key azureuser@20.1.2.3");
        assert_eq!(access.ssh, "ssh azureuser@20.1.2.3");
    }
}

//! Deterministic resource names derived from the project identifier

use serde::Serialize;

/// Subnet name inside the project's virtual network
pub const SUBNET_NAME: &str = "default";

/// One name per dependent resource. Never persisted; always re-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNameSet {
    pub resource_group: String,
    pub instance: String,
    pub disk: String,
    pub network_interface: String,
    pub public_address: String,
    pub security_group: String,
    pub virtual_network: String,
    pub subnet: String,
}

impl ResourceNameSet {
    pub fn for_project(project_identifier: &str) -> Self {
        let base = normalize(project_identifier);
        let named = |suffix: &str| format!("{}-{}", base, suffix);

        Self {
            resource_group: named("rg"),
            instance: named("vm"),
            disk: named("disk"),
            network_interface: named("nic"),
            public_address: named("pip"),
            security_group: named("nsg"),
            virtual_network: named("vnet"),
            subnet: SUBNET_NAME.to_string(),
        }
    }

    /// Windows computer names are capped at 15 characters.
    pub fn computer_name(&self) -> String {
        let name: String = self.instance.chars().take(15).collect();
        name.trim_end_matches('-').to_string()
    }

    pub fn all(&self) -> [&str; 8] {
        [
            &self.resource_group,
            &self.instance,
            &self.disk,
            &self.network_interface,
            &self.public_address,
            &self.security_group,
            &self.virtual_network,
            &self.subnet,
        ]
    }
}

fn normalize(project_identifier: &str) -> String {
    project_identifier.trim().replace('_', "-")
}

//! Provisioning client trait and resource model
//!
//! The orchestrator reaches the cloud only through [`ProvisioningClient`].
//! Every mutating call returns an [`OperationHandle`] that must be awaited
//! explicitly; a call that was accepted can still fail when awaited.

use crate::error::{OperationStage, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

/// Resource kinds the orchestrator manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    ResourceGroup,
    VirtualNetwork,
    SecurityGroup,
    PublicAddress,
    NetworkInterface,
    Disk,
    Instance,
    StorageAccount,
    BlobContainer,
    Extension,
}

impl ResourceKind {
    /// Provider-side type name as reported by resource listings
    pub fn provider_type(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "Microsoft.Resources/resourceGroups",
            ResourceKind::VirtualNetwork => "Microsoft.Network/virtualNetworks",
            ResourceKind::SecurityGroup => "Microsoft.Network/networkSecurityGroups",
            ResourceKind::PublicAddress => "Microsoft.Network/publicIPAddresses",
            ResourceKind::NetworkInterface => "Microsoft.Network/networkInterfaces",
            ResourceKind::Disk => "Microsoft.Compute/disks",
            ResourceKind::Instance => "Microsoft.Compute/virtualMachines",
            ResourceKind::StorageAccount => "Microsoft.Storage/storageAccounts",
            ResourceKind::BlobContainer => {
                "Microsoft.Storage/storageAccounts/blobServices/containers"
            }
            ResourceKind::Extension => "Microsoft.Compute/virtualMachines/extensions",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::ResourceGroup => "resource group",
            ResourceKind::VirtualNetwork => "virtual network",
            ResourceKind::SecurityGroup => "security group",
            ResourceKind::PublicAddress => "public address",
            ResourceKind::NetworkInterface => "network interface",
            ResourceKind::Disk => "disk",
            ResourceKind::Instance => "instance",
            ResourceKind::StorageAccount => "storage account",
            ResourceKind::BlobContainer => "blob container",
            ResourceKind::Extension => "extension",
        };
        write!(f, "{}", label)
    }
}

/// Addresses one resource. `parent` names the owning storage account for
/// containers and the owning instance for extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub group: String,
    pub name: String,
    pub parent: Option<String>,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            group: group.into(),
            name: name.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn group(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ResourceKind::ResourceGroup, name.clone(), name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{} {}/{}", self.kind, parent, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A resource as observed at the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Opaque provider reference
    pub id: String,
    pub name: String,
    pub resource_type: String,
    pub location: Option<String>,
    /// Raw provider document
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Resource {
    /// Look up a string attribute by path, e.g. `["hardwareProfile", "vmSize"]`.
    pub fn attribute_str(&self, path: &[&str]) -> Option<&str> {
        path.iter()
            .try_fold(&self.attributes, |value, key| value.get(*key))
            .and_then(|v| v.as_str())
    }

    pub fn public_ip(&self) -> Option<&str> {
        self.attribute_str(&["ipAddress"])
            .filter(|ip| !ip.is_empty())
    }

    pub fn provisioning_state(&self) -> Option<&str> {
        self.attribute_str(&["provisioningState"])
    }

    pub fn vm_size(&self) -> Option<&str> {
        self.attribute_str(&["hardwareProfile", "vmSize"])
    }

    /// Managed OS disk of an instance document.
    pub fn os_disk_id(&self) -> Option<&str> {
        self.attribute_str(&["storageProfile", "osDisk", "managedDisk", "id"])
    }
}

/// Location and tags shared by most specs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Placement {
    pub location: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityRule {
    pub name: String,
    pub priority: u16,
    pub port: u16,
}

impl SecurityRule {
    pub fn allow_tcp(name: impl Into<String>, port: u16, priority: u16) -> Self {
        Self {
            name: name.into(),
            priority,
            port,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OsDisk {
    /// Create a fresh OS disk from a marketplace image
    FromImage {
        image: String,
        disk_name: String,
        size_gb: u32,
        sku: String,
    },
    /// Boot from an existing managed disk
    Attach {
        disk_reference: String,
        os_type: String,
    },
}

/// Spot pricing, applied identically on create and recreate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotPolicy {
    pub max_price: f64,
}

impl SpotPolicy {
    pub const MAX_PRICE: f64 = 0.5;

    pub fn capped() -> Self {
        Self {
            max_price: Self::MAX_PRICE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    pub placement: Placement,
    pub size: String,
    pub computer_name: String,
    pub os_disk: OsDisk,
    pub network_interface: String,
    /// Only used with [`OsDisk::FromImage`]
    pub admin: Option<AdminCredentials>,
    pub spot: Option<SpotPolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageCredentials {
    pub account_name: String,
    pub account_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobLocation {
    pub account: String,
    pub container: String,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobRef {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionSpec {
    pub publisher: String,
    pub extension_type: String,
    pub version: String,
    /// Public settings (e.g. `fileUris`)
    pub settings: serde_json::Value,
    /// Protected settings (command line, storage credentials)
    pub protected_settings: serde_json::Value,
}

/// Desired state for `begin_create_or_update`
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSpec {
    ResourceGroup(Placement),
    VirtualNetwork {
        placement: Placement,
        address_prefix: String,
        subnet_name: String,
        subnet_prefix: String,
    },
    SecurityGroup {
        placement: Placement,
        rules: Vec<SecurityRule>,
    },
    PublicAddress(Placement),
    NetworkInterface {
        placement: Placement,
        virtual_network: String,
        subnet: String,
        security_group: String,
        public_address: String,
    },
    Instance(Box<InstanceSpec>),
    StorageAccount(Placement),
    BlobContainer {
        credentials: StorageCredentials,
        private: bool,
    },
    Extension(ExtensionSpec),
}

/// One status line from an instance view
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusEntry {
    pub code: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
    pub display_status: Option<String>,
}

impl StatusEntry {
    pub fn is_error(&self) -> bool {
        self.level
            .as_deref()
            .is_some_and(|l| l.eq_ignore_ascii_case("error"))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionView {
    pub name: String,
    pub statuses: Vec<StatusEntry>,
    pub substatuses: Vec<StatusEntry>,
}

/// Runtime view of an instance: power state and extension results
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceView {
    pub statuses: Vec<StatusEntry>,
    pub extensions: Vec<ExtensionView>,
}

impl InstanceView {
    /// `PowerState/running` -> `running`
    pub fn power_state(&self) -> Option<&str> {
        self.statuses
            .iter()
            .filter_map(|s| s.code.as_deref())
            .find_map(|code| code.strip_prefix("PowerState/"))
    }

    pub fn extension(&self, name: &str) -> Option<&ExtensionView> {
        self.extensions
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }
}

/// A long-running provider operation
#[async_trait]
pub trait PendingOperation: Send {
    type Output: Send;

    fn description(&self) -> &str;

    /// Block until the operation reaches a terminal state.
    async fn wait(self: Box<Self>) -> Result<Self::Output>;
}

pub type OperationHandle<T = Resource> = Box<dyn PendingOperation<Output = T>>;

/// Handle for a call that finished synchronously
pub struct CompletedOperation<T> {
    description: String,
    value: T,
}

impl<T: Send + 'static> CompletedOperation<T> {
    pub fn boxed(description: impl Into<String>, value: T) -> OperationHandle<T> {
        Box::new(Self {
            description: description.into(),
            value,
        })
    }
}

#[async_trait]
impl<T: Send + 'static> PendingOperation for CompletedOperation<T> {
    type Output = T;

    fn description(&self) -> &str {
        &self.description
    }

    async fn wait(self: Box<Self>) -> Result<T> {
        Ok(self.value)
    }
}

/// Submit a mutating call. A rejected submission is tagged
/// [`OperationStage::Submit`] and logged on its own.
pub async fn submit<T, F>(operation: &str, call: F) -> Result<OperationHandle<T>>
where
    F: Future<Output = Result<OperationHandle<T>>>,
{
    tracing::debug!(operation, "submitting");
    call.await.map_err(|e| {
        let e = e.at_stage(OperationStage::Submit);
        tracing::error!(operation, error = %e, "submission rejected");
        e
    })
}

/// Await an accepted operation. A failure here is tagged
/// [`OperationStage::Await`]: the provider accepted the call but the
/// operation itself failed.
pub async fn await_operation<T: Send>(handle: OperationHandle<T>) -> Result<T> {
    let operation = handle.description().to_string();
    handle.wait().await.map_err(|e| {
        let e = e.at_stage(OperationStage::Await);
        tracing::error!(operation = %operation, error = %e, "operation failed after submission");
        e
    })
}

/// Provisioning client abstraction
///
/// `begin_create_or_update` on a resource that already exists with the same
/// identity must succeed as a no-op. `get` distinguishes "not found"
/// (`Ok(None)`) from every other failure.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Returns the provider name (e.g., "azure")
    fn name(&self) -> &str;

    /// Verify credentials and reachability; returns an account description.
    async fn check_connectivity(&self) -> Result<String>;

    async fn get(&self, id: &ResourceId) -> Result<Option<Resource>>;

    async fn begin_create_or_update(
        &self,
        id: &ResourceId,
        spec: &ResourceSpec,
    ) -> Result<OperationHandle>;

    async fn begin_delete(&self, id: &ResourceId) -> Result<OperationHandle<()>>;

    /// Every resource in a group; an absent group yields an empty list.
    async fn list_resources(&self, group: &str) -> Result<Vec<Resource>>;

    /// Whether a storage account name is free in the global namespace
    async fn storage_name_available(&self, name: &str) -> Result<bool>;

    async fn storage_account_key(&self, group: &str, account: &str)
    -> Result<StorageCredentials>;

    /// Upload, overwriting any existing blob with the same name.
    async fn upload_blob(
        &self,
        location: &BlobLocation,
        credentials: &StorageCredentials,
        content: &str,
    ) -> Result<BlobRef>;

    async fn instance_view(&self, group: &str, instance: &str) -> Result<InstanceView>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;

    #[test]
    fn test_instance_view_parses_extension_statuses() {
        let view: InstanceView = serde_json::from_value(serde_json::json!({
            "statuses": [
                {"code": "ProvisioningState/succeeded", "level": "Info"},
                {"code": "PowerState/running", "level": "Info", "displayStatus": "VM running"}
            ],
            "extensions": [{
                "name": "BootstrapSetup",
                "statuses": [{"code": "ProvisioningState/failed/3", "level": "Error", "message": "exit 1"}],
                "substatuses": []
            }]
        }))
        .unwrap();

        assert_eq!(view.power_state(), Some("running"));
        let ext = view.extension("bootstrapsetup").unwrap();
        assert!(ext.statuses[0].is_error());
        assert_eq!(ext.statuses[0].message.as_deref(), Some("exit 1"));
    }

    #[test]
    fn test_resource_attribute_lookup() {
        let resource = Resource {
            id: "/subscriptions/x/vm".into(),
            name: "demo-vm".into(),
            resource_type: ResourceKind::Instance.provider_type().into(),
            location: Some("eastus".into()),
            attributes: serde_json::json!({
                "hardwareProfile": {"vmSize": "Standard_D8s_v3"},
                "storageProfile": {"osDisk": {"managedDisk": {"id": "/subscriptions/x/disks/demo-disk"}}},
                "provisioningState": "Succeeded"
            }),
        };

        assert_eq!(resource.vm_size(), Some("Standard_D8s_v3"));
        assert_eq!(resource.os_disk_id(), Some("/subscriptions/x/disks/demo-disk"));
        assert_eq!(resource.provisioning_state(), Some("Succeeded"));
        assert_eq!(resource.public_ip(), None);
    }

    struct FailingOperation;

    #[async_trait]
    impl PendingOperation for FailingOperation {
        type Output = ();

        fn description(&self) -> &str {
            "delete instance demo-vm"
        }

        async fn wait(self: Box<Self>) -> Result<()> {
            Err(CloudError::provider(
                OperationStage::Query,
                "delete instance demo-vm",
                "OperationPreempted",
            ))
        }
    }

    #[tokio::test]
    async fn test_submit_and_await_failures_are_tagged_separately() {
        let rejected = submit::<(), _>("create group", async {
            Err(CloudError::provider(OperationStage::Query, "create group", "denied"))
        })
        .await;
        assert!(matches!(
            rejected,
            Err(CloudError::Provider { stage: OperationStage::Submit, .. })
        ));

        let handle: OperationHandle<()> = Box::new(FailingOperation);
        let accepted = submit("delete instance", async { Ok(handle) }).await.unwrap();
        assert!(matches!(
            await_operation(accepted).await,
            Err(CloudError::Provider { stage: OperationStage::Await, .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_operation_returns_value() {
        let handle = CompletedOperation::boxed("noop", 42u32);
        assert_eq!(handle.description(), "noop");
        assert_eq!(handle.wait().await.unwrap(), 42);
    }
}

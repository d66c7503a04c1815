//! Azure provisioning client
//!
//! Maps [`ProvisioningClient`] calls onto `az` commands. Instance creation,
//! instance deletion, group deletion and extension deployment are submitted
//! with `--no-wait` and awaited with the matching `az <x> wait`; everything
//! else completes synchronously and is returned as a completed handle.

use crate::az::{Az, args};
use crate::error::AzureError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use vmflow_cloud::provider::{BlobLocation, BlobRef};
use vmflow_cloud::{
    CloudError, CompletedOperation, ExtensionSpec, InstanceSpec, InstanceView, OperationHandle,
    OperationStage, OsDisk, PendingOperation, ProvisioningClient, Resource, ResourceId,
    ResourceKind, ResourceSpec, Result, StorageCredentials,
};

/// az storage commands read the account key from here when none is on the command line
const STORAGE_KEY_ENV: &str = "AZURE_STORAGE_KEY";

/// `az` command group for a resource kind
fn command_group(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::ResourceGroup => &["group"],
        ResourceKind::VirtualNetwork => &["network", "vnet"],
        ResourceKind::SecurityGroup => &["network", "nsg"],
        ResourceKind::PublicAddress => &["network", "public-ip"],
        ResourceKind::NetworkInterface => &["network", "nic"],
        ResourceKind::Disk => &["disk"],
        ResourceKind::Instance => &["vm"],
        ResourceKind::StorageAccount => &["storage", "account"],
        ResourceKind::BlobContainer => &["storage", "container"],
        ResourceKind::Extension => &["vm", "extension"],
    }
}

/// Arguments that locate one resource
fn locator(id: &ResourceId) -> Vec<String> {
    match id.kind {
        ResourceKind::ResourceGroup => args(["--name", id.name.as_str()]),
        ResourceKind::Extension => args([
            "--resource-group",
            id.group.as_str(),
            "--vm-name",
            id.parent.as_deref().unwrap_or_default(),
            "--name",
            id.name.as_str(),
        ]),
        ResourceKind::BlobContainer => args([
            "--account-name",
            id.parent.as_deref().unwrap_or_default(),
            "--name",
            id.name.as_str(),
        ]),
        _ => args([
            "--resource-group",
            id.group.as_str(),
            "--name",
            id.name.as_str(),
        ]),
    }
}

/// Write an `@file` argument. The file is private to the current user and
/// removed when dropped.
fn argument_file(contents: &str) -> crate::error::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("vmflow-").tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn command(kind: ResourceKind, verb: &str, rest: Vec<String>) -> Vec<String> {
    let mut full = args(command_group(kind));
    full.push(verb.to_string());
    full.extend(rest);
    full
}

fn tag_args(tags: &BTreeMap<String, String>) -> Vec<String> {
    if tags.is_empty() {
        return Vec::new();
    }
    let mut out = vec!["--tags".to_string()];
    out.extend(tags.iter().map(|(k, v)| format!("{}={}", k, v)));
    out
}

/// `az vm create` arguments for an instance spec
pub fn instance_create_args(id: &ResourceId, spec: &InstanceSpec) -> Vec<String> {
    let mut out = command(
        ResourceKind::Instance,
        "create",
        args([
            "--resource-group",
            id.group.as_str(),
            "--name",
            id.name.as_str(),
            "--location",
            spec.placement.location.as_str(),
            "--size",
            spec.size.as_str(),
            "--nics",
            spec.network_interface.as_str(),
            "--os-disk-delete-option",
            "Detach",
            "--nic-delete-option",
            "Detach",
        ]),
    );

    match &spec.os_disk {
        OsDisk::FromImage {
            image,
            disk_name,
            size_gb,
            sku,
        } => {
            out.extend(args([
                "--image",
                image.as_str(),
                "--os-disk-name",
                disk_name.as_str(),
                "--os-disk-size-gb",
                size_gb.to_string().as_str(),
                "--storage-sku",
                sku.as_str(),
                "--computer-name",
                spec.computer_name.as_str(),
                "--enable-auto-update",
                "false",
            ]));
            if let Some(admin) = &spec.admin {
                out.extend(args([
                    "--authentication-type",
                    "password",
                    "--admin-username",
                    admin.username.as_str(),
                    "--admin-password",
                    admin.password.as_str(),
                ]));
            }
        }
        OsDisk::Attach {
            disk_reference,
            os_type,
        } => {
            out.extend(args([
                "--attach-os-disk",
                disk_reference.as_str(),
                "--os-type",
                os_type.as_str(),
            ]));
        }
    }

    if let Some(spot) = &spec.spot {
        out.extend(args([
            "--priority",
            "Spot",
            "--eviction-policy",
            "Deallocate",
            "--max-price",
            spot.max_price.to_string().as_str(),
        ]));
    }

    out.extend(tag_args(&spec.placement.tags));
    out.push("--no-wait".to_string());
    out
}

/// Build a [`Resource`] from an ARM document.
pub fn parse_resource(value: Value, fallback_id: &str) -> Result<Resource> {
    let Value::Object(_) = &value else {
        return Err(AzureError::UnexpectedOutput(format!(
            "expected an object for {}, got {}",
            fallback_id, value
        ))
        .into_cloud(OperationStage::Query, "parse resource"));
    };

    let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

    let name = text("name").unwrap_or_else(|| fallback_id.to_string());
    Ok(Resource {
        id: text("id").unwrap_or_else(|| fallback_id.to_string()),
        resource_type: text("type").unwrap_or_default(),
        location: text("location"),
        name,
        attributes: value,
    })
}

/// A `--no-wait` submission awaited with `az <group> wait`
struct AzOperation {
    az: Az,
    description: String,
    wait_args: Vec<String>,
    show_args: Vec<String>,
    fallback_id: String,
}

#[async_trait]
impl PendingOperation for AzOperation {
    type Output = Resource;

    fn description(&self) -> &str {
        &self.description
    }

    async fn wait(self: Box<Self>) -> Result<Resource> {
        self.az
            .run_json(&self.wait_args)
            .await
            .map_err(|e| e.into_cloud(OperationStage::Await, &self.description))?;

        let value = self
            .az
            .show(&self.show_args)
            .await
            .map_err(|e| e.into_cloud(OperationStage::Await, &self.description))?
            .ok_or_else(|| {
                CloudError::provider(
                    OperationStage::Await,
                    &self.description,
                    "resource disappeared after creation",
                )
            })?;

        let resource = parse_resource(value, &self.fallback_id)?;
        if resource
            .provisioning_state()
            .is_some_and(|s| s.eq_ignore_ascii_case("failed"))
        {
            return Err(CloudError::provider(
                OperationStage::Await,
                &self.description,
                format!("{} ended in provisioning state Failed", resource.name),
            ));
        }
        Ok(resource)
    }
}

struct AzDeletion {
    az: Az,
    description: String,
    wait_args: Vec<String>,
}

#[async_trait]
impl PendingOperation for AzDeletion {
    type Output = ();

    fn description(&self) -> &str {
        &self.description
    }

    async fn wait(self: Box<Self>) -> Result<()> {
        self.az
            .run_json(&self.wait_args)
            .await
            .map_err(|e| e.into_cloud(OperationStage::Await, &self.description))?;
        Ok(())
    }
}

/// Azure provider backed by the az CLI
pub struct AzureProvider {
    az: Az,
}

impl AzureProvider {
    pub fn new(subscription: Option<String>) -> Self {
        Self {
            az: Az::new(subscription),
        }
    }

    pub fn with_az(az: Az) -> Self {
        Self { az }
    }

    async fn show_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        let operation = format!("show {}", id);
        let show = command(id.kind, "show", locator(id));
        let credentials = match id.kind {
            ResourceKind::BlobContainer => Some(
                self.storage_account_key(&id.group, id.parent.as_deref().unwrap_or_default())
                    .await?,
            ),
            _ => None,
        };
        let env: Vec<(&str, &str)> = credentials
            .iter()
            .map(|c| (STORAGE_KEY_ENV, c.account_key.as_str()))
            .collect();

        match self
            .az
            .show_with_env(&show, &env)
            .await
            .map_err(|e| e.into_cloud(OperationStage::Query, &operation))?
        {
            Some(value) => parse_resource(value, &id.to_string()).map(Some),
            None => Ok(None),
        }
    }

    /// Run a synchronous create and return the resulting resource.
    async fn create_sync(
        &self,
        id: &ResourceId,
        create_args: Vec<String>,
    ) -> Result<OperationHandle> {
        let operation = format!("create {}", id);
        self.az
            .run_json(&create_args)
            .await
            .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;

        let resource = self.show_resource(id).await?.ok_or_else(|| {
            CloudError::provider(
                OperationStage::Await,
                &operation,
                "resource not found after creation",
            )
        })?;
        Ok(CompletedOperation::boxed(operation, resource))
    }

    fn pending(&self, id: &ResourceId, wait_args: Vec<String>) -> OperationHandle {
        Box::new(AzOperation {
            az: self.az.clone(),
            description: format!("create {}", id),
            wait_args,
            show_args: command(id.kind, "show", locator(id)),
            fallback_id: id.to_string(),
        })
    }
}

#[async_trait]
impl ProvisioningClient for AzureProvider {
    fn name(&self) -> &str {
        "azure"
    }

    /// `account show` reads only the local login cache. The group listing
    /// has to reach Resource Manager.
    async fn check_connectivity(&self) -> Result<String> {
        let account = self
            .az
            .run_json(&args(["account", "show"]))
            .await
            .map_err(|e| e.into_cloud(OperationStage::Query, "account show"))?;

        self.az
            .run_json(&args(["group", "list", "--query", "[0].id"]))
            .await
            .map_err(|e| e.into_cloud(OperationStage::Query, "group list"))?;

        let name = account.get("name").and_then(Value::as_str).unwrap_or("?");
        let id = account.get("id").and_then(Value::as_str).unwrap_or("?");
        Ok(format!("{} ({})", name, id))
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<Resource>> {
        self.show_resource(id).await
    }

    async fn begin_create_or_update(
        &self,
        id: &ResourceId,
        spec: &ResourceSpec,
    ) -> Result<OperationHandle> {
        tracing::debug!(resource = %id, "create or update");

        match spec {
            ResourceSpec::ResourceGroup(placement) => {
                let mut rest = args(["--name", id.name.as_str(), "--location", placement.location.as_str()]);
                rest.extend(tag_args(&placement.tags));
                self.create_sync(id, command(id.kind, "create", rest)).await
            }
            ResourceSpec::VirtualNetwork {
                placement,
                address_prefix,
                subnet_name,
                subnet_prefix,
            } => {
                let mut rest = locator(id);
                rest.extend(args([
                    "--location",
                    placement.location.as_str(),
                    "--address-prefixes",
                    address_prefix.as_str(),
                    "--subnet-name",
                    subnet_name.as_str(),
                    "--subnet-prefixes",
                    subnet_prefix.as_str(),
                ]));
                rest.extend(tag_args(&placement.tags));
                self.create_sync(id, command(id.kind, "create", rest)).await
            }
            ResourceSpec::SecurityGroup { placement, rules } => {
                let mut rest = locator(id);
                rest.extend(args(["--location", placement.location.as_str()]));
                rest.extend(tag_args(&placement.tags));
                let operation = format!("create {}", id);
                self.az
                    .run_json(&command(id.kind, "create", rest))
                    .await
                    .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;

                for rule in rules {
                    let rule_args = args([
                        "network",
                        "nsg",
                        "rule",
                        "create",
                        "--resource-group",
                        id.group.as_str(),
                        "--nsg-name",
                        id.name.as_str(),
                        "--name",
                        rule.name.as_str(),
                        "--priority",
                        rule.priority.to_string().as_str(),
                        "--direction",
                        "Inbound",
                        "--access",
                        "Allow",
                        "--protocol",
                        "Tcp",
                        "--source-address-prefixes",
                        "*",
                        "--destination-address-prefixes",
                        "*",
                        "--destination-port-ranges",
                        rule.port.to_string().as_str(),
                    ]);
                    self.az
                        .run_json(&rule_args)
                        .await
                        .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;
                }

                let resource = self.show_resource(id).await?.ok_or_else(|| {
                    CloudError::provider(OperationStage::Await, &operation, "not found after creation")
                })?;
                Ok(CompletedOperation::boxed(operation, resource))
            }
            ResourceSpec::PublicAddress(placement) => {
                let mut rest = locator(id);
                rest.extend(args([
                    "--location",
                    placement.location.as_str(),
                    "--allocation-method",
                    "Dynamic",
                    "--sku",
                    "Basic",
                ]));
                rest.extend(tag_args(&placement.tags));
                self.create_sync(id, command(id.kind, "create", rest)).await
            }
            ResourceSpec::NetworkInterface {
                placement,
                virtual_network,
                subnet,
                security_group,
                public_address,
            } => {
                let mut rest = locator(id);
                rest.extend(args([
                    "--location",
                    placement.location.as_str(),
                    "--vnet-name",
                    virtual_network.as_str(),
                    "--subnet",
                    subnet.as_str(),
                    "--network-security-group",
                    security_group.as_str(),
                    "--public-ip-address",
                    public_address.as_str(),
                ]));
                rest.extend(tag_args(&placement.tags));
                self.create_sync(id, command(id.kind, "create", rest)).await
            }
            ResourceSpec::Instance(spec) => {
                let operation = format!("create {}", id);
                self.az
                    .run_json(&instance_create_args(id, spec))
                    .await
                    .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;
                let mut wait = command(id.kind, "wait", locator(id));
                wait.push("--created".to_string());
                Ok(self.pending(id, wait))
            }
            ResourceSpec::StorageAccount(placement) => {
                let mut rest = locator(id);
                rest.extend(args([
                    "--location",
                    placement.location.as_str(),
                    "--sku",
                    "Standard_LRS",
                    "--kind",
                    "StorageV2",
                    "--allow-blob-public-access",
                    "false",
                    "--min-tls-version",
                    "TLS1_2",
                ]));
                rest.extend(tag_args(&placement.tags));
                self.create_sync(id, command(id.kind, "create", rest)).await
            }
            ResourceSpec::BlobContainer {
                credentials,
                private,
            } => {
                let mut rest = locator(id);
                rest.extend(args([
                    "--public-access",
                    if *private { "off" } else { "blob" },
                ]));
                let operation = format!("create {}", id);
                self.az
                    .run_json_with_env(
                        &command(id.kind, "create", rest),
                        &[(STORAGE_KEY_ENV, credentials.account_key.as_str())],
                    )
                    .await
                    .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;

                let resource = Resource {
                    id: format!(
                        "https://{}.blob.core.windows.net/{}",
                        credentials.account_name, id.name
                    ),
                    name: id.name.clone(),
                    resource_type: ResourceKind::BlobContainer.provider_type().to_string(),
                    location: None,
                    attributes: Value::Null,
                };
                Ok(CompletedOperation::boxed(operation, resource))
            }
            ResourceSpec::Extension(spec) => {
                let operation = format!("create {}", id);
                let protected = argument_file(&spec.protected_settings.to_string())
                    .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;
                let set = extension_set_args(id, spec, protected.path());
                self.az
                    .run_json(&set)
                    .await
                    .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;

                let mut wait = command(id.kind, "wait", locator(id));
                wait.push("--created".to_string());
                Ok(self.pending(id, wait))
            }
        }
    }

    async fn begin_delete(&self, id: &ResourceId) -> Result<OperationHandle<()>> {
        let operation = format!("delete {}", id);
        let mut delete = command(id.kind, "delete", locator(id));

        match id.kind {
            ResourceKind::ResourceGroup | ResourceKind::Instance => {
                delete.extend(args(["--yes", "--no-wait"]));
                self.az
                    .run_json(&delete)
                    .await
                    .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;

                let mut wait = command(id.kind, "wait", locator(id));
                wait.push("--deleted".to_string());
                Ok(Box::new(AzDeletion {
                    az: self.az.clone(),
                    description: operation,
                    wait_args: wait,
                }))
            }
            kind => {
                if kind == ResourceKind::Disk {
                    delete.push("--yes".to_string());
                }
                self.az
                    .run_json(&delete)
                    .await
                    .map_err(|e| e.into_cloud(OperationStage::Submit, &operation))?;
                Ok(CompletedOperation::boxed(operation, ()))
            }
        }
    }

    async fn list_resources(&self, group: &str) -> Result<Vec<Resource>> {
        let operation = format!("list resources in {}", group);
        let exists = self
            .az
            .run_json(&args(["group", "exists", "--name", group]))
            .await
            .map_err(|e| e.into_cloud(OperationStage::Query, &operation))?;
        if exists != Value::Bool(true) {
            return Ok(Vec::new());
        }

        let listing = self
            .az
            .run_json(&args(["resource", "list", "--resource-group", group]))
            .await
            .map_err(|e| e.into_cloud(OperationStage::Query, &operation))?;

        match listing {
            Value::Array(items) => items
                .into_iter()
                .map(|item| parse_resource(item, group))
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(AzureError::UnexpectedOutput(format!("resource list returned {}", other))
                .into_cloud(OperationStage::Query, operation)),
        }
    }

    async fn storage_name_available(&self, name: &str) -> Result<bool> {
        let result = self
            .az
            .run_json(&args(["storage", "account", "check-name", "--name", name]))
            .await
            .map_err(|e| e.into_cloud(OperationStage::Query, "storage account check-name"))?;

        result
            .get("nameAvailable")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                AzureError::UnexpectedOutput(format!("check-name returned {}", result))
                    .into_cloud(OperationStage::Query, "storage account check-name")
            })
    }

    async fn storage_account_key(
        &self,
        group: &str,
        account: &str,
    ) -> Result<StorageCredentials> {
        let operation = format!("list keys for storage account {}", account);
        let keys = self
            .az
            .run_json(&args([
                "storage",
                "account",
                "keys",
                "list",
                "--resource-group",
                group,
                "--account-name",
                account,
            ]))
            .await
            .map_err(|e| e.into_cloud(OperationStage::Query, &operation))?;

        let key = keys
            .get(0)
            .and_then(|k| k.get("value"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AzureError::UnexpectedOutput("no storage account key returned".to_string())
                    .into_cloud(OperationStage::Query, &operation)
            })?;

        Ok(StorageCredentials {
            account_name: account.to_string(),
            account_key: key.to_string(),
        })
    }

    async fn upload_blob(
        &self,
        location: &BlobLocation,
        credentials: &StorageCredentials,
        content: &str,
    ) -> Result<BlobRef> {
        let payload = argument_file(content)
            .map_err(|e| e.into_cloud(OperationStage::Submit, "upload bootstrap blob"))?;
        self.az
            .run_json_with_env(
                &blob_upload_args(location, payload.path()),
                &[(STORAGE_KEY_ENV, credentials.account_key.as_str())],
            )
            .await
            .map_err(|e| e.into_cloud(OperationStage::Submit, "upload bootstrap blob"))?;

        Ok(BlobRef {
            url: blob_url(location),
        })
    }

    async fn instance_view(&self, group: &str, instance: &str) -> Result<InstanceView> {
        let operation = format!("get instance view of {}", instance);
        let value = self
            .az
            .run_json(&args([
                "vm",
                "get-instance-view",
                "--resource-group",
                group,
                "--name",
                instance,
            ]))
            .await
            .map_err(|e| e.into_cloud(OperationStage::Query, &operation))?;

        parse_instance_view(value)
    }
}

/// `vm extension set` with the protected settings read from a file
pub fn extension_set_args(
    id: &ResourceId,
    spec: &ExtensionSpec,
    protected_settings: &Path,
) -> Vec<String> {
    args([
        "vm",
        "extension",
        "set",
        "--resource-group",
        id.group.as_str(),
        "--vm-name",
        id.parent.as_deref().unwrap_or_default(),
        "--name",
        spec.extension_type.as_str(),
        "--extension-instance-name",
        id.name.as_str(),
        "--publisher",
        spec.publisher.as_str(),
        "--version",
        spec.version.as_str(),
        "--settings",
        spec.settings.to_string().as_str(),
        "--protected-settings",
        format!("@{}", protected_settings.display()).as_str(),
        "--no-wait",
    ])
}

pub fn blob_upload_args(location: &BlobLocation, payload: &Path) -> Vec<String> {
    args([
        "storage",
        "blob",
        "upload",
        "--account-name",
        location.account.as_str(),
        "--container-name",
        location.container.as_str(),
        "--name",
        location.blob.as_str(),
        "--file",
        &*payload.to_string_lossy(),
        "--overwrite",
    ])
}

pub fn blob_url(location: &BlobLocation) -> String {
    format!(
        "https://{}.blob.core.windows.net/{}/{}",
        location.account, location.container, location.blob
    )
}

/// `az vm get-instance-view` nests the view under `instanceView`.
pub fn parse_instance_view(mut value: Value) -> Result<InstanceView> {
    let view = value
        .get_mut("instanceView")
        .map(Value::take)
        .unwrap_or(Value::Null);
    if view.is_null() {
        return Ok(InstanceView::default());
    }
    Ok(serde_json::from_value(view)?)
}

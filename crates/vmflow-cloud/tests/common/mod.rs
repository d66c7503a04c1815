use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use vmflow_cloud::provider::{BlobLocation, BlobRef, StatusEntry};
use vmflow_cloud::{
    CloudError, CompletedOperation, InstanceView, OperationHandle, OperationStage, OsDisk,
    PendingOperation, ProvisioningClient, Resource, ResourceId, ResourceKind, ResourceSpec,
    Result, StorageCredentials,
};
use vmflow_config::{ConfigLayer, ProjectConfig};

type Key = (ResourceKind, String, Option<String>);

#[derive(Default)]
struct Inner {
    resources: BTreeMap<Key, (String, Resource)>,
    calls: Vec<String>,
    generation: u32,
    specs: Vec<(ResourceId, ResourceSpec)>,
    blobs: BTreeMap<String, String>,
    rejected_storage_names: usize,
    public_ip_available: bool,
    extension_error: Option<String>,
    unreachable: bool,
    fail_await: Option<ResourceKind>,
    /// Kind whose `get` fails once the given number of lookups succeeded
    fail_get: Option<(ResourceKind, usize)>,
}

/// In-memory provisioning client that records every call
#[derive(Clone)]
pub struct FakeCloud {
    inner: Arc<Mutex<Inner>>,
}

#[allow(dead_code)]
impl FakeCloud {
    pub fn new() -> Self {
        let inner = Inner {
            public_ip_available: true,
            ..Default::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn client(&self) -> Arc<dyn ProvisioningClient> {
        Arc::new(self.clone())
    }

    pub fn set_public_ip_available(&self, available: bool) {
        self.inner.lock().unwrap().public_ip_available = available;
    }

    pub fn set_extension_error(&self, message: &str) {
        self.inner.lock().unwrap().extension_error = Some(message.to_string());
    }

    pub fn set_unreachable(&self) {
        self.inner.lock().unwrap().unreachable = true;
    }

    pub fn fail_await_for(&self, kind: ResourceKind) {
        self.inner.lock().unwrap().fail_await = Some(kind);
    }

    pub fn fail_get_for(&self, kind: ResourceKind) {
        self.fail_get_after(kind, 0);
    }

    /// Let `successes` lookups of `kind` through, then fail every later one.
    pub fn fail_get_after(&self, kind: ResourceKind, successes: usize) {
        self.inner.lock().unwrap().fail_get = Some((kind, successes));
    }

    /// Report the next `count` storage account names as taken.
    pub fn reject_storage_names(&self, count: usize) {
        self.inner.lock().unwrap().rejected_storage_names = count;
    }

    /// Put a resource in place as if created out of band.
    pub fn seed(&self, kind: ResourceKind, group: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        insert(&mut inner, kind, group, name, None);
    }

    pub fn remove(&self, kind: ResourceKind, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .resources
            .retain(|(k, n, _), _| !(*k == kind && n == name));
    }

    pub fn exists(&self, kind: ResourceKind, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .resources
            .keys()
            .any(|(k, n, _)| *k == kind && n == name)
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn specs_for(&self, kind: ResourceKind) -> Vec<ResourceSpec> {
        self.inner
            .lock()
            .unwrap()
            .specs
            .iter()
            .filter(|(id, _)| id.kind == kind)
            .map(|(_, spec)| spec.clone())
            .collect()
    }

    pub fn blob(&self, url: &str) -> Option<String> {
        self.inner.lock().unwrap().blobs.get(url).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.inner.lock().unwrap().blobs.len()
    }
}

fn insert(
    inner: &mut Inner,
    kind: ResourceKind,
    group: &str,
    name: &str,
    parent: Option<String>,
) -> Resource {
    let key = (kind, name.to_string(), parent.clone());
    if let Some((_, existing)) = inner.resources.get(&key) {
        return existing.clone();
    }

    inner.generation += 1;
    let mut id = format!(
        "/subscriptions/fake/resourceGroups/{}/providers/{}/{}",
        group,
        kind.provider_type(),
        name
    );
    if kind == ResourceKind::Instance {
        id = format!("{}?generation={}", id, inner.generation);
    }

    let attributes = match kind {
        ResourceKind::PublicAddress if inner.public_ip_available => {
            serde_json::json!({"ipAddress": "20.42.0.7", "provisioningState": "Succeeded"})
        }
        ResourceKind::Instance => serde_json::json!({
            "provisioningState": "Succeeded",
            "hardwareProfile": {"vmSize": "Standard_D8s_v3"}
        }),
        _ => serde_json::json!({"provisioningState": "Succeeded"}),
    };

    let resource = Resource {
        id,
        name: name.to_string(),
        resource_type: kind.provider_type().to_string(),
        location: Some("eastus".to_string()),
        attributes,
    };
    inner
        .resources
        .insert(key, (group.to_string(), resource.clone()));
    resource
}

struct FailedOperation {
    description: String,
}

#[async_trait]
impl PendingOperation for FailedOperation {
    type Output = Resource;

    fn description(&self) -> &str {
        &self.description
    }

    async fn wait(self: Box<Self>) -> Result<Resource> {
        Err(CloudError::provider(
            OperationStage::Query,
            self.description,
            "OperationFailed",
        ))
    }
}

#[async_trait]
impl ProvisioningClient for FakeCloud {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check_connectivity(&self) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push("check_connectivity".to_string());
        if inner.unreachable {
            return Err(CloudError::provider(
                OperationStage::Query,
                "account show",
                "not logged in",
            ));
        }
        Ok("fake-subscription".to_string())
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<Resource>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("get {:?} {}", id.kind, id.name));
        if let Some((kind, remaining)) = inner.fail_get.as_mut() {
            if *kind == id.kind {
                if *remaining == 0 {
                    return Err(CloudError::provider(
                        OperationStage::Query,
                        format!("show {}", id),
                        "throttled",
                    ));
                }
                *remaining -= 1;
            }
        }
        let key = (id.kind, id.name.clone(), id.parent.clone());
        Ok(inner.resources.get(&key).map(|(_, r)| r.clone()))
    }

    async fn begin_create_or_update(
        &self,
        id: &ResourceId,
        spec: &ResourceSpec,
    ) -> Result<OperationHandle> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("create {:?} {}", id.kind, id.name));
        inner.specs.push((id.clone(), spec.clone()));

        if inner.fail_await == Some(id.kind) {
            return Ok(Box::new(FailedOperation {
                description: format!("create {}", id),
            }));
        }

        let os_disk = match spec {
            ResourceSpec::Instance(instance) => match &instance.os_disk {
                OsDisk::FromImage { disk_name, .. } => {
                    Some(insert(&mut inner, ResourceKind::Disk, &id.group, disk_name, None).id)
                }
                OsDisk::Attach { disk_reference, .. } => Some(disk_reference.clone()),
            },
            _ => None,
        };

        let mut resource = insert(&mut inner, id.kind, &id.group, &id.name, id.parent.clone());
        if let Some(disk) = os_disk {
            resource.attributes["storageProfile"] =
                serde_json::json!({"osDisk": {"managedDisk": {"id": disk}}});
            let key = (id.kind, id.name.clone(), id.parent.clone());
            if let Some((_, stored)) = inner.resources.get_mut(&key) {
                stored.attributes = resource.attributes.clone();
            }
        }
        Ok(CompletedOperation::boxed(format!("create {}", id), resource))
    }

    async fn begin_delete(&self, id: &ResourceId) -> Result<OperationHandle<()>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("delete {:?} {}", id.kind, id.name));

        match id.kind {
            ResourceKind::ResourceGroup => {
                inner.resources.retain(|_, (group, _)| *group != id.name);
            }
            kind => {
                let name = id.name.clone();
                inner
                    .resources
                    .retain(|(k, n, _), _| !(*k == kind && *n == name));
            }
        }
        Ok(CompletedOperation::boxed(format!("delete {}", id), ()))
    }

    async fn list_resources(&self, group: &str) -> Result<Vec<Resource>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("list {}", group));
        Ok(inner
            .resources
            .iter()
            .filter(|((kind, _, parent), (g, _))| {
                g == group && *kind != ResourceKind::ResourceGroup && parent.is_none()
            })
            .map(|(_, (_, r))| r.clone())
            .collect())
    }

    async fn storage_name_available(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("check-name {}", name));
        if inner.rejected_storage_names > 0 {
            inner.rejected_storage_names -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn storage_account_key(
        &self,
        _group: &str,
        account: &str,
    ) -> Result<StorageCredentials> {
        Ok(StorageCredentials {
            account_name: account.to_string(),
            account_key: "ZmFrZS1rZXk=".to_string(),
        })
    }

    async fn upload_blob(
        &self,
        location: &BlobLocation,
        _credentials: &StorageCredentials,
        content: &str,
    ) -> Result<BlobRef> {
        let url = format!(
            "https://{}.blob.core.windows.net/{}/{}",
            location.account, location.container, location.blob
        );
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("upload {}", url));
        inner.blobs.insert(url.clone(), content.to_string());
        Ok(BlobRef { url })
    }

    async fn instance_view(&self, _group: &str, _instance: &str) -> Result<InstanceView> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push("instance_view".to_string());

        let extension_status = match &inner.extension_error {
            Some(message) => StatusEntry {
                code: Some("ProvisioningState/failed/1".to_string()),
                level: Some("Error".to_string()),
                message: Some(message.clone()),
                display_status: Some("Provisioning failed".to_string()),
            },
            None => StatusEntry {
                code: Some("ProvisioningState/succeeded".to_string()),
                level: Some("Info".to_string()),
                message: Some("Finished executing command".to_string()),
                display_status: Some("Provisioning succeeded".to_string()),
            },
        };

        Ok(serde_json::from_value(serde_json::json!({
            "statuses": [
                {"code": "ProvisioningState/succeeded", "level": "Info"},
                {"code": "PowerState/running", "level": "Info"}
            ],
            "extensions": [{
                "name": "BootstrapSetup",
                "statuses": [extension_status],
                "substatuses": []
            }]
        }))?)
    }
}

/// A work directory with SSH keys already in place so no `ssh-keygen` runs
#[allow(dead_code)]
pub struct TestProject {
    pub root: TempDir,
}

#[allow(dead_code)]
impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let keys = root.path().join("keys");
        std::fs::create_dir_all(&keys).unwrap();
        std::fs::write(keys.join("test-key"), "PRIVATE").unwrap();
        std::fs::write(keys.join("test-key.pub"), "ssh-rsa AAAAtest azureuser@demo\n").unwrap();
        Self { root }
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn layer(&self, project: &str) -> ConfigLayer {
        ConfigLayer {
            project_name: Some(project.to_string()),
            location: Some("eastus".to_string()),
            admin_password: Some("S3cret!pass".to_string()),
            work_dir: Some(self.path()),
            ssh_key_path: Some(self.path().join("keys").join("test-key")),
            address_poll_interval_secs: Some(1),
            address_poll_timeout_secs: Some(5),
            ..Default::default()
        }
    }

    pub fn config(&self, project: &str) -> ProjectConfig {
        vmflow_config::resolve([self.layer(project)])
    }

    pub fn config_with(&self, project: &str, layer: ConfigLayer) -> ProjectConfig {
        vmflow_config::resolve([self.layer(project), layer])
    }

    pub fn state_file(&self, project: &str) -> PathBuf {
        self.path()
            .join("state")
            .join(format!("{}_state.json", project))
    }
}

//! Lifecycle orchestrator
//!
//! Sequences the provisioning client, bootstrap deployer and state store to
//! implement create, destroy-vm, recreate, destroy-all, info and
//! list-resources for one project.
//!
//! ```text
//!            create                destroy-vm
//!  Absent ───────────▶ Running ───────────────▶ DiskOnly
//!    ▲                    ▲                        │
//!    │                    └──────── recreate ──────┘
//!    └──────────────── destroy-all (any) ──────────┘
//! ```
//!
//! `instance_exists` only flips after the provider confirms the matching
//! operation; state is written right after each confirmed transition.

use crate::artifact::AddressArtifact;
use crate::bootstrap::{
    BootstrapDeployer, BootstrapParameters, BootstrapTarget, BootstrapTemplate, DeployResult,
};
use crate::error::{CloudError, Result};
use crate::keys;
use crate::naming::ResourceNameSet;
use crate::outcome::{
    BootstrapStatus, DestroyAllOutcome, DestroyAllReport, DestroyVmOutcome, InfoReport,
    InstanceInfo, Probe, ProvisionOutcome, ProvisionReport, RemoteAccess, ResourceListing,
    ResourceSummary,
};
use crate::provider::{
    AdminCredentials, InstanceSpec, OsDisk, Placement, ProvisioningClient, Resource, ResourceId,
    ResourceKind, ResourceSpec, SecurityRule, SpotPolicy, await_operation, submit,
};
use crate::scripts::BOOTSTRAP_LOG_PATH;
use crate::state::{LifecyclePhase, LifecycleState, STATE_VERSION, StateManager};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use vmflow_config::ProjectConfig;

const VNET_ADDRESS_PREFIX: &str = "10.0.0.0/16";
const SUBNET_ADDRESS_PREFIX: &str = "10.0.0.0/24";
const OS_DISK_SKU: &str = "Premium_LRS";
const ATTACHED_OS_TYPE: &str = "Windows";
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Network references an instance is built on
#[derive(Debug, Clone)]
struct NetworkRefs {
    network_interface: String,
    public_address: String,
}

/// Per-invocation context: configuration, derived names, the provider client
/// and the loaded state.
pub struct Orchestrator {
    config: ProjectConfig,
    names: ResourceNameSet,
    client: Arc<dyn ProvisioningClient>,
    store: StateManager,
    artifact: AddressArtifact,
    state: Option<LifecycleState>,
}

impl Orchestrator {
    /// Build the context and load persisted state.
    ///
    /// A corrupt state record is logged and treated as absent.
    pub async fn load(config: ProjectConfig, client: Arc<dyn ProvisioningClient>) -> Result<Self> {
        config
            .validate_identity()
            .map_err(|e| CloudError::ConfigurationInvalid(e.to_string()))?;

        let names = ResourceNameSet::for_project(&config.project_name);
        let store = StateManager::new(config.state_dir());
        let artifact = AddressArtifact::new(config.output_dir(), &config.project_name);

        let state = match store.load(&config.project_name).await {
            Ok(state) => state,
            Err(CloudError::CorruptState(reason)) => {
                tracing::warn!(%reason, "ignoring unreadable state record");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            config,
            names,
            client,
            store,
            artifact,
            state,
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn names(&self) -> &ResourceNameSet {
        &self.names
    }

    pub fn state(&self) -> Option<&LifecycleState> {
        self.state.as_ref()
    }

    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::of(self.state.as_ref())
    }

    pub fn artifact(&self) -> &AddressArtifact {
        &self.artifact
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Provision network, disk and instance from scratch.
    pub async fn create(&mut self) -> Result<ProvisionOutcome> {
        let started = Instant::now();
        self.check_resource_group()?;

        if let Some(state) = &self.state {
            return Err(CloudError::AlreadyProvisioned {
                project: self.config.project_name.clone(),
                reason: format!("local state records phase '{}'", state.phase()),
            });
        }

        self.config
            .validate()
            .map_err(|e| CloudError::ConfigurationInvalid(e.to_string()))?;
        self.check_connectivity().await?;

        tracing::info!(
            project = %self.config.project_name,
            location = %self.config.location,
            resource_group = %self.names.resource_group,
            "creating instance"
        );

        self.ensure_resource_group().await?;

        // The disk can outlive a lost state file.
        if self.client.get(&self.disk_id()).await?.is_some() {
            return Err(CloudError::AlreadyProvisioned {
                project: self.config.project_name.clone(),
                reason: format!("disk '{}' already exists", self.names.disk),
            });
        }

        let network = self.ensure_network().await?;

        let spec = self.instance_spec(
            OsDisk::FromImage {
                image: self.config.image.clone(),
                disk_name: self.names.disk.clone(),
                size_gb: self.config.disk_size_gb,
                sku: OS_DISK_SKU.to_string(),
            },
            &network,
        );
        let (instance, public_address) = self.provision_instance(spec).await?;

        // No further provider query before the confirmed instance is recorded.
        let disk_reference = instance
            .os_disk_id()
            .map(str::to_string)
            .unwrap_or_else(|| self.names.disk.clone());

        let mut state = LifecycleState {
            version: STATE_VERSION,
            instance_name: self.names.instance.clone(),
            resource_group_name: self.names.resource_group.clone(),
            disk_name: self.names.disk.clone(),
            disk_resource_reference: disk_reference,
            network_interface_reference: network.network_interface,
            public_address_reference: network.public_address,
            created_at: Utc::now(),
            instance_resource_reference: None,
            instance_exists: false,
        };
        state.mark_running(instance.id);
        self.commit(state.clone()).await?;

        let bootstrap = if self.config.bootstrap_enabled {
            self.run_bootstrap().await
        } else {
            BootstrapStatus::Skipped("disabled in configuration".to_string())
        };

        Ok(self.provisioned(state, public_address, bootstrap, started))
    }

    /// Delete the instance and keep disk and network.
    pub async fn destroy_vm(&mut self) -> Result<DestroyVmOutcome> {
        let started = Instant::now();
        self.check_resource_group()?;

        let Some(state) = self.state.clone().filter(|s| s.instance_exists) else {
            tracing::info!(phase = %self.phase(), "no running instance, nothing to destroy");
            return Ok(DestroyVmOutcome::NothingToDestroy {
                phase: self.phase().to_string(),
            });
        };

        tracing::info!(instance = %state.instance_name, "deleting instance, keeping disk");

        let handle = submit(
            "delete instance",
            self.client.begin_delete(&self.instance_id()),
        )
        .await?;
        await_operation(handle).await?;

        let mut state = state;
        state.mark_disk_only();
        self.commit(state.clone()).await?;

        tracing::info!(
            disk = %state.disk_name,
            elapsed = ?started.elapsed(),
            "instance deleted, disk preserved"
        );

        Ok(DestroyVmOutcome::Destroyed {
            state,
            duration_ms: elapsed_ms(started),
        })
    }

    /// Boot a new instance from the preserved disk.
    pub async fn recreate(&mut self) -> Result<ProvisionOutcome> {
        let started = Instant::now();
        self.check_resource_group()?;

        let state = match self.state.clone() {
            None => {
                return Err(CloudError::NoPriorState(self.config.project_name.clone()));
            }
            Some(state) if state.instance_exists => {
                tracing::warn!(instance = %state.instance_name, "instance is already running");
                return Ok(ProvisionOutcome::AlreadyRunning { state });
            }
            Some(state) => state,
        };

        self.check_connectivity().await?;

        let disk = self
            .client
            .get(&self.disk_id())
            .await?
            .ok_or_else(|| CloudError::MissingDisk(state.disk_name.clone()))?;
        tracing::info!(disk = %disk.name, "recreating instance from preserved disk");

        let network = match self.client.get(&self.nic_id()).await? {
            Some(nic) => NetworkRefs {
                network_interface: nic.id,
                public_address: state.public_address_reference.clone(),
            },
            None => {
                tracing::warn!(nic = %self.names.network_interface, "network interface missing, rebuilding network");
                self.ensure_network().await?
            }
        };

        let spec = self.instance_spec(
            OsDisk::Attach {
                disk_reference: disk.id.clone(),
                os_type: ATTACHED_OS_TYPE.to_string(),
            },
            &network,
        );
        let (instance, public_address) = self.provision_instance(spec).await?;

        let mut state = state;
        state.disk_resource_reference = disk.id;
        state.network_interface_reference = network.network_interface;
        state.public_address_reference = network.public_address;
        state.mark_running(instance.id);
        self.commit(state.clone()).await?;

        // The preserved disk already carries the in-guest configuration.
        let bootstrap = BootstrapStatus::Skipped("disk already bootstrapped".to_string());

        Ok(self.provisioned(state, public_address, bootstrap, started))
    }

    /// Delete the whole resource group and the local state.
    ///
    /// Confirmation is the caller's responsibility.
    pub async fn destroy_all(&mut self) -> Result<DestroyAllOutcome> {
        let started = Instant::now();
        self.check_resource_group()?;

        let group_id = ResourceId::group(&self.names.resource_group);
        let group_exists = self.client.get(&group_id).await?.is_some();

        if !group_exists && self.state.is_none() {
            tracing::info!(resource_group = %self.names.resource_group, "nothing to destroy");
            self.artifact.remove().await?;
            return Ok(DestroyAllOutcome::NothingToDestroy {
                resource_group: self.names.resource_group.clone(),
            });
        }

        let mut deleted_resources = Vec::new();
        if group_exists {
            let resources = self.client.list_resources(&self.names.resource_group).await?;
            for resource in &resources {
                tracing::info!(
                    name = %resource.name,
                    resource_type = %resource.resource_type,
                    "will delete"
                );
            }
            deleted_resources = resources.iter().map(summarize).collect();

            let handle = submit(
                "delete resource group",
                self.client.begin_delete(&group_id),
            )
            .await?;
            await_operation(handle).await?;
            tracing::info!(
                resource_group = %self.names.resource_group,
                count = deleted_resources.len(),
                elapsed = ?started.elapsed(),
                "resource group deleted"
            );
        } else {
            tracing::warn!(
                resource_group = %self.names.resource_group,
                "resource group not found at provider, removing local state only"
            );
        }

        let state_deleted = self.state.take().is_some();
        self.store.delete(&self.config.project_name).await?;
        self.artifact.remove().await?;

        Ok(DestroyAllOutcome::Destroyed(DestroyAllReport {
            resource_group: self.names.resource_group.clone(),
            deleted_resources,
            group_deleted: group_exists,
            state_deleted,
            duration_ms: elapsed_ms(started),
        }))
    }

    /// Read-only status. Provider query failures are reported per field.
    pub async fn info(&self) -> Result<InfoReport> {
        let started = Instant::now();
        self.check_resource_group()?;

        let Some(state) = self.state.clone() else {
            return Ok(InfoReport::NoState {
                project: self.config.project_name.clone(),
            });
        };

        let (instance_status, vm_size, power_state) = if state.instance_exists {
            let (instance_status, vm_size) = match self.client.get(&self.instance_id()).await {
                Ok(Some(instance)) => (
                    Ok(Some(
                        instance.provisioning_state().unwrap_or("unknown").to_string(),
                    )),
                    Ok(instance.vm_size().map(str::to_string)),
                ),
                Ok(None) => (Ok(Some("not found".to_string())), Ok(None)),
                Err(e) => (Err(e.to_string()), Err(e.to_string())),
            };
            let power_state = probe(
                self.client
                    .instance_view(&self.names.resource_group, &self.names.instance)
                    .await
                    .map(|view| view.power_state().map(str::to_string)),
            );
            (instance_status, vm_size, power_state)
        } else {
            (
                Ok(Some("deleted (disk preserved)".to_string())),
                Ok(None),
                Ok(None),
            )
        };

        let public_address: Probe<Option<String>> = if state.instance_exists {
            probe(
                self.client
                    .get(&self.pip_id())
                    .await
                    .map(|pip| pip.as_ref().and_then(|r| r.public_ip()).map(str::to_string)),
            )
        } else {
            Ok(None)
        };

        if let Ok(Some(address)) = &public_address {
            if let Err(e) = self.artifact.write(address).await {
                tracing::warn!(error = %e, "could not refresh address artifact");
            }
        }

        let resources = probe(
            self.client
                .list_resources(&self.names.resource_group)
                .await
                .map(|list| list.into_iter().map(|r| r.name).collect()),
        );

        let remote_access = public_address
            .as_ref()
            .ok()
            .and_then(|a| a.as_deref())
            .map(|address| self.remote_access(address));

        Ok(InfoReport::Info(Box::new(InstanceInfo {
            phase: state.phase().to_string(),
            state,
            instance_status,
            power_state,
            vm_size,
            public_address,
            resources,
            remote_access,
            duration_ms: elapsed_ms(started),
        })))
    }

    /// Every resource in the project's resource group.
    pub async fn list_resources(&self) -> Result<ResourceListing> {
        let started = Instant::now();
        self.check_resource_group()?;

        let resources = self
            .client
            .list_resources(&self.names.resource_group)
            .await?;

        Ok(ResourceListing {
            resource_group: self.names.resource_group.clone(),
            resources: resources.iter().map(summarize).collect(),
            duration_ms: elapsed_ms(started),
        })
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    fn check_resource_group(&self) -> Result<()> {
        match &self.state {
            Some(state) if state.resource_group_name != self.names.resource_group => {
                tracing::error!(
                    recorded = %state.resource_group_name,
                    expected = %self.names.resource_group,
                    "resource group mismatch"
                );
                Err(CloudError::ResourceGroupMismatch {
                    recorded: state.resource_group_name.clone(),
                    expected: self.names.resource_group.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn check_connectivity(&self) -> Result<()> {
        let account = self
            .client
            .check_connectivity()
            .await
            .map_err(|e| CloudError::Connectivity(e.to_string()))?;
        tracing::info!(provider = self.client.name(), %account, "provider reachable");
        Ok(())
    }

    async fn ensure_resource_group(&self) -> Result<Resource> {
        let started = Instant::now();
        let handle = submit(
            "create resource group",
            self.client.begin_create_or_update(
                &ResourceId::group(&self.names.resource_group),
                &ResourceSpec::ResourceGroup(self.placement()),
            ),
        )
        .await?;
        let group = await_operation(handle).await?;
        tracing::info!(resource_group = %group.name, elapsed = ?started.elapsed(), "resource group ready");
        Ok(group)
    }

    /// Virtual network with subnet, security group, public address and NIC.
    /// Every call is an idempotent create.
    async fn ensure_network(&self) -> Result<NetworkRefs> {
        let started = Instant::now();
        let placement = self.placement();
        let group = &self.names.resource_group;

        self.ensure(
            ResourceId::new(ResourceKind::VirtualNetwork, group, &self.names.virtual_network),
            ResourceSpec::VirtualNetwork {
                placement: placement.clone(),
                address_prefix: VNET_ADDRESS_PREFIX.to_string(),
                subnet_name: self.names.subnet.clone(),
                subnet_prefix: SUBNET_ADDRESS_PREFIX.to_string(),
            },
        )
        .await?;

        self.ensure(
            ResourceId::new(ResourceKind::SecurityGroup, group, &self.names.security_group),
            ResourceSpec::SecurityGroup {
                placement: placement.clone(),
                rules: vec![
                    SecurityRule::allow_tcp("AllowRDP", 3389, 1000),
                    SecurityRule::allow_tcp("AllowSSH", 22, 1001),
                ],
            },
        )
        .await?;

        let public_address = self
            .ensure(self.pip_id(), ResourceSpec::PublicAddress(placement.clone()))
            .await?;

        let nic = self
            .ensure(
                self.nic_id(),
                ResourceSpec::NetworkInterface {
                    placement,
                    virtual_network: self.names.virtual_network.clone(),
                    subnet: self.names.subnet.clone(),
                    security_group: self.names.security_group.clone(),
                    public_address: self.names.public_address.clone(),
                },
            )
            .await?;

        tracing::info!(elapsed = ?started.elapsed(), "network ready");
        Ok(NetworkRefs {
            network_interface: nic.id,
            public_address: public_address.id,
        })
    }

    async fn ensure(&self, id: ResourceId, spec: ResourceSpec) -> Result<Resource> {
        let operation = format!("create {}", id);
        let handle = submit(&operation, self.client.begin_create_or_update(&id, &spec)).await?;
        let resource = await_operation(handle).await?;
        tracing::debug!(resource = %id, "ready");
        Ok(resource)
    }

    /// Submit the instance, poll for its address while the provider works,
    /// then await the instance.
    async fn provision_instance(
        &self,
        spec: InstanceSpec,
    ) -> Result<(Resource, Option<String>)> {
        let started = Instant::now();
        let handle = submit(
            "create instance",
            self.client.begin_create_or_update(
                &self.instance_id(),
                &ResourceSpec::Instance(Box::new(spec)),
            ),
        )
        .await?;

        let mut public_address = self.wait_for_public_address().await;

        let instance = await_operation(handle).await?;
        tracing::info!(instance = %instance.name, elapsed = ?started.elapsed(), "instance created");

        if public_address.is_none() {
            public_address = self.current_public_address().await;
        }

        if let Some(address) = &public_address {
            if let Err(e) = self.artifact.write(address).await {
                tracing::warn!(error = %e, "could not write address artifact");
            }
        }

        Ok((instance, public_address))
    }

    /// Poll the public address on a fixed interval. Returns `None` on
    /// timeout; query errors only end the current attempt.
    async fn wait_for_public_address(&self) -> Option<String> {
        let interval = self.config.address_poll_interval.max(MIN_POLL_INTERVAL);
        let deadline = Instant::now() + self.config.address_poll_timeout;

        loop {
            if let Some(address) = self.current_public_address().await {
                tracing::info!(%address, "public address assigned");
                return Some(address);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    timeout = ?self.config.address_poll_timeout,
                    "public address not available yet; run `vmflow info` later"
                );
                return None;
            }
            sleep(interval.min(deadline - now)).await;
        }
    }

    async fn current_public_address(&self) -> Option<String> {
        match self.client.get(&self.pip_id()).await {
            Ok(pip) => pip.as_ref().and_then(|r| r.public_ip()).map(str::to_string),
            Err(e) => {
                tracing::debug!(error = %e, "public address query failed");
                None
            }
        }
    }

    /// Best effort. Failures are logged with manual steps, never returned.
    async fn run_bootstrap(&self) -> BootstrapStatus {
        let started = Instant::now();
        match self.deploy_bootstrap().await {
            Ok(result) => {
                tracing::info!(
                    storage_account = %result.storage_account,
                    extension = %result.extension.name,
                    elapsed = ?started.elapsed(),
                    "bootstrap completed"
                );
                BootstrapStatus::Succeeded
            }
            Err(e) => {
                tracing::warn!(error = %e, "bootstrap failed; the instance is still reachable over RDP");
                tracing::warn!("to finish manually, connect over RDP and run in an elevated PowerShell:");
                tracing::warn!("  Add-WindowsCapability -Online -Name OpenSSH.Server~~~~0.0.1.0");
                tracing::warn!("  Start-Service sshd; Set-Service -Name sshd -StartupType Automatic");
                tracing::warn!("in-guest log: {}", BOOTSTRAP_LOG_PATH);
                BootstrapStatus::Failed(e.to_string())
            }
        }
    }

    async fn deploy_bootstrap(&self) -> Result<DeployResult> {
        let comment = format!("{}@{}", self.config.admin_username, self.config.project_name);
        let key_pair = keys::ensure_key_pair(&self.config.ssh_key_path, &comment).await?;

        let template = match &self.config.bootstrap_script {
            Some(path) => BootstrapTemplate::from_file(path).await?,
            None => BootstrapTemplate::builtin(),
        };

        let params = BootstrapParameters {
            admin_username: self.config.admin_username.clone(),
            public_key: key_pair.public_key,
            enable_compatibility_subsystem: self.config.enable_compatibility_subsystem,
            reboot_after_bootstrap: self.config.reboot_after_bootstrap,
        };

        let target = BootstrapTarget {
            project: self.config.project_name.clone(),
            resource_group: self.names.resource_group.clone(),
            instance: self.names.instance.clone(),
            placement: self.placement(),
        };

        BootstrapDeployer::new(self.client.as_ref())
            .deploy(&target, &template, &params)
            .await
    }

    /// Keep the in-memory state even when the write fails.
    async fn commit(&mut self, state: LifecycleState) -> Result<()> {
        let saved = self.store.save(&self.config.project_name, &state).await;
        self.state = Some(state);
        saved
    }

    fn provisioned(
        &self,
        state: LifecycleState,
        public_address: Option<String>,
        bootstrap: BootstrapStatus,
        started: Instant,
    ) -> ProvisionOutcome {
        let remote_access = public_address
            .as_deref()
            .map(|address| self.remote_access(address));
        let duration_ms = elapsed_ms(started);
        tracing::info!(elapsed = ?started.elapsed(), "operation completed");

        ProvisionOutcome::Provisioned(ProvisionReport {
            state,
            public_address,
            bootstrap,
            remote_access,
            duration_ms,
        })
    }

    fn remote_access(&self, address: &str) -> RemoteAccess {
        RemoteAccess::new(address, &self.config.admin_username, &self.config.ssh_key_path)
    }

    fn instance_spec(&self, os_disk: OsDisk, network: &NetworkRefs) -> InstanceSpec {
        let admin = matches!(os_disk, OsDisk::FromImage { .. }).then(|| AdminCredentials {
            username: self.config.admin_username.clone(),
            password: self.config.admin_password.clone(),
        });

        InstanceSpec {
            placement: self.placement(),
            size: self.config.vm_size.clone(),
            computer_name: self.names.computer_name(),
            os_disk,
            network_interface: network.network_interface.clone(),
            admin,
            spot: self.config.spot.then(SpotPolicy::capped),
        }
    }

    fn placement(&self) -> Placement {
        Placement {
            location: self.config.location.clone(),
            tags: self.config.tags.clone(),
        }
    }

    fn instance_id(&self) -> ResourceId {
        ResourceId::new(
            ResourceKind::Instance,
            &self.names.resource_group,
            &self.names.instance,
        )
    }

    fn disk_id(&self) -> ResourceId {
        ResourceId::new(ResourceKind::Disk, &self.names.resource_group, &self.names.disk)
    }

    fn nic_id(&self) -> ResourceId {
        ResourceId::new(
            ResourceKind::NetworkInterface,
            &self.names.resource_group,
            &self.names.network_interface,
        )
    }

    fn pip_id(&self) -> ResourceId {
        ResourceId::new(
            ResourceKind::PublicAddress,
            &self.names.resource_group,
            &self.names.public_address,
        )
    }
}

fn summarize(resource: &Resource) -> ResourceSummary {
    ResourceSummary {
        name: resource.name.clone(),
        resource_type: resource.resource_type.clone(),
        location: resource.location.clone(),
    }
}

fn probe<T>(result: Result<T>) -> Probe<T> {
    result.map_err(|e| e.to_string())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

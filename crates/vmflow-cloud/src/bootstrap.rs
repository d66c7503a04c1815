//! Bootstrap deployment
//!
//! Renders the setup payload, stages it in a private blob container inside
//! the project's resource group and runs it on the instance through the
//! custom script extension. The payload is opaque to this module; only the
//! named slots are filled in.

use crate::error::{CloudError, Result};
use crate::provider::{
    BlobLocation, ExtensionSpec, Placement, ProvisioningClient, Resource, ResourceId,
    ResourceKind, ResourceSpec, StorageCredentials, await_operation, submit,
};
use crate::scripts::{BOOTSTRAP_FILE_NAME, BOOTSTRAP_LOG_PATH, WINDOWS_BOOTSTRAP};
use rand::Rng;
use std::path::Path;

pub const BOOTSTRAP_CONTAINER: &str = "bootstrap";
pub const BOOTSTRAP_EXTENSION: &str = "BootstrapSetup";

const EXTENSION_PUBLISHER: &str = "Microsoft.Compute";
const EXTENSION_TYPE: &str = "CustomScriptExtension";
const EXTENSION_VERSION: &str = "1.10";

const STORAGE_NAME_MAX: usize = 24;
const STORAGE_SUFFIX_LEN: usize = 6;
/// Candidate storage account names tried before giving up
pub const STORAGE_NAME_ATTEMPTS: usize = 5;
const RESERVED_SUBSTRINGS: [&str; 5] = ["microsoft", "windows", "azure", "login", "xbox"];
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Values substituted into the payload
#[derive(Debug, Clone)]
pub struct BootstrapParameters {
    pub admin_username: String,
    pub public_key: String,
    pub enable_compatibility_subsystem: bool,
    pub reboot_after_bootstrap: bool,
}

/// A payload template with named slots
#[derive(Debug, Clone)]
pub struct BootstrapTemplate {
    source: String,
}

impl BootstrapTemplate {
    pub fn builtin() -> Self {
        Self {
            source: WINDOWS_BOOTSTRAP.to_string(),
        }
    }

    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Load an operator-supplied template.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            CloudError::InvalidTemplate(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self::new(source))
    }

    /// Fill the slots. Every string value is validated and quoted for
    /// PowerShell before it reaches the template engine.
    pub fn render(&self, params: &BootstrapParameters) -> Result<String> {
        let mut context = tera::Context::new();
        context.insert(
            "admin_user",
            &quote_slot("admin_user", &params.admin_username)?,
        );
        context.insert("public_key", &quote_slot("public_key", &params.public_key)?);
        context.insert("log_path", &quote_slot("log_path", BOOTSTRAP_LOG_PATH)?);
        context.insert("enable_wsl", ps_bool(params.enable_compatibility_subsystem));
        context.insert("reboot_after", ps_bool(params.reboot_after_bootstrap));

        tera::Tera::one_off(&self.source, &context, false)
            .map_err(|e| CloudError::InvalidTemplate(format!("{:?}", e)))
    }
}

fn quote_slot(slot: &str, value: &str) -> Result<String> {
    if value.is_empty() {
        return Err(CloudError::InvalidTemplate(format!("slot '{}' is empty", slot)));
    }
    if let Some(c) = value.chars().find(|c| c.is_control()) {
        return Err(CloudError::InvalidTemplate(format!(
            "slot '{}' contains control character U+{:04X}",
            slot, c as u32
        )));
    }
    Ok(ps_quote(value))
}

/// PowerShell single-quoted literal. Every quote variant PowerShell treats
/// as a single quote is doubled.
fn ps_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            quoted.push(c);
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn ps_bool(value: bool) -> &'static str {
    if value { "$true" } else { "$false" }
}

/// Storage account name prefix: lowercase alphanumerics with reserved
/// words removed, leaving room for the random suffix.
pub fn storage_account_prefix(project: &str) -> String {
    let mut base: String = project
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    loop {
        let before = base.len();
        for word in RESERVED_SUBSTRINGS {
            base = base.replace(word, "");
        }
        if base.len() == before {
            break;
        }
    }

    if base.is_empty() {
        base.push_str("vmflow");
    }
    base.truncate(STORAGE_NAME_MAX - STORAGE_SUFFIX_LEN);
    base
}

fn storage_account_candidate(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..STORAGE_SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Where the payload runs
#[derive(Debug, Clone)]
pub struct BootstrapTarget {
    pub project: String,
    pub resource_group: String,
    pub instance: String,
    pub placement: Placement,
}

#[derive(Debug, Clone)]
pub struct DeployResult {
    pub storage_account: String,
    pub blob_url: String,
    pub extension: Resource,
}

pub struct BootstrapDeployer<'a> {
    client: &'a dyn ProvisioningClient,
}

impl<'a> BootstrapDeployer<'a> {
    pub fn new(client: &'a dyn ProvisioningClient) -> Self {
        Self { client }
    }

    pub async fn deploy(
        &self,
        target: &BootstrapTarget,
        template: &BootstrapTemplate,
        params: &BootstrapParameters,
    ) -> Result<DeployResult> {
        let payload = template.render(params)?;

        let account = self.resolve_storage_account(target).await?;
        let credentials = self
            .client
            .storage_account_key(&target.resource_group, &account)
            .await?;

        let container_id = ResourceId::new(
            ResourceKind::BlobContainer,
            &target.resource_group,
            BOOTSTRAP_CONTAINER,
        )
        .with_parent(&account);
        let container_spec = ResourceSpec::BlobContainer {
            credentials: credentials.clone(),
            private: true,
        };
        let handle = submit(
            "create bootstrap container",
            self.client
                .begin_create_or_update(&container_id, &container_spec),
        )
        .await?;
        await_operation(handle).await?;

        let location = BlobLocation {
            account: account.clone(),
            container: BOOTSTRAP_CONTAINER.to_string(),
            blob: BOOTSTRAP_FILE_NAME.to_string(),
        };
        let blob = self
            .client
            .upload_blob(&location, &credentials, &payload)
            .await?;
        tracing::info!(url = %blob.url, "uploaded bootstrap payload");

        let extension = self.run_extension(target, &blob.url, &credentials).await?;
        self.check_execution(target).await?;

        Ok(DeployResult {
            storage_account: account,
            blob_url: blob.url,
            extension,
        })
    }

    /// Reuse a storage account already in the group; otherwise create one,
    /// regenerating the suffix when the name is taken.
    async fn resolve_storage_account(&self, target: &BootstrapTarget) -> Result<String> {
        let existing = self
            .client
            .list_resources(&target.resource_group)
            .await?
            .into_iter()
            .find(|r| {
                r.resource_type
                    .eq_ignore_ascii_case(ResourceKind::StorageAccount.provider_type())
            });

        if let Some(account) = existing {
            tracing::info!(account = %account.name, "reusing storage account");
            return Ok(account.name);
        }

        let prefix = storage_account_prefix(&target.project);
        for attempt in 1..=STORAGE_NAME_ATTEMPTS {
            let candidate = storage_account_candidate(&prefix);
            if !self.client.storage_name_available(&candidate).await? {
                tracing::debug!(candidate = %candidate, attempt, "storage account name taken");
                continue;
            }

            let id = ResourceId::new(
                ResourceKind::StorageAccount,
                &target.resource_group,
                &candidate,
            );
            let handle = submit(
                "create storage account",
                self.client.begin_create_or_update(
                    &id,
                    &ResourceSpec::StorageAccount(target.placement.clone()),
                ),
            )
            .await?;
            await_operation(handle).await?;

            tracing::info!(account = %candidate, "created storage account");
            return Ok(candidate);
        }

        Err(CloudError::provider(
            crate::error::OperationStage::Query,
            "create storage account",
            format!(
                "no free storage account name with prefix '{}' after {} attempts",
                prefix, STORAGE_NAME_ATTEMPTS
            ),
        ))
    }

    async fn run_extension(
        &self,
        target: &BootstrapTarget,
        blob_url: &str,
        credentials: &StorageCredentials,
    ) -> Result<Resource> {
        let id = ResourceId::new(
            ResourceKind::Extension,
            &target.resource_group,
            BOOTSTRAP_EXTENSION,
        )
        .with_parent(&target.instance);

        let spec = ResourceSpec::Extension(ExtensionSpec {
            publisher: EXTENSION_PUBLISHER.to_string(),
            extension_type: EXTENSION_TYPE.to_string(),
            version: EXTENSION_VERSION.to_string(),
            settings: serde_json::json!({ "fileUris": [blob_url] }),
            protected_settings: serde_json::json!({
                "commandToExecute": format!(
                    "powershell.exe -ExecutionPolicy Unrestricted -NoProfile -File {}",
                    BOOTSTRAP_FILE_NAME
                ),
                "storageAccountName": credentials.account_name,
                "storageAccountKey": credentials.account_key,
            }),
        });

        let handle = submit(
            "deploy bootstrap extension",
            self.client.begin_create_or_update(&id, &spec),
        )
        .await?;
        await_operation(handle).await
    }

    /// The extension deployment can succeed while the script itself failed;
    /// only the instance view shows that.
    async fn check_execution(&self, target: &BootstrapTarget) -> Result<()> {
        let view = self
            .client
            .instance_view(&target.resource_group, &target.instance)
            .await?;

        let Some(extension) = view.extension(BOOTSTRAP_EXTENSION) else {
            tracing::debug!("no extension status reported");
            return Ok(());
        };

        if let Some(status) = extension
            .statuses
            .iter()
            .chain(extension.substatuses.iter())
            .find(|s| s.is_error())
        {
            let message = status
                .message
                .clone()
                .or_else(|| status.display_status.clone())
                .or_else(|| status.code.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(CloudError::BootstrapExecution(message));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BootstrapParameters {
        BootstrapParameters {
            admin_username: "azureuser".into(),
            public_key: "ssh-rsa AAAAB3Nza azureuser@demo".into(),
            enable_compatibility_subsystem: true,
            reboot_after_bootstrap: false,
        }
    }

    #[test]
    fn test_builtin_template_renders_all_slots() {
        let rendered = BootstrapTemplate::builtin().render(&params()).unwrap();

        assert!(rendered.contains("$AdminUser = 'azureuser'"));
        assert!(rendered.contains("$PublicKey = 'ssh-rsa AAAAB3Nza azureuser@demo'"));
        assert!(rendered.contains("$EnableWsl = $true"));
        assert!(rendered.contains("$RebootAfter = $false"));
        assert!(rendered.contains(r"$LogPath = 'C:\vmflow\bootstrap.log'"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_quotes_are_doubled() {
        let mut p = params();
        p.admin_username = "o'brien".into();
        let rendered = BootstrapTemplate::new("{{ admin_user }}").render(&p).unwrap();
        assert_eq!(rendered, "'o''brien'");

        assert_eq!(ps_quote("a\u{2019}b"), "'a\u{2019}\u{2019}b'");
    }

    #[test]
    fn test_control_characters_are_rejected() {
        let mut p = params();
        p.public_key = "ssh-rsa AAAA\nRemove-Item C:\\".into();

        assert!(matches!(
            BootstrapTemplate::builtin().render(&p),
            Err(CloudError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_unknown_slot_is_invalid_template() {
        let result = BootstrapTemplate::new("{{ no_such_slot }}").render(&params());
        assert!(matches!(result, Err(CloudError::InvalidTemplate(_))));
    }

    #[test]
    fn test_storage_prefix_strips_reserved_words() {
        assert_eq!(storage_account_prefix("demo"), "demo");
        assert_eq!(storage_account_prefix("My_Windows-Box"), "mybox");
        assert_eq!(storage_account_prefix("azure"), "vmflow");
        assert_eq!(storage_account_prefix("micrazuresoft"), "vmflow");
        assert_eq!(
            storage_account_prefix("averyveryverylongprojectname").len(),
            STORAGE_NAME_MAX - STORAGE_SUFFIX_LEN
        );
    }

    #[test]
    fn test_storage_candidate_shape() {
        let name = storage_account_candidate("demo");
        assert_eq!(name.len(), 10);
        assert!(name.starts_with("demo"));
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}

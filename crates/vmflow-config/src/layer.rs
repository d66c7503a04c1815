//! Configuration layers and the resolved project configuration
//!
//! Every source (built-in defaults, config file, secrets file, call-site
//! overrides) produces a [`ConfigLayer`]. Layers are merged lowest-first and
//! the result is frozen into a [`ProjectConfig`].

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOCATION: &str = "eastus";
pub const DEFAULT_VM_SIZE: &str = "Standard_D8s_v3";
pub const DEFAULT_ADMIN_USERNAME: &str = "azureuser";
pub const DEFAULT_IMAGE: &str = "MicrosoftWindowsDesktop:Windows-11:win11-25h2-ent:latest";
pub const DEFAULT_DISK_SIZE_GB: u32 = 256;
pub const DEFAULT_WORK_DIR: &str = "var";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 300;

/// One source of configuration values. `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(alias = "project_identifier")]
    pub project_name: Option<String>,
    #[serde(alias = "region")]
    pub location: Option<String>,
    #[serde(alias = "instance_size")]
    pub vm_size: Option<String>,
    #[serde(alias = "spot_enabled")]
    pub spot: Option<bool>,
    #[serde(alias = "administrator_username")]
    pub admin_username: Option<String>,
    #[serde(alias = "administrator_password")]
    pub admin_password: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
    pub enable_compatibility_subsystem: Option<bool>,
    pub reboot_after_bootstrap: Option<bool>,
    pub subscription_id: Option<String>,
    pub image: Option<String>,
    pub disk_size_gb: Option<u32>,
    pub bootstrap_enabled: Option<bool>,
    pub bootstrap_script: Option<PathBuf>,
    pub ssh_key_path: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub address_poll_interval_secs: Option<u64>,
    pub address_poll_timeout_secs: Option<u64>,
}

impl ConfigLayer {
    /// Built-in defaults, the lowest layer.
    pub fn defaults() -> Self {
        Self {
            project_name: None,
            location: Some(DEFAULT_LOCATION.to_string()),
            vm_size: Some(DEFAULT_VM_SIZE.to_string()),
            spot: Some(true),
            admin_username: Some(DEFAULT_ADMIN_USERNAME.to_string()),
            admin_password: None,
            tags: Some(BTreeMap::from([(
                "managed-by".to_string(),
                "vmflow".to_string(),
            )])),
            enable_compatibility_subsystem: Some(true),
            reboot_after_bootstrap: Some(false),
            subscription_id: None,
            image: Some(DEFAULT_IMAGE.to_string()),
            disk_size_gb: Some(DEFAULT_DISK_SIZE_GB),
            bootstrap_enabled: Some(true),
            bootstrap_script: None,
            ssh_key_path: None,
            work_dir: Some(PathBuf::from(DEFAULT_WORK_DIR)),
            address_poll_interval_secs: Some(DEFAULT_POLL_INTERVAL_SECS),
            address_poll_timeout_secs: Some(DEFAULT_POLL_TIMEOUT_SECS),
        }
    }

    /// Merge `higher` on top of `self`. Values set in `higher` win; the tag
    /// set is replaced as a whole, not merged key by key.
    pub fn merge(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            project_name: higher.project_name.or(self.project_name),
            location: higher.location.or(self.location),
            vm_size: higher.vm_size.or(self.vm_size),
            spot: higher.spot.or(self.spot),
            admin_username: higher.admin_username.or(self.admin_username),
            admin_password: higher.admin_password.or(self.admin_password),
            tags: higher.tags.or(self.tags),
            enable_compatibility_subsystem: higher
                .enable_compatibility_subsystem
                .or(self.enable_compatibility_subsystem),
            reboot_after_bootstrap: higher
                .reboot_after_bootstrap
                .or(self.reboot_after_bootstrap),
            subscription_id: higher.subscription_id.or(self.subscription_id),
            image: higher.image.or(self.image),
            disk_size_gb: higher.disk_size_gb.or(self.disk_size_gb),
            bootstrap_enabled: higher.bootstrap_enabled.or(self.bootstrap_enabled),
            bootstrap_script: higher.bootstrap_script.or(self.bootstrap_script),
            ssh_key_path: higher.ssh_key_path.or(self.ssh_key_path),
            work_dir: higher.work_dir.or(self.work_dir),
            address_poll_interval_secs: higher
                .address_poll_interval_secs
                .or(self.address_poll_interval_secs),
            address_poll_timeout_secs: higher
                .address_poll_timeout_secs
                .or(self.address_poll_timeout_secs),
        }
    }

    /// Freeze the merged layer. Unset values fall back to the built-in
    /// defaults so a layer stack that skipped [`ConfigLayer::defaults`] still
    /// resolves.
    pub fn finish(self) -> ProjectConfig {
        let layer = ConfigLayer::defaults().merge(self);

        let project_name = layer.project_name.unwrap_or_default().trim().to_string();
        let work_dir = layer
            .work_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR));
        let ssh_key_path = layer.ssh_key_path.unwrap_or_else(|| {
            work_dir
                .join("keys")
                .join(format!("{}-ssh-key", project_name))
        });

        ProjectConfig {
            project_name,
            location: layer.location.unwrap_or_default(),
            vm_size: layer.vm_size.unwrap_or_default(),
            spot: layer.spot.unwrap_or(true),
            admin_username: layer.admin_username.unwrap_or_default(),
            admin_password: layer.admin_password.unwrap_or_default(),
            tags: layer.tags.unwrap_or_default(),
            enable_compatibility_subsystem: layer.enable_compatibility_subsystem.unwrap_or(true),
            reboot_after_bootstrap: layer.reboot_after_bootstrap.unwrap_or(false),
            subscription_id: layer.subscription_id.filter(|s| !s.trim().is_empty()),
            image: layer.image.unwrap_or_default(),
            disk_size_gb: layer.disk_size_gb.unwrap_or(DEFAULT_DISK_SIZE_GB),
            bootstrap_enabled: layer.bootstrap_enabled.unwrap_or(true),
            bootstrap_script: layer.bootstrap_script,
            ssh_key_path,
            work_dir,
            address_poll_interval: Duration::from_secs(
                layer
                    .address_poll_interval_secs
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            address_poll_timeout: Duration::from_secs(
                layer
                    .address_poll_timeout_secs
                    .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
            ),
        }
    }
}

/// Immutable per-run settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    /// Project identifier; seeds every derived resource name and the state key
    pub project_name: String,
    pub location: String,
    pub vm_size: String,
    pub spot: bool,
    pub admin_username: String,
    pub admin_password: String,
    pub tags: BTreeMap<String, String>,
    pub enable_compatibility_subsystem: bool,
    pub reboot_after_bootstrap: bool,
    pub subscription_id: Option<String>,
    /// Marketplace image URN (`publisher:offer:sku:version`)
    pub image: String,
    pub disk_size_gb: u32,
    pub bootstrap_enabled: bool,
    /// Replaces the built-in bootstrap payload when set
    pub bootstrap_script: Option<PathBuf>,
    /// Private key path; the public half lives next to it with a `.pub` suffix
    pub ssh_key_path: PathBuf,
    /// Root for `state/`, `logs/` and `output/`
    pub work_dir: PathBuf,
    pub address_poll_interval: Duration,
    pub address_poll_timeout: Duration,
}

impl ProjectConfig {
    /// Checks the project identifier only. Every operation needs it.
    pub fn validate_identity(&self) -> Result<()> {
        if self.project_name.is_empty() {
            return Err(ConfigError::Invalid(
                "project name cannot be empty".to_string(),
            ));
        }

        if let Some(c) = self
            .project_name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ConfigError::Invalid(format!(
                "project name '{}' contains unsupported character '{}'",
                self.project_name, c
            )));
        }

        Ok(())
    }

    /// Full validation required before any resource is created.
    pub fn validate(&self) -> Result<()> {
        self.validate_identity()?;

        if self.admin_username.trim().is_empty() || self.admin_password.is_empty() {
            return Err(ConfigError::Invalid(
                "missing admin credentials (set ADMIN_USERNAME/ADMIN_PASSWORD in .env.secret or pass --admin-username/--admin-password)"
                    .to_string(),
            ));
        }

        if self.location.trim().is_empty() {
            return Err(ConfigError::Invalid("location cannot be empty".to_string()));
        }

        if self.vm_size.trim().is_empty() {
            return Err(ConfigError::Invalid("vm size cannot be empty".to_string()));
        }

        if self.image.split(':').count() != 4 {
            return Err(ConfigError::Invalid(format!(
                "image '{}' must be a publisher:offer:sku:version URN",
                self.image
            )));
        }

        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.work_dir.join("state")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }
}

/// Merge layers lowest-first on top of the built-in defaults.
///
/// The precedence contract is: defaults < config file < secrets file <
/// call-site overrides. Callers pass the layers in that order.
pub fn resolve(layers: impl IntoIterator<Item = ConfigLayer>) -> ProjectConfig {
    layers
        .into_iter()
        .fold(ConfigLayer::defaults(), ConfigLayer::merge)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> ConfigLayer {
        ConfigLayer {
            project_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_apply_when_nothing_is_set() {
        let config = resolve([named("demo")]);

        assert_eq!(config.location, DEFAULT_LOCATION);
        assert_eq!(config.vm_size, DEFAULT_VM_SIZE);
        assert!(config.spot);
        assert_eq!(config.admin_username, DEFAULT_ADMIN_USERNAME);
        assert!(config.admin_password.is_empty());
        assert_eq!(config.disk_size_gb, DEFAULT_DISK_SIZE_GB);
        assert_eq!(config.work_dir, PathBuf::from("var"));
        assert_eq!(
            config.ssh_key_path,
            PathBuf::from("var").join("keys").join("demo-ssh-key")
        );
        assert_eq!(config.address_poll_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_precedence_override_beats_file_beats_default() {
        let file = ConfigLayer {
            project_name: Some("from-file".to_string()),
            location: Some("westeurope".to_string()),
            vm_size: Some("Standard_D4s_v3".to_string()),
            ..Default::default()
        };
        let overrides = ConfigLayer {
            location: Some("japaneast".to_string()),
            spot: Some(false),
            ..Default::default()
        };

        let config = resolve([file, overrides]);

        assert_eq!(config.project_name, "from-file");
        assert_eq!(config.location, "japaneast");
        assert_eq!(config.vm_size, "Standard_D4s_v3");
        assert!(!config.spot);
        assert_eq!(config.image, DEFAULT_IMAGE);
    }

    #[test]
    fn test_secrets_layer_sits_between_file_and_overrides() {
        let file = ConfigLayer {
            admin_username: Some("file-user".to_string()),
            admin_password: Some("file-pass".to_string()),
            ..named("demo")
        };
        let secrets = ConfigLayer {
            admin_username: Some("secret-user".to_string()),
            admin_password: Some("secret-pass".to_string()),
            ..Default::default()
        };
        let overrides = ConfigLayer {
            admin_password: Some("cli-pass".to_string()),
            ..Default::default()
        };

        let config = resolve([file, secrets, overrides]);

        assert_eq!(config.admin_username, "secret-user");
        assert_eq!(config.admin_password, "cli-pass");
    }

    #[test]
    fn test_tags_are_replaced_not_merged() {
        let file = ConfigLayer {
            tags: Some(BTreeMap::from([("team".to_string(), "qa".to_string())])),
            ..named("demo")
        };

        let config = resolve([file]);

        assert_eq!(config.tags.len(), 1);
        assert_eq!(config.tags.get("team").map(String::as_str), Some("qa"));
    }

    #[test]
    fn test_yaml_accepts_both_key_spellings() {
        let layer: ConfigLayer = serde_yaml::from_str(
            "project_identifier: demo\nregion: eastus2\nvm_size: Standard_B2s\nspot: false\n",
        )
        .unwrap();

        assert_eq!(layer.project_name.as_deref(), Some("demo"));
        assert_eq!(layer.location.as_deref(), Some("eastus2"));
        assert_eq!(layer.spot, Some(false));
    }

    #[test]
    fn test_validate_rejects_empty_project() {
        let config = resolve([ConfigLayer {
            admin_password: Some("pw".to_string()),
            ..Default::default()
        }]);

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_characters() {
        let config = resolve([named("demo project")]);
        assert!(config.validate_identity().is_err());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let config = resolve([named("demo")]);
        assert!(config.validate_identity().is_ok());
        assert!(config.validate().is_err());

        let config = resolve([ConfigLayer {
            admin_password: Some("S3cret!pass".to_string()),
            ..named("demo")
        }]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed_image() {
        let config = resolve([ConfigLayer {
            admin_password: Some("pw".to_string()),
            image: Some("windows-11".to_string()),
            ..named("demo")
        }]);

        assert!(config.validate().is_err());
    }
}

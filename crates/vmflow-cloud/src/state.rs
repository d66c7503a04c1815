//! Lifecycle state persistence
//!
//! One JSON record per project under `<state_dir>/<project>_state.json`.
//! Writes go through a temporary file and a rename; the previous record is
//! kept as `<file>.backup`.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Current schema version
pub const STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    STATE_VERSION
}

/// The orchestrator's durable view of which resources exist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleState {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: u32,

    pub instance_name: String,
    pub resource_group_name: String,
    pub disk_name: String,

    pub disk_resource_reference: String,
    pub network_interface_reference: String,
    pub public_address_reference: String,

    pub created_at: DateTime<Utc>,

    /// Present only while the instance exists
    #[serde(default)]
    pub instance_resource_reference: Option<String>,

    pub instance_exists: bool,
}

impl LifecycleState {
    pub fn phase(&self) -> LifecyclePhase {
        if self.instance_exists {
            LifecyclePhase::Running
        } else {
            LifecyclePhase::DiskOnly
        }
    }

    /// Record a confirmed instance creation.
    pub fn mark_running(&mut self, instance_reference: impl Into<String>) {
        self.instance_resource_reference = Some(instance_reference.into());
        self.instance_exists = true;
    }

    /// Record a confirmed instance deletion. Disk and network references stay.
    pub fn mark_disk_only(&mut self) {
        self.instance_resource_reference = None;
        self.instance_exists = false;
    }
}

/// Lifecycle phase derived from an optional state record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Absent,
    DiskOnly,
    Running,
}

impl LifecyclePhase {
    pub fn of(state: Option<&LifecycleState>) -> Self {
        state.map_or(LifecyclePhase::Absent, LifecycleState::phase)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Absent => write!(f, "absent"),
            LifecyclePhase::DiskOnly => write!(f, "disk-only"),
            LifecyclePhase::Running => write!(f, "running"),
        }
    }
}

/// State manager for reading/writing state files
#[derive(Debug, Clone)]
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    pub fn state_path(&self, project: &str) -> PathBuf {
        self.state_dir.join(format!("{}_state.json", project))
    }

    fn backup_path(&self, project: &str) -> PathBuf {
        self.state_dir.join(format!("{}_state.json.backup", project))
    }

    fn temp_path(&self, project: &str) -> PathBuf {
        self.state_dir.join(format!(".{}_state.json.tmp", project))
    }

    /// Load the record for a project.
    ///
    /// `Ok(None)` when no record exists. An unreadable record or one written
    /// by a newer schema is `CorruptState`.
    pub async fn load(&self, project: &str) -> Result<Option<LifecycleState>> {
        let path = self.state_path(project);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "state file not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(CloudError::CorruptState(format!(
                    "{}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let state: LifecycleState = serde_json::from_str(&content)
            .map_err(|e| CloudError::CorruptState(format!("{}: {}", path.display(), e)))?;

        if state.version > STATE_VERSION {
            return Err(CloudError::CorruptState(format!(
                "state file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(phase = %state.phase(), "loaded state");
        Ok(Some(state))
    }

    /// Overwrite the record for a project.
    pub async fn save(&self, project: &str, state: &LifecycleState) -> Result<()> {
        self.write(project, state)
            .await
            .map_err(|e| CloudError::Persistence(format!("{}: {}", self.state_path(project).display(), e)))
    }

    async fn write(&self, project: &str, state: &LifecycleState) -> std::io::Result<()> {
        fs::create_dir_all(&self.state_dir).await?;

        let path = self.state_path(project);
        let temp = self.temp_path(project);

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;

        if fs::try_exists(&path).await? {
            fs::copy(&path, self.backup_path(project)).await?;
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!(path = %path.display(), phase = %state.phase(), "saved state");
        Ok(())
    }

    /// Remove the record. A missing record is not an error; the backup stays.
    pub async fn delete(&self, project: &str) -> Result<()> {
        let path = self.state_path(project);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "deleted state");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CloudError::Persistence(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }
}

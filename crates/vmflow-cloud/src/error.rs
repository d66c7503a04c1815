//! Lifecycle error types

use std::fmt;
use thiserror::Error;

/// Where a provider call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStage {
    /// Read-only lookup (`get`, `list`, status queries)
    Query,
    /// The mutating call was not accepted
    Submit,
    /// The call was accepted but the long-running operation failed
    Await,
}

impl fmt::Display for OperationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStage::Query => write!(f, "query"),
            OperationStage::Submit => write!(f, "submit"),
            OperationStage::Await => write!(f, "await"),
        }
    }
}

/// Lifecycle errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Cannot reach the cloud provider: {0}")]
    Connectivity(String),

    #[error("Project '{project}' is already provisioned: {reason}")]
    AlreadyProvisioned { project: String, reason: String },

    #[error("No prior state for project '{0}'")]
    NoPriorState(String),

    #[error("Disk '{0}' no longer exists")]
    MissingDisk(String),

    #[error("Resource group mismatch: state records '{recorded}', configuration derives '{expected}'")]
    ResourceGroupMismatch { recorded: String, expected: String },

    #[error("Provider error during {stage} of {operation}: {message}")]
    Provider {
        stage: OperationStage,
        operation: String,
        message: String,
    },

    #[error("Bootstrap execution failed: {0}")]
    BootstrapExecution(String),

    #[error("Failed to persist state: {0}")]
    Persistence(String),

    #[error("Corrupt state record: {0}")]
    CorruptState(String),

    #[error("Invalid bootstrap template: {0}")]
    InvalidTemplate(String),

    #[error("SSH key generation failed: {0}")]
    KeyGeneration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn provider(
        stage: OperationStage,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CloudError::Provider {
            stage,
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Re-tag a provider error with the stage the caller observed it at.
    pub fn at_stage(self, stage: OperationStage) -> Self {
        match self {
            CloudError::Provider {
                operation, message, ..
            } => CloudError::Provider {
                stage,
                operation,
                message,
            },
            other => other,
        }
    }

    /// Operator guidance: what to run instead.
    pub fn hint(&self) -> Option<String> {
        match self {
            CloudError::ConfigurationInvalid(_) => Some(
                "Check config.yaml and .env.secret (ADMIN_USERNAME / ADMIN_PASSWORD)".to_string(),
            ),
            CloudError::Connectivity(_) => {
                Some("Run `az login` and check the selected subscription".to_string())
            }
            CloudError::AlreadyProvisioned { .. } => Some(
                "Use `vmflow recreate` to boot from the existing disk, or `vmflow destroy-all` to start over"
                    .to_string(),
            ),
            CloudError::NoPriorState(_) => {
                Some("Use `vmflow create` to provision a new instance".to_string())
            }
            CloudError::MissingDisk(_) => Some(
                "The preserved disk is gone. Run `vmflow destroy-all` and then `vmflow create`"
                    .to_string(),
            ),
            CloudError::ResourceGroupMismatch { .. } => Some(
                "Use the project name the state was created with, or remove the state file"
                    .to_string(),
            ),
            CloudError::Provider { .. } => Some(
                "Completed steps were not rolled back. Retry the command, or inspect with `vmflow list-resources`"
                    .to_string(),
            ),
            CloudError::Persistence(_) => Some(
                "Resources were changed but the state file was not written. Check the work directory permissions"
                    .to_string(),
            ),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

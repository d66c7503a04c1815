//! Azure provider error types

use thiserror::Error;
use vmflow_cloud::{CloudError, OperationStage};

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("az CLI not found. Please install: https://aka.ms/installazurecli")]
    AzNotFound,

    #[error("az {command} failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected az output: {0}")]
    UnexpectedOutput(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AzureError {
    /// Convert at the trait boundary, recording what was being attempted.
    pub fn into_cloud(self, stage: OperationStage, operation: impl Into<String>) -> CloudError {
        CloudError::provider(stage, operation, self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;

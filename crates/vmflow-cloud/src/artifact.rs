//! Last-known public address, written for downstream automation

use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct AddressArtifact {
    path: PathBuf,
}

impl AddressArtifact {
    /// `<output_dir>/<project>_public_ip.txt`
    pub fn new(output_dir: impl AsRef<Path>, project: &str) -> Self {
        Self {
            path: output_dir
                .as_ref()
                .join(format!("{}_public_ip.txt", project)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, address: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, format!("{}\n", address)).await?;
        tracing::debug!(path = %self.path.display(), address, "recorded public address");
        Ok(())
    }

    pub async fn read(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub async fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

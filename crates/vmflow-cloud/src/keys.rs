//! SSH key material for the bootstrap payload

use crate::error::{CloudError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;

/// An SSH key pair on disk
#[derive(Debug, Clone)]
pub struct SshKeyPair {
    pub private_key_path: PathBuf,
    pub public_key: String,
}

impl SshKeyPair {
    pub fn public_key_path(private_key_path: &Path) -> PathBuf {
        let mut path = private_key_path.as_os_str().to_owned();
        path.push(".pub");
        PathBuf::from(path)
    }
}

/// Reuse the key pair at `private_key_path`, or generate a 4096-bit RSA pair
/// with `ssh-keygen` when the private key is missing.
pub async fn ensure_key_pair(private_key_path: &Path, comment: &str) -> Result<SshKeyPair> {
    let public_path = SshKeyPair::public_key_path(private_key_path);

    if fs::try_exists(private_key_path).await? {
        tracing::info!(path = %private_key_path.display(), "using existing SSH key");
    } else {
        generate(private_key_path, comment).await?;
    }

    let public_key = fs::read_to_string(&public_path)
        .await
        .map_err(|e| {
            CloudError::KeyGeneration(format!("cannot read {}: {}", public_path.display(), e))
        })?
        .trim()
        .to_string();

    if public_key.is_empty() {
        return Err(CloudError::KeyGeneration(format!(
            "{} is empty",
            public_path.display()
        )));
    }

    Ok(SshKeyPair {
        private_key_path: private_key_path.to_path_buf(),
        public_key,
    })
}

async fn generate(private_key_path: &Path, comment: &str) -> Result<()> {
    if let Some(parent) = private_key_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    tracing::info!(path = %private_key_path.display(), "generating SSH key pair");

    let output = Command::new("ssh-keygen")
        .args(["-t", "rsa", "-b", "4096", "-N", "", "-q", "-C", comment, "-f"])
        .arg(private_key_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CloudError::KeyGeneration(format!("cannot run ssh-keygen: {}", e)))?;

    if !output.status.success() {
        return Err(CloudError::KeyGeneration(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    restrict_permissions(private_key_path).await?;
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

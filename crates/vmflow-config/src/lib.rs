pub mod error;
pub mod layer;

pub use error::*;
pub use layer::*;

use std::path::{Path, PathBuf};

/// Environment variable that points directly at a config file
pub const CONFIG_PATH_ENV: &str = "VMFLOW_CONFIG_PATH";

/// Default secrets file, resolved against the current directory
pub const SECRETS_FILE: &str = ".env.secret";

const CONFIG_FILE_NAMES: [&str; 2] = ["config.yaml", "config.yml"];

/// Global config directory (`~/.config/vmflow`)
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vmflow"))
}

/// Find the project config file.
///
/// Search order:
/// 1. `VMFLOW_CONFIG_PATH`
/// 2. current directory: `config.yaml`, `config.yml`
/// 3. `./.vmflow/`, same names
/// 4. `~/.config/vmflow/config.yaml`
///
/// Returns `None` when nothing is found; a config file is optional.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "{} points to a missing file", CONFIG_PATH_ENV);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        for dir in [current_dir.clone(), current_dir.join(".vmflow")] {
            for filename in &CONFIG_FILE_NAMES {
                let path = dir.join(filename);
                if path.is_file() {
                    return Some(path);
                }
            }
        }
    }

    get_config_dir()
        .map(|dir| dir.join("config.yaml"))
        .filter(|path| path.is_file())
}

/// Parse a YAML config file into a layer.
pub fn load_config_file(path: &Path) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
        _ => ConfigError::Io(e),
    })?;

    if content.trim().is_empty() {
        return Ok(ConfigLayer::default());
    }

    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Read `ADMIN_USERNAME` / `ADMIN_PASSWORD` from a dotenv-style file.
///
/// A missing file yields an empty layer. Unrelated keys are ignored.
pub fn load_secrets(path: &Path) -> Result<ConfigLayer> {
    if !path.is_file() {
        return Ok(ConfigLayer::default());
    }

    let iter = dotenvy::from_path_iter(path).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut layer = ConfigLayer::default();
    for item in iter {
        let (key, value) = item.map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        match key.as_str() {
            "ADMIN_USERNAME" => layer.admin_username = Some(value),
            "ADMIN_PASSWORD" => layer.admin_password = Some(value),
            _ => {}
        }
    }

    Ok(layer)
}

/// Which files contributed to a resolved config
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSources {
    pub config_file: Option<PathBuf>,
    pub secrets_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ProjectConfig,
    pub sources: ConfigSources,
}

/// Load the full layer stack: defaults < config file < secrets < overrides.
///
/// An explicit `config_path` must exist; otherwise the file is discovered
/// with [`find_config_file`]. The secrets file defaults to `.env.secret`.
pub fn load(
    config_path: Option<&Path>,
    secrets_path: Option<&Path>,
    overrides: ConfigLayer,
) -> Result<LoadedConfig> {
    let config_file = match config_path {
        Some(path) if !path.exists() => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let file_layer = match &config_file {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config file");
            load_config_file(path)?
        }
        None => ConfigLayer::default(),
    };

    let secrets_file = secrets_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(SECRETS_FILE));
    let secrets_layer = load_secrets(&secrets_file)?;
    let secrets_file = secrets_file.is_file().then_some(secrets_file);

    let config = resolve([file_layer, secrets_layer, overrides]);

    Ok(LoadedConfig {
        config,
        sources: ConfigSources {
            config_file,
            secrets_file,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    struct CwdGuard(PathBuf);

    impl CwdGuard {
        fn enter(dir: &Path) -> Self {
            let original = std::env::current_dir().unwrap();
            std::env::set_current_dir(dir).unwrap();
            Self(original)
        }
    }

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("config.yaml"), "project_name: demo\n").unwrap();
        let _cwd = CwdGuard::enter(temp_dir.path());

        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            let found = find_config_file().unwrap();
            assert!(found.ends_with("config.yaml"));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_dot_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dot_dir = temp_dir.path().join(".vmflow");
        fs::create_dir(&dot_dir).unwrap();
        fs::write(dot_dir.join("config.yaml"), "project_name: demo\n").unwrap();
        let _cwd = CwdGuard::enter(temp_dir.path());

        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            let found = find_config_file().unwrap();
            assert!(found.ends_with(".vmflow/config.yaml"));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("config.yaml"), "project_name: cwd\n").unwrap();
        let custom = temp_dir.path().join("custom.yaml");
        fs::write(&custom, "project_name: custom\n").unwrap();
        let _cwd = CwdGuard::enter(temp_dir.path());

        temp_env::with_var(CONFIG_PATH_ENV, Some(custom.as_os_str()), || {
            assert_eq!(find_config_file(), Some(custom.clone()));
        });
    }

    #[test]
    fn test_load_secrets_reads_credentials_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(".env.secret");
        fs::write(
            &path,
            "ADMIN_USERNAME=ops\nADMIN_PASSWORD=\"p@ss word\"\nOTHER=ignored\n",
        )
        .unwrap();

        let layer = load_secrets(&path).unwrap();
        assert_eq!(layer.admin_username.as_deref(), Some("ops"));
        assert_eq!(layer.admin_password.as_deref(), Some("p@ss word"));
        assert_eq!(layer.project_name, None);
    }

    #[test]
    fn test_load_secrets_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let layer = load_secrets(&temp_dir.path().join("nope")).unwrap();
        assert_eq!(layer, ConfigLayer::default());
    }

    #[test]
    fn test_load_config_file_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "project_name: [unterminated\n").unwrap();

        assert!(matches!(
            load_config_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_explicit_missing_path_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing.yaml");

        let result = load(Some(&missing), None, ConfigLayer::default());
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_full_stack() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            "project_name: demo\nlocation: westus2\nadmin_username: file-user\n",
        )
        .unwrap();
        let secrets_path = temp_dir.path().join(".env.secret");
        fs::write(&secrets_path, "ADMIN_USERNAME=secret-user\nADMIN_PASSWORD=pw\n").unwrap();

        let overrides = ConfigLayer {
            location: Some("eastus".to_string()),
            ..Default::default()
        };

        let loaded = load(Some(&config_path), Some(&secrets_path), overrides).unwrap();

        assert_eq!(loaded.config.project_name, "demo");
        assert_eq!(loaded.config.location, "eastus");
        assert_eq!(loaded.config.admin_username, "secret-user");
        assert_eq!(loaded.config.admin_password, "pw");
        assert_eq!(loaded.sources.config_file, Some(config_path));
        assert_eq!(loaded.sources.secrets_file, Some(secrets_path));
        assert!(loaded.config.validate().is_ok());
    }
}

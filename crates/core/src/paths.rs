//! Config-directory layout and permission helpers.
//!
//! Everything lives under `$XDG_CONFIG_HOME/gdrv` (default `~/.config/gdrv`):
//!
//! ```text
//! config.json                  user configuration
//! credentials/<key>.enc        sealed credentials (encrypted backend)
//! credentials/<key>.json       plaintext credentials (plain backend)
//! credentials/<key>.meta.json  auth metadata sidecars
//! .keyfile                     32-byte key for the encrypted backend
//! profiles.json                profile index for the secret-service backend
//! sync/index.db                sync state store
//! ```
//!
//! Directories are created 0700 and files 0600 on Unix.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult, ErrorKind};

/// Application directory name under the platform config root.
pub const APP_DIR: &str = "gdrv";

/// Resolved locations of every on-disk artifact.
#[derive(Clone, Debug)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// Resolves the default location, honouring `XDG_CONFIG_HOME`.
    pub fn resolve() -> AppResult<Self> {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg.is_empty() {
                return Ok(Self::at(PathBuf::from(xdg).join(APP_DIR)));
            }
        }
        let base = dirs::config_dir().ok_or_else(|| {
            AppError::new(ErrorKind::Unknown, "could not determine a config directory")
        })?;
        Ok(Self::at(base.join(APP_DIR)))
    }

    /// Uses an explicit root (the `--config` flag and tests).
    #[must_use]
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    #[must_use]
    pub fn credentials_dir(&self) -> PathBuf {
        self.root.join("credentials")
    }

    #[must_use]
    pub fn keyfile(&self) -> PathBuf {
        self.root.join(".keyfile")
    }

    #[must_use]
    pub fn profiles_index(&self) -> PathBuf {
        self.root.join("profiles.json")
    }

    #[must_use]
    pub fn sync_dir(&self) -> PathBuf {
        self.root.join("sync")
    }

    #[must_use]
    pub fn sync_db(&self) -> PathBuf {
        self.sync_dir().join("index.db")
    }

    /// Creates the root and credentials directories with restrictive modes.
    pub fn ensure(&self) -> AppResult<()> {
        create_dir_secure(&self.root)?;
        create_dir_secure(&self.credentials_dir())?;
        Ok(())
    }

    /// Creates the sync directory with restrictive modes.
    pub fn ensure_sync_dir(&self) -> AppResult<()> {
        create_dir_secure(&self.root)?;
        create_dir_secure(&self.sync_dir())?;
        Ok(())
    }
}

/// Creates `path` (and parents) with mode 0700 on Unix.
pub fn create_dir_secure(path: &Path) -> AppResult<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Writes `contents` to `path` with mode 0600 on Unix.
pub fn write_file_secure(path: &Path, contents: &[u8]) -> AppResult<()> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

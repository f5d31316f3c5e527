// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed `ConfigStore` for splicer tools.
//!
//! Each key is one `<key>.json` file under a base directory: the platform
//! config dir by default, or any directory given to [`FsConfigStore::at`].

use directories::ProjectDirs;
use splicer_config::{ConfigError, ConfigStore};
use std::fs;
use std::path::{Path, PathBuf};

/// Stores configs as JSON files under a base directory.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Store rooted at the user config directory (e.g. `~/.config/splicer`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "splicer")
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        Self::at(proj.config_dir())
    }

    /// Store rooted at `base`, created if missing.
    pub fn at(base: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use splicer_config::{ConcretizerConfig, ConfigService, CONCRETIZER_KEY};

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::at(dir.path()).unwrap();
        assert!(matches!(store.load_raw("absent"), Err(ConfigError::NotFound)));
    }

    #[test]
    fn service_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::at(dir.path().join("nested")).unwrap();
        let service = ConfigService::new(store);
        let mut config = ConcretizerConfig::default();
        config.splice.automatic = true;
        service.save(CONCRETIZER_KEY, &config).unwrap();

        assert!(service.store().path_for(CONCRETIZER_KEY).exists());
        let loaded: ConcretizerConfig = service.load_or_default(CONCRETIZER_KEY).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn empty_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::at(dir.path()).unwrap();
        fs::write(store.path_for("blank"), b"").unwrap();
        let service = ConfigService::new(store);
        let loaded: Option<ConcretizerConfig> = service.load("blank").unwrap();
        assert!(loaded.is_none());
    }
}

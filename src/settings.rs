use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not write settings file {0}")]
    Write(PathBuf, #[source] io::Error),
    #[error("Could not serialize settings")]
    Serialize(#[from] toml::ser::Error),
    #[error("Settings store is read only")]
    ReadOnly,
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Namespaced byte-sized key/value store. `set_u8` only stages, `commit` makes it durable.
pub trait SettingsStore: Send {
    fn get_u8(&self, key: &str) -> Option<u8>;

    fn set_u8(&mut self, key: &str, value: u8) -> Result<()>;

    fn commit(&mut self) -> Result<()>;
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct SettingsFile {
    #[serde(default)]
    namespaces: BTreeMap<String, BTreeMap<String, u8>>,
}

/// TOML file holding one table per namespace, rewritten whole on every commit.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    namespace: String,
    file: SettingsFile,
    dirty: bool,
}

impl FileSettings {
    /// Never fails: a missing or unreadable file starts out empty.
    pub fn open<P: AsRef<Path>>(path: P, namespace: &str) -> FileSettings {
        let path = path.as_ref().to_path_buf();
        let file = match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<SettingsFile>(&content) {
                Ok(file) => file,
                Err(e) => {
                    warn!("ignoring corrupt settings file {}: {}", path.display(), e);
                    SettingsFile::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no settings file at {}", path.display());
                SettingsFile::default()
            }
            Err(e) => {
                warn!("could not read settings file {}: {}", path.display(), e);
                SettingsFile::default()
            }
        };
        FileSettings {
            path,
            namespace: namespace.to_string(),
            file,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn get_u8(&self, key: &str) -> Option<u8> {
        self.file
            .namespaces
            .get(&self.namespace)
            .and_then(|values| values.get(key))
            .copied()
    }

    fn set_u8(&mut self, key: &str, value: u8) -> Result<()> {
        let previous = self
            .file
            .namespaces
            .entry(self.namespace.clone())
            .or_default()
            .insert(key.to_string(), value);
        self.dirty |= previous != Some(value);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.dirty {
            trace!("settings unchanged, skipping write");
            return Ok(());
        }
        let content = toml::to_string(&self.file)?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, content)
            .and_then(|_| fs::rename(&staging, &self.path))
            .map_err(|e| SettingsError::Write(self.path.clone(), e))?;
        self.dirty = false;
        debug!("settings written to {}", self.path.display());
        Ok(())
    }
}

/// Keeps everything in memory. Counts commits so callers can check persistence happened.
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: BTreeMap<String, u8>,
    commits: usize,
    read_only: bool,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails, like flash that has gone bad.
    pub fn read_only(values: BTreeMap<String, u8>) -> Self {
        MemorySettings {
            values,
            commits: 0,
            read_only: true,
        }
    }

    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl From<BTreeMap<String, u8>> for MemorySettings {
    fn from(values: BTreeMap<String, u8>) -> Self {
        MemorySettings {
            values,
            commits: 0,
            read_only: false,
        }
    }
}

impl SettingsStore for MemorySettings {
    fn get_u8(&self, key: &str) -> Option<u8> {
        self.values.get(key).copied()
    }

    fn set_u8(&mut self, key: &str, value: u8) -> Result<()> {
        if self.read_only {
            return Err(SettingsError::ReadOnly);
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.read_only {
            return Err(SettingsError::ReadOnly);
        }
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FileSettings::open(dir.path().join("absent.toml"), "hvac");
        assert_eq!(settings.get_u8("mode"), None);
    }

    #[test]
    fn corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "this is [not toml").unwrap();
        let settings = FileSettings::open(&path, "hvac");
        assert_eq!(settings.get_u8("mode"), None);
    }

    #[test]
    fn values_reach_disk_only_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let mut settings = FileSettings::open(&path, "hvac");
        settings.set_u8("temp", 22).unwrap();
        settings.set_u8("eco", 1).unwrap();
        assert!(!path.exists());

        settings.commit().unwrap();
        let reopened = FileSettings::open(&path, "hvac");
        assert_eq!(reopened.get_u8("temp"), Some(22));
        assert_eq!(reopened.get_u8("eco"), Some(1));
        assert_eq!(FileSettings::open(&path, "other").get_u8("temp"), None);
    }

    #[test]
    fn namespaces_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let mut first = FileSettings::open(&path, "first");
        first.set_u8("value", 1).unwrap();
        first.commit().unwrap();

        let mut second = FileSettings::open(&path, "second");
        second.set_u8("value", 2).unwrap();
        second.commit().unwrap();

        assert_eq!(FileSettings::open(&path, "first").get_u8("value"), Some(1));
        assert_eq!(FileSettings::open(&path, "second").get_u8("value"), Some(2));
    }

    #[test]
    fn read_only_memory_store() {
        let mut settings = MemorySettings::read_only(BTreeMap::new());
        assert!(matches!(
            settings.set_u8("mode", 1),
            Err(SettingsError::ReadOnly)
        ));
        assert!(settings.commit().is_err());
        assert_eq!(settings.commits(), 0);
    }
}

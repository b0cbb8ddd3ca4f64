use std::{collections::HashMap, fs, path::PathBuf, sync::RwLock};

use anyhow::{Context, Result};
use log::warn;

use super::KeyValueStorage;

/// File-backed storage: one JSON object holding every key. The whole map is
/// read once on open and rewritten on each mutation, like the settings file.
/// A corrupt or unreadable file degrades to an empty map rather than failing
/// the caller.
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create storage directory {}", parent.display())
            })?;
        }

        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read storage file {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(map) => map,
                Err(err) => {
                    warn!(
                        "storage file {} is corrupt ({err}); starting empty",
                        path.display()
                    );
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        let serialized = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write storage file {}", self.path.display()))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(key.to_string(), value.to_string());
        self.persist(&guard)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut guard = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.remove(key).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join("arcana-sessions-tests")
            .join(format!("{}.json", Uuid::new_v4()))
    }

    #[test]
    fn survives_reopen() {
        let path = temp_path();
        {
            let storage = FileStorage::open(path.clone()).unwrap();
            storage.set("k", "v").unwrap();
        }
        let storage = FileStorage::open(path.clone()).unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json {{{").unwrap();

        let storage = FileStorage::open(path.clone()).unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
        let _ = fs::remove_file(path);
    }
}

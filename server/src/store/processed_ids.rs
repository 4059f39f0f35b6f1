use std::{collections::BTreeSet, path::PathBuf, sync::Mutex};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use super::persist::{read_file, write_json_atomic};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProcessedFile {
    #[serde(default)]
    processed: BTreeSet<String>,
}

/// Message ids that have already been classified, persisted as
/// `{"processed": [sorted ids]}`.
#[derive(Debug)]
pub struct ProcessedIdStore {
    path: PathBuf,
    ids: Mutex<Option<BTreeSet<String>>>,
}

impl ProcessedIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: Mutex::new(None),
        }
    }

    fn load(&self) -> anyhow::Result<BTreeSet<String>> {
        let Some(bytes) = read_file(&self.path)? else {
            return Ok(BTreeSet::new());
        };
        match serde_json::from_slice::<ProcessedFile>(&bytes) {
            Ok(file) => Ok(file.processed),
            Err(e) => {
                tracing::warn!(
                    "Processed id store at {} is unreadable ({}), starting empty",
                    self.path.display(),
                    e
                );
                Ok(BTreeSet::new())
            }
        }
    }

    fn with_ids<R>(
        &self,
        f: impl FnOnce(&mut BTreeSet<String>) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        let mut guard = self
            .ids
            .lock()
            .map_err(|_| anyhow!("processed id store lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        match guard.as_mut() {
            Some(ids) => f(ids),
            None => Err(anyhow!("processed id store failed to load")),
        }
    }

    fn persist(&self, ids: &BTreeSet<String>) -> anyhow::Result<()> {
        write_json_atomic(&self.path, &serde_json::json!({ "processed": ids }))
    }

    pub fn has(&self, id: &str) -> anyhow::Result<bool> {
        self.with_ids(|ids| Ok(ids.contains(id)))
    }

    pub fn add(&self, id: &str) -> anyhow::Result<()> {
        self.add_many([id])
    }

    pub fn add_many<'a>(&self, new_ids: impl IntoIterator<Item = &'a str>) -> anyhow::Result<()> {
        self.with_ids(|ids| {
            let before = ids.len();
            ids.extend(new_ids.into_iter().filter(|id| !id.is_empty()).map(String::from));
            if ids.len() != before {
                self.persist(ids)?;
            }
            Ok(())
        })
    }

    pub fn all(&self) -> anyhow::Result<Vec<String>> {
        self.with_ids(|ids| Ok(ids.iter().cloned().collect()))
    }

    pub fn len(&self) -> anyhow::Result<usize> {
        self.with_ids(|ids| Ok(ids.len()))
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.with_ids(|ids| {
            ids.clear();
            self.persist(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::fs;

    #[test]
    fn test_persists_sorted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_ids.json");
        let store = ProcessedIdStore::new(&path);

        store.add("c").unwrap();
        store.add_many(["a", "", "b", "c"]).unwrap();

        assert!(store.has("a").unwrap());
        assert!(!store.has("").unwrap());
        let value: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value, json!({"processed": ["a", "b", "c"]}));

        let reopened = ProcessedIdStore::new(&path);
        assert_eq!(reopened.len().unwrap(), 3);
    }

    #[test]
    fn test_corrupt_file_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_ids.json");
        fs::write(&path, "[1, 2").unwrap();

        let store = ProcessedIdStore::new(&path);
        assert_eq!(store.len().unwrap(), 0);

        store.add("x").unwrap();
        store.clear().unwrap();
        assert!(!store.has("x").unwrap());
        assert!(ProcessedIdStore::new(&path).all().unwrap().is_empty());
    }
}

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::anyhow;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use super::persist::{read_file, write_json_atomic};
use crate::model::Item;

type ItemMap = IndexMap<String, Item>;

/// On-disk shapes the cache has had over time, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum CacheShape {
    #[strum(serialize = "root map")]
    Root,
    #[strum(serialize = "bare map")]
    BareMap,
    #[strum(serialize = "flat list")]
    FlatList,
}

#[derive(Deserialize)]
struct RootFile {
    emails: IndexMap<String, Value>,
}

#[derive(Serialize)]
struct RootFileRef<'a> {
    emails: &'a ItemMap,
}

fn decode_entry(key: Option<&str>, value: Value) -> Option<Item> {
    if !value.is_object() {
        tracing::warn!("Dropping non-object cache entry {:?}", key);
        return None;
    }
    match serde_json::from_value::<Item>(value) {
        Ok(mut item) => {
            if !item.has_id() {
                item.id = key.unwrap_or_default().to_string();
            }
            item.has_id().then_some(item)
        }
        Err(e) => {
            tracing::warn!("Dropping unreadable cache entry {:?}: {}", key, e);
            None
        }
    }
}

fn decode_keyed(entries: IndexMap<String, Value>) -> ItemMap {
    entries
        .into_iter()
        .filter_map(|(key, value)| decode_entry(Some(&key), value).map(|item| (key, item)))
        .collect()
}

fn decode_root(bytes: &[u8]) -> Option<ItemMap> {
    serde_json::from_slice::<RootFile>(bytes)
        .ok()
        .map(|root| decode_keyed(root.emails))
}

fn decode_bare_map(bytes: &[u8]) -> Option<ItemMap> {
    serde_json::from_slice::<IndexMap<String, Value>>(bytes)
        .ok()
        .map(decode_keyed)
}

fn decode_flat_list(bytes: &[u8]) -> Option<ItemMap> {
    serde_json::from_slice::<Vec<Value>>(bytes).ok().map(|list| {
        list.into_iter()
            .filter_map(|value| decode_entry(None, value))
            .map(|item| (item.id.clone(), item))
            .collect()
    })
}

const DECODERS: [(CacheShape, fn(&[u8]) -> Option<ItemMap>); 3] = [
    (CacheShape::Root, decode_root),
    (CacheShape::BareMap, decode_bare_map),
    (CacheShape::FlatList, decode_flat_list),
];

fn decode(bytes: &[u8]) -> Option<(CacheShape, ItemMap)> {
    DECODERS
        .iter()
        .find_map(|(shape, decoder)| decoder(bytes).map(|map| (*shape, map)))
}

/// Durable keyed map of classified items persisted as `{"emails": {id: Item}}`.
///
/// The file is read lazily on first access. Legacy shapes (a bare id map or a
/// flat list) are rewritten into the root shape once, on that first read.
/// Every mutation is written through before the call returns.
#[derive(Debug)]
pub struct ItemStore {
    path: PathBuf,
    items: Mutex<Option<ItemMap>>,
}

impl ItemStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            items: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> anyhow::Result<ItemMap> {
        let Some(bytes) = read_file(&self.path)? else {
            return Ok(ItemMap::new());
        };

        match decode(&bytes) {
            Some((CacheShape::Root, map)) => Ok(map),
            Some((shape, map)) => {
                tracing::info!(
                    "Migrating {} item cache at {} ({} items)",
                    shape,
                    self.path.display(),
                    map.len()
                );
                write_json_atomic(&self.path, &RootFileRef { emails: &map })?;
                Ok(map)
            }
            None => {
                tracing::warn!(
                    "Item cache at {} is unreadable, starting empty",
                    self.path.display()
                );
                Ok(ItemMap::new())
            }
        }
    }

    fn with_items<R>(&self, f: impl FnOnce(&mut ItemMap) -> anyhow::Result<R>) -> anyhow::Result<R> {
        let mut guard = self
            .items
            .lock()
            .map_err(|_| anyhow!("item store lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        match guard.as_mut() {
            Some(items) => f(items),
            None => Err(anyhow!("item store failed to load")),
        }
    }

    fn persist(&self, items: &ItemMap) -> anyhow::Result<()> {
        write_json_atomic(&self.path, &RootFileRef { emails: items })
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<Item>> {
        self.with_items(|items| Ok(items.get(id).cloned()))
    }

    pub fn contains(&self, id: &str) -> anyhow::Result<bool> {
        self.with_items(|items| Ok(items.contains_key(id)))
    }

    /// Replaces the record for `id` with whatever `merge` builds from the
    /// stored one. Returns true when `id` was not present before.
    pub fn upsert_with(
        &self,
        id: &str,
        merge: impl FnOnce(Option<&Item>) -> Item,
    ) -> anyhow::Result<bool> {
        self.with_items(|items| {
            let existing = items.get(id);
            let added = existing.is_none();
            let mut merged = merge(existing);
            merged.id = id.to_string();
            items.insert(id.to_string(), merged);
            self.persist(items)?;
            Ok(added)
        })
    }

    pub fn upsert(&self, item: Item) -> anyhow::Result<bool> {
        if !item.has_id() {
            return Err(anyhow!("item without id"));
        }
        let id = item.id.clone();
        self.upsert_with(&id, move |_| item)
    }

    /// Upserts in one write. Items without an id are skipped.
    pub fn upsert_many(&self, incoming: Vec<Item>) -> anyhow::Result<usize> {
        self.with_items(|items| {
            let mut added = 0;
            for item in incoming.into_iter().filter(Item::has_id) {
                if items.insert(item.id.clone(), item).is_none() {
                    added += 1;
                }
            }
            self.persist(items)?;
            Ok(added)
        })
    }

    pub fn all(&self) -> anyhow::Result<Vec<Item>> {
        self.with_items(|items| Ok(items.values().cloned().collect()))
    }

    pub fn len(&self) -> anyhow::Result<usize> {
        self.with_items(|items| Ok(items.len()))
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.with_items(|items| {
            items.clear();
            self.persist(items)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn item(id: &str, subject: &str) -> Item {
        Item {
            id: id.to_string(),
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    fn read_back(path: &Path) -> Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_and_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::new(dir.path().join("cache.json"));

        assert_eq!(store.len().unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_upsert_writes_root_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::new(dir.path().join("cache.json"));

        assert!(store.upsert(item("a", "first")).unwrap());
        assert!(!store.upsert(item("a", "second")).unwrap());
        assert!(store.upsert(item("b", "other")).unwrap());

        let value = read_back(store.path());
        assert_eq!(value["emails"]["a"]["subject"], "second");
        assert_eq!(value["emails"]["b"]["id"], "b");

        // A fresh instance sees the persisted records in insertion order
        let reopened = ItemStore::new(store.path());
        let ids: Vec<_> = reopened.all().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_migrates_bare_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            json!({
                "x1": {"id": "x1", "subject": "hello", "categories": ["work"]},
                "x2": {"subject": "no inner id"},
                "x3": "not an item"
            })
            .to_string(),
        )
        .unwrap();

        let store = ItemStore::new(&path);
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get("x2").unwrap().unwrap().id, "x2");

        let value = read_back(&path);
        assert_eq!(value["emails"]["x1"]["categories"][0], "work");
        assert!(value["emails"].get("x3").is_none());
    }

    #[test]
    fn test_migrates_flat_list_dropping_items_without_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            json!([
                {"id": "m1", "subject": "one"},
                {"subject": "orphan"},
                {"id": "m2", "subject": "two"}
            ])
            .to_string(),
        )
        .unwrap();

        let store = ItemStore::new(&path);
        let ids: Vec<_> = store.all().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        let value = read_back(&path);
        assert!(value["emails"].is_object());
        assert_eq!(value["emails"]["m2"]["subject"], "two");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();

        let store = ItemStore::new(&path);
        assert_eq!(store.len().unwrap(), 0);
        assert!(store.upsert(item("a", "fresh")).unwrap());
        assert_eq!(read_back(&path)["emails"]["a"]["subject"], "fresh");
    }

    #[test]
    fn test_clear_then_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let store = ItemStore::new(dir.path().join("cache.json"));
        store
            .upsert_many(vec![item("a", "1"), item("", "skipped"), item("b", "2")])
            .unwrap();
        assert_eq!(store.len().unwrap(), 2);

        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(read_back(store.path()), json!({"emails": {}}));

        assert!(store.upsert(item("a", "again")).unwrap());
    }
}

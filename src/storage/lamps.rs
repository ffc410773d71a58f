//! Last-commanded lamp state
//!
//! One record per lamp id, written only after a manual command is
//! acknowledged. Zone activation and deactivation bypass this store by
//! design: the field can disagree with it (packet loss, operator bypass,
//! firmware reset), so it is never consulted when deciding what to turn off.

use super::StorageError;
use crate::gateway::frame::LampId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persisted state for one lamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LampRecord {
    pub id: u8,
    pub is_on: bool,
    pub last_updated: DateTime<Utc>,
}

/// Sled tree mapping lamp id to its last commanded state.
#[derive(Clone)]
pub struct LampStateStore {
    tree: Arc<sled::Tree>,
}

impl LampStateStore {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("lamps")?;
        Ok(Self { tree: Arc::new(tree) })
    }

    pub fn set(&self, lamp: LampId, is_on: bool) -> Result<(), StorageError> {
        let record = LampRecord {
            id: lamp.get(),
            is_on,
            last_updated: Utc::now(),
        };
        let value = serde_json::to_vec(&record)?;
        self.tree.insert([lamp.get()], value)?;
        Ok(())
    }

    pub fn get(&self, lamp: LampId) -> Result<Option<LampRecord>, StorageError> {
        let Some(value) = self.tree.get([lamp.get()])? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&value)?))
    }

    /// All persisted lamp records, ordered by id.
    pub fn get_all(&self) -> Vec<LampRecord> {
        self.tree
            .iter()
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice(&value).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (LampStateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (LampStateStore::open(&db).unwrap(), dir)
    }

    #[test]
    fn set_then_get() {
        let (store, _dir) = open_store();
        let lamp = LampId::new(42).unwrap();

        assert!(store.get(lamp).unwrap().is_none());

        store.set(lamp, true).unwrap();
        assert!(store.get(lamp).unwrap().unwrap().is_on);

        store.set(lamp, false).unwrap();
        let record = store.get(lamp).unwrap().unwrap();
        assert!(!record.is_on);
        assert_eq!(record.id, 42);
    }

    #[test]
    fn get_all_is_ordered_by_id() {
        let (store, _dir) = open_store();
        for id in [100u16, 5, 42] {
            store.set(LampId::new(id).unwrap(), true).unwrap();
        }
        let ids: Vec<u8> = store.get_all().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 42, 100]);
    }
}

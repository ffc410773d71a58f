//! Weather record storage
//!
//! Chronological store of advisory weather readings from the data logger.
//! Keys are record-time epoch milliseconds, so range scans and "latest"
//! reads come straight off the tree order.

use super::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One reading from the weather data logger. Fields are optional because
/// the logger reports sensor dropouts as missing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub record_time: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub wind_direction_deg: Option<f64>,
}

impl WeatherRecord {
    /// A record with no readings at all is noise, not data.
    pub fn has_any_value(&self) -> bool {
        self.temperature_c.is_some()
            || self.wind_speed_ms.is_some()
            || self.wind_direction_deg.is_some()
    }
}

/// Sled tree of weather records keyed by record time.
#[derive(Clone)]
pub struct WeatherStore {
    tree: Arc<sled::Tree>,
}

impl WeatherStore {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("weather_records")?;
        Ok(Self { tree: Arc::new(tree) })
    }

    pub fn insert(&self, record: &WeatherRecord) -> Result<(), StorageError> {
        let key = record.record_time.timestamp_millis().to_be_bytes();
        let value = serde_json::to_vec(record)?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    pub fn latest(&self) -> Option<WeatherRecord> {
        self.tree
            .last()
            .ok()
            .flatten()
            .and_then(|(_, value)| serde_json::from_slice(&value).ok())
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<WeatherRecord> {
        self.tree
            .iter()
            .rev()
            .take(limit)
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice(&value).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(minute: u32, temp: f64) -> WeatherRecord {
        WeatherRecord {
            record_time: Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap(),
            temperature_c: Some(temp),
            wind_speed_ms: Some(3.2),
            wind_direction_deg: Some(180.0),
        }
    }

    #[test]
    fn latest_and_recent_follow_record_time() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = WeatherStore::open(&db).unwrap();

        // Inserted out of order; key order sorts them.
        store.insert(&record(5, 21.0)).unwrap();
        store.insert(&record(15, 23.0)).unwrap();
        store.insert(&record(10, 22.0)).unwrap();

        assert_eq!(store.latest().unwrap().temperature_c, Some(23.0));

        let recent = store.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].temperature_c, Some(23.0));
        assert_eq!(recent[1].temperature_c, Some(22.0));
    }

    #[test]
    fn empty_record_detection() {
        let empty = WeatherRecord {
            record_time: Utc::now(),
            temperature_c: None,
            wind_speed_ms: None,
            wind_direction_deg: None,
        };
        assert!(!empty.has_any_value());
        assert!(record(0, 20.0).has_any_value());
    }
}

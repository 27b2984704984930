//! Cursor persistence
//!
//! Each tracked metric has at most one persisted cursor, stored under
//! `<namespace>.anchor.<identifier>` in the injected preference store. A cursor
//! is only ever written after the batch it unlocked has been delivered; the
//! store itself just provides durable last-write-wins slots.

use crate::error::{RelayError, StoreError};
use crate::store::PreferenceStore;
use crate::types::{Cursor, HealthMetric};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Version of the cursor archive layout
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CursorArchive {
    version: u32,
    anchor: String,
}

/// Persists one opaque cursor per metric type
#[derive(Clone)]
pub struct CursorStore {
    prefs: Arc<dyn PreferenceStore>,
    namespace: String,
}

impl CursorStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>, namespace: impl Into<String>) -> Self {
        Self {
            prefs,
            namespace: namespace.into(),
        }
    }

    /// Preference key holding the cursor of `metric`
    pub fn key(&self, metric: HealthMetric) -> String {
        format!("{}.anchor.{}", self.namespace, metric.identifier())
    }

    /// Read the persisted cursor.
    ///
    /// Returns `Ok(None)` when no cursor has been stored yet. An archive that
    /// cannot be read back is reported as [`RelayError::CursorDeserialization`]
    /// and never treated as absent, which would replay the full history.
    pub fn get(&self, metric: HealthMetric) -> Result<Option<Cursor>, RelayError> {
        let data = match self.prefs.get_data(&self.key(metric)) {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(None),
            Err(StoreError::Encoding(_)) => {
                return Err(corrupt(metric, "archive bytes are not decodable"))
            }
            Err(StoreError::WrongKind(_)) => {
                return Err(corrupt(metric, "archive is not stored as binary data"))
            }
            Err(e) => return Err(e.into()),
        };

        let archive: CursorArchive =
            serde_json::from_slice(&data).map_err(|e| corrupt(metric, &e.to_string()))?;

        if archive.version != ARCHIVE_VERSION {
            return Err(corrupt(
                metric,
                &format!("unsupported archive version {}", archive.version),
            ));
        }

        let bytes = BASE64
            .decode(&archive.anchor)
            .map_err(|e| corrupt(metric, &e.to_string()))?;

        Ok(Some(Cursor::new(bytes)))
    }

    /// Persist `cursor`, replacing any previous one
    pub fn set(&self, metric: HealthMetric, cursor: &Cursor) -> Result<(), RelayError> {
        let archive = CursorArchive {
            version: ARCHIVE_VERSION,
            anchor: BASE64.encode(cursor.as_bytes()),
        };
        let data = serde_json::to_vec(&archive)?;
        self.prefs.set_data(&self.key(metric), &data)?;
        Ok(())
    }

    /// Forget the cursor so the next poll starts from the beginning of history
    pub fn clear(&self, metric: HealthMetric) -> Result<(), RelayError> {
        self.prefs.remove(&self.key(metric))?;
        Ok(())
    }

    /// Metrics that currently have a stored cursor, in catalogue order
    pub fn list(&self) -> Result<Vec<HealthMetric>, RelayError> {
        let prefix = format!("{}.anchor.", self.namespace);
        let keys = self.prefs.keys_with_prefix(&prefix)?;
        Ok(HealthMetric::ALL
            .iter()
            .copied()
            .filter(|m| keys.contains(&self.key(*m)))
            .collect())
    }
}

fn corrupt(metric: HealthMetric, message: &str) -> RelayError {
    RelayError::CursorDeserialization {
        metric,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use pretty_assertions::assert_eq;

    fn store() -> (Arc<MemoryStore>, CursorStore) {
        let prefs = Arc::new(MemoryStore::new());
        let cursors = CursorStore::new(prefs.clone(), "com.example.hksfx");
        (prefs, cursors)
    }

    #[test]
    fn test_key_format() {
        let (_, cursors) = store();
        assert_eq!(
            cursors.key(HealthMetric::StepCount),
            "com.example.hksfx.anchor.HKQuantityTypeIdentifierStepCount"
        );
    }

    #[test]
    fn test_absent_until_set() {
        let (_, cursors) = store();
        assert_eq!(cursors.get(HealthMetric::HeartRate).unwrap(), None);

        let cursor = Cursor::new(vec![0, 0, 0, 7]);
        cursors.set(HealthMetric::HeartRate, &cursor).unwrap();
        assert_eq!(cursors.get(HealthMetric::HeartRate).unwrap(), Some(cursor));
        assert_eq!(cursors.get(HealthMetric::StepCount).unwrap(), None);
    }

    #[test]
    fn test_overwrite_keeps_latest_only() {
        let (_, cursors) = store();
        cursors.set(HealthMetric::StepCount, &Cursor::new(vec![1])).unwrap();
        cursors.set(HealthMetric::StepCount, &Cursor::new(vec![2])).unwrap();
        assert_eq!(
            cursors.get(HealthMetric::StepCount).unwrap(),
            Some(Cursor::new(vec![2]))
        );
    }

    #[test]
    fn test_corrupt_archive_is_fatal_not_absent() {
        let (prefs, cursors) = store();
        prefs
            .set_data(&cursors.key(HealthMetric::StepCount), b"garbage")
            .unwrap();

        let err = cursors.get(HealthMetric::StepCount).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            RelayError::CursorDeserialization {
                metric: HealthMetric::StepCount,
                ..
            }
        ));
    }

    #[test]
    fn test_archive_stored_as_string_is_fatal() {
        let (prefs, cursors) = store();
        prefs
            .set_string(
                &cursors.key(HealthMetric::StepCount),
                r#"{"version":1,"anchor":"AAAAAAAAAAM="}"#,
            )
            .unwrap();

        let err = cursors.get(HealthMetric::StepCount).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            RelayError::CursorDeserialization {
                metric: HealthMetric::StepCount,
                ..
            }
        ));
    }

    #[test]
    fn test_cursor_survives_other_handle_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let cursor = Cursor::new(vec![0, 0, 0, 0, 0, 0, 0, 3]);

        let first = Arc::new(FileStore::open(&path).unwrap());
        let second = Arc::new(FileStore::open(&path).unwrap());
        CursorStore::new(first, "HKSFX")
            .set(HealthMetric::StepCount, &cursor)
            .unwrap();
        second.set_string("HKSFX.sfx_realm", "eu0").unwrap();

        let reopened = Arc::new(FileStore::open(&path).unwrap());
        assert_eq!(
            CursorStore::new(reopened, "HKSFX")
                .get(HealthMetric::StepCount)
                .unwrap(),
            Some(cursor)
        );
    }

    #[test]
    fn test_unknown_archive_version_is_fatal() {
        let (prefs, cursors) = store();
        prefs
            .set_data(
                &cursors.key(HealthMetric::HeartRate),
                br#"{"version":9,"anchor":"AA=="}"#,
            )
            .unwrap();
        assert!(cursors.get(HealthMetric::HeartRate).unwrap_err().is_fatal());
    }

    #[test]
    fn test_clear_and_list() {
        let (_, cursors) = store();
        cursors.set(HealthMetric::StepCount, &Cursor::new(vec![1])).unwrap();
        cursors.set(HealthMetric::HeartRate, &Cursor::new(vec![1])).unwrap();
        assert_eq!(
            cursors.list().unwrap(),
            vec![HealthMetric::HeartRate, HealthMetric::StepCount]
        );

        cursors.clear(HealthMetric::HeartRate).unwrap();
        assert_eq!(cursors.list().unwrap(), vec![HealthMetric::StepCount]);
    }

    #[test]
    fn test_cursor_durable_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let cursor = Cursor::new(vec![0xde, 0xad, 0xbe, 0xef]);

        {
            let prefs = Arc::new(FileStore::open(&path).unwrap());
            CursorStore::new(prefs, "HKSFX")
                .set(HealthMetric::AppleStandTime, &cursor)
                .unwrap();
        }

        let prefs = Arc::new(FileStore::open(&path).unwrap());
        let cursors = CursorStore::new(prefs, "HKSFX");
        assert_eq!(cursors.get(HealthMetric::AppleStandTime).unwrap(), Some(cursor));
    }
}

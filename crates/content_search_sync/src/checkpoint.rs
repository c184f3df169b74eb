//! Durable watermark storage: a single JSON object in a file, one entry per
//! watermark key. Grounded in the source system's `JsonFileStorage`/`State`
//! pair, reshaped as one type that owns both the in-memory record and the
//! durable file, since Rust has no ambient module-level singleton to lean on.

use std::{
    collections::BTreeMap,
    path::{
        Path,
        PathBuf,
    },
};

use anyhow::Context;
use tokio::fs;

use crate::errors::EtlError;

/// The sentinel initial watermark, used whenever a key has never been
/// written.
pub const EPOCH: &str = "1970-01-01T00:00:00Z";

/// A mapping from watermark key to an RFC 3339 timestamp string, backed by
/// a JSON file rewritten atomically on every `set`.
///
/// Not `Clone`/`Send`-shared: the Coordinator owns one instance and threads
/// it through by `&mut` reference, serializing all access by construction.
pub struct CheckpointStore {
    path: PathBuf,
    record: BTreeMap<String, String>,
}

impl CheckpointStore {
    /// Loads the store from `path`. A missing file or unparseable content is
    /// treated as an empty record — the store self-heals on the first `set`.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let record = Self::read_record(&path).await.unwrap_or_default();
        Self { path, record }
    }

    async fn read_record(path: &Path) -> Option<BTreeMap<String, String>> {
        let bytes = fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Returns the value for `key`, or `None` if it has never been set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.record.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, falling back to [`EPOCH`] if absent.
    pub fn get_or_epoch(&self, key: &str) -> String {
        self.get(key).unwrap_or(EPOCH).to_string()
    }

    /// Merges `(key, value)` into the record and rewrites the durable file.
    ///
    /// Writes to a temp file in the same directory and renames it over the
    /// target, so a crash mid-write never leaves a torn file behind.
    pub async fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), EtlError> {
        self.record.insert(key.into(), value.into());
        self.persist().await
    }

    async fn persist(&self) -> Result<(), EtlError> {
        let contents =
            serde_json::to_vec_pretty(&self.record).context("failed to serialize checkpoint state")
                .map_err(EtlError::CheckpointIo)?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, &contents)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))
            .map_err(EtlError::CheckpointIo)?;
        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("failed to rename {} to {}", tmp_path.display(), self.path.display()))
            .map_err(EtlError::CheckpointIo)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::{
        NamedTempFile,
        TempDir,
    };

    use super::*;

    /// A path that does not exist yet, inside a directory that is removed
    /// (along with anything `CheckpointStore` wrote into it) on drop.
    fn missing_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        (dir, path)
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let (_guard, path) = missing_path();
        let store = CheckpointStore::load(&path).await;
        assert_eq!(store.get("movie_film_work_since"), None);
        assert_eq!(store.get_or_epoch("movie_film_work_since"), EPOCH);
    }

    #[tokio::test]
    async fn corrupt_file_is_treated_as_empty_and_self_heals() {
        let tmp = NamedTempFile::new().unwrap();
        fs::write(tmp.path(), b"not json at all").await.unwrap();
        let mut store = CheckpointStore::load(tmp.path()).await;
        assert_eq!(store.get("movie_genre_since"), None);

        store
            .set("movie_genre_since", "2024-01-01T00:00:00Z")
            .await
            .unwrap();
        let reloaded = CheckpointStore::load(tmp.path()).await;
        assert_eq!(
            reloaded.get("movie_genre_since"),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn set_is_durable_across_a_fresh_load() {
        let tmp = NamedTempFile::new().unwrap();
        let mut store = CheckpointStore::load(tmp.path()).await;
        store
            .set("person_person_since", "2024-06-01T00:00:00Z")
            .await
            .unwrap();

        let reloaded = CheckpointStore::load(tmp.path()).await;
        assert_eq!(
            reloaded.get("person_person_since"),
            Some("2024-06-01T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn repeated_set_is_idempotent() {
        let tmp = NamedTempFile::new().unwrap();
        let mut store = CheckpointStore::load(tmp.path()).await;
        store.set("genre_genre_since", "2024-03-01T00:00:00Z").await.unwrap();
        let bytes_once = fs::read(tmp.path()).await.unwrap();

        store.set("genre_genre_since", "2024-03-01T00:00:00Z").await.unwrap();
        let bytes_twice = fs::read(tmp.path()).await.unwrap();

        assert_eq!(bytes_once, bytes_twice);
    }

    proptest! {
        /// §8 property 1: watermark monotonicity. A `Coordinator` only ever
        /// calls `set` with a value taken from an ascending `modified`
        /// stream, so for any non-decreasing sequence of writes, `get`
        /// reflects the last one written and every intermediate read is
        /// itself non-decreasing.
        #[test]
        fn watermark_reads_are_non_decreasing_across_a_monotone_write_sequence(
            deltas in prop::collection::vec(0i64..1_000_000, 1..30),
        ) {
            use chrono::{TimeZone, Utc};

            let tmp = NamedTempFile::new().unwrap();
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let mut store = CheckpointStore::load(tmp.path()).await;
                let mut watermark_secs = 0i64;
                let mut last_seen = EPOCH.to_string();
                for delta in deltas {
                    watermark_secs += delta;
                    let value = Utc.timestamp_opt(watermark_secs, 0).unwrap().to_rfc3339();
                    store.set("movie_film_work_since", value.clone()).await.unwrap();
                    let observed = store.get("movie_film_work_since").unwrap().to_string();
                    prop_assert_eq!(&observed, &value);
                    prop_assert!(observed >= last_seen);
                    last_seen = observed;
                }
                Ok(())
            })?;
        }
    }
}

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use log::info;

use crate::member::Record;
use crate::record_table;
use crate::resume_manager::Checkpoint;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence for collected records and the resumption checkpoint.
pub trait DurableStore {
    fn load_all(&self) -> Result<Vec<Record>, StoreError>;

    /// Ids of every stored record, the dedup set for a run.
    fn load_ids(&self) -> Result<HashSet<i64>, StoreError> {
        Ok(self.load_all()?.iter().map(|r| r.user_id).collect())
    }

    /// Upserts by `user_id`; on conflict the incoming record wins.
    fn merge(&mut self, records: &[Record]) -> Result<(), StoreError>;

    /// Never fails: unreadable state degrades to a fresh checkpoint.
    fn load_checkpoint(&self) -> Checkpoint;

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StoreError>;
}

/// Record table and checkpoint kept side by side in the output directory.
pub struct FileStore {
    table_path: PathBuf,
    progress_path: PathBuf,
}

impl FileStore {
    /// Creates `output_dir` and its `photos` folder if needed.
    pub fn open(output_dir: &Path, channel: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(output_dir.join("photos"))?;
        let store = FileStore {
            table_path: output_dir.join(format!("{}_data.csv", channel)),
            progress_path: output_dir.join(format!("{}_progress.json", channel)),
        };
        info!("Record table: {:?}", store.table_path);
        Ok(store)
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn progress_path(&self) -> &Path {
        &self.progress_path
    }
}

impl DurableStore for FileStore {
    fn load_all(&self) -> Result<Vec<Record>, StoreError> {
        record_table::read_records(&self.table_path)
    }

    fn load_ids(&self) -> Result<HashSet<i64>, StoreError> {
        record_table::read_ids(&self.table_path)
    }

    fn merge(&mut self, records: &[Record]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        record_table::merge_into(&self.table_path, records)
    }

    fn load_checkpoint(&self) -> Checkpoint {
        Checkpoint::load(&self.progress_path)
    }

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        checkpoint.save(&self.progress_path)
    }
}

/// Writes `contents` to a sibling temp file and renames it over `path`, so a
/// crash mid-write leaves the previous version intact.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, username: &str) -> Record {
        Record {
            user_id: id,
            username: Some(username.to_string()),
            first_name: None,
            last_name: None,
            full_name: String::new(),
            phone: None,
            is_bot: false,
            is_premium: false,
            photo: None,
        }
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let store = FileStore::open(&out, "rust_ru").unwrap();
        assert!(out.join("photos").is_dir());
        assert_eq!(store.table_path(), out.join("rust_ru_data.csv"));
        assert_eq!(store.progress_path(), out.join("rust_ru_progress.json"));
    }

    #[test]
    fn test_merge_upserts_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path(), "chan").unwrap();

        store.merge(&[record(42, "old"), record(1, "one")]).unwrap();
        store.merge(&[record(42, "new")]).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        let row = all.iter().find(|r| r.user_id == 42).unwrap();
        assert_eq!(row.username.as_deref(), Some("new"));
    }

    #[test]
    fn test_merge_keeps_rows_it_cannot_type() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path(), "chan").unwrap();
        fs::write(
            store.table_path(),
            "\u{feff}user_id,username,first_name,last_name,full_name,phone,is_bot,is_premium,photo\n\
             100.0,ivan,,,,,False,False,\n\
             101,olga,,,,,maybe,False,\n\
             102,petr,,,,,False,False,\n",
        )
        .unwrap();
        assert_eq!(store.load_ids().unwrap(), HashSet::from([100, 101, 102]));

        store.merge(&[record(5, "five")]).unwrap();

        let table = fs::read_to_string(store.table_path()).unwrap();
        assert!(table.contains("100.0,ivan,"));
        assert!(table.contains("101,olga,,,,,maybe,False,"));
        assert!(table.contains("102,petr,"));
        assert_eq!(store.load_ids().unwrap(), HashSet::from([100, 101, 102, 5]));
    }

    #[test]
    fn test_empty_merge_does_not_create_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path(), "chan").unwrap();
        store.merge(&[]).unwrap();
        assert!(!store.table_path().exists());
    }

    #[test]
    fn test_checkpoint_round_trip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path(), "chan").unwrap();
        let mut checkpoint = store.load_checkpoint();
        checkpoint.mark_processed("q");
        store.save_checkpoint(&checkpoint).unwrap();

        assert_eq!(store.load_checkpoint().processed_letters, vec!["q".to_string()]);
        assert!(!dir.path().join("chan_progress.json.tmp").exists());
    }
}

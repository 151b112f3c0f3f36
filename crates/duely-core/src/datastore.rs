use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::item::{DueItem, sort_snapshot};

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub items_path: PathBuf,
    pub sequence_path: PathBuf,
    pub notified_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            path: data_dir.clone(),
            source,
        })?;

        let items_path = data_dir.join("items.data");
        let sequence_path = data_dir.join("sequence.data");
        let notified_path = data_dir.join("notified.data");

        for path in [&items_path, &sequence_path, &notified_path] {
            if !path.exists() {
                fs::write(path, "").map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            items = %items_path.display(),
            sequence = %sequence_path.display(),
            notified = %notified_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            items_path,
            sequence_path,
            notified_path,
        })
    }

    /// Loads every row, ordered by due date.
    #[tracing::instrument(skip(self))]
    pub fn load_items(&self) -> Result<Vec<DueItem>, StoreError> {
        let mut items = load_jsonl(&self.items_path)?;
        sort_snapshot(&mut items);
        Ok(items)
    }

    #[tracing::instrument(skip(self, items))]
    pub fn save_items(&self, items: &[DueItem]) -> Result<(), StoreError> {
        let mut payload = String::new();
        for item in items {
            payload.push_str(&serde_json::to_string(item)?);
            payload.push('\n');
        }
        write_atomic(&self.items_path, &payload)
    }

    /// Last id handed out; 0 when nothing was ever inserted.
    #[tracing::instrument(skip(self))]
    pub fn load_last_id(&self) -> Result<u64, StoreError> {
        let raw = read_text(&self.sequence_path)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed.parse::<u64>().map_err(|err| StoreError::Io {
            path: self.sequence_path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn save_last_id(&self, id: u64) -> Result<(), StoreError> {
        write_atomic(&self.sequence_path, &format!("{id}\n"))
    }

    #[tracing::instrument(skip(self))]
    pub fn load_notified(&self) -> Result<BTreeSet<u64>, StoreError> {
        let raw = read_text(&self.notified_path)?;
        let mut out = BTreeSet::new();
        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.parse::<u64>() {
                Ok(id) => {
                    out.insert(id);
                }
                Err(_) => debug!(line = %trimmed, "ignoring malformed notified entry"),
            }
        }
        Ok(out)
    }

    #[tracing::instrument(skip(self, ids))]
    pub fn save_notified(&self, ids: &BTreeSet<u64>) -> Result<(), StoreError> {
        let payload: String = ids.iter().map(|id| format!("{id}\n")).collect();
        write_atomic(&self.notified_path, &payload)
    }
}

fn read_text(path: &Path) -> Result<String, StoreError> {
    fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> Result<Vec<DueItem>, StoreError> {
    debug!(file = %path.display(), "loading jsonl");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(io_err)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let item: DueItem =
            serde_json::from_str(trimmed).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
        out.push(item);
    }

    debug!(count = out.len(), "loaded items from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, payload))]
fn write_atomic(path: &Path, payload: &str) -> Result<(), StoreError> {
    debug!(file = %path.display(), bytes = payload.len(), "writing atomically");

    let persist_err = |source| StoreError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(persist_err)?;
    temp.write_all(payload.as_bytes()).map_err(persist_err)?;
    temp.flush().map_err(persist_err)?;

    temp.persist(path).map_err(|err| persist_err(err.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::tempdir;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn open_creates_empty_files() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(&temp.path().join("nested")).expect("open");

        assert!(store.items_path.exists());
        assert!(store.sequence_path.exists());
        assert!(store.notified_path.exists());
        assert!(store.load_items().expect("load").is_empty());
        assert_eq!(store.load_last_id().expect("last id"), 0);
        assert!(store.load_notified().expect("notified").is_empty());
    }

    #[test]
    fn items_are_loaded_in_due_order() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");

        let items = vec![
            DueItem {
                id: 1,
                name: "passport".to_string(),
                due_date: date(2025, 3, 1),
            },
            DueItem {
                id: 2,
                name: "milk".to_string(),
                due_date: date(2024, 12, 25),
            },
        ];
        store.save_items(&items).expect("save");

        let raw = std::fs::read_to_string(&store.items_path).expect("read raw");
        assert!(raw.contains("\"due\":\"2025-03-01\""));

        let loaded = store.load_items().expect("load");
        assert_eq!(loaded[0].name, "milk");
        assert_eq!(loaded[1].name, "passport");
    }

    #[test]
    fn corrupt_line_reports_position() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");
        std::fs::write(
            &store.items_path,
            "{\"id\":1,\"name\":\"ok\",\"due\":\"2025-01-01\"}\nnot json\n",
        )
        .expect("write raw");

        let err = store.load_items().expect_err("corrupt file");
        assert!(matches!(err, StoreError::Corrupt { line: 2, .. }));
    }

    #[test]
    fn sequence_and_notified_roundtrip() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");

        store.save_last_id(41).expect("save id");
        assert_eq!(store.load_last_id().expect("load id"), 41);

        let ids: BTreeSet<u64> = [3, 7].into_iter().collect();
        store.save_notified(&ids).expect("save notified");
        assert_eq!(store.load_notified().expect("load notified"), ids);
    }
}

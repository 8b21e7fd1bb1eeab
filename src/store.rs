//! Reference embeddings loaded from a directory of JSON records.
//!
//! The store publishes an immutable [`Gallery`] snapshot. A reload reads and
//! validates the whole directory into a fresh gallery first and only then
//! swaps it in, so readers never see a half-built mapping and a failed reload
//! leaves the previous gallery in place.

use crate::error::StoreError;
use facematch_vision::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// One reference record file as written by enrollment.
///
/// `relationship` is the canonical key. Older files spell it `relation`;
/// both are accepted on read and [`RecordFile::relation`] folds them into one
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(default, skip_serializing)]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dim: Option<usize>,
    pub embedding: Vec<f32>,
}

impl RecordFile {
    pub fn relation(&self) -> String {
        self.relationship
            .clone()
            .or_else(|| self.relation.clone())
            .unwrap_or_default()
    }
}

/// A named identity with its normalized embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRecord {
    pub id: String,
    pub name: String,
    pub relation: String,
    pub embedding: Embedding,
}

impl ReferenceRecord {
    /// Validate and normalize a parsed record file.
    pub fn from_file(file: RecordFile, expected_dim: usize) -> Result<Self, String> {
        if file.id.trim().is_empty() {
            return Err("empty id".to_string());
        }
        if let Some(declared) = file.embedding_dim {
            if declared != file.embedding.len() {
                return Err(format!(
                    "embedding_dim is {} but the embedding has {} values",
                    declared,
                    file.embedding.len()
                ));
            }
        }
        if file.embedding.len() != expected_dim {
            return Err(format!(
                "expected {} values, found {}",
                expected_dim,
                file.embedding.len()
            ));
        }

        let relation = file.relation();
        let embedding = Embedding::from_raw(file.embedding)
            .ok_or_else(|| "embedding is zero or not finite".to_string())?;
        Ok(Self {
            id: file.id,
            name: file.name,
            relation,
            embedding,
        })
    }
}

/// Public view of a record, without its embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceSummary {
    pub id: String,
    pub name: String,
    pub relation: String,
}

/// Immutable id → record mapping in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    records: Vec<ReferenceRecord>,
}

impl Gallery {
    /// Build from records in order. A repeated id replaces the earlier value
    /// but keeps the earlier position.
    pub fn from_records(records: impl IntoIterator<Item = ReferenceRecord>) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut out: Vec<ReferenceRecord> = Vec::new();
        for record in records {
            match index.get(&record.id) {
                Some(&pos) => {
                    log::warn!("duplicate record id {}, later file wins", record.id);
                    out[pos] = record;
                }
                None => {
                    index.insert(record.id.clone(), out.len());
                    out.push(record);
                }
            }
        }
        Self { records: out }
    }

    pub fn records(&self) -> &[ReferenceRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&ReferenceRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summaries(&self) -> Vec<FaceSummary> {
        self.records
            .iter()
            .map(|r| FaceSummary {
                id: r.id.clone(),
                name: r.name.clone(),
                relation: r.relation.clone(),
            })
            .collect()
    }
}

/// Read every `*.json` record in `dir`, in file-name order.
pub fn read_gallery(dir: &Path, expected_dim: usize) -> Result<Gallery, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|source| StoreError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        records.push(read_record(&path, expected_dim)?);
    }
    Ok(Gallery::from_records(records))
}

fn read_record(path: &Path, expected_dim: usize) -> Result<ReferenceRecord, StoreError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StoreError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let file: RecordFile = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    ReferenceRecord::from_file(file, expected_dim).map_err(|reason| StoreError::InvalidEmbedding {
        path: path.to_path_buf(),
        reason,
    })
}

/// Shared reference store, reloadable from its directory.
#[derive(Debug)]
pub struct EmbeddingStore {
    dir: PathBuf,
    expected_dim: usize,
    current: RwLock<Arc<Gallery>>,
}

impl EmbeddingStore {
    /// An empty store bound to `dir`; call [`EmbeddingStore::load`] to fill it.
    pub fn new(dir: impl Into<PathBuf>, expected_dim: usize) -> Self {
        Self {
            dir: dir.into(),
            expected_dim,
            current: RwLock::new(Arc::new(Gallery::default())),
        }
    }

    /// Length every record and query embedding must have.
    pub fn expected_dim(&self) -> usize {
        self.expected_dim
    }

    /// Re-read the directory and publish the result. On error the previous
    /// gallery stays published.
    pub fn load(&self) -> Result<usize, StoreError> {
        let gallery = read_gallery(&self.dir, self.expected_dim)?;
        let count = gallery.len();
        let previous = self.replace(gallery);
        log::info!(
            "loaded {} embedding(s) from {} (previously {})",
            count,
            self.dir.display(),
            previous.len()
        );
        Ok(count)
    }

    /// Swap in `gallery`, returning the one it replaced.
    pub fn replace(&self, gallery: Gallery) -> Arc<Gallery> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(gallery))
    }

    /// The currently published gallery. Holding it does not block reloads.
    pub fn snapshot(&self) -> Arc<Gallery> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn list(&self) -> Vec<FaceSummary> {
        self.snapshot().summaries()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DIM: usize = 4;

    fn write(dir: &Path, file: &str, value: serde_json::Value) {
        std::fs::write(dir.join(file), serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    #[test]
    fn load_normalizes_and_orders_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "b.json",
            json!({"id": "b2", "name": "Bob", "relationship": "friend", "embedding": [0.0, 2.0, 0.0, 0.0]}),
        );
        write(
            dir.path(),
            "a.json",
            json!({"id": "a1", "name": "Alice", "relationship": "sister", "embedding_dim": 4, "embedding": [3.0, 4.0, 0.0, 0.0]}),
        );
        std::fs::write(dir.path().join("notes.txt"), "not a record").unwrap();

        let store = EmbeddingStore::new(dir.path(), DIM);
        assert_eq!(store.load().unwrap(), 2);

        let snap = store.snapshot();
        let ids: Vec<&str> = snap.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a1", "b2"]);

        let alice = snap.get("a1").unwrap();
        assert!((alice.embedding.vector[0] - 0.6).abs() < 1e-6);
        assert!((alice.embedding.vector[1] - 0.8).abs() < 1e-6);
        assert_eq!(snap.get("b2").unwrap().embedding.vector[1], 1.0);
    }

    #[test]
    fn relation_alias_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "old.json",
            json!({"id": "o1", "name": "Oma", "relation": "grandmother", "embedding": [1.0, 0.0, 0.0, 0.0]}),
        );
        write(
            dir.path(),
            "bare.json",
            json!({"id": "b1", "name": "Ben", "embedding": [0.0, 1.0, 0.0, 0.0]}),
        );

        let store = EmbeddingStore::new(dir.path(), DIM);
        store.load().unwrap();
        assert_eq!(
            store.list(),
            vec![
                FaceSummary {
                    id: "b1".into(),
                    name: "Ben".into(),
                    relation: String::new()
                },
                FaceSummary {
                    id: "o1".into(),
                    name: "Oma".into(),
                    relation: "grandmother".into()
                },
            ]
        );
    }

    #[test]
    fn reload_of_unchanged_directory_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["Ann", "Bea", "Cy"].iter().enumerate() {
            let mut v = vec![0.1; DIM];
            v[i] = 1.0;
            write(
                dir.path(),
                &format!("{}.json", name),
                json!({"id": format!("id{}", i), "name": name, "relationship": "", "embedding": v}),
            );
        }

        let store = EmbeddingStore::new(dir.path(), DIM);
        store.load().unwrap();
        let first = store.snapshot();
        store.load().unwrap();
        let second = store.snapshot();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[test]
    fn malformed_file_fails_without_touching_store() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.json",
            json!({"id": "a1", "name": "Alice", "embedding": [1.0, 0.0, 0.0, 0.0]}),
        );
        let store = EmbeddingStore::new(dir.path(), DIM);
        store.load().unwrap();

        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
        assert_eq!(store.len(), 1);
        assert!(store.snapshot().get("a1").is_some());
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "short.json",
            json!({"id": "s", "name": "Short", "embedding": [1.0, 0.0]}),
        );
        let err = read_gallery(dir.path(), DIM).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbedding { .. }));

        write(
            dir.path(),
            "short.json",
            json!({"id": "s", "name": "Short", "embedding_dim": 3, "embedding": [1.0, 0.0, 0.0, 0.0]}),
        );
        assert!(read_gallery(dir.path(), DIM).is_err());

        write(
            dir.path(),
            "short.json",
            json!({"id": "s", "name": "Short", "embedding": [0.0, 0.0, 0.0, 0.0]}),
        );
        assert!(read_gallery(dir.path(), DIM).is_err());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddingStore::new(dir.path().join("nope"), DIM);
        assert!(matches!(store.load(), Err(StoreError::ReadDir { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_ids_keep_first_position() {
        let e = |x: f32| Embedding::from_raw(vec![x, 1.0, 0.0, 0.0]).unwrap();
        let rec = |id: &str, name: &str, x: f32| ReferenceRecord {
            id: id.into(),
            name: name.into(),
            relation: String::new(),
            embedding: e(x),
        };
        let gallery = Gallery::from_records(vec![
            rec("x", "First", 0.0),
            rec("y", "Other", 1.0),
            rec("x", "Second", 2.0),
        ]);
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.records()[0].name, "Second");
        assert_eq!(gallery.records()[1].name, "Other");
    }

    #[test]
    fn record_file_round_trips_canonical_key() {
        let file = RecordFile {
            id: "ab12cd34".into(),
            name: "Alice".into(),
            relationship: Some("sister".into()),
            relation: None,
            embedding_dim: Some(2),
            embedding: vec![0.6, 0.8],
        };
        let text = serde_json::to_value(&file).unwrap();
        assert_eq!(text["relationship"], "sister");
        assert!(text.get("relation").is_none());
        assert_eq!(text["embedding_dim"], 2);
    }
}

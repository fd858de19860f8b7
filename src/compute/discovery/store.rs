//! Key/value persistence for loop state.
//!
//! Keys are slash-separated names without extension (`meta_memory`,
//! `scans/iter_0001`). The file repository maps a key to `<root>/<key>.json`
//! and replaces files atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed JSON under key '{key}': {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid key '{0}'")]
    InvalidKey(String),
}

/// Pluggable JSON document store.
pub trait Repository {
    /// Document under `key`, or `None` if absent.
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the document under `key`.
    fn save(&mut self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Human-readable location of `key`, for logs and summaries.
    fn location(&self, key: &str) -> String;
}

/// Load and deserialize a typed document.
pub fn load_typed<T: DeserializeOwned>(
    repo: &dyn Repository,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match repo.load(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Json {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Serialize and save a typed document.
pub fn save_typed<T: Serialize>(
    repo: &mut dyn Repository,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Json {
        key: key.to_string(),
        source,
    })?;
    repo.save(key, &value)
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

// ============================================================================
// JSON files
// ============================================================================

/// One pretty-printed JSON file per key under a root directory.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    root: PathBuf,
}

impl JsonFileRepository {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };

        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path.is_dir() {
                self.collect_keys(&path, out)?;
            } else if path.extension().is_some_and(|e| e == "json")
                && let Ok(rel) = path.with_extension("").strip_prefix(&self.root)
            {
                let key: Vec<_> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect();
                out.push(key.join("/"));
            }
        }
        Ok(())
    }
}

impl Repository for JsonFileRepository {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        let path = self.path_for(key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Json {
                key: key.to_string(),
                source,
            })
    }

    fn save(&mut self, key: &str, value: &Value) -> Result<(), StoreError> {
        validate_key(key)?;
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;

        // Write to a sibling temp file, then rename over the target.
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
            f.write_all(json.as_bytes()).map_err(io_err(&tmp_path))?;
            f.sync_all().map_err(io_err(&tmp_path))?;
        }
        fs::rename(&tmp_path, &path).map_err(io_err(&path))?;
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn location(&self, key: &str) -> String {
        self.path_for(key).display().to_string()
    }
}

// ============================================================================
// In memory
// ============================================================================

/// Volatile repository, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    documents: BTreeMap<String, Value>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl Repository for InMemoryRepository {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        Ok(self.documents.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &Value) -> Result<(), StoreError> {
        validate_key(key)?;
        self.documents.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .documents
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn location(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let mut repo = JsonFileRepository::new(dir.path());
        assert!(repo.load("meta_memory").unwrap().is_none());

        let doc = json!({"meta": {"count": 1}, "rules": []});
        repo.save("meta_memory", &doc).unwrap();
        assert_eq!(repo.load("meta_memory").unwrap(), Some(doc));
        assert!(dir.path().join("meta_memory.json").exists());
    }

    #[test]
    fn test_file_save_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let mut repo = JsonFileRepository::new(dir.path());
        repo.save("scans/iter_0001", &json!({"results": []})).unwrap();
        repo.save("scans/iter_0001", &json!({"results": [1]})).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("scans"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["iter_0001.json".to_string()]);
        assert_eq!(
            repo.load("scans/iter_0001").unwrap(),
            Some(json!({"results": [1]}))
        );
    }

    #[test]
    fn test_file_keys_by_prefix() {
        let dir = tempdir().unwrap();
        let mut repo = JsonFileRepository::new(dir.path());
        repo.save("scans/b", &json!(1)).unwrap();
        repo.save("scans/a", &json!(2)).unwrap();
        repo.save("hof_rules", &json!(3)).unwrap();

        assert_eq!(repo.keys("scans/").unwrap(), vec!["scans/a", "scans/b"]);
        assert_eq!(repo.keys("").unwrap().len(), 3);
    }

    #[test]
    fn test_missing_root_has_no_keys() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path().join("absent"));
        assert!(repo.keys("scans/").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bandit_stats.json"), "{not json").unwrap();
        let repo = JsonFileRepository::new(dir.path());
        assert!(matches!(
            repo.load("bandit_stats"),
            Err(StoreError::Json { .. })
        ));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let mut repo = InMemoryRepository::new();
        for key in ["", "/abs", "a//b", "../escape"] {
            assert!(matches!(
                repo.save(key, &json!(null)),
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn test_typed_helpers() {
        let mut repo = InMemoryRepository::new();
        save_typed(&mut repo, "numbers", &vec![1u32, 2, 3]).unwrap();
        let back: Option<Vec<u32>> = load_typed(&repo, "numbers").unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
        let missing: Option<Vec<u32>> = load_typed(&repo, "other").unwrap();
        assert!(missing.is_none());
        assert_eq!(repo.location("numbers"), "memory://numbers");
    }
}

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::domain::{AssetFileType, Pmid};
use crate::error::CellError;

const ANNOTATION_DIR: &str = "ontogpt";
const DATASET_DIR: &str = "cellxgene";

/// Layout of every cache artifact under the work directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn observations_path(&self, census_version: &str) -> Utf8PathBuf {
        self.root
            .join(format!("lung_obs-{}.parquet", cache_key(census_version)))
    }

    pub fn datasets_path(&self, census_version: &str) -> Utf8PathBuf {
        self.root
            .join(format!("lung_datasets-{}.parquet", cache_key(census_version)))
    }

    pub fn titles_path(&self, census_version: &str) -> Utf8PathBuf {
        self.root
            .join(format!("titles-{}.json", cache_key(census_version)))
    }

    pub fn pmids_path(&self, census_version: &str) -> Utf8PathBuf {
        self.root
            .join(format!("pmids-{}.json", cache_key(census_version)))
    }

    /// Release an alias tag resolved to on its first run.
    pub fn release_pin_path(&self, tag: &str) -> Utf8PathBuf {
        self.root.join(format!("census-{}.json", cache_key(tag)))
    }

    pub fn read_release_pin(&self, tag: &str) -> Result<Option<ReleasePin>, CellError> {
        let path = self.release_pin_path(tag);
        if !Self::exists(&path) {
            return Ok(None);
        }
        Self::read_json(&path).map(Some)
    }

    pub fn write_release_pin(&self, pin: &ReleasePin) -> Result<(), CellError> {
        Self::write_json(&self.release_pin_path(&pin.tag), pin)
    }

    pub fn annotation_dir(&self) -> Utf8PathBuf {
        self.root.join(ANNOTATION_DIR)
    }

    pub fn annotation_path(&self, pmid: &Pmid) -> Utf8PathBuf {
        self.annotation_dir().join(format!("{pmid}.out"))
    }

    pub fn dataset_dir(&self) -> Utf8PathBuf {
        self.root.join(DATASET_DIR)
    }

    pub fn dataset_path(&self, dataset_id: &str, filetype: AssetFileType) -> Utf8PathBuf {
        self.dataset_dir()
            .join(format!("{}.{}", cache_key(dataset_id), filetype))
    }

    pub fn ensure_dirs(&self) -> Result<(), CellError> {
        for dir in [self.root.clone(), self.annotation_dir(), self.dataset_dir()] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| CellError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    pub fn exists(path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, CellError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CellError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content).map_err(|err| CellError::CacheParse {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    pub fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CellError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| CellError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CellError> {
        let mut temp = Self::temp_sibling(path)?;
        temp.write_all(content)
            .map_err(|err| CellError::Filesystem(err.to_string()))?;
        Self::persist(temp, path)
    }

    /// Creates an anonymous temp file next to `path` so the final rename
    /// stays on one filesystem.
    pub fn temp_sibling(path: &Utf8Path) -> Result<NamedTempFile, CellError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CellError::Filesystem(format!("create {parent}: {err}")))?;
        tempfile::Builder::new()
            .prefix(".ncbi-cell")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CellError::Filesystem(err.to_string()))
    }

    pub fn persist(temp: NamedTempFile, path: &Utf8Path) -> Result<(), CellError> {
        temp.persist(path.as_std_path())
            .map_err(|err| CellError::Filesystem(format!("persist {path}: {err}")))?;
        Ok(())
    }

    pub fn status(&self, census_version: &str) -> Result<StoreStatus, CellError> {
        let entries = [
            ("observations", self.observations_path(census_version)),
            ("datasets", self.datasets_path(census_version)),
            ("titles", self.titles_path(census_version)),
            ("pmids", self.pmids_path(census_version)),
        ]
        .into_iter()
        .map(|(name, path)| CacheEntry {
            name: name.to_string(),
            present: Self::exists(&path),
            path: path.to_string(),
        })
        .collect();

        Ok(StoreStatus {
            census_version: census_version.to_string(),
            entries,
            annotation_outputs: count_files(&self.annotation_dir(), "out")?,
            dataset_files: count_files(&self.dataset_dir(), "")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePin {
    pub tag: String,
    pub census_version: String,
    pub resolved_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub census_version: String,
    pub entries: Vec<CacheEntry>,
    pub annotation_outputs: usize,
    pub dataset_files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub name: String,
    pub path: String,
    pub present: bool,
}

/// Makes an identifier safe to embed in a file name.
pub fn cache_key(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn count_files(dir: &Utf8Path, ext: &str) -> Result<usize, CellError> {
    if !dir.as_std_path().exists() {
        return Ok(0);
    }
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| CellError::Filesystem(format!("read {dir}: {err}")))?;
    let mut count = 0;
    for entry in entries {
        let path = entry
            .map_err(|err| CellError::Filesystem(err.to_string()))?
            .path();
        let is_hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with('.'))
            .unwrap_or(true);
        let ext_matches = ext.is_empty()
            || path
                .extension()
                .map(|value| value == ext)
                .unwrap_or(false);
        if path.is_file() && !is_hidden && ext_matches {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new(Utf8PathBuf::from("/work"));
        let pmid: Pmid = "38540357".parse().unwrap();

        assert_eq!(
            store.observations_path("2024-07-01"),
            Utf8PathBuf::from("/work/lung_obs-2024-07-01.parquet")
        );
        assert_eq!(
            store.annotation_path(&pmid),
            Utf8PathBuf::from("/work/ontogpt/38540357.out")
        );
        assert_eq!(
            store.dataset_path("abc-123", AssetFileType::H5ad),
            Utf8PathBuf::from("/work/cellxgene/abc-123.H5AD")
        );
    }

    #[test]
    fn release_pin_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
        assert_eq!(store.read_release_pin("latest").unwrap(), None);

        let pin = ReleasePin {
            tag: "latest".to_string(),
            census_version: "2024-07-01".to_string(),
            resolved_at: "2024-07-02T00:00:00+00:00".to_string(),
        };
        store.write_release_pin(&pin).unwrap();

        assert!(store.release_pin_path("latest").ends_with("census-latest.json"));
        assert_eq!(store.read_release_pin("latest").unwrap(), Some(pin));
    }

    #[test]
    fn cache_key_replaces_separators() {
        assert_eq!(cache_key("../etc/passwd"), ".._etc_passwd");
        assert_eq!(cache_key("2024-07-01"), "2024-07-01");
    }
}

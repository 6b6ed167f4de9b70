use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::AssetFileType;
use crate::error::CellError;

pub const CONFIG_FILE_NAME: &str = "ncbi-cell.json";
pub const DEFAULT_CENSUS_RELEASE_URL: &str =
    "https://census.cellxgene.cziscience.com/cellxgene-census/v1/release.json";
pub const DEFAULT_CELLXGENE_API_BASE: &str = "https://api.cellxgene.cziscience.com";
pub const DEFAULT_EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub census_version: Option<String>,
    #[serde(default)]
    pub tissue_general: Option<String>,
    /// Extra ontology term -> general tissue mappings.
    #[serde(default)]
    pub tissue_general_terms: Option<HashMap<String, String>>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub ncbi_interval_ms: Option<u64>,
    #[serde(default)]
    pub http_retries: Option<usize>,
    #[serde(default)]
    pub asset_filetype: Option<AssetFileType>,
    #[serde(default)]
    pub annotation: Option<AnnotationEntry>,
    #[serde(default)]
    pub cellxgene_api_base: Option<String>,
    #[serde(default)]
    pub census_release_url: Option<String>,
    #[serde(default)]
    pub eutils_base: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AnnotationEntry {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AnnotationSettings {
    pub program: String,
    pub template: String,
    pub limit: u32,
}

#[derive(Debug, Clone)]
pub struct EutilsSettings {
    pub base_url: String,
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub work_dir: Utf8PathBuf,
    pub census_version: String,
    pub tissue_general: String,
    pub tissue_general_terms: HashMap<String, String>,
    pub workers: usize,
    pub http_retries: usize,
    pub asset_filetype: AssetFileType,
    pub annotation: AnnotationSettings,
    pub eutils: EutilsSettings,
    pub cellxgene_api_base: String,
    pub census_release_url: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads an explicit config path, or the first default location that
    /// exists, or falls back to built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CellError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => default_config_paths().into_iter().find(|path| path.exists()),
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| CellError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| CellError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Self::resolve_config(config, api_key_from_env())
    }

    pub fn resolve_config(
        config: Config,
        api_key: Option<String>,
    ) -> Result<ResolvedConfig, CellError> {
        let annotation = config.annotation.unwrap_or_default();
        let workers = config.workers.unwrap_or(8);
        if workers == 0 {
            return Err(CellError::ConfigParse(
                "workers must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            work_dir: Utf8PathBuf::from(config.work_dir.unwrap_or_else(|| ".".to_string())),
            census_version: config
                .census_version
                .unwrap_or_else(|| "latest".to_string()),
            tissue_general: config.tissue_general.unwrap_or_else(|| "lung".to_string()),
            tissue_general_terms: config.tissue_general_terms.unwrap_or_default(),
            workers,
            http_retries: config.http_retries.unwrap_or(0),
            asset_filetype: config.asset_filetype.unwrap_or(AssetFileType::H5ad),
            annotation: AnnotationSettings {
                program: annotation.program.unwrap_or_else(|| "ontogpt".to_string()),
                template: annotation.template.unwrap_or_else(|| "cell_type".to_string()),
                limit: annotation.limit.unwrap_or(1),
            },
            eutils: EutilsSettings {
                base_url: config
                    .eutils_base
                    .unwrap_or_else(|| DEFAULT_EUTILS_BASE.to_string()),
                email: config.email,
                api_key,
                interval: Duration::from_millis(config.ncbi_interval_ms.unwrap_or(1000)),
            },
            cellxgene_api_base: config
                .cellxgene_api_base
                .unwrap_or_else(|| DEFAULT_CELLXGENE_API_BASE.to_string()),
            census_release_url: config
                .census_release_url
                .unwrap_or_else(|| DEFAULT_CENSUS_RELEASE_URL.to_string()),
        })
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = BaseDirs::new() {
        paths.push(dirs.config_dir().join("ncbi-cell").join("config.json"));
    }
    paths
}

fn api_key_from_env() -> Option<String> {
    std::env::var("NCBI_API_KEY")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default(), None).unwrap();
        assert_eq!(resolved.census_version, "latest");
        assert_eq!(resolved.tissue_general, "lung");
        assert_eq!(resolved.workers, 8);
        assert_eq!(resolved.asset_filetype, AssetFileType::H5ad);
        assert_eq!(resolved.annotation.program, "ontogpt");
        assert_eq!(resolved.annotation.template, "cell_type");
        assert_eq!(resolved.annotation.limit, 1);
        assert_eq!(resolved.eutils.interval, Duration::from_secs(1));
        assert!(resolved.eutils.api_key.is_none());
        assert!(resolved.tissue_general_terms.is_empty());
    }

    #[test]
    fn zero_workers_rejected() {
        let config = Config {
            workers: Some(0),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config, None).is_err());
    }
}

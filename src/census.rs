use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::{Asset, DatasetRecord, ObservationRecord};
use crate::error::CellError;
use crate::http;

/// Read-only view of the cell atlas catalog.
pub trait CensusClient: Send + Sync {
    /// Maps a release tag such as `latest` to a concrete release name.
    fn resolve_version(&self, tag: &str) -> Result<String, CellError>;
    fn read_datasets(&self) -> Result<Vec<DatasetRecord>, CellError>;
    fn read_observations(&self) -> Result<Vec<ObservationRecord>, CellError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogDataset {
    pub collection_id: String,
    pub dataset_id: String,
    #[serde(default)]
    pub collection_name: Option<String>,
    #[serde(default)]
    pub collection_doi: Option<String>,
    #[serde(default)]
    pub dataset_version_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub cell_count: Option<u64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub assets: Vec<CatalogAsset>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tissue: Vec<CatalogTissue>,
    #[serde(default)]
    pub is_primary_data: Option<PrimaryData>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogAsset {
    pub filetype: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogTissue {
    pub label: String,
    #[serde(default)]
    pub ontology_term_id: Option<String>,
    #[serde(default)]
    pub tissue_general: Option<String>,
}

/// The catalog has reported primary-data status as a flag, a list of
/// flags, and a label over time.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Flag(bool),
    Flags(Vec<bool>),
    Label(String),
}

impl PrimaryData {
    pub fn has_primary(&self) -> bool {
        match self {
            PrimaryData::Flag(flag) => *flag,
            PrimaryData::Flags(flags) => flags.iter().any(|flag| *flag),
            PrimaryData::Label(label) => {
                matches!(label.to_uppercase().as_str(), "PRIMARY" | "BOTH" | "TRUE")
            }
        }
    }
}

impl From<&CatalogDataset> for DatasetRecord {
    fn from(value: &CatalogDataset) -> Self {
        Self {
            collection_id: value.collection_id.clone(),
            collection_name: value.collection_name.clone(),
            collection_doi: value.collection_doi.clone(),
            dataset_id: value.dataset_id.clone(),
            dataset_version_id: value.dataset_version_id.clone(),
            dataset_title: value.title.clone(),
            citation: value.citation.clone(),
            cell_count: value.cell_count,
            assets: value
                .assets
                .iter()
                .map(|asset| Asset {
                    filetype: asset.filetype.clone(),
                    url: asset.url.clone(),
                })
                .collect(),
        }
    }
}

/// UBERON terms the census rolls up to `lung` in its `tissue_general`
/// column.
pub const LUNG_TERMS: &[&str] = &[
    "UBERON:0002048", // lung
    "UBERON:0002167", // right lung
    "UBERON:0002168", // left lung
    "UBERON:0002170", // upper lobe of right lung
    "UBERON:0002171", // lower lobe of right lung
    "UBERON:0002174", // middle lobe of right lung
    "UBERON:0008952", // upper lobe of left lung
    "UBERON:0008953", // lower lobe of left lung
    "UBERON:0008946", // lung parenchyma
    "UBERON:0002299", // alveolus of lung
    "UBERON:0000115", // lung epithelium
    "UBERON:0002185", // bronchus
    "UBERON:0002186", // bronchiole
    "UBERON:0002187", // terminal bronchiole
    "UBERON:0002188", // respiratory bronchiole
];

/// Maps tissue ontology terms to their general tissue.
#[derive(Debug, Clone, Default)]
pub struct TissueGeneralMap {
    terms: HashMap<String, String>,
}

impl TissueGeneralMap {
    /// Built-in lung terms, then `extra` (term -> general tissue) on top.
    pub fn with_defaults(extra: &HashMap<String, String>) -> Self {
        let mut terms = LUNG_TERMS
            .iter()
            .map(|term| (term.to_string(), "lung".to_string()))
            .collect::<HashMap<_, _>>();
        terms.extend(extra.iter().map(|(term, general)| (term.clone(), general.clone())));
        Self { terms }
    }

    /// Explicit catalog value, else the mapped ontology term, else the label.
    pub fn general_for(&self, tissue: &CatalogTissue) -> String {
        if let Some(general) = &tissue.tissue_general {
            return general.clone();
        }
        tissue
            .ontology_term_id
            .as_ref()
            .and_then(|term| self.terms.get(term))
            .cloned()
            .unwrap_or_else(|| tissue.label.clone())
    }
}

/// One observation row per (dataset, tissue) pair.
pub fn observations_from_catalog(
    catalog: &[CatalogDataset],
    tissues: &TissueGeneralMap,
) -> Vec<ObservationRecord> {
    let mut rows = Vec::new();
    for dataset in catalog {
        let is_primary_data = dataset
            .is_primary_data
            .as_ref()
            .map(PrimaryData::has_primary)
            .unwrap_or(false);
        for tissue in &dataset.tissue {
            rows.push(ObservationRecord {
                dataset_id: dataset.dataset_id.clone(),
                tissue: tissue.label.clone(),
                tissue_ontology_term_id: tissue.ontology_term_id.clone(),
                tissue_general: tissues.general_for(tissue),
                is_primary_data,
            });
        }
    }
    rows
}

/// Keeps primary-data observations of the given general tissue.
pub fn filter_observations(
    observations: Vec<ObservationRecord>,
    tissue_general: &str,
) -> Vec<ObservationRecord> {
    observations
        .into_iter()
        .filter(|obs| obs.is_primary_data && obs.tissue_general == tissue_general)
        .collect()
}

/// Keeps the datasets referenced by at least one observation.
pub fn datasets_in_observations(
    datasets: Vec<DatasetRecord>,
    observations: &[ObservationRecord],
) -> Vec<DatasetRecord> {
    let ids = observations
        .iter()
        .map(|obs| obs.dataset_id.as_str())
        .collect::<HashSet<_>>();
    datasets
        .into_iter()
        .filter(|dataset| ids.contains(dataset.dataset_id.as_str()))
        .collect()
}

/// Follows release aliases (`latest` -> `stable` -> `2024-07-01`) until a
/// release object is reached.
pub fn resolve_release(directory: &Value, tag: &str) -> Result<String, CellError> {
    let mut current = tag.to_string();
    for _ in 0..8 {
        match directory.get(&current) {
            Some(Value::String(alias)) => current = alias.clone(),
            Some(Value::Object(release)) => {
                let build = release
                    .get("release_build")
                    .and_then(|value| value.as_str())
                    .map(|value| value.to_string());
                return Ok(build.unwrap_or(current));
            }
            _ => return Err(CellError::CensusVersion(tag.to_string())),
        }
    }
    Err(CellError::CensusVersion(tag.to_string()))
}

pub struct CensusHttpClient {
    client: Client,
    release_url: String,
    api_base: String,
    retries: usize,
    tissues: TissueGeneralMap,
    catalog: Mutex<Option<Arc<Vec<CatalogDataset>>>>,
}

impl CensusHttpClient {
    pub fn new(
        release_url: &str,
        api_base: &str,
        retries: usize,
        tissues: TissueGeneralMap,
    ) -> Result<Self, CellError> {
        let client = http::build_client(Some(Duration::from_secs(120)), CellError::CensusHttp)?;
        Ok(Self {
            client,
            release_url: release_url.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            retries,
            tissues,
            catalog: Mutex::new(None),
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, CellError> {
        let response =
            http::send_with_retries(self.retries, || self.client.get(url), CellError::CensusHttp)?;
        if !response.status().is_success() {
            let (status, message) = http::status_message(response, "census request failed");
            return Err(CellError::CensusStatus { status, message });
        }
        response
            .json()
            .map_err(|err| CellError::CensusHttp(err.to_string()))
    }

    fn catalog(&self) -> Result<Arc<Vec<CatalogDataset>>, CellError> {
        let mut guard = self
            .catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(catalog) = guard.as_ref() {
            return Ok(Arc::clone(catalog));
        }
        tracing::info!("collecting all datasets from the CELLxGENE catalog");
        let url = format!("{}/curation/v1/datasets", self.api_base);
        let catalog = Arc::new(self.get_json::<Vec<CatalogDataset>>(&url)?);
        *guard = Some(Arc::clone(&catalog));
        Ok(catalog)
    }
}

impl CensusClient for CensusHttpClient {
    fn resolve_version(&self, tag: &str) -> Result<String, CellError> {
        let directory: Value = self.get_json(&self.release_url)?;
        resolve_release(&directory, tag)
    }

    fn read_datasets(&self) -> Result<Vec<DatasetRecord>, CellError> {
        Ok(self.catalog()?.iter().map(DatasetRecord::from).collect())
    }

    fn read_observations(&self) -> Result<Vec<ObservationRecord>, CellError> {
        Ok(observations_from_catalog(&self.catalog()?, &self.tissues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_alias_is_followed() {
        let directory = serde_json::json!({
            "latest": "stable",
            "stable": "2024-07-01",
            "2024-07-01": { "release_build": "2024-07-01" }
        });
        assert_eq!(resolve_release(&directory, "latest").unwrap(), "2024-07-01");
        assert!(resolve_release(&directory, "nope").is_err());
    }

    #[test]
    fn alias_cycle_is_an_error() {
        let directory = serde_json::json!({ "a": "b", "b": "a" });
        assert!(resolve_release(&directory, "a").is_err());
    }

    #[test]
    fn catalog_entries_become_observations() {
        let catalog: Vec<CatalogDataset> = serde_json::from_value(serde_json::json!([
            {
                "collection_id": "c1",
                "dataset_id": "d1",
                "is_primary_data": [false, true],
                "tissue": [
                    { "label": "lung", "ontology_term_id": "UBERON:0002048" },
                    { "label": "upper lobe of left lung", "tissue_general": "lung" }
                ]
            },
            {
                "collection_id": "c2",
                "dataset_id": "d2",
                "is_primary_data": "SECONDARY",
                "tissue": [{ "label": "lung" }]
            }
        ]))
        .unwrap();

        let rows = observations_from_catalog(&catalog, &TissueGeneralMap::default());
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_primary_data);
        assert_eq!(rows[1].tissue_general, "lung");
        assert!(!rows[2].is_primary_data);

        let lung = filter_observations(rows, "lung");
        assert_eq!(lung.len(), 2);
        assert!(lung.iter().all(|obs| obs.dataset_id == "d1"));
    }

    #[test]
    fn lung_subtissue_rolls_up_to_lung() {
        let catalog: Vec<CatalogDataset> = serde_json::from_value(serde_json::json!([
            {
                "collection_id": "c1",
                "dataset_id": "d1",
                "is_primary_data": "PRIMARY",
                "tissue": [{
                    "label": "upper lobe of left lung",
                    "ontology_term_id": "UBERON:0008952",
                    "tissue_type": "tissue"
                }]
            },
            {
                "collection_id": "c2",
                "dataset_id": "d2",
                "is_primary_data": true,
                "tissue": [{ "label": "liver", "ontology_term_id": "UBERON:0002107" }]
            }
        ]))
        .unwrap();

        let tissues = TissueGeneralMap::with_defaults(&HashMap::new());
        let lung = filter_observations(observations_from_catalog(&catalog, &tissues), "lung");

        assert_eq!(lung.len(), 1);
        assert_eq!(lung[0].dataset_id, "d1");
        assert_eq!(lung[0].tissue, "upper lobe of left lung");
    }

    #[test]
    fn configured_terms_extend_the_map() {
        let extra = HashMap::from([("UBERON:0001004".to_string(), "lung".to_string())]);
        let tissues = TissueGeneralMap::with_defaults(&extra);
        let tissue = CatalogTissue {
            label: "respiratory system".to_string(),
            ontology_term_id: Some("UBERON:0001004".to_string()),
            tissue_general: None,
        };
        assert_eq!(tissues.general_for(&tissue), "lung");
    }

    #[test]
    fn null_lists_read_as_empty() {
        let catalog: Vec<CatalogDataset> = serde_json::from_value(serde_json::json!([
            { "collection_id": "c1", "dataset_id": "d1", "tissue": null, "assets": null },
            {
                "collection_id": "c2",
                "dataset_id": "d2",
                "citation": null,
                "is_primary_data": true,
                "tissue": [{ "label": "lung", "ontology_term_id": "UBERON:0002048" }]
            }
        ]))
        .unwrap();

        assert!(catalog[0].tissue.is_empty());
        assert!(catalog[0].assets.is_empty());
        let rows = observations_from_catalog(&catalog, &TissueGeneralMap::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dataset_id, "d2");
    }
}

use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::cellxgene::{self, CellxgeneClient};
use crate::census::{self, CensusClient};
use crate::citation::{CitationResolver, PageFetcher};
use crate::columnar;
use crate::config::ResolvedConfig;
use crate::domain::{AssetFileType, DatasetRecord, Pmid};
use crate::error::CellError;
use crate::eutils::{self, EutilsClient};
use crate::pool::{self, WorkerPool};
use crate::store::{ReleasePin, Store, StoreStatus};
use crate::tools::AnnotationTool;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Release tag or concrete release name (`latest`, `2024-07-01`).
    pub census_version: String,
    pub tissue_general: String,
    pub asset_filetype: AssetFileType,
}

impl From<&ResolvedConfig> for PipelineOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            census_version: config.census_version.clone(),
            tissue_general: config.tissue_general.clone(),
            asset_filetype: config.asset_filetype,
        }
    }
}

pub struct Clients<C, P, F, E, A, X>
where
    P: PageFetcher,
    F: PageFetcher,
{
    pub census: C,
    pub citations: CitationResolver<P, F>,
    pub eutils: E,
    pub annotator: A,
    pub cellxgene: X,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocateReport {
    pub census_version: String,
    pub cached: bool,
    pub observations: usize,
    pub datasets: usize,
}

/// Outcome of one fan-out stage. `outputs` is the number of records in
/// the stage's cache artifact.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub cached: bool,
    pub items: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outputs: usize,
}

impl StageReport {
    fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub started_at: String,
    pub finished_at: String,
    pub locate: LocateReport,
    pub stages: Vec<StageReport>,
}

enum DownloadOutcome {
    Downloaded,
    Skipped,
    Failed,
}

pub struct Pipeline<C, P, F, E, A, X>
where
    P: PageFetcher,
    F: PageFetcher,
{
    store: Store,
    options: PipelineOptions,
    pool: WorkerPool,
    clients: Clients<C, P, F, E, A, X>,
    resolved_version: Mutex<Option<String>>,
}

impl<C, P, F, E, A, X> Pipeline<C, P, F, E, A, X>
where
    C: CensusClient,
    P: PageFetcher,
    F: PageFetcher,
    E: EutilsClient,
    A: AnnotationTool,
    X: CellxgeneClient,
{
    pub fn new(
        store: Store,
        options: PipelineOptions,
        pool: WorkerPool,
        clients: Clients<C, P, F, E, A, X>,
    ) -> Self {
        Self {
            store,
            options,
            pool,
            clients,
            resolved_version: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Concrete census release. Release names are used as given. An alias
    /// is resolved on its first run and pinned in the store, so later runs
    /// reuse the same caches without a lookup.
    pub fn census_version(&self) -> Result<String, CellError> {
        let mut resolved = self
            .resolved_version
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(version) = resolved.as_ref() {
            return Ok(version.clone());
        }
        let tag = &self.options.census_version;
        let version = if is_release_name(tag) {
            tag.clone()
        } else if let Some(pin) = self.store.read_release_pin(tag)? {
            tracing::debug!(tag, census_version = %pin.census_version, "using pinned census release");
            pin.census_version
        } else {
            tracing::info!(tag, "resolving census release");
            let version = self.clients.census.resolve_version(tag)?;
            self.store.write_release_pin(&ReleasePin {
                tag: tag.clone(),
                census_version: version.clone(),
                resolved_at: Utc::now().to_rfc3339(),
            })?;
            version
        };
        *resolved = Some(version.clone());
        Ok(version)
    }

    pub fn run(&self) -> Result<PipelineReport, CellError> {
        let started_at = Utc::now().to_rfc3339();
        let locate = self.locate()?;
        let stages = vec![
            self.titles()?,
            self.pmids()?,
            self.annotate()?,
            self.download()?,
        ];
        Ok(PipelineReport {
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            locate,
            stages,
        })
    }

    pub fn status(&self) -> Result<StoreStatus, CellError> {
        self.store.status(&self.census_version()?)
    }

    pub fn locate(&self) -> Result<LocateReport, CellError> {
        self.collect_datasets().map(|(report, _)| report)
    }

    pub fn titles(&self) -> Result<StageReport, CellError> {
        self.collect_titles().map(|(report, _)| report)
    }

    pub fn pmids(&self) -> Result<StageReport, CellError> {
        self.collect_pmids().map(|(report, _)| report)
    }

    pub fn annotate(&self) -> Result<StageReport, CellError> {
        let (_, pmids) = self.collect_pmids()?;
        self.store.ensure_dirs()?;

        let mut report = StageReport::new("annotate");
        report.items = pmids.len();
        let pending = pmids
            .into_iter()
            .filter(|pmid| {
                let exists = Store::exists(&self.store.annotation_path(pmid));
                if exists {
                    tracing::debug!(%pmid, "annotation output exists");
                }
                !exists
            })
            .collect::<Vec<_>>();
        report.skipped = report.items - pending.len();
        report.cached = pending.is_empty();

        tracing::info!(pending = pending.len(), skipped = report.skipped, "annotating PMIDs");
        let results = self.pool.map(&pending, |pmid| {
            let output = self.store.annotation_path(pmid);
            tracing::info!(%pmid, "running annotation");
            match self.clients.annotator.annotate(pmid, &output) {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!(%pmid, error = %err, "annotation failed");
                    false
                }
            }
        });
        report.succeeded = results.iter().filter(|ok| **ok).count();
        report.failed = results.len() - report.succeeded;
        report.outputs = report.succeeded + report.skipped;
        Ok(report)
    }

    pub fn download(&self) -> Result<StageReport, CellError> {
        let (_, datasets) = self.collect_datasets()?;
        self.store.ensure_dirs()?;

        let mut report = StageReport::new("download");
        report.items = datasets.len();
        tracing::info!(
            datasets = datasets.len(),
            filetype = %self.options.asset_filetype,
            "downloading datasets"
        );
        let outcomes = self
            .pool
            .map(&datasets, |dataset| self.download_dataset(dataset));
        for outcome in outcomes {
            match outcome {
                DownloadOutcome::Downloaded => report.succeeded += 1,
                DownloadOutcome::Skipped => report.skipped += 1,
                DownloadOutcome::Failed => report.failed += 1,
            }
        }
        report.cached = report.succeeded == 0 && report.failed == 0;
        report.outputs = report.succeeded + report.skipped;
        Ok(report)
    }

    fn collect_datasets(&self) -> Result<(LocateReport, Vec<DatasetRecord>), CellError> {
        let version = self.census_version()?;
        let obs_path = self.store.observations_path(&version);
        let datasets_path = self.store.datasets_path(&version);
        let mut cached = true;

        let observations = if Store::exists(&obs_path) {
            columnar::read_observations(&obs_path)?
        } else {
            cached = false;
            tracing::info!(
                tissue_general = %self.options.tissue_general,
                "reading observations from census"
            );
            let observations = census::filter_observations(
                self.clients.census.read_observations()?,
                &self.options.tissue_general,
            );
            columnar::write_observations(&obs_path, &observations)?;
            observations
        };

        let datasets = if Store::exists(&datasets_path) {
            columnar::read_datasets(&datasets_path)?
        } else {
            cached = false;
            tracing::info!("reading datasets from census");
            let datasets = census::datasets_in_observations(
                self.clients.census.read_datasets()?,
                &observations,
            );
            columnar::write_datasets(&datasets_path, &datasets)?;
            datasets
        };

        tracing::info!(
            census_version = %version,
            observations = observations.len(),
            datasets = datasets.len(),
            cached,
            "located datasets"
        );
        let report = LocateReport {
            census_version: version,
            cached,
            observations: observations.len(),
            datasets: datasets.len(),
        };
        Ok((report, datasets))
    }

    fn collect_titles(&self) -> Result<(StageReport, Vec<String>), CellError> {
        let path = self.store.titles_path(&self.census_version()?);
        let mut report = StageReport::new("titles");
        if Store::exists(&path) {
            let titles: Vec<String> = Store::read_json(&path)?;
            report.cached = true;
            report.outputs = titles.len();
            return Ok((report, titles));
        }

        let (_, datasets) = self.collect_datasets()?;
        let citations = datasets
            .iter()
            .filter_map(|dataset| {
                if dataset.citation.is_none() {
                    tracing::warn!(dataset_id = %dataset.dataset_id, "dataset has no citation");
                }
                dataset.citation.clone()
            })
            .collect::<Vec<_>>();
        report.items = citations.len();
        report.skipped = datasets.len() - citations.len();

        tracing::info!(citations = citations.len(), "getting titles for citations");
        let lookups = self.pool.map(&citations, |citation| {
            self.clients.citations.resolve(citation).title
        });
        report.succeeded = lookups.iter().filter(|title| title.is_some()).count();
        report.failed = lookups.len() - report.succeeded;

        let titles = pool::dedup_present(lookups);
        Store::write_json(&path, &titles)?;
        report.outputs = titles.len();
        Ok((report, titles))
    }

    fn collect_pmids(&self) -> Result<(StageReport, Vec<Pmid>), CellError> {
        let path = self.store.pmids_path(&self.census_version()?);
        let mut report = StageReport::new("pmids");
        if Store::exists(&path) {
            let pmids: Vec<Pmid> = Store::read_json(&path)?;
            report.cached = true;
            report.outputs = pmids.len();
            return Ok((report, pmids));
        }

        let (_, titles) = self.collect_titles()?;
        report.items = titles.len();
        tracing::info!(titles = titles.len(), "getting PMIDs for titles");
        let found = self.pool.map(&titles, |title| {
            eutils::resolve_pmid(&self.clients.eutils, title)
        });
        report.succeeded = found.iter().filter(|pmid| pmid.is_some()).count();
        report.failed = found.len() - report.succeeded;

        let pmids = pool::dedup_present(found);
        Store::write_json(&path, &pmids)?;
        report.outputs = pmids.len();
        Ok((report, pmids))
    }

    fn download_dataset(&self, dataset: &DatasetRecord) -> DownloadOutcome {
        let filetype = self.options.asset_filetype;
        let destination = self.store.dataset_path(&dataset.dataset_id, filetype);
        if Store::exists(&destination) {
            tracing::debug!(dataset_id = %dataset.dataset_id, "dataset file exists");
            return DownloadOutcome::Skipped;
        }

        let result = self
            .clients
            .cellxgene
            .dataset(&dataset.collection_id, &dataset.dataset_id)
            .and_then(|assets| {
                cellxgene::check_dataset_id(&dataset.dataset_id, &assets)?;
                Ok(assets)
            });
        let assets = match result {
            Ok(assets) => assets,
            Err(err) => {
                tracing::error!(dataset_id = %dataset.dataset_id, error = %err, "dataset lookup failed");
                return DownloadOutcome::Failed;
            }
        };

        let Some(asset) = assets.assets.iter().find(|asset| asset.is_type(filetype)) else {
            tracing::warn!(dataset_id = %dataset.dataset_id, %filetype, "dataset has no asset of file type");
            return DownloadOutcome::Skipped;
        };

        tracing::info!(dataset_id = %dataset.dataset_id, url = %asset.url, "downloading asset");
        match self.clients.cellxgene.download(&asset.url, &destination) {
            Ok(bytes) => {
                tracing::info!(dataset_id = %dataset.dataset_id, bytes, path = %destination, "downloaded asset");
                DownloadOutcome::Downloaded
            }
            Err(err) => {
                tracing::error!(dataset_id = %dataset.dataset_id, error = %err, "download failed");
                DownloadOutcome::Failed
            }
        }
    }
}

/// Dated release names (`2024-07-01`) need no lookup.
pub fn is_release_name(tag: &str) -> bool {
    NaiveDate::parse_from_str(tag, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_tags_are_release_names() {
        assert!(is_release_name("2024-07-01"));
        assert!(!is_release_name("latest"));
        assert!(!is_release_name("stable"));
    }
}

use std::io::{Read, Write};
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::domain::Asset;
use crate::error::CellError;
use crate::http;
use crate::store::Store;

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetAssets {
    pub dataset_id: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

pub trait CellxgeneClient: Send + Sync {
    fn dataset(&self, collection_id: &str, dataset_id: &str) -> Result<DatasetAssets, CellError>;
    /// Streams `url` to `destination`, returning the bytes written.
    fn download(&self, url: &str, destination: &Utf8Path) -> Result<u64, CellError>;
}

pub fn check_dataset_id(requested: &str, assets: &DatasetAssets) -> Result<(), CellError> {
    if assets.dataset_id != requested {
        return Err(CellError::DatasetMismatch {
            requested: requested.to_string(),
            returned: assets.dataset_id.clone(),
        });
    }
    Ok(())
}

/// Copies `reader` into a temp sibling of `destination` and renames it
/// into place once the body is complete.
pub fn stream_to_file<R: Read>(mut reader: R, destination: &Utf8Path) -> Result<u64, CellError> {
    let mut temp = Store::temp_sibling(destination)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|err| CellError::CellxgeneHttp(format!("read body: {err}")))?;
        if read == 0 {
            break;
        }
        temp.write_all(&buffer[..read])
            .map_err(|err| CellError::Filesystem(err.to_string()))?;
        written += read as u64;
    }
    temp.flush()
        .map_err(|err| CellError::Filesystem(err.to_string()))?;
    Store::persist(temp, destination)?;
    Ok(written)
}

pub struct CellxgeneHttpClient {
    client: Client,
    download_client: Client,
    api_base: String,
    retries: usize,
}

impl CellxgeneHttpClient {
    pub fn new(api_base: &str, retries: usize) -> Result<Self, CellError> {
        Ok(Self {
            client: http::build_client(Some(Duration::from_secs(60)), CellError::CellxgeneHttp)?,
            download_client: http::build_client(None, CellError::CellxgeneHttp)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            retries,
        })
    }

    fn dataset_url(&self, collection_id: &str, dataset_id: &str) -> String {
        format!(
            "{}/curation/v1/collections/{collection_id}/datasets/{dataset_id}",
            self.api_base
        )
    }
}

impl CellxgeneClient for CellxgeneHttpClient {
    fn dataset(&self, collection_id: &str, dataset_id: &str) -> Result<DatasetAssets, CellError> {
        let url = self.dataset_url(collection_id, dataset_id);
        let response = http::send_with_retries(
            self.retries,
            || self.client.get(&url),
            CellError::CellxgeneHttp,
        )?;
        if !response.status().is_success() {
            let (status, message) = http::status_message(response, "CELLxGENE request failed");
            return Err(CellError::CellxgeneStatus { status, message });
        }
        response
            .json()
            .map_err(|err| CellError::CellxgeneHttp(err.to_string()))
    }

    fn download(&self, url: &str, destination: &Utf8Path) -> Result<u64, CellError> {
        let response = http::send_with_retries(
            self.retries,
            || self.download_client.get(url),
            CellError::CellxgeneHttp,
        )?;
        if !response.status().is_success() {
            let (status, message) = http::status_message(response, "asset download failed");
            return Err(CellError::CellxgeneStatus { status, message });
        }
        stream_to_file(response, destination)
    }
}

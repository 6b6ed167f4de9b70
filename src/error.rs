use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CellError {
    #[error("invalid PMID: {0}")]
    InvalidPmid(String),

    #[error("invalid asset file type: {0}")]
    InvalidFileType(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("census request failed: {0}")]
    CensusHttp(String),

    #[error("census returned status {status}: {message}")]
    CensusStatus { status: u16, message: String },

    #[error("unknown census version: {0}")]
    CensusVersion(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("publication page request failed: {0}")]
    PageHttp(String),

    #[error("E-utilities request failed: {0}")]
    EutilsHttp(String),

    #[error("E-utilities returned status {status}: {message}")]
    EutilsStatus { status: u16, message: String },

    #[error("CELLxGENE request failed: {0}")]
    CellxgeneHttp(String),

    #[error("CELLxGENE returned status {status}: {message}")]
    CellxgeneStatus { status: u16, message: String },

    #[error("response dataset id {returned} does not equal requested dataset id {requested}")]
    DatasetMismatch { requested: String, returned: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("annotation failed for PMID {pmid}: {message}")]
    AnnotationFailed { pmid: String, message: String },

    #[error("failed to parse cache file {path}: {message}")]
    CacheParse { path: String, message: String },

    #[error("columnar table error: {0}")]
    Table(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CellError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetFileType {
    H5ad,
    Rds,
}

impl AssetFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetFileType::H5ad => "H5AD",
            AssetFileType::Rds => "RDS",
        }
    }
}

impl fmt::Display for AssetFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetFileType {
    type Err = CellError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "H5AD" => Ok(AssetFileType::H5ad),
            "RDS" => Ok(AssetFileType::Rds),
            _ => Err(CellError::InvalidFileType(value.to_string())),
        }
    }
}

/// PubMed identifier. Always a non-empty run of ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pmid(String);

impl Pmid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Pmid {
    type Err = CellError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(CellError::InvalidPmid(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for Pmid {
    type Error = CellError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pmid> for String {
    fn from(value: Pmid) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub filetype: String,
    pub url: String,
}

impl Asset {
    pub fn is_type(&self, filetype: AssetFileType) -> bool {
        self.filetype.eq_ignore_ascii_case(filetype.as_str())
    }
}

/// One row of the dataset catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub collection_id: String,
    pub collection_name: Option<String>,
    pub collection_doi: Option<String>,
    pub dataset_id: String,
    pub dataset_version_id: Option<String>,
    pub dataset_title: Option<String>,
    pub citation: Option<String>,
    pub cell_count: Option<u64>,
    pub assets: Vec<Asset>,
}

/// Tissue-level observation summary for one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub dataset_id: String,
    pub tissue: String,
    pub tissue_ontology_term_id: Option<String>,
    pub tissue_general: String,
    pub is_primary_data: bool,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_pmid_trims() {
        let pmid: Pmid = " 38540357 ".parse().unwrap();
        assert_eq!(pmid.as_str(), "38540357");
    }

    #[test]
    fn parse_pmid_rejects_letters() {
        let err = "PMC123".parse::<Pmid>().unwrap_err();
        assert_matches!(err, CellError::InvalidPmid(_));
    }

    #[test]
    fn asset_type_match_ignores_case() {
        let asset = Asset {
            filetype: "h5ad".to_string(),
            url: "https://example.org/a.h5ad".to_string(),
        };
        assert!(asset.is_type(AssetFileType::H5ad));
        assert!(!asset.is_type(AssetFileType::Rds));
    }
}

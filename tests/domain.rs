use assert_matches::assert_matches;

use ncbi_cell::domain::{AssetFileType, Pmid};
use ncbi_cell::error::CellError;

#[test]
fn pmids_serialize_as_strings() {
    let pmids: Vec<Pmid> = serde_json::from_str(r#"["38540357", "12345"]"#).unwrap();
    assert_eq!(pmids[0].as_str(), "38540357");
    assert_eq!(serde_json::to_string(&pmids).unwrap(), r#"["38540357","12345"]"#);
}

#[test]
fn non_numeric_pmid_rejected_in_cache() {
    let parsed = serde_json::from_str::<Vec<Pmid>>(r#"["PMC99"]"#);
    assert!(parsed.is_err());
    assert_matches!("".parse::<Pmid>(), Err(CellError::InvalidPmid(_)));
}

#[test]
fn filetype_parse_and_display() {
    assert_eq!("h5ad".parse::<AssetFileType>().unwrap(), AssetFileType::H5ad);
    assert_eq!(AssetFileType::Rds.to_string(), "RDS");
    assert_matches!(
        "loom".parse::<AssetFileType>(),
        Err(CellError::InvalidFileType(_))
    );
}

use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ncbi_cell::config::{Config, ConfigLoader};
use ncbi_cell::domain::AssetFileType;
use ncbi_cell::error::CellError;

#[test]
fn parse_config_file_fields() {
    let config: Config = serde_json::from_str(
        r#"{
            "work_dir": "/data/lung",
            "census_version": "2024-07-01",
            "workers": 4,
            "email": "lab@example.org",
            "ncbi_interval_ms": 350,
            "asset_filetype": "RDS",
            "annotation": { "template": "cell_type", "limit": 3 }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config, Some("key".to_string())).unwrap();

    assert_eq!(resolved.work_dir, Utf8PathBuf::from("/data/lung"));
    assert_eq!(resolved.census_version, "2024-07-01");
    assert_eq!(resolved.tissue_general, "lung");
    assert_eq!(resolved.workers, 4);
    assert_eq!(resolved.asset_filetype, AssetFileType::Rds);
    assert_eq!(resolved.annotation.program, "ontogpt");
    assert_eq!(resolved.annotation.limit, 3);
    assert_eq!(resolved.eutils.email.as_deref(), Some("lab@example.org"));
    assert_eq!(resolved.eutils.api_key.as_deref(), Some("key"));
    assert_eq!(resolved.eutils.interval, Duration::from_millis(350));
}

#[test]
fn unknown_filetype_is_rejected() {
    let parsed = serde_json::from_str::<Config>(r#"{ "asset_filetype": "LOOM" }"#);
    assert!(parsed.is_err());
}

#[test]
fn explicit_missing_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");

    let err = ConfigLoader::resolve(missing.to_str()).unwrap_err();

    assert_matches!(err, CellError::ConfigRead(_));
}

#[test]
fn explicit_config_file_is_loaded() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ncbi-cell.json");
    std::fs::write(
        &path,
        r#"{
            "tissue_general": "breast",
            "tissue_general_terms": { "UBERON:0008367": "breast" },
            "http_retries": 2
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();

    assert_eq!(resolved.tissue_general, "breast");
    assert_eq!(
        resolved.tissue_general_terms.get("UBERON:0008367").map(String::as_str),
        Some("breast")
    );
    assert_eq!(resolved.http_retries, 2);
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ncbi-cell.json");
    std::fs::write(&path, "{ workers: ").unwrap();

    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();

    assert_matches!(err, CellError::ConfigParse(_));
}

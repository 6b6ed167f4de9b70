//! Parquet persistence for the dataset and observation tables.

use std::fs::File;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, ListArray, ListBuilder, StringArray, StringBuilder,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use camino::Utf8Path;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::domain::{Asset, DatasetRecord, ObservationRecord};
use crate::error::CellError;
use crate::store::Store;

fn list_of_strings() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
}

pub fn dataset_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("collection_id", DataType::Utf8, false),
        Field::new("collection_name", DataType::Utf8, true),
        Field::new("collection_doi", DataType::Utf8, true),
        Field::new("dataset_id", DataType::Utf8, false),
        Field::new("dataset_version_id", DataType::Utf8, true),
        Field::new("dataset_title", DataType::Utf8, true),
        Field::new("citation", DataType::Utf8, true),
        Field::new("cell_count", DataType::UInt64, true),
        Field::new("asset_filetypes", list_of_strings(), false),
        Field::new("asset_urls", list_of_strings(), false),
    ]))
}

pub fn observation_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("dataset_id", DataType::Utf8, false),
        Field::new("tissue", DataType::Utf8, false),
        Field::new("tissue_ontology_term_id", DataType::Utf8, true),
        Field::new("tissue_general", DataType::Utf8, false),
        Field::new("is_primary_data", DataType::Boolean, false),
    ]))
}

pub fn write_datasets(path: &Utf8Path, records: &[DatasetRecord]) -> Result<(), CellError> {
    let mut filetypes = ListBuilder::new(StringBuilder::new());
    let mut urls = ListBuilder::new(StringBuilder::new());
    for record in records {
        for asset in &record.assets {
            filetypes.values().append_value(&asset.filetype);
            urls.values().append_value(&asset.url);
        }
        filetypes.append(true);
        urls.append(true);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.collection_id.as_str()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.collection_name.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.collection_doi.as_deref()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.dataset_id.as_str()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.dataset_version_id.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.dataset_title.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.citation.as_deref()),
        )),
        Arc::new(UInt64Array::from(
            records.iter().map(|r| r.cell_count).collect::<Vec<_>>(),
        )),
        Arc::new(filetypes.finish()),
        Arc::new(urls.finish()),
    ];

    let batch = RecordBatch::try_new(dataset_schema(), columns)
        .map_err(|err| CellError::Table(err.to_string()))?;
    write_batch(path, batch)
}

pub fn write_observations(
    path: &Utf8Path,
    records: &[ObservationRecord],
) -> Result<(), CellError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.dataset_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.tissue.as_str()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.tissue_ontology_term_id.as_deref()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.tissue_general.as_str()),
        )),
        Arc::new(BooleanArray::from(
            records.iter().map(|r| r.is_primary_data).collect::<Vec<_>>(),
        )),
    ];

    let batch = RecordBatch::try_new(observation_schema(), columns)
        .map_err(|err| CellError::Table(err.to_string()))?;
    write_batch(path, batch)
}

pub fn read_datasets(path: &Utf8Path) -> Result<Vec<DatasetRecord>, CellError> {
    let mut records = Vec::new();
    for batch in read_batches(path)? {
        let collection_id = string_column(&batch, "collection_id")?;
        let collection_name = string_column(&batch, "collection_name")?;
        let collection_doi = string_column(&batch, "collection_doi")?;
        let dataset_id = string_column(&batch, "dataset_id")?;
        let dataset_version_id = string_column(&batch, "dataset_version_id")?;
        let dataset_title = string_column(&batch, "dataset_title")?;
        let citation = string_column(&batch, "citation")?;
        let cell_count = typed_column::<UInt64Array>(&batch, "cell_count")?;
        let filetypes = typed_column::<ListArray>(&batch, "asset_filetypes")?;
        let urls = typed_column::<ListArray>(&batch, "asset_urls")?;

        for row in 0..batch.num_rows() {
            let assets = list_values(filetypes, row)?
                .into_iter()
                .zip(list_values(urls, row)?)
                .map(|(filetype, url)| Asset { filetype, url })
                .collect();
            records.push(DatasetRecord {
                collection_id: collection_id.value(row).to_string(),
                collection_name: optional_string(collection_name, row),
                collection_doi: optional_string(collection_doi, row),
                dataset_id: dataset_id.value(row).to_string(),
                dataset_version_id: optional_string(dataset_version_id, row),
                dataset_title: optional_string(dataset_title, row),
                citation: optional_string(citation, row),
                cell_count: (!cell_count.is_null(row)).then(|| cell_count.value(row)),
                assets,
            });
        }
    }
    Ok(records)
}

pub fn read_observations(path: &Utf8Path) -> Result<Vec<ObservationRecord>, CellError> {
    let mut records = Vec::new();
    for batch in read_batches(path)? {
        let dataset_id = string_column(&batch, "dataset_id")?;
        let tissue = string_column(&batch, "tissue")?;
        let term_id = string_column(&batch, "tissue_ontology_term_id")?;
        let tissue_general = string_column(&batch, "tissue_general")?;
        let primary = typed_column::<BooleanArray>(&batch, "is_primary_data")?;

        for row in 0..batch.num_rows() {
            records.push(ObservationRecord {
                dataset_id: dataset_id.value(row).to_string(),
                tissue: tissue.value(row).to_string(),
                tissue_ontology_term_id: optional_string(term_id, row),
                tissue_general: tissue_general.value(row).to_string(),
                is_primary_data: primary.value(row),
            });
        }
    }
    Ok(records)
}

fn write_batch(path: &Utf8Path, batch: RecordBatch) -> Result<(), CellError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut temp = Store::temp_sibling(path)?;
    {
        let mut writer = ArrowWriter::try_new(temp.as_file_mut(), batch.schema(), Some(props))
            .map_err(|err| CellError::Table(err.to_string()))?;
        writer
            .write(&batch)
            .map_err(|err| CellError::Table(err.to_string()))?;
        writer
            .close()
            .map_err(|err| CellError::Table(err.to_string()))?;
    }
    Store::persist(temp, path)
}

fn read_batches(path: &Utf8Path) -> Result<Vec<RecordBatch>, CellError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| CellError::Filesystem(format!("open {path}: {err}")))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|err| CellError::Table(format!("{path}: {err}")))?
        .build()
        .map_err(|err| CellError::Table(format!("{path}: {err}")))?;
    reader
        .map(|batch| batch.map_err(|err| CellError::Table(format!("{path}: {err}"))))
        .collect()
}

fn typed_column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a T, CellError> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<T>())
        .ok_or_else(|| CellError::Table(format!("missing or mistyped column {name}")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, CellError> {
    typed_column::<StringArray>(batch, name)
}

fn optional_string(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_string())
}

fn list_values(array: &ListArray, row: usize) -> Result<Vec<String>, CellError> {
    let values = array.value(row);
    let strings = values
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| CellError::Table("list column is not utf8".to_string()))?;
    Ok(strings
        .iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn datasets_survive_parquet_cache() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("datasets.parquet")).unwrap();
        let records = vec![
            DatasetRecord {
                collection_id: "c1".to_string(),
                collection_name: Some("Lung atlas".to_string()),
                collection_doi: None,
                dataset_id: "d1".to_string(),
                dataset_version_id: None,
                dataset_title: Some("Airway".to_string()),
                citation: Some("Publication: https://x.org/a Dataset Version: v1".to_string()),
                cell_count: Some(1200),
                assets: vec![
                    Asset {
                        filetype: "H5AD".to_string(),
                        url: "https://x.org/d1.h5ad".to_string(),
                    },
                    Asset {
                        filetype: "RDS".to_string(),
                        url: "https://x.org/d1.rds".to_string(),
                    },
                ],
            },
            DatasetRecord {
                collection_id: "c2".to_string(),
                collection_name: None,
                collection_doi: None,
                dataset_id: "d2".to_string(),
                dataset_version_id: None,
                dataset_title: None,
                citation: None,
                cell_count: None,
                assets: Vec::new(),
            },
        ];

        write_datasets(&path, &records).unwrap();
        let loaded = read_datasets(&path).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn empty_observation_table_is_readable() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("obs.parquet")).unwrap();
        write_observations(&path, &[]).unwrap();
        assert!(read_observations(&path).unwrap().is_empty());
    }
}

use crate::error::Result;
use crate::structs::{Dataset, Value};
use arrow_array::{ArrayRef, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use csv::Writer;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::{fs::File, path::Path, sync::Arc};

/// Writes the dataset to a CSV file, replacing any existing file.
///
/// # Arguments
/// * `dataset` - Transformed dataset
/// * `output_path` - Path where the CSV file will be created
///
/// # Returns
/// Returns `Ok(())` on success.
///
/// # Errors
/// Returns error if file cannot be created or written to.
pub fn write_csv(dataset: &Dataset, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(dataset.schema().fields())?;
    for record in dataset.records() {
        writer.write_record(record.values().iter().map(ToString::to_string))?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes the dataset as a pretty-formatted JSON array of objects.
///
/// Field order in every object follows the dataset schema; `Missing` is `null`.
///
/// # Errors
/// Returns error if file cannot be created or serialization fails.
pub fn write_json(dataset: &Dataset, output_path: &Path) -> Result<()> {
    let fields = dataset.schema().fields();
    let rows: Vec<serde_json::Map<String, serde_json::Value>> = dataset
        .records()
        .iter()
        .map(|record| {
            fields
                .iter()
                .cloned()
                .zip(record.values().iter().map(serde_json::Value::from))
                .collect()
        })
        .collect();

    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, &rows)?;
    Ok(())
}

/// Writes the dataset to a columnar Parquet file using Arrow format.
///
/// Columns holding only numbers (or missing values) become nullable Float64;
/// every other column is written as nullable Utf8.
///
/// # Errors
/// Returns error if file cannot be created, schema is invalid, or Arrow operations fail.
pub fn write_parquet(dataset: &Dataset, output_path: &Path) -> Result<()> {
    let mut fields = Vec::with_capacity(dataset.schema().len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(dataset.schema().len());

    for name in dataset.schema().fields() {
        let values = dataset.column(name)?;
        if dataset.is_numeric(name) {
            fields.push(Field::new(name, DataType::Float64, true));
            let array: Float64Array = values.iter().map(|v| v.as_number()).collect();
            columns.push(Arc::new(array));
        } else {
            fields.push(Field::new(name, DataType::Utf8, true));
            let array: StringArray = values
                .iter()
                .map(|v| match v {
                    Value::Missing => None,
                    other => Some(other.to_string()),
                })
                .collect();
            columns.push(Arc::new(array));
        }
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let file = File::create(output_path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

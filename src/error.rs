use arrow_schema::ArrowError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Source unavailable: {source_name}: {reason}")]
    SourceUnavailable { source_name: String, reason: String },
    #[error("Malformed record at {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("No sources found in {0}")]
    NoSourcesFound(String),
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),
    #[error("Malformed value in field {field} (row {row}): {value:?}")]
    MalformedValue {
        field: String,
        row: usize,
        value: String,
    },
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parquet Error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Data Error: {0}")]
    Data(String),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

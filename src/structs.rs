use crate::error::{PipelineError, Result};
use log::{Log, Metadata, Record as LogRecord};
use std::collections::HashSet;
use std::fmt;

/// Simple logger implementation
pub struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &LogRecord) {
        println!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// A single scalar cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Types raw source text: empty becomes `Missing`, a finite float becomes
    /// `Number`, anything else stays `Text`.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => Value::Text(trimmed.to_string()),
        }
    }

    /// Numeric reading of the cell. Text with thousands separators (`"1,234"`)
    /// is accepted; `Missing` never is.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s
                .trim()
                .replace(',', "")
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite()),
            Value::Missing => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Missing => Ok(()),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Missing => serde_json::Value::Null,
        }
    }
}

/// Ordered, duplicate-free field list shared by every record of a batch or dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<String>,
}

impl Schema {
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Err(PipelineError::SchemaMismatch(
                "schema must name at least one field".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.as_str()) {
                return Err(PipelineError::SchemaMismatch(format!(
                    "duplicate field: {}",
                    field
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Field-less schema for a batch that never saw a record.
    pub(crate) fn unnamed() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| PipelineError::UnknownField(name.to_string()))
    }
}

/// One normalized row; values are positional against the owning schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// All records read from one source artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub source: String,
    schema: Schema,
    records: Vec<Record>,
    skipped: usize,
}

impl Batch {
    pub fn new(source: impl Into<String>, schema: Schema) -> Self {
        Self {
            source: source.into(),
            schema,
            records: Vec::new(),
            skipped: 0,
        }
    }

    /// Appends a record, rejecting one whose arity differs from the schema.
    pub fn push(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.schema.len() {
            return Err(PipelineError::SchemaMismatch(format!(
                "{}: record has {} values, schema has {} fields",
                self.source,
                values.len(),
                self.schema.len()
            )));
        }
        self.records.push(Record { values });
        Ok(())
    }

    pub fn mark_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of malformed records the reader dropped.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Every batch of a run, aligned to the target schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Schema,
    records: Vec<Record>,
}

impl Dataset {
    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }

    /// Concatenates batches once, in the given order. Target fields a batch
    /// lacks are filled with `Missing`; batch fields outside the target
    /// schema are rejected.
    pub fn from_batches(schema: Schema, batches: Vec<Batch>) -> Result<Self> {
        let total = batches.iter().map(Batch::len).sum();
        let mut records = Vec::with_capacity(total);

        for batch in batches {
            if let Some(extra) = batch
                .schema
                .fields()
                .iter()
                .find(|f| schema.index_of(f).is_none())
            {
                return Err(PipelineError::SchemaMismatch(format!(
                    "{}: field {} is not part of the target schema",
                    batch.source, extra
                )));
            }

            let mapping: Vec<Option<usize>> = schema
                .fields()
                .iter()
                .map(|f| batch.schema.index_of(f))
                .collect();

            for record in batch.records {
                let mut source = record.values;
                let values = mapping
                    .iter()
                    .map(|slot| match slot {
                        Some(i) => std::mem::replace(&mut source[*i], Value::Missing),
                        None => Value::Missing,
                    })
                    .collect();
                records.push(Record { values });
            }
        }

        Ok(Self { schema, records })
    }

    /// Appends another dataset with the same schema.
    pub fn extend(&mut self, other: Dataset) -> Result<()> {
        if other.schema != self.schema {
            return Err(PipelineError::SchemaMismatch(format!(
                "cannot append {:?} to {:?}",
                other.schema.fields(),
                self.schema.fields()
            )));
        }
        self.records.extend(other.records);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn value(&self, row: usize, field: &str) -> Option<&Value> {
        let index = self.schema.index_of(field)?;
        self.records.get(row)?.get(index)
    }

    pub fn column(&self, field: &str) -> Result<Vec<&Value>> {
        let index = self.schema.require(field)?;
        Ok(self.records.iter().map(|r| &r.values[index]).collect())
    }

    /// True when every non-missing cell of the column is a `Number`.
    pub fn is_numeric(&self, field: &str) -> bool {
        match self.schema.index_of(field) {
            Some(i) => self
                .records
                .iter()
                .all(|r| matches!(r.values[i], Value::Number(_) | Value::Missing)),
            None => false,
        }
    }

    pub(crate) fn replace_column(&mut self, field: &str, values: Vec<Value>) -> Result<()> {
        let index = self.schema.require(field)?;
        self.check_column_len(field, values.len())?;
        for (record, value) in self.records.iter_mut().zip(values) {
            record.values[index] = value;
        }
        Ok(())
    }

    pub(crate) fn push_column(&mut self, field: &str, values: Vec<Value>) -> Result<()> {
        if self.schema.index_of(field).is_some() {
            return Err(PipelineError::SchemaMismatch(format!(
                "field already exists: {}",
                field
            )));
        }
        self.check_column_len(field, values.len())?;
        self.schema.fields.push(field.to_string());
        for (record, value) in self.records.iter_mut().zip(values) {
            record.values.push(value);
        }
        Ok(())
    }

    pub(crate) fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let index = self.schema.require(from)?;
        if from != to && self.schema.index_of(to).is_some() {
            return Err(PipelineError::SchemaMismatch(format!(
                "field already exists: {}",
                to
            )));
        }
        self.schema.fields[index] = to.to_string();
        Ok(())
    }

    fn check_column_len(&self, field: &str, len: usize) -> Result<()> {
        if len != self.records.len() {
            return Err(PipelineError::SchemaMismatch(format!(
                "column {} has {} values for {} records",
                field,
                len,
                self.records.len()
            )));
        }
        Ok(())
    }
}

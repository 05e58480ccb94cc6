use crate::config::ReadOptions;
use crate::error::{PipelineError, Result};
use crate::structs::{Batch, Schema, Value};
use csv::ReaderBuilder;
use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use std::fs;
use std::path::Path;

/// Source encodings recognized by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Encoding {
    Delimited,
    LineDelimited,
    TreeMarkup,
}

impl Encoding {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Encoding::Delimited),
            "json" | "jsonl" => Some(Encoding::LineDelimited),
            "xml" => Some(Encoding::TreeMarkup),
            _ => None,
        }
    }
}

/// Reads one artifact with the reader for its encoding.
///
/// Malformed records are dropped by the readers and reported here once per
/// artifact.
pub fn read_artifact(path: &Path, encoding: Encoding, options: &ReadOptions) -> Result<Batch> {
    debug!("Reading {:?} artifact: {}", encoding, path.display());
    let batch = match encoding {
        Encoding::Delimited => read_csv(path, options)?,
        Encoding::LineDelimited => read_jsonl(path, options)?,
        Encoding::TreeMarkup => read_xml(path, options)?,
    };
    if batch.skipped() > 0 {
        warn!(
            "Skipped {} malformed records in {}",
            batch.skipped(),
            path.display()
        );
    }
    debug!("Read {} records from {}", batch.len(), path.display());
    Ok(batch)
}

/// Delimited table; the schema is the header row.
pub fn read_csv(path: &Path, options: &ReadOptions) -> Result<Batch> {
    let source = path.display().to_string();
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::unavailable(&source, e))?;
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::unavailable(&source, e))?
        .clone();
    let schema = Schema::new(headers.iter().map(str::trim))
        .map_err(|e| PipelineError::unavailable(&source, e))?;
    let mut batch = Batch::new(&source, schema.clone());

    for (i, row) in reader.records().enumerate() {
        let parsed = row.map_err(PipelineError::from).and_then(|row| {
            let line = row.position().map_or(i + 2, |p| p.line() as usize);
            if row.len() != schema.len() {
                return Err(PipelineError::malformed(
                    line,
                    format!("expected {} fields, found {}", schema.len(), row.len()),
                ));
            }
            Ok(row.iter().map(Value::infer).collect::<Vec<_>>())
        });
        match parsed {
            Ok(values) => keep_unless_sentinel(&mut batch, values, options)?,
            Err(err) => {
                debug!("{}: {}", source, err);
                batch.mark_skipped();
            }
        }
    }

    Ok(batch)
}

/// One JSON object per line; the schema is the key order of the first
/// well-formed object.
pub fn read_jsonl(path: &Path, options: &ReadOptions) -> Result<Batch> {
    let source = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|e| PipelineError::unavailable(&source, e))?;
    let mut batch: Option<Batch> = None;
    let mut skipped = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_json_record(line, i + 1, batch.as_ref().map(Batch::schema)) {
            Ok((schema, values)) => {
                let batch = batch.get_or_insert_with(|| Batch::new(&source, schema));
                keep_unless_sentinel(batch, values, options)?;
            }
            Err(err) => {
                debug!("{}: {}", source, err);
                skipped += 1;
            }
        }
    }

    let mut batch = batch.unwrap_or_else(|| Batch::new(&source, Schema::unnamed()));
    for _ in 0..skipped {
        batch.mark_skipped();
    }
    Ok(batch)
}

fn parse_json_record(
    line: &str,
    line_no: usize,
    schema: Option<&Schema>,
) -> Result<(Schema, Vec<Value>)> {
    let parsed: serde_json::Value =
        serde_json::from_str(line).map_err(|e| PipelineError::malformed(line_no, e.to_string()))?;
    let object = parsed
        .as_object()
        .ok_or_else(|| PipelineError::malformed(line_no, "not a JSON object"))?;

    let schema = match schema {
        Some(schema) => {
            if let Some(key) = object.keys().find(|k| schema.index_of(k).is_none()) {
                return Err(PipelineError::malformed(
                    line_no,
                    format!("unexpected field {}", key),
                ));
            }
            schema.clone()
        }
        None => Schema::new(object.keys().cloned())
            .map_err(|e| PipelineError::malformed(line_no, e.to_string()))?,
    };

    let values = schema
        .fields()
        .iter()
        .map(|field| match object.get(field) {
            None | Some(serde_json::Value::Null) => Ok(Value::Missing),
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| PipelineError::malformed(line_no, format!("{} out of range", field))),
            Some(serde_json::Value::String(s)) => Ok(Value::Text(s.clone())),
            Some(serde_json::Value::Bool(b)) => Ok(Value::Text(b.to_string())),
            Some(_) => Err(PipelineError::malformed(
                line_no,
                format!("{} is not a scalar", field),
            )),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((schema, values))
}

/// Reads the configured leaf tags from each direct child of the root.
///
/// Keeps at most `max_records_per_artifact` records; the default of one
/// matches the documents this reader was written for.
pub fn read_xml(path: &Path, options: &ReadOptions) -> Result<Batch> {
    let source = path.display().to_string();
    let unavailable = |e: &dyn std::fmt::Display| PipelineError::unavailable(&source, e);
    let schema = Schema::new(options.xml_fields.iter().cloned())
        .map_err(|e| PipelineError::Data(format!("xml_fields: {}", e)))?;
    let content = fs::read_to_string(path).map_err(|e| unavailable(&e))?;
    let mut batch = Batch::new(&source, schema.clone());

    // Text is kept untrimmed until the leaf closes; quick-xml splits it at
    // entity references.
    let mut reader = Reader::from_str(&content);

    let mut depth = 0usize;
    let mut saw_root = false;
    let mut current: Option<Vec<Option<String>>> = None;
    let mut leaf: Option<usize> = None;
    let mut text = String::new();

    // Past the cap the document is still read to the end so an ill-formed
    // tail fails the whole artifact.
    loop {
        let capped = options
            .max_records_per_artifact
            .is_some_and(|max| batch.len() >= max);
        match reader.read_event().map_err(|e| unavailable(&e))? {
            Event::Start(e) => {
                depth += 1;
                match depth {
                    1 => saw_root = true,
                    2 if !capped => current = Some(vec![None; schema.len()]),
                    3 => {
                        leaf = schema.index_of(&String::from_utf8_lossy(e.name().as_ref()));
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => match depth + 1 {
                1 => saw_root = true,
                2 if !capped => {
                    debug!("{}: empty record element", source);
                    batch.mark_skipped();
                }
                3 => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if let (Some(i), Some(cur)) = (schema.index_of(&name), current.as_mut()) {
                        cur[i].get_or_insert_with(String::new);
                    }
                }
                _ => {}
            },
            Event::Text(t) if depth == 3 && leaf.is_some() => {
                text.push_str(&t.decode().map_err(|e| unavailable(&e))?);
            }
            Event::CData(c) if depth == 3 && leaf.is_some() => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::GeneralRef(r) if depth == 3 && leaf.is_some() => {
                match r.resolve_char_ref().map_err(|e| unavailable(&e))? {
                    Some(ch) => text.push(ch),
                    None => {
                        let name = r.decode().map_err(|e| unavailable(&e))?;
                        match resolve_predefined_entity(&name) {
                            Some(resolved) => text.push_str(resolved),
                            None => {
                                text.push('&');
                                text.push_str(&name);
                                text.push(';');
                            }
                        }
                    }
                }
            }
            Event::End(_) => {
                match depth {
                    3 => {
                        if let (Some(i), Some(cur)) = (leaf.take(), current.as_mut()) {
                            cur[i].get_or_insert_with(|| text.trim().to_string());
                        }
                    }
                    2 => {
                        if let Some(cur) = current.take() {
                            finish_xml_record(&mut batch, &schema, cur, options)?;
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => {
                if depth != 0 {
                    return Err(unavailable(&"unexpected end of document"));
                }
                break;
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(unavailable(&"no root element"));
    }
    Ok(batch)
}

fn finish_xml_record(
    batch: &mut Batch,
    schema: &Schema,
    leaves: Vec<Option<String>>,
    options: &ReadOptions,
) -> Result<()> {
    if let Some(i) = leaves.iter().position(Option::is_none) {
        debug!(
            "{}: record without <{}> skipped",
            batch.source,
            schema.fields()[i]
        );
        batch.mark_skipped();
        return Ok(());
    }
    let values = leaves
        .into_iter()
        .map(|leaf| Value::infer(leaf.as_deref().unwrap_or_default()))
        .collect();
    keep_unless_sentinel(batch, values, options)
}

fn keep_unless_sentinel(batch: &mut Batch, values: Vec<Value>, options: &ReadOptions) -> Result<()> {
    if let Some(sentinel) = &options.sentinel {
        if let Some(i) = batch.schema().index_of(&sentinel.field) {
            if matches!(&values[i], Value::Text(s) if s.trim() == sentinel.token) {
                return Ok(());
            }
        }
    }
    batch.push(values)
}

use crate::config::{EmptySourcePolicy, ReadOptions};
use crate::error::{PipelineError, Result};
use crate::extract::{Encoding, read_artifact};
use crate::structs::{Dataset, Schema};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// A discovered input file and the reader it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArtifact {
    pub path: PathBuf,
    pub encoding: Encoding,
}

/// Lists recognized artifacts in `dir`, delimited files first, then
/// line-delimited, then XML; by file name within an encoding. Paths in
/// `exclude` (the run's own outputs) are never returned.
pub fn discover(dir: &Path, exclude: &[PathBuf]) -> Result<Vec<SourceArtifact>> {
    let entries =
        fs::read_dir(dir).map_err(|e| PipelineError::unavailable(dir.display().to_string(), e))?;

    let mut artifacts = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(encoding) = Encoding::from_path(&path) else {
            continue;
        };
        if exclude.iter().any(|ex| same_file(&path, ex)) {
            debug!("Not ingesting output artifact {}", path.display());
            continue;
        }
        artifacts.push(SourceArtifact { path, encoding });
    }

    artifacts.sort_by(|a, b| {
        a.encoding
            .cmp(&b.encoding)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(artifacts)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Reads every artifact, then concatenates the batches once against `target`.
pub fn aggregate(
    artifacts: &[SourceArtifact],
    target: &Schema,
    options: &ReadOptions,
    policy: EmptySourcePolicy,
    location: &str,
) -> Result<Dataset> {
    if artifacts.is_empty() {
        return match policy {
            EmptySourcePolicy::Fail => Err(PipelineError::NoSourcesFound(location.to_string())),
            EmptySourcePolicy::Empty => {
                info!("No sources in {}; continuing with an empty dataset", location);
                Ok(Dataset::empty(target.clone()))
            }
        };
    }

    let batches = artifacts
        .iter()
        .map(|a| read_artifact(&a.path, a.encoding, options))
        .collect::<Result<Vec<_>>>()?;
    let skipped: usize = batches.iter().map(|b| b.skipped()).sum();

    let dataset = Dataset::from_batches(target.clone(), batches)?;
    info!(
        "Aggregated {} records from {} artifacts ({} malformed skipped)",
        dataset.len(),
        artifacts.len(),
        skipped
    );
    Ok(dataset)
}

/// Discovery and aggregation over one directory.
pub fn aggregate_dir(
    dir: &Path,
    exclude: &[PathBuf],
    target: &Schema,
    options: &ReadOptions,
    policy: EmptySourcePolicy,
) -> Result<Dataset> {
    let artifacts = discover(dir, exclude)?;
    aggregate(
        &artifacts,
        target,
        options,
        policy,
        &dir.display().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::Value;
    use tempfile::TempDir;

    const FIELDS: [&str; 4] = ["car_model", "year_of_manufacture", "price", "fuel"];

    fn target() -> Schema {
        Schema::new(FIELDS).unwrap()
    }

    fn options() -> ReadOptions {
        ReadOptions {
            xml_fields: FIELDS.iter().map(|f| f.to_string()).collect(),
            ..ReadOptions::default()
        }
    }

    fn seed(dir: &TempDir) {
        fs::write(
            dir.path().join("b.csv"),
            "car_model,year_of_manufacture,price,fuel\nritz,2014,5000.0,Petrol\nsx4,2013,7089.552238805971,Diesel\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("a.csv"),
            "car_model,year_of_manufacture,price,fuel\nalto k10,2016,4253.73,Petrol\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("c.json"),
            "{\"car_model\":\"camry\",\"year_of_manufacture\":2013,\"price\":16865.67,\"fuel\":\"Petrol\"}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("d.xml"),
            "<root><row><car_model>land cruiser</car_model><year_of_manufacture>2010</year_of_manufacture><price>52238.81</price><fuel>Diesel</fuel></row></root>",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    }

    fn models(ds: &Dataset) -> Vec<String> {
        ds.column("car_model")
            .unwrap()
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn discovery_orders_by_encoding_then_name_and_excludes_output() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let output = dir.path().join("transformed_data.csv");
        fs::write(&output, "car_model\nstale\n").unwrap();

        let found = discover(dir.path(), &[output]).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|a| a.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "c.json", "d.xml"]);
        assert_eq!(found[2].encoding, Encoding::LineDelimited);
    }

    #[test]
    fn aggregation_preserves_row_and_artifact_order() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let ds = aggregate_dir(
            dir.path(),
            &[],
            &target(),
            &options(),
            EmptySourcePolicy::Fail,
        )
        .unwrap();
        assert_eq!(ds.len(), 5);
        assert_eq!(
            models(&ds),
            vec!["alto k10", "ritz", "sx4", "camry", "land cruiser"]
        );
        assert!(
            ds.records()
                .iter()
                .all(|r| r.values().len() == FIELDS.len())
        );
    }

    #[test]
    fn aggregation_is_associative() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let all = discover(dir.path(), &[]).unwrap();
        let policy = EmptySourcePolicy::Fail;

        let whole = aggregate(&all, &target(), &options(), policy, "all").unwrap();
        let mut left = aggregate(&all[..2], &target(), &options(), policy, "left").unwrap();
        let right = aggregate(&all[2..], &target(), &options(), policy, "right").unwrap();
        left.extend(right).unwrap();

        assert_eq!(left, whole);
    }

    #[test]
    fn no_sources_fails_by_default() {
        let dir = TempDir::new().unwrap();
        let err = aggregate_dir(
            dir.path(),
            &[],
            &target(),
            &options(),
            EmptySourcePolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NoSourcesFound(_)));
    }

    #[test]
    fn no_sources_can_yield_empty_dataset() {
        let dir = TempDir::new().unwrap();
        let ds = aggregate_dir(
            dir.path(),
            &[],
            &target(),
            &options(),
            EmptySourcePolicy::Empty,
        )
        .unwrap();
        assert!(ds.is_empty());
        assert_eq!(ds.schema(), &target());
    }

    #[test]
    fn narrower_artifact_gets_missing_values() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.csv"), "car_model,price\nswift,4477.61\n").unwrap();
        let ds = aggregate_dir(
            dir.path(),
            &[],
            &target(),
            &options(),
            EmptySourcePolicy::Fail,
        )
        .unwrap();
        assert_eq!(ds.value(0, "fuel"), Some(&Value::Missing));
        assert_eq!(ds.value(0, "price"), Some(&Value::Number(4477.61)));
    }

    #[test]
    fn foreign_columns_fail_aggregation() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.csv"), "car_model,colour\nswift,red\n").unwrap();
        let err = aggregate_dir(
            dir.path(),
            &[],
            &target(),
            &options(),
            EmptySourcePolicy::Fail,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch(_)));
    }
}

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

const GDP_URL: &str = "https://web.archive.org/web/20230902185326/https://en.wikipedia.org/wiki/List_of_countries_by_GDP_%28nominal%29";
const BANKS_URL: &str =
    "https://web.archive.org/web/20230908091635/https://en.wikipedia.org/wiki/List_of_largest_banks";

/// Drops rows whose `field` renders as the "no data" token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelFilter {
    pub field: String,
    pub token: String,
}

/// Options shared by the file readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Leaf tag names read from every child of an XML root. Empty means the
    /// pipeline's target fields.
    #[serde(default)]
    pub xml_fields: Vec<String>,
    /// Cap on records read from one XML artifact. `Some(1)` matches the
    /// documents this was built against, which carry one record per file.
    /// Positional and brittle: `None` reads every child.
    #[serde(default = "default_max_records")]
    pub max_records_per_artifact: Option<usize>,
    #[serde(default)]
    pub sentinel: Option<SentinelFilter>,
}

fn default_max_records() -> Option<usize> {
    Some(1)
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            xml_fields: Vec::new(),
            max_records_per_artifact: default_max_records(),
            sentinel: None,
        }
    }
}

/// Which anchor of a cell carries the record name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPick {
    First,
    Last,
}

/// Where to find rows in a fetched HTML page.
///
/// `table_index` counts `tbody` elements in document order. It is tied to the
/// layout of one specific page and breaks silently when that page changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScrape {
    pub table_index: usize,
    pub anchor_column: usize,
    pub anchor_pick: AnchorPick,
    pub value_column: usize,
    /// Parse the value cell as a number at extraction, skipping rows that fail.
    #[serde(default)]
    pub numeric_value: bool,
    #[serde(default)]
    pub sentinel: Option<String>,
    /// Stop after this many records ("top-N" sample).
    #[serde(default)]
    pub row_limit: Option<usize>,
    pub name_field: String,
    pub value_field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Files {
        dir: PathBuf,
        #[serde(default)]
        options: ReadOptions,
    },
    Html {
        url: String,
        scrape: TableScrape,
    },
}

/// What aggregation returns when no artifact is discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptySourcePolicy {
    #[default]
    Fail,
    Empty,
}

/// Derived field for one unit: `field = source * rate[unit]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTarget {
    pub unit: String,
    pub field: String,
}

impl UnitTarget {
    /// Builds targets from a `{}` template, e.g. `MC_{}_Billion`.
    pub fn from_template(units: &[&str], template: &str) -> Vec<UnitTarget> {
        units
            .iter()
            .map(|unit| UnitTarget {
                unit: unit.to_string(),
                field: template.replace("{}", unit),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TransformStep {
    Round {
        field: String,
        places: u32,
    },
    Scale {
        field: String,
        divisor: f64,
        places: u32,
        #[serde(default)]
        rename_to: Option<String>,
    },
    Rename {
        from: String,
        to: String,
    },
    Convert {
        source_field: String,
        targets: Vec<UnitTarget>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreTarget {
    pub path: PathBuf,
    pub table: String,
}

/// Everything one run needs. Passed into the orchestrator; nothing is global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub log_path: PathBuf,
    pub source: SourceConfig,
    pub target_fields: Vec<String>,
    #[serde(default)]
    pub empty_sources: EmptySourcePolicy,
    #[serde(default)]
    pub steps: Vec<TransformStep>,
    #[serde(default)]
    pub exchange_rates: Option<PathBuf>,
    #[serde(default)]
    pub csv_output: Option<PathBuf>,
    #[serde(default)]
    pub json_output: Option<PathBuf>,
    #[serde(default)]
    pub parquet_output: Option<PathBuf>,
    #[serde(default)]
    pub store: Option<StoreTarget>,
    #[serde(default)]
    pub queries: Vec<String>,
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: PipelineConfig = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_fields.is_empty() {
            return Err(PipelineError::Data(
                "target_fields must not be empty".to_string(),
            ));
        }
        let converts = self
            .steps
            .iter()
            .any(|s| matches!(s, TransformStep::Convert { .. }));
        if converts && self.exchange_rates.is_none() {
            return Err(PipelineError::Data(
                "convert step requires an exchange_rates artifact".to_string(),
            ));
        }
        if !self.queries.is_empty() && self.store.is_none() {
            return Err(PipelineError::Data(
                "queries require a store target".to_string(),
            ));
        }
        Ok(())
    }

    /// CSV, JSON Lines and XML car records in `dir`; prices rounded to cents.
    pub fn vehicle_files(dir: &Path) -> Self {
        let fields = ["car_model", "year_of_manufacture", "price", "fuel"];
        Self {
            name: "etl_practice".to_string(),
            log_path: dir.join("log_file.txt"),
            source: SourceConfig::Files {
                dir: dir.to_path_buf(),
                options: ReadOptions {
                    xml_fields: fields.iter().map(|f| f.to_string()).collect(),
                    ..ReadOptions::default()
                },
            },
            target_fields: fields.iter().map(|f| f.to_string()).collect(),
            empty_sources: EmptySourcePolicy::Fail,
            steps: vec![TransformStep::Round {
                field: "price".to_string(),
                places: 2,
            }],
            exchange_rates: None,
            csv_output: Some(dir.join("transformed_data.csv")),
            json_output: None,
            parquet_output: None,
            store: None,
            queries: Vec::new(),
        }
    }

    /// Nominal GDP by country, scraped in USD millions and stored in billions.
    pub fn country_gdp(work_dir: &Path) -> Self {
        let table = "Countries_by_GDP";
        Self {
            name: "etl_project_gdp".to_string(),
            log_path: work_dir.join("etl_project_log.txt"),
            source: SourceConfig::Html {
                url: GDP_URL.to_string(),
                scrape: TableScrape {
                    table_index: 2,
                    anchor_column: 0,
                    anchor_pick: AnchorPick::First,
                    value_column: 2,
                    numeric_value: false,
                    sentinel: Some("—".to_string()),
                    row_limit: None,
                    name_field: "Country".to_string(),
                    value_field: "GDP_USD_millions".to_string(),
                },
            },
            target_fields: vec!["Country".to_string(), "GDP_USD_millions".to_string()],
            empty_sources: EmptySourcePolicy::Fail,
            steps: vec![TransformStep::Scale {
                field: "GDP_USD_millions".to_string(),
                divisor: 1000.0,
                places: 2,
                rename_to: Some("GDP_USD_billions".to_string()),
            }],
            exchange_rates: None,
            csv_output: Some(work_dir.join("Countries_by_GDP.csv")),
            json_output: None,
            parquet_output: None,
            store: Some(StoreTarget {
                path: work_dir.join("World_Economies.db"),
                table: table.to_string(),
            }),
            queries: vec![format!(
                "SELECT * FROM {} WHERE GDP_USD_billions >= 100",
                table
            )],
        }
    }

    /// Top ten banks by market capitalization, converted to EUR, GBP and INR.
    pub fn largest_banks(work_dir: &Path) -> Self {
        let table = "Largest_banks";
        Self {
            name: "banks_project".to_string(),
            log_path: work_dir.join("code_log.txt"),
            source: SourceConfig::Html {
                url: BANKS_URL.to_string(),
                scrape: TableScrape {
                    table_index: 0,
                    anchor_column: 1,
                    anchor_pick: AnchorPick::Last,
                    value_column: 2,
                    numeric_value: true,
                    sentinel: None,
                    row_limit: Some(10),
                    name_field: "Name".to_string(),
                    value_field: "MC_USD_Billion".to_string(),
                },
            },
            target_fields: vec!["Name".to_string(), "MC_USD_Billion".to_string()],
            empty_sources: EmptySourcePolicy::Fail,
            steps: vec![TransformStep::Convert {
                source_field: "MC_USD_Billion".to_string(),
                targets: UnitTarget::from_template(&["EUR", "GBP", "INR"], "MC_{}_Billion"),
            }],
            exchange_rates: Some(work_dir.join("exchange_rate.csv")),
            csv_output: Some(work_dir.join("Largest_banks_data.csv")),
            json_output: None,
            parquet_output: None,
            store: Some(StoreTarget {
                path: work_dir.join("Banks.db"),
                table: table.to_string(),
            }),
            queries: vec![
                format!("SELECT * FROM {}", table),
                format!("SELECT AVG(MC_GBP_Billion) FROM {}", table),
                format!("SELECT Name FROM {} LIMIT 5", table),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        let dir = Path::new("/tmp/work");
        PipelineConfig::vehicle_files(dir).validate().unwrap();
        PipelineConfig::country_gdp(dir).validate().unwrap();
        PipelineConfig::largest_banks(dir).validate().unwrap();
    }

    #[test]
    fn convert_without_rates_is_rejected() {
        let mut config = PipelineConfig::largest_banks(Path::new("/tmp/work"));
        config.exchange_rates = None;
        assert!(matches!(config.validate(), Err(PipelineError::Data(_))));
    }

    #[test]
    fn unit_targets_follow_template() {
        let targets = UnitTarget::from_template(&["EUR", "GBP"], "MC_{}_Billion");
        assert_eq!(targets[0].field, "MC_EUR_Billion");
        assert_eq!(targets[1].unit, "GBP");
    }

    #[test]
    fn config_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let json = r#"{
            "name": "cars",
            "log_path": "log.txt",
            "source": { "type": "files", "dir": "data" },
            "target_fields": ["car_model", "price"],
            "steps": [{ "step": "round", "field": "price", "places": 2 }]
        }"#;
        std::fs::write(&path, json).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.empty_sources, EmptySourcePolicy::Fail);
        match config.source {
            SourceConfig::Files { options, .. } => {
                assert_eq!(options.max_records_per_artifact, Some(1));
            }
            other => panic!("unexpected source: {:?}", other),
        }
    }
}

use crate::aggregate::aggregate_dir;
use crate::audit::AuditLog;
use crate::config::{PipelineConfig, SourceConfig};
use crate::error::Result;
use crate::load::{write_csv, write_json, write_parquet};
use crate::scrape::{Fetch, read_html_table};
use crate::store::{QueryResult, SqliteStore, TableStore};
use crate::structs::{Dataset, Schema};
use crate::transform::{ExchangeRates, apply_steps};
use log::{debug, info};
use std::path::PathBuf;

/// Where a run is. Moves forward only; any error parks it in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Querying,
    Done,
    Failed,
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct RunReport {
    pub dataset: Dataset,
    pub outputs: Vec<PathBuf>,
    pub queries: Vec<(String, QueryResult)>,
    pub state: RunState,
}

/// Runs one pipeline: extract, transform, load, then the optional
/// validation queries, each bracketed in the audit log.
///
/// There is no rollback. When a stage fails, files and log entries written by
/// earlier stages stay where they are. The store connection is closed on
/// success and dropped on failure.
pub struct Orchestrator<'a> {
    config: PipelineConfig,
    fetcher: &'a dyn Fetch,
    state: RunState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: PipelineConfig, fetcher: &'a dyn Fetch) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fetcher,
            state: RunState::Idle,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&mut self) -> Result<RunReport> {
        let result = self.execute();
        if result.is_err() {
            self.transition(RunState::Failed);
        }
        result
    }

    fn transition(&mut self, next: RunState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn execute(&mut self) -> Result<RunReport> {
        let mut audit = AuditLog::open(&self.config.log_path)?;
        let job = format!("{} ETL Job", self.config.name);

        audit.stage(&job, |audit| {
            self.transition(RunState::Extracting);
            let dataset = audit.stage("Extract phase", |_| self.extract())?;
            info!("Extracted {} records", dataset.len());

            self.transition(RunState::Transforming);
            let dataset = audit.stage("Transform phase", |_| self.transform(dataset))?;

            self.transition(RunState::Loading);
            let (outputs, store) = audit.stage("Load phase", |audit| self.load(&dataset, audit))?;

            let mut queries = Vec::new();
            if let Some(store) = &store {
                if !self.config.queries.is_empty() {
                    self.transition(RunState::Querying);
                    queries = audit.stage("Query phase", |_| self.query(store))?;
                }
            }

            if let Some(store) = store {
                store.close()?;
                audit.record("Server Connection closed")?;
            }

            self.transition(RunState::Done);
            Ok(RunReport {
                dataset,
                outputs,
                queries,
                state: RunState::Done,
            })
        })
    }

    fn extract(&self) -> Result<Dataset> {
        let target = Schema::new(self.config.target_fields.iter().cloned())?;
        match &self.config.source {
            SourceConfig::Files { dir, options } => {
                let mut options = options.clone();
                if options.xml_fields.is_empty() {
                    options.xml_fields = self.config.target_fields.clone();
                }
                aggregate_dir(
                    dir,
                    &self.own_artifacts(),
                    &target,
                    &options,
                    self.config.empty_sources,
                )
            }
            SourceConfig::Html { url, scrape } => {
                let batch = read_html_table(self.fetcher, url, scrape)?;
                Dataset::from_batches(target, vec![batch])
            }
        }
    }

    /// Files this run writes or reads as side input; never ingested as sources.
    fn own_artifacts(&self) -> Vec<PathBuf> {
        [
            &self.config.csv_output,
            &self.config.json_output,
            &self.config.parquet_output,
            &self.config.exchange_rates,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }

    fn transform(&self, dataset: Dataset) -> Result<Dataset> {
        let rates = match &self.config.exchange_rates {
            Some(path) => Some(ExchangeRates::from_csv(path)?),
            None => None,
        };
        apply_steps(dataset, &self.config.steps, rates.as_ref())
    }

    fn load(
        &self,
        dataset: &Dataset,
        audit: &mut AuditLog,
    ) -> Result<(Vec<PathBuf>, Option<SqliteStore>)> {
        let mut outputs = Vec::new();
        if let Some(path) = &self.config.csv_output {
            write_csv(dataset, path)?;
            audit.record("Data saved to CSV file")?;
            outputs.push(path.clone());
        }
        if let Some(path) = &self.config.json_output {
            write_json(dataset, path)?;
            audit.record("Data saved to JSON file")?;
            outputs.push(path.clone());
        }
        if let Some(path) = &self.config.parquet_output {
            write_parquet(dataset, path)?;
            audit.record("Data saved to Parquet file")?;
            outputs.push(path.clone());
        }

        let store = match &self.config.store {
            Some(target) => {
                audit.record("SQL Connection initiated")?;
                let mut store = SqliteStore::open(&target.path)?;
                let rows = store.write_table(&target.table, dataset)?;
                audit.record(&format!(
                    "Data loaded to Database as table {} ({} rows)",
                    target.table, rows
                ))?;
                Some(store)
            }
            None => None,
        };

        Ok((outputs, store))
    }

    fn query(&self, store: &dyn TableStore) -> Result<Vec<(String, QueryResult)>> {
        self.config
            .queries
            .iter()
            .map(|sql| {
                let result = store.query(sql)?;
                info!("{}\n{}", sql, result);
                Ok((sql.clone(), result))
            })
            .collect()
    }
}

/// Builds an orchestrator and runs it once.
pub fn run_pipeline(config: PipelineConfig, fetcher: &dyn Fetch) -> Result<RunReport> {
    Orchestrator::new(config, fetcher)?.run()
}

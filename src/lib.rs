pub mod aggregate;
pub mod audit;
pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod scrape;
pub mod store;
pub mod structs;
pub mod transform;

// Re-export public API
pub use aggregate::{SourceArtifact, aggregate, aggregate_dir, discover};
pub use audit::AuditLog;
pub use config::{
    AnchorPick, EmptySourcePolicy, PipelineConfig, ReadOptions, SentinelFilter, SourceConfig,
    StoreTarget, TableScrape, TransformStep, UnitTarget,
};
pub use error::{PipelineError, Result};
pub use extract::{Encoding, read_artifact, read_csv, read_jsonl, read_xml};
pub use load::{write_csv, write_json, write_parquet};
pub use pipeline::{Orchestrator, RunReport, RunState, run_pipeline};
pub use scrape::{Fetch, HttpFetcher, read_html_table, scrape_table};
pub use store::{QueryResult, SqliteStore, TableStore};
pub use structs::{Batch, Dataset, Record, Schema, SimpleLogger, Value};
pub use transform::{ExchangeRates, apply_steps, round_half_even};

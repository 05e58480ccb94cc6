use clap::{Parser, Subcommand};
use lib::{HttpFetcher, PipelineConfig, PipelineError, SimpleLogger, run_pipeline};
use log::debug;
use std::path::PathBuf;
use std::time::Instant;

static LOGGER: SimpleLogger = SimpleLogger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    job: Job,

    /// Write JSON output next to the CSV output
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Write Parquet output next to the CSV output
    #[arg(long, global = true, default_value_t = false)]
    parquet: bool,

    /// Log level for output
    #[arg(long, global = true, default_value = "false")]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Job {
    /// Merge CSV, JSON Lines and XML car records found in a directory
    Files {
        /// Directory holding the source files (outputs are written here too)
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Read every record of an XML file instead of only the first
        #[arg(long, default_value_t = false)]
        all_xml_records: bool,
    },
    /// Scrape nominal GDP by country and store it in billions
    Gdp {
        /// Working directory for log, CSV and database
        #[arg(short, long, default_value = ".")]
        work_dir: PathBuf,
    },
    /// Scrape the largest banks and convert market caps with exchange_rate.csv
    Banks {
        /// Working directory for log, CSV, database and exchange_rate.csv
        #[arg(short, long, default_value = ".")]
        work_dir: PathBuf,
    },
    /// Run a pipeline described by a JSON config file
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), PipelineError> {
    // Initialize timer and logger
    let total_start = Instant::now();
    log::set_logger(&LOGGER).map_err(|e| PipelineError::Data(e.to_string()))?;

    // Acquire CLI args
    let args = Args::parse();
    if args.debug {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Info);
    }

    let mut config = match &args.job {
        Job::Files {
            dir,
            all_xml_records,
        } => {
            let mut config = PipelineConfig::vehicle_files(dir);
            if *all_xml_records {
                if let lib::SourceConfig::Files { options, .. } = &mut config.source {
                    options.max_records_per_artifact = None;
                }
            }
            config
        }
        Job::Gdp { work_dir } => PipelineConfig::country_gdp(work_dir),
        Job::Banks { work_dir } => PipelineConfig::largest_banks(work_dir),
        Job::Run { config } => PipelineConfig::from_json_file(config)?,
    };
    if let Some(csv) = config.csv_output.clone() {
        if args.json {
            config.json_output = Some(csv.with_extension("json"));
        }
        if args.parquet {
            config.parquet_output = Some(csv.with_extension("parquet"));
        }
    }

    // UI
    println!("Normalizer! Multi-source ETL pipeline: {}", config.name);
    debug!("Source: {:?}", config.source);
    debug!("Audit log: {}", config.log_path.display());

    println!("Starting pipeline...");
    let run_start = Instant::now();
    let fetcher = HttpFetcher::new();
    let report = run_pipeline(config, &fetcher)?;
    println!(
        "Pipeline completed in {:.2?} | {} records",
        run_start.elapsed(),
        report.dataset.len()
    );

    for path in &report.outputs {
        println!("Wrote {}", path.display());
    }
    for (sql, result) in &report.queries {
        println!("\n{}\n{}", sql, result);
    }

    println!("\nTotal runtime: {:.2?}", total_start.elapsed());
    Ok(())
}

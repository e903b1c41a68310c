//! Sluice Ingest - tutorial pipelines

use anyhow::Result;
use clap::{Parser, ValueEnum};
use sluice_common::logging::{init_logging, LogConfig, LogLevel};
use sluice_common::WriteDisposition;
use sluice_ingest::config::IngestConfig;
use sluice_ingest::demos;
use sluice_ingest::sources::RestApiConfig;
use sluice_ingest::LoadReport;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sluice-ingest")]
#[command(author, version, about = "Load tutorial datasets into local SQLite databases")]
struct Cli {
    /// Pipeline to run
    #[command(subcommand)]
    command: Command,

    /// Directory for pipeline databases
    #[arg(long, global = true, env = "SLUICE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Disposition {
    Append,
    Replace,
    Merge,
}

impl From<Disposition> for WriteDisposition {
    fn from(value: Disposition) -> Self {
        match value {
            Disposition::Append => WriteDisposition::Append,
            Disposition::Replace => WriteDisposition::Replace,
            Disposition::Merge => WriteDisposition::Merge,
        }
    }
}

#[derive(Parser, Debug)]
enum Command {
    /// Load three numbers into `numbers`
    Simple,

    /// Append five generated rows, then replace them with three
    GeneratorDemo,

    /// Load a `users` resource
    Users,

    /// Load posts and comments
    Blog,

    /// Load posts and comments from resources built at run time
    DynamicBlog,

    /// Load posts, comments and users from JSONPlaceholder
    Jsonplaceholder {
        #[arg(long, default_value = demos::JSONPLACEHOLDER_URL)]
        base_url: String,
    },

    /// Load pokemon, berries and locations from PokeAPI
    RestApi {
        /// YAML source configuration; the built-in PokeAPI config when unset
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = demos::POKEAPI_URL)]
        base_url: String,
    },

    /// Copy the family and genome tables of a SQLite database
    SqlDatabase {
        /// e.g. sqlite://rfam.db
        #[arg(long, env = "SLUICE_SQL_URL")]
        url: String,

        /// Override the write disposition (append by default)
        #[arg(long, value_enum)]
        write_disposition: Option<Disposition>,
    },

    /// Load encounters*.csv files incrementally
    Filesystem {
        /// Directory holding the CSV files
        #[arg(short, long, default_value = "./data/files")]
        input: PathBuf,
    },

    /// Ping the SpaceDevs API, load launches and agencies, then notify
    Spacedevs {
        #[arg(long, default_value = demos::SPACEDEVS_URL)]
        base_url: String,

        /// Repeat the flow every N seconds
        #[arg(long)]
        every_secs: Option<u64>,

        /// Number of runs when repeating
        #[arg(long, default_value_t = 1)]
        runs: usize,
    },
}

fn print_report(report: &LoadReport) -> bool {
    println!("{}", report);
    !report.has_failed()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sluice-ingest")
        .build()
        .merge_env()?;
    let guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env()?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let succeeded = match cli.command {
        Command::Simple => print_report(&demos::simple(&config).await?),
        Command::GeneratorDemo => {
            let (first, second) = demos::generator_demo(&config).await?;
            println!("First run (append):");
            let first_ok = print_report(&first);
            println!("Second run (replace):");
            print_report(&second) && first_ok
        },
        Command::Users => print_report(&demos::users(&config).await?),
        Command::Blog => print_report(&demos::blog(&config).await?),
        Command::DynamicBlog => print_report(&demos::dynamic_blog(&config).await?),
        Command::Jsonplaceholder { base_url } => {
            print_report(&demos::jsonplaceholder(&config, &base_url).await?)
        },
        Command::RestApi {
            config: api_config,
            base_url,
        } => {
            let api = match api_config {
                Some(path) => RestApiConfig::from_yaml_file(path)?,
                None => demos::pokemon_config(&base_url)?,
            };
            print_report(&demos::rest_api(&config, &api).await?)
        },
        Command::SqlDatabase {
            url,
            write_disposition,
        } => print_report(
            &demos::sql_database(&config, &url, write_disposition.map(Into::into)).await?,
        ),
        Command::Filesystem { input } => print_report(&demos::filesystem(&config, input).await?),
        Command::Spacedevs {
            base_url,
            every_secs,
            runs,
        } => {
            let flow = demos::spacedevs_flow(&config, &base_url)?;
            let reports = match every_secs {
                Some(secs) => flow.run_every(Duration::from_secs(secs), runs).await?,
                None => vec![flow.run().await],
            };
            reports.iter().fold(true, |ok, report| {
                println!("{}", report);
                ok && report.succeeded()
            })
        },
    };

    if !succeeded {
        drop(guard);
        std::process::exit(1);
    }

    info!("Done");
    Ok(())
}

// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info};
use std::io::Write;
use std::path::PathBuf;

use storelingo::app_config::{self, Config};
use storelingo::app_controller::{Controller, Enqueued};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate one resource file directly and print the result as JSON
    Translate {
        /// Resource snapshot (JSON)
        #[arg(value_name = "RESOURCE_FILE")]
        resource: PathBuf,

        /// Target language code (e.g. 'fr', 'ja', 'zh-TW')
        #[arg(short = 'l', long)]
        language: String,
    },

    /// Run job processors until interrupted
    Worker,

    /// Store resource snapshots so workers can translate them
    Import {
        /// JSON file with one resource or an array of resources
        #[arg(value_name = "RESOURCES_FILE")]
        path: PathBuf,
    },

    /// Admit translation jobs for one or more resources
    Enqueue {
        #[arg(value_name = "RESOURCE_ID", required = true)]
        resource_ids: Vec<String>,

        #[arg(long)]
        shop_id: String,

        #[arg(long)]
        shop_domain: String,

        /// Target language code
        #[arg(short = 'l', long)]
        language: String,

        /// Queue the batch as one job and let a worker fan it out
        #[arg(long)]
        deferred: bool,
    },

    /// Print queue statistics
    Stats,

    /// Print the state of one job
    Status {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Generate shell completions for storelingo
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// storelingo - translation jobs for storefront content
#[derive(Parser, Debug)]
#[command(name = "storelingo")]
#[command(version)]
#[command(about = "Queue-driven LLM translation of storefront content")]
#[command(long_about = "storelingo translates product, collection and page fields through an \
OpenAI-compatible chat endpoint, keeping markup, URLs and brand terms intact.

EXAMPLES:
    storelingo translate product.json -l ja          # Translate one resource file
    storelingo import products.json                  # Store resources for workers
    storelingo worker                                # Process queued jobs
    storelingo enqueue r1 r2 --shop-id s1 --shop-domain s1.example -l fr
    storelingo stats                                 # Queue statistics
    storelingo completions bash > storelingo.bash    # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. If the file doesn't exist,
    a default one is created. The API key may also be given through the
    STORELINGO_API_KEY environment variable.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: PathBuf,

    /// Set logging level
    #[arg(long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "\x1B[{}m{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Trace here; the effective level is set through set_max_level below
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "storelingo", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load_or_create(&cli.config_path)?;
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    log::set_max_level(LevelFilter::from(&config.log_level));
    config.validate().context("Configuration validation failed")?;

    let controller = Controller::with_config(config)?;

    match cli.command {
        Commands::Translate { resource, language } => {
            let result = controller.translate_file(&resource, &language).await?;
            print_json(&result)?;
        }
        Commands::Worker => controller.run_worker().await?,
        Commands::Import { path } => {
            let count = controller.import_resources(&path).await?;
            println!("Imported {} resource(s)", count);
        }
        Commands::Enqueue {
            resource_ids,
            shop_id,
            shop_domain,
            language,
            deferred,
        } => match controller
            .enqueue(resource_ids, &shop_id, &shop_domain, &language, deferred)
            .await?
        {
            Enqueued::Single(job) | Enqueued::Deferred(job) => {
                info!("Admitted job {} ({})", job.id, job.kind);
                println!("{}", job.id);
            }
            Enqueued::Batch(batch) => {
                print_json(&batch)?;
                if batch.accepted() == 0 {
                    return Err(anyhow!("No resource was admitted"));
                }
            }
        },
        Commands::Stats => println!("{}", controller.stats().await?),
        Commands::Status { job_id } => match controller.job_status(&job_id).await? {
            Some(job) => print_json(&job)?,
            None => return Err(anyhow!("Job not found: {}", job_id)),
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}

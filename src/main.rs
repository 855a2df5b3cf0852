/*!
 * bucket-zip CLI
 *
 * Exit codes: 0 success, 1 verification mismatch, 2 fatal error.
 */

use bucket_zip::{
    config::{ArchiveRequest, LogLevel, ZipConfig},
    error::{BucketZipError, Result, EXIT_SUCCESS},
    logging, Assembler, ObjectClient, ObjectStoreClient, Verifier,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "bucket-zip")]
#[command(version, about = "Archive object-store prefixes into ZIP objects and verify digest manifests", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Maximum concurrent object fetches (overrides the config file)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Path to log file (default: stderr)
    #[arg(long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream every object under a prefix into one ZIP object
    Assemble {
        /// Source bucket
        #[arg(long)]
        from_bucket: String,

        /// Source prefix (treated as a directory)
        #[arg(long)]
        from_path: String,

        /// Destination bucket
        #[arg(long)]
        to_bucket: String,

        /// Destination object key
        #[arg(long)]
        to_path: String,

        /// Name entries relative to the source prefix
        #[arg(long)]
        strip_prefix: bool,

        /// Fail instead of writing an archive when the prefix is empty
        #[arg(long)]
        no_empty: bool,

        /// Also write the archive to this local file
        #[arg(long, value_name = "FILE")]
        keep: Option<PathBuf>,

        /// Print the assembly report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check stored objects against a digest manifest
    Verify {
        /// Bucket holding the manifest and the objects
        #[arg(long)]
        bucket: String,

        /// Manifest object key, e.g. zipfodder/md5.json
        #[arg(long)]
        manifest: String,

        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let client: Arc<dyn ObjectClient> = Arc::new(build_client(&config));

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| BucketZipError::Config(format!("Failed to start async runtime: {}", e)))?;

    match cli.command {
        Commands::Assemble {
            from_bucket,
            from_path,
            to_bucket,
            to_path,
            strip_prefix,
            no_empty,
            keep,
            json,
        } => {
            let mut request = ArchiveRequest::new(from_bucket, from_path, to_bucket, to_path)
                .with_strip_prefix(strip_prefix)
                .with_allow_empty(!no_empty);
            if let Some(path) = keep {
                request = request.with_keep(path);
            }

            let assembler = Assembler::new(client, config);
            let report = runtime.block_on(assembler.assemble(&request))?;

            if json {
                print_json(&report)?;
            } else {
                for entry in &report.entries {
                    println!("{}  {:>12}  {}", entry.digest, entry.size, entry.name);
                }
                println!(
                    "Wrote {}/{} ({} entries, {} bytes)",
                    report.to_bucket,
                    report.to_path,
                    report.entries.len(),
                    report.archive_size
                );
            }
            Ok(())
        }

        Commands::Verify {
            bucket,
            manifest,
            json,
        } => {
            let verifier = Verifier::new(client, &config);
            let result = runtime.block_on(verifier.verify(&bucket, &manifest))?;

            if json {
                print_json(&result)?;
            } else {
                for entry in &result.entries {
                    let status = if entry.matches { "OK" } else { "MISMATCH" };
                    println!(
                        "{:<8}  {}  expected={} actual={}",
                        status,
                        entry.filename,
                        entry.expected,
                        entry.actual.as_deref().unwrap_or("<unreadable>")
                    );
                }
            }

            let failed = result.mismatches().count();
            if failed > 0 {
                return Err(BucketZipError::Mismatch {
                    failed,
                    total: result.len(),
                });
            }
            Ok(())
        }
    }
}

/// Config file (or defaults) with command-line overrides applied
fn load_config(cli: &Cli) -> Result<ZipConfig> {
    let mut config = match &cli.config {
        Some(path) => ZipConfig::from_file(path)?,
        None => ZipConfig::default(),
    };

    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;

    config.validate()?;
    Ok(config)
}

/// Store client with HTTP-level retry and connect timeout taken from `config`
fn build_client(config: &ZipConfig) -> ObjectStoreClient {
    ObjectStoreClient::new(config.store.clone())
        .with_http_retries(config.retry_attempts as usize)
        .with_connect_timeout(Duration::from_secs(config.fetch_timeout_secs))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| BucketZipError::Config(format!("Failed to encode JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}

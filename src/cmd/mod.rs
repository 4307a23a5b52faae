mod glob_util;
mod import;
mod schema;

use crate::dialect::{detect_dialect_from_file, DialectConfidence, SqlDialect};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dump-import")]
#[command(version)]
#[command(about = "Convert MySQL/PostgreSQL dumps into a Spanner-style schema and import their rows", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert the schema of a dump and import its rows
    Import {
        /// Input dump file (.sql, optionally .gz, .bz2, .xz, .zst compressed)
        file: PathBuf,

        /// Source dialect: mysql or postgres (auto-detected if not specified)
        #[arg(short, long)]
        dialect: Option<String>,

        /// Target dialect: google_sql or postgresql
        #[arg(short, long)]
        target_dialect: Option<String>,

        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory for schema.sql and one <table>.jsonl per table
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Convert and count everything without writing files
        #[arg(long)]
        dry_run: bool,

        /// Per-table dump files (directory or glob) imported in parallel after
        /// FILE has provided the schema
        #[arg(long)]
        data_files: Option<String>,

        /// Worker threads for --data-files
        #[arg(short, long)]
        workers: Option<usize>,

        /// Show progress during processing
        #[arg(short, long)]
        progress: bool,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the converted target DDL and conversion issues
    Schema {
        /// Input dump file (.sql, optionally compressed)
        file: PathBuf,

        /// Source dialect: mysql or postgres (auto-detected if not specified)
        #[arg(short, long)]
        dialect: Option<String>,

        /// Target dialect: google_sql or postgresql
        #[arg(short, long)]
        target_dialect: Option<String>,

        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output DDL and issues as JSON
        #[arg(long)]
        json: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Import {
            file,
            dialect,
            target_dialect,
            config,
            output,
            dry_run,
            data_files,
            workers,
            progress,
            json,
            verbose,
        } => {
            crate::logging::init(verbose);
            import::run(import::ImportArgs {
                file,
                dialect,
                target_dialect,
                config,
                output,
                dry_run,
                data_files,
                workers,
                progress,
                json,
            })
        }
        Commands::Schema {
            file,
            dialect,
            target_dialect,
            config,
            json,
            verbose,
        } => {
            crate::logging::init(verbose);
            schema::run(file, dialect, target_dialect, config, json)
        }
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "dump-import", &mut io::stdout());
            Ok(())
        }
    }
}

/// The explicit dialect, or one detected from the file's first bytes
pub(crate) fn resolve_dialect(
    file: &Path,
    explicit: Option<SqlDialect>,
    quiet: bool,
) -> anyhow::Result<SqlDialect> {
    if let Some(d) = explicit {
        return Ok(d);
    }
    let result = detect_dialect_from_file(file)?;
    if !quiet {
        let confidence_str = match result.confidence {
            DialectConfidence::High => "high confidence",
            DialectConfidence::Medium => "medium confidence",
            DialectConfidence::Low => "low confidence",
        };
        eprintln!(
            "Auto-detected dialect: {} ({})",
            result.dialect, confidence_str
        );
    }
    Ok(result.dialect)
}

/// Config file (or defaults) with command-line flags applied
pub(crate) fn load_config(
    path: Option<&Path>,
    overrides: crate::config::CliOverrides,
) -> anyhow::Result<crate::config::ImportConfig> {
    let mut config = match path {
        Some(p) => crate::config::ImportConfig::load(p)?,
        None => crate::config::ImportConfig::default(),
    };
    config.merge_cli(overrides)?;
    Ok(config)
}

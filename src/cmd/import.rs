use super::glob_util::{expand_data_files, file_sources};
use super::{load_config, resolve_dialect};
use crate::config::CliOverrides;
use crate::context::ConversionContext;
use crate::dialect::dialect_for;
use crate::import::DumpImporter;
use crate::reader::{Compression, DumpReader, DumpSource, FileSource};
use crate::store::{JsonlStore, MemoryStore, SchemaApplier, TargetStore};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct ImportArgs {
    pub file: PathBuf,
    pub dialect: Option<String>,
    pub target_dialect: Option<String>,
    pub config: Option<PathBuf>,
    pub output: PathBuf,
    pub dry_run: bool,
    pub data_files: Option<String>,
    pub workers: Option<usize>,
    pub progress: bool,
    pub json: bool,
}

pub fn run(args: ImportArgs) -> anyhow::Result<()> {
    if !args.file.exists() {
        anyhow::bail!("input file does not exist: {}", args.file.display());
    }

    let config = load_config(
        args.config.as_deref(),
        CliOverrides {
            source_dialect: args.dialect.clone(),
            target_dialect: args.target_dialect.clone(),
            workers: args.workers,
        },
    )?;
    let source = FileSource::new(&args.file);
    let compression = source.compression();
    let file_size = source.size_hint().unwrap_or(0);
    let dialect = resolve_dialect(&args.file, config.source_dialect()?, args.json)?;

    if !args.json {
        if compression != Compression::None {
            eprintln!("Detected compression: {}", compression);
        }
        eprintln!(
            "Importing dump: {} ({:.2} MB) [dialect: {} -> {}]",
            args.file.display(),
            file_size as f64 / (1024.0 * 1024.0),
            dialect,
            config.target_dialect
        );
        if args.dry_run {
            eprintln!("Dry run: nothing will be written");
        } else {
            eprintln!("Output directory: {}", args.output.display());
        }
        eprintln!();
    }

    let jsonl = if args.dry_run {
        None
    } else {
        Some(Arc::new(JsonlStore::new(&args.output)?))
    };
    let (store, applier): (Arc<dyn TargetStore>, Arc<dyn SchemaApplier>) = match &jsonl {
        Some(s) => (s.clone(), s.clone()),
        None => {
            let memory = Arc::new(MemoryStore::new());
            (memory.clone(), memory)
        }
    };

    let importer =
        DumpImporter::new(dialect_for(dialect), store, applier).with_batch_config(config.batch);
    let mut ctx = ConversionContext::new(config.convert_options());

    let mut reader = DumpReader::open(Box::new(source))?;
    let pb = if args.progress && !args.json {
        let pb = progress_bar(compression, file_size, args.data_files.is_none());
        reader = reader.with_progress(pass_aware_position(pb.clone()));
        Some(pb)
    } else {
        None
    };

    let report = match &args.data_files {
        Some(pattern) => {
            let files = expand_data_files(pattern, &args.file)?;
            if !args.json {
                eprintln!(
                    "Importing {} data file(s) on {} worker(s)",
                    files.len(),
                    config.workers
                );
            }
            importer.run_parallel(&mut ctx, &mut reader, file_sources(files), config.workers)?
        }
        None => importer.run(&mut ctx, &mut reader)?,
    };

    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }
    if let Some(store) = &jsonl {
        store.close_all()?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprint!("{}", report);
        if !args.dry_run && !report.cancelled {
            eprintln!();
            eprintln!("Output written to: {}", args.output.display());
        }
    }
    Ok(())
}

fn progress_bar(compression: Compression, file_size: u64, two_passes: bool) -> ProgressBar {
    let tick = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";
    // offsets are in decompressed bytes, so compressed input gets a spinner
    let pb = if compression == Compression::None && file_size > 0 {
        let passes = if two_passes { 2 } else { 1 };
        let pb = ProgressBar::new(file_size * passes);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}",
            )
            .unwrap()
            .progress_chars("█▓▒░  ")
            .tick_chars(tick),
        );
        pb
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")
                .unwrap()
                .tick_chars(tick),
        );
        pb
    };
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("importing...");
    pb
}

/// Progress callback that keeps counting up across the reader's rewind
fn pass_aware_position(pb: ProgressBar) -> impl Fn(u64) + Send + 'static {
    let base = Arc::new(AtomicU64::new(0));
    let last = Arc::new(AtomicU64::new(0));
    move |offset| {
        let prev = last.swap(offset, Ordering::Relaxed);
        if offset < prev {
            base.fetch_add(prev, Ordering::Relaxed);
        }
        pb.set_position(base.load(Ordering::Relaxed) + offset);
    }
}

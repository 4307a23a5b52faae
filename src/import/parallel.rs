//! Per-table parallel data pass.
//!
//! Dumps split into one file per table (`mysqldump --tab` style layouts)
//! have no ordering between files, so after the schema is frozen each file
//! can be streamed on its own worker. Every worker gets a fork of the
//! context that shares the schemas read-only and counts into fresh stats;
//! the forks' stats are merged back once all workers finish. All workers
//! feed one [`BatchWriter`], which keeps each worker's rows in order.

use super::stream_rows;
use crate::context::{ConversionContext, Mode};
use crate::dialect::DumpDialect;
use crate::error::{ImportError, Result};
use crate::reader::{DumpReader, DumpSource};
use crate::writer::BatchWriter;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Stream every source's rows on a pool of `workers` threads, then flush.
///
/// The first worker error (in source order) is returned after all workers
/// have stopped; statistics from every worker are merged either way.
pub fn import_tables(
    ctx: &mut ConversionContext,
    dialect: &dyn DumpDialect,
    sources: Vec<Box<dyn DumpSource>>,
    writer: &Arc<BatchWriter>,
    workers: usize,
) -> Result<()> {
    ctx.begin_pass(Mode::Data);
    let workers = workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ImportError::Config(format!("cannot start worker pool: {}", e)))?;

    let jobs: Vec<(ConversionContext, Box<dyn DumpSource>)> =
        sources.into_iter().map(|source| (ctx.fork(), source)).collect();
    info!("importing {} file(s) on {} worker(s)", jobs.len(), workers);

    let results: Vec<(ConversionContext, Result<()>)> = pool.install(|| {
        jobs.into_par_iter()
            .map(|(mut fork, source)| {
                let result = import_one(&mut fork, dialect, source, writer);
                (fork, result)
            })
            .collect()
    });

    let mut first_error = None;
    for (fork, result) in results {
        ctx.stats.merge_data_pass(&fork.stats);
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }
    writer.flush()
}

fn import_one(
    ctx: &mut ConversionContext,
    dialect: &dyn DumpDialect,
    source: Box<dyn DumpSource>,
    writer: &Arc<BatchWriter>,
) -> Result<()> {
    let name = source.describe();
    let mut reader =
        DumpReader::open(source).map_err(|e| ImportError::io(format!("opening {}", name), e))?;
    debug!("worker started on {}", name);

    let sink = Arc::clone(writer);
    ctx.set_sink(Box::new(move |mutation| sink.add_row(mutation)));
    let result = stream_rows(ctx, dialect, &mut reader);
    ctx.clear_sink();

    debug!(
        "worker finished {}: {} row(s), {} rejected",
        name,
        ctx.stats.total_good_rows(),
        ctx.stats.total_bad_rows()
    );
    result
}

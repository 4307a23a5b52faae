//! Two-pass import driver.
//!
//! Pass one reads the whole dump into the source schema, converts it and
//! hands the printed DDL to the schema applier. Pass two rewinds the reader
//! and streams rows through the row converter into a [`BatchWriter`].
//! Split dumps can run the second pass per table with
//! [`parallel::import_tables`].

pub mod parallel;
mod report;

pub use report::{ImportReport, IssueReport, TableReport};

use crate::context::{ConversionContext, Mode};
use crate::convert::SchemaConverter;
use crate::data::RowConverter;
use crate::dialect::DumpDialect;
use crate::error::{ImportError, Result};
use crate::parser::ChunkParser;
use crate::reader::{DumpReader, DumpSource};
use crate::schema::SchemaBuilder;
use crate::store::{SchemaApplier, TargetStore};
use crate::target::print_schema;
use crate::writer::{BatchConfig, BatchWriter};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct DumpImporter {
    dialect: Box<dyn DumpDialect>,
    store: Arc<dyn TargetStore>,
    applier: Arc<dyn SchemaApplier>,
    batch: BatchConfig,
}

impl DumpImporter {
    pub fn new(
        dialect: Box<dyn DumpDialect>,
        store: Arc<dyn TargetStore>,
        applier: Arc<dyn SchemaApplier>,
    ) -> Self {
        Self {
            dialect,
            store,
            applier,
            batch: BatchConfig::default(),
        }
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn dialect(&self) -> &dyn DumpDialect {
        self.dialect.as_ref()
    }

    /// A writer over this importer's store that stops retrying when `ctx`
    /// is cancelled
    pub fn writer(&self, ctx: &ConversionContext) -> Arc<BatchWriter> {
        Arc::new(
            BatchWriter::new(Arc::clone(&self.store), self.batch)
                .with_cancel(ctx.cancel_token().clone()),
        )
    }

    /// Schema pass: build, convert and apply the target schema.
    ///
    /// Returns the DDL statements handed to the applier.
    pub fn create_schema(
        &self,
        ctx: &mut ConversionContext,
        reader: &mut DumpReader,
    ) -> Result<Vec<String>> {
        ctx.begin_pass(Mode::Schema);
        let mut parser = ChunkParser::new(self.dialect());
        let builder = SchemaBuilder::new();
        while let Some(chunk) = parser.next_chunk(ctx, reader)? {
            if ctx.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            builder.process_chunk(ctx, &chunk);
        }
        builder.finish(ctx);
        info!(
            "schema pass over {}: {} table(s), {} line(s)",
            reader.describe(),
            ctx.source().len(),
            reader.line_number()
        );

        SchemaConverter::new().convert(ctx, self.dialect());
        let ddl = print_schema(ctx.target(), ctx.options.target_dialect);
        self.applier
            .apply_schema(&ddl)
            .map_err(ImportError::SchemaApply)?;
        info!("applied {} DDL statement(s)", ddl.len());
        Ok(ddl)
    }

    /// Data pass from the reader's current position, ending with a flush.
    pub fn import_data(
        &self,
        ctx: &mut ConversionContext,
        reader: &mut DumpReader,
        writer: &Arc<BatchWriter>,
    ) -> Result<()> {
        ctx.begin_pass(Mode::Data);
        let sink = Arc::clone(writer);
        ctx.set_sink(Box::new(move |mutation| sink.add_row(mutation)));
        let result = stream_rows(ctx, self.dialect(), reader).and_then(|_| writer.flush());
        ctx.clear_sink();
        if result.is_ok() {
            info!(
                "data pass over {}: {} row(s) written, {} rejected",
                reader.describe(),
                ctx.stats.total_good_rows(),
                ctx.stats.total_bad_rows()
            );
        }
        result
    }

    /// Both passes over one dump.
    ///
    /// Cancellation is not an error: the pending batch is dropped and the
    /// report carries `cancelled` with whatever was counted so far.
    pub fn run(&self, ctx: &mut ConversionContext, reader: &mut DumpReader) -> Result<ImportReport> {
        let start = Instant::now();
        let writer = self.writer(ctx);
        let outcome = self.create_schema(ctx, reader).and_then(|_| {
            reader
                .reset()
                .map_err(|e| ImportError::io(format!("rewinding {}", reader.describe()), e))?;
            self.import_data(ctx, reader, &writer)
        });
        self.finish(ctx, reader.describe(), &writer, outcome, start)
    }

    /// Schema pass over `schema_reader`, then one data pass per source on
    /// `workers` threads.
    pub fn run_parallel(
        &self,
        ctx: &mut ConversionContext,
        schema_reader: &mut DumpReader,
        sources: Vec<Box<dyn DumpSource>>,
        workers: usize,
    ) -> Result<ImportReport> {
        let start = Instant::now();
        let writer = self.writer(ctx);
        let described = format!("{} (+{} data file(s))", schema_reader.describe(), sources.len());
        let outcome = self.create_schema(ctx, schema_reader).and_then(|_| {
            parallel::import_tables(ctx, self.dialect(), sources, &writer, workers)
        });
        self.finish(ctx, described, &writer, outcome, start)
    }

    fn finish(
        &self,
        ctx: &ConversionContext,
        source: String,
        writer: &BatchWriter,
        outcome: Result<()>,
        start: Instant,
    ) -> Result<ImportReport> {
        let cancelled = match outcome {
            Ok(()) => false,
            Err(ImportError::Cancelled) => {
                writer.abandon();
                warn!("import of {} cancelled", source);
                true
            }
            Err(e) => return Err(e),
        };
        let mut report = ImportReport::from_context(ctx, source);
        report.writer = writer.stats();
        report.cancelled = cancelled;
        report.elapsed = start.elapsed();
        Ok(report)
    }
}

/// Parse chunks and convert their rows until end of input, checking for
/// cancellation between chunks. Does not flush.
pub(crate) fn stream_rows(
    ctx: &mut ConversionContext,
    dialect: &dyn DumpDialect,
    reader: &mut DumpReader,
) -> Result<()> {
    let mut parser = ChunkParser::new(dialect);
    let converter = RowConverter::new();
    while let Some(chunk) = parser.next_chunk(ctx, reader)? {
        if ctx.is_cancelled() {
            return Err(ImportError::Cancelled);
        }
        converter.process_chunk(ctx, &chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelToken;
    use crate::data::TargetValue;
    use crate::dialect::{MySqlDump, PostgresDump};
    use crate::error::StoreError;
    use crate::reader::MemorySource;
    use crate::store::MemoryStore;

    fn importer(store: &Arc<MemoryStore>, dialect: Box<dyn DumpDialect>) -> DumpImporter {
        DumpImporter::new(dialect, store.clone(), store.clone()).with_batch_config(BatchConfig {
            retry_backoff_ms: 0,
            ..BatchConfig::default()
        })
    }

    fn reader(sql: &str) -> DumpReader {
        DumpReader::open(Box::new(MemorySource::new("dump.sql", sql))).unwrap()
    }

    #[test]
    fn test_run_two_passes() {
        let sql = "CREATE TABLE t (a INT, b VARCHAR(10));\n\
                   INSERT INTO t VALUES (1, 'x'), (2, 'y');\n";
        let store = Arc::new(MemoryStore::new());
        let mut ctx = ConversionContext::default();
        let report = importer(&store, Box::new(MySqlDump))
            .run(&mut ctx, &mut reader(sql))
            .unwrap();

        assert!(!report.cancelled);
        assert_eq!(store.rows_for("t").len(), 2);
        assert!(store.schema()[0].starts_with("CREATE TABLE t"));
        let t = report.table("t").unwrap();
        assert_eq!((t.rows, t.good_rows, t.bad_rows), (2, 2, 0));
        assert_eq!(report.writer.rows_written, 2);
        assert_eq!(report.statements["InsertStmt"].schema, 1);
        assert_eq!(report.statements["InsertStmt"].data, 1);
    }

    #[test]
    fn test_copy_block_imports_rows() {
        let sql = "CREATE TABLE public.items (id bigint NOT NULL, name text, PRIMARY KEY (id));\n\
                   COPY public.items (id, name) FROM stdin;\n\
                   1\tone\n\
                   2\t\\N\n\
                   \\.\n";
        let store = Arc::new(MemoryStore::new());
        let mut ctx = ConversionContext::default();
        importer(&store, Box::new(PostgresDump))
            .run(&mut ctx, &mut reader(sql))
            .unwrap();

        let rows = store.rows_for("items");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value("id"), Some(&TargetValue::Int64(1)));
        assert_eq!(rows[1].value("name"), Some(&TargetValue::Null));
    }

    #[test]
    fn test_schema_apply_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreError::Permanent("ddl rejected".into()));
        let mut ctx = ConversionContext::default();
        let result = importer(&store, Box::new(MySqlDump))
            .run(&mut ctx, &mut reader("CREATE TABLE t (a INT);\n"));
        assert!(matches!(result, Err(ImportError::SchemaApply(_))));
    }

    #[test]
    fn test_cancelled_run_reports_partial_stats() {
        let sql = "CREATE TABLE t (a INT);\nINSERT INTO t VALUES (1);\n";
        let store = Arc::new(MemoryStore::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut ctx = ConversionContext::default().with_cancel(cancel);
        let report = importer(&store, Box::new(MySqlDump))
            .run(&mut ctx, &mut reader(sql))
            .unwrap();

        assert!(report.cancelled);
        assert!(store.rows().is_empty());
    }

    #[test]
    fn test_rerun_does_not_double_count() {
        let sql = "CREATE TABLE t (a INT);\nINSERT INTO t VALUES (1), (2);\n";
        let store = Arc::new(MemoryStore::new());
        let imp = importer(&store, Box::new(MySqlDump));
        let mut ctx = ConversionContext::default();
        let mut r = reader(sql);
        imp.create_schema(&mut ctx, &mut r).unwrap();
        r.reset().unwrap();
        imp.create_schema(&mut ctx, &mut r).unwrap();

        assert_eq!(ctx.stats.rows["t"], 2);
        assert_eq!(ctx.stats.statements["InsertStmt"].schema, 1);
        assert_eq!(ctx.source().len(), 1);
    }
}

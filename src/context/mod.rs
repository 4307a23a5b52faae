//! Conversion context threaded through every stage of an import.
//!
//! The context is owned by the caller and passed by `&mut` to the schema
//! builder, converter and row converter. It holds the source and target
//! schemas, the issue registry, statistics, the current mode and the row
//! sink. Schemas sit behind `Arc` so a frozen schema can be shared read-only
//! by the per-table workers ([`ConversionContext::fork`]).

mod issues;
mod stats;

pub use issues::*;
pub use stats::*;

use crate::error::Result;
use crate::schema::{IdAllocator, SourceSchema, TableId};
use crate::store::Mutation;
use crate::target::{TargetDialect, TargetSchema};
use ahash::AHashMap;
use chrono::{FixedOffset, Offset, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default name of the synthesized primary key column
pub const SYNTHETIC_KEY_NAME: &str = "synth_id";

/// Which pass the pipeline is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Build the source schema; data statements only count rows
    Schema,
    /// Convert and write rows against the frozen target schema
    Data,
}

/// Cooperative cancellation flag, checked between statements and between
/// flush attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Knobs for schema and row conversion
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub synthetic_key: String,
    pub target_dialect: TargetDialect,
    pub bad_row_sample_limit: usize,
    pub unexpected_limit: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            synthetic_key: SYNTHETIC_KEY_NAME.to_string(),
            target_dialect: TargetDialect::GoogleSql,
            bad_row_sample_limit: 100,
            unexpected_limit: 100,
        }
    }
}

/// Receives each converted row during the data pass
pub type RowSink = Box<dyn FnMut(Mutation) -> Result<()> + Send>;

pub struct ConversionContext {
    pub ids: IdAllocator,
    source: Arc<SourceSchema>,
    target: Arc<TargetSchema>,
    pub issues: IssueRegistry,
    pub stats: Stats,
    pub options: ConvertOptions,
    /// Offset applied to timestamps written without one (from `SET TIME_ZONE`)
    pub timezone: FixedOffset,
    mode: Mode,
    /// Shared with forks so parallel workers never hand out the same value
    synthetic_counters: Arc<Mutex<AHashMap<TableId, u64>>>,
    sink: Option<RowSink>,
    cancel: CancelToken,
}

impl ConversionContext {
    pub fn new(options: ConvertOptions) -> Self {
        let stats = Stats::new(options.bad_row_sample_limit, options.unexpected_limit);
        Self {
            ids: IdAllocator::new(),
            source: Arc::new(SourceSchema::new()),
            target: Arc::new(TargetSchema::new()),
            issues: IssueRegistry::new(),
            stats,
            options,
            timezone: Utc.fix(),
            mode: Mode::Schema,
            synthetic_counters: Arc::new(Mutex::new(AHashMap::new())),
            sink: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Enter a pass, clearing that pass's counters
    pub fn begin_pass(&mut self, mode: Mode) {
        self.mode = mode;
        match mode {
            Mode::Schema => self.stats.reset_schema_pass(),
            Mode::Data => {
                self.stats.reset_data_pass();
                self.synthetic_counters.lock().clear();
            }
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_schema_mode(&self) -> bool {
        self.mode == Mode::Schema
    }

    pub fn source(&self) -> &SourceSchema {
        &self.source
    }

    /// Mutable source schema; clones only if a fork still shares it
    pub fn source_mut(&mut self) -> &mut SourceSchema {
        Arc::make_mut(&mut self.source)
    }

    pub fn shared_source(&self) -> Arc<SourceSchema> {
        Arc::clone(&self.source)
    }

    /// Replace the target schema wholesale (end of conversion)
    pub fn set_target(&mut self, target: TargetSchema) {
        self.target = Arc::new(target);
    }

    pub fn target(&self) -> &TargetSchema {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut TargetSchema {
        Arc::make_mut(&mut self.target)
    }

    pub fn shared_target(&self) -> Arc<TargetSchema> {
        Arc::clone(&self.target)
    }

    pub fn set_sink(&mut self, sink: RowSink) {
        self.sink = Some(sink);
    }

    pub fn clear_sink(&mut self) {
        self.sink = None;
    }

    /// Hand a converted row to the sink. Without a sink the row is dropped.
    pub fn write_row(&mut self, mutation: Mutation) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink(mutation),
            None => Ok(()),
        }
    }

    /// Next synthetic key value for a table: the bit-reversed row counter.
    ///
    /// Bit reversal spreads consecutive rows across the key space so writes
    /// do not all land on one split.
    pub fn next_synthetic_value(&mut self, table: TableId) -> String {
        let mut counters = self.synthetic_counters.lock();
        let counter = counters.entry(table).or_insert(0);
        let value = counter.reverse_bits();
        *counter += 1;
        value.to_string()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record an unexpected condition (logged and counted, never fatal)
    pub fn unexpected(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("unexpected: {}", message);
        self.stats.unexpected(message);
    }

    /// A data-pass context sharing this context's frozen schemas.
    ///
    /// The fork starts with empty statistics and no sink; merge its stats
    /// back with [`Stats::merge_data_pass`]. Surrogate counters stay shared.
    pub fn fork(&self) -> ConversionContext {
        ConversionContext {
            ids: self.ids.clone(),
            source: Arc::clone(&self.source),
            target: Arc::clone(&self.target),
            issues: self.issues.clone(),
            stats: Stats::new(
                self.options.bad_row_sample_limit,
                self.options.unexpected_limit,
            ),
            options: self.options.clone(),
            timezone: self.timezone,
            mode: Mode::Data,
            synthetic_counters: Arc::clone(&self.synthetic_counters),
            sink: None,
            cancel: self.cancel.clone(),
        }
    }
}

impl Default for ConversionContext {
    fn default() -> Self {
        Self::new(ConvertOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_values_are_distinct_and_spread() {
        let mut ctx = ConversionContext::default();
        let t = TableId(1);
        let a = ctx.next_synthetic_value(t);
        let b = ctx.next_synthetic_value(t);
        let c = ctx.next_synthetic_value(t);
        assert_eq!(a, "0");
        assert_eq!(b, (1u64 << 63).to_string());
        assert_ne!(b, c);
    }

    #[test]
    fn test_fork_shares_schema() {
        let ctx = ConversionContext::default();
        let fork = ctx.fork();
        assert!(Arc::ptr_eq(&ctx.target, &fork.target));
        assert_eq!(fork.mode(), Mode::Data);
    }

    #[test]
    fn test_forks_draw_from_one_surrogate_counter() {
        let mut ctx = ConversionContext::default();
        let mut a = ctx.fork();
        let mut b = ctx.fork();
        let t = TableId(1);
        let values = [
            a.next_synthetic_value(t),
            b.next_synthetic_value(t),
            ctx.next_synthetic_value(t),
            b.next_synthetic_value(t),
        ];
        let distinct: std::collections::HashSet<_> = values.iter().collect();
        assert_eq!(distinct.len(), 4);

        ctx.begin_pass(Mode::Data);
        assert_eq!(a.next_synthetic_value(t), "0");
    }

    #[test]
    fn test_write_row_without_sink_is_noop() {
        let mut ctx = ConversionContext::default();
        let m = Mutation::new("t", vec![], vec![]);
        assert!(ctx.write_row(m).is_ok());
    }
}

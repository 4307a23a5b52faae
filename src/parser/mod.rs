//! Statement parser adapter.
//!
//! Accumulates dump lines into chunks, hands complete chunks to the
//! dialect's statement parser and, when that fails, tries the repair
//! heuristics in [`repair`] before reading further. PostgreSQL `COPY`
//! blocks bypass the statement parser entirely and are read raw.

mod copy;
mod repair;
mod tuples;
mod values;

pub use copy::{is_terminator, parse_copy_header, parse_copy_line, CopyHeader, COPY_TERMINATOR};
pub use repair::{parse_time_zone, Repair};
pub use tuples::{is_comment_only, is_complete, split_insert, Lexical, SplitInsert};
pub use values::{InsertRows, RawValue, RowSource};

use crate::context::ConversionContext;
use crate::dialect::DumpDialect;
use crate::error::{ImportError, Result};
use crate::reader::DumpReader;
use sqlparser::ast::Statement;
use tracing::{debug, warn};

/// Data lines per chunk when streaming a COPY block
pub const COPY_CHUNK_ROWS: usize = 10_000;

/// One statement produced from the dump
#[derive(Debug, Clone)]
pub enum DumpStatement {
    Sql(Statement),
    /// Literal rows from an `INSERT ... VALUES` or a COPY block
    Rows(InsertRows),
}

/// Statements parsed from one chunk of the dump
#[derive(Debug, Clone)]
pub struct ParsedChunk {
    pub statements: Vec<DumpStatement>,
    /// 1-based line the chunk started on
    pub start_line: u64,
    /// Byte offset the chunk started at
    pub offset: u64,
    pub repair: Option<Repair>,
}

enum Outcome {
    Parsed(Vec<DumpStatement>, Option<Repair>),
    CopyStart(CopyHeader),
    NeedMore,
    Failed(String),
}

struct CopyBlock {
    header: CopyHeader,
    counted: bool,
}

/// Turns a line stream into parsed chunks for one pass over a dump
pub struct ChunkParser<'d> {
    dialect: &'d dyn DumpDialect,
    lex: Lexical,
    buf: String,
    lines: usize,
    start_line: u64,
    start_offset: u64,
    /// Inside a `DELIMITER` region
    routine: bool,
    copy: Option<CopyBlock>,
}

impl<'d> ChunkParser<'d> {
    pub fn new(dialect: &'d dyn DumpDialect) -> Self {
        Self {
            dialect,
            lex: dialect.lexical(),
            buf: String::with_capacity(32 * 1024),
            lines: 0,
            start_line: 0,
            start_offset: 0,
            routine: false,
            copy: None,
        }
    }

    /// Next parsed chunk, or `None` at end of input.
    ///
    /// Chunks may carry no statements (comments, skipped objects). The only
    /// error besides I/O is a trailing chunk that never parses.
    pub fn next_chunk(
        &mut self,
        ctx: &mut ConversionContext,
        reader: &mut DumpReader,
    ) -> Result<Option<ParsedChunk>> {
        if self.copy.is_some() {
            return self.read_copy_rows(ctx, reader).map(Some);
        }

        loop {
            let offset = reader.offset();
            let Some(line) = reader
                .read_line()
                .map_err(|e| ImportError::io(format!("reading {}", reader.describe()), e))?
            else {
                return self.finish(ctx, reader);
            };

            if reader.last_line_lossy() {
                ctx.unexpected(format!(
                    "invalid UTF-8 replaced on line {}",
                    reader.line_number()
                ));
            }

            if self.buf.trim().is_empty() {
                if repair::is_meta_command(&line) {
                    continue;
                }
                self.buf.clear();
                self.lines = 0;
                self.start_line = reader.line_number();
                self.start_offset = offset;
            }

            if let Some(delimiter) = repair::delimiter_directive(&line) {
                if let Some(chunk) = self.delimiter(ctx, delimiter) {
                    return Ok(Some(chunk));
                }
                continue;
            }

            self.buf.push_str(&line);
            self.lines += 1;
            if self.routine || !line.contains(';') {
                continue;
            }

            match self.attempt(ctx, false) {
                Outcome::Parsed(statements, repair) => return Ok(Some(self.emit(statements, repair))),
                Outcome::CopyStart(header) => {
                    self.start_copy(header);
                    return self.read_copy_rows(ctx, reader).map(Some);
                }
                Outcome::NeedMore => {}
                Outcome::Failed(error) => {
                    debug!(
                        "chunk at line {} did not parse yet ({}), reading on",
                        self.start_line, error
                    );
                    if ctx.is_schema_mode() {
                        ctx.stats.reparsed += 1;
                    }
                }
            }
        }
    }

    fn finish(
        &mut self,
        ctx: &mut ConversionContext,
        reader: &DumpReader,
    ) -> Result<Option<ParsedChunk>> {
        if self.buf.trim().is_empty() {
            return Ok(None);
        }
        if self.routine {
            ctx.unexpected(format!(
                "DELIMITER region starting at line {} never closed",
                self.start_line
            ));
            self.routine = false;
            self.buf.clear();
            return Ok(None);
        }

        match self.attempt(ctx, true) {
            Outcome::Parsed(statements, repair) => Ok(Some(self.emit(statements, repair))),
            Outcome::CopyStart(header) => {
                ctx.unexpected(format!("COPY into {} has no data", header.table));
                self.buf.clear();
                Ok(None)
            }
            Outcome::NeedMore | Outcome::Failed(_) => {
                debug!("unparsed tail of {}:\n{}", reader.describe(), self.buf);
                Err(ImportError::UnparsedTail {
                    lines: self.lines,
                    line: self.start_line,
                    offset: self.start_offset,
                })
            }
        }
    }

    fn delimiter(&mut self, ctx: &mut ConversionContext, delimiter: &str) -> Option<ParsedChunk> {
        if !self.routine {
            if delimiter != ";" {
                if !self.buf.trim().is_empty() {
                    ctx.unexpected(format!(
                        "incomplete statement before DELIMITER at line {}",
                        self.start_line
                    ));
                }
                self.routine = true;
                self.buf.clear();
            }
            return None;
        }

        self.routine = false;
        let kind = repair::routine_kind(&self.buf);
        if ctx.is_schema_mode() {
            ctx.stats.skip_statement(&kind);
            warn!(
                "skipping {} defined between DELIMITER directives at line {}",
                kind, self.start_line
            );
        }
        Some(self.emit(Vec::new(), Some(Repair::Delimiter { kind })))
    }

    fn emit(&mut self, statements: Vec<DumpStatement>, repair: Option<Repair>) -> ParsedChunk {
        self.buf.clear();
        self.lines = 0;
        ParsedChunk {
            statements,
            start_line: self.start_line,
            offset: self.start_offset,
            repair,
        }
    }

    /// Run the chunk through the parser, then the repair heuristics in order
    fn attempt(&self, ctx: &mut ConversionContext, at_eof: bool) -> Outcome {
        let text = self.buf.as_str();

        if let Some(zone) = repair::session_time_zone(text) {
            match zone {
                Ok(offset) if ctx.is_schema_mode() => ctx.timezone = offset,
                Ok(_) => {}
                Err(e) => ctx.unexpected(e),
            }
        }
        if is_comment_only(text, self.lex) {
            return Outcome::Parsed(Vec::new(), Some(Repair::AdminComment));
        }
        if let Some(header) = self.dialect.copy_header(text) {
            return Outcome::CopyStart(header);
        }
        if !at_eof && !is_complete(text, self.lex) {
            return Outcome::NeedMore;
        }

        let error = match self.dialect.parse_chunk(text) {
            Ok(statements) => {
                return Outcome::Parsed(statements.into_iter().map(into_dump_statement).collect(), None)
            }
            Err(e) => e.to_string(),
        };

        if let Some(kind) = repair::unsupported_object(text) {
            if ctx.is_schema_mode() {
                ctx.stats.skip_statement(&kind);
                warn!("skipping unsupported {} at line {}", kind, self.start_line);
            }
            return Outcome::Parsed(Vec::new(), Some(Repair::Unsupported { kind }));
        }

        if let Some(table) = repair::insert_table(text) {
            if let Some(split) = split_insert(text, self.lex).filter(|s| !s.tuples.is_empty()) {
                return self.decompose(ctx, &table, split);
            }
        }

        if let Some(rewritten) = repair::rewrite_spatial(text) {
            if let Ok(statements) = self.dialect.parse_chunk(&rewritten) {
                if ctx.is_schema_mode() {
                    warn!("rewrote spatial types as text at line {}", self.start_line);
                }
                return Outcome::Parsed(
                    statements.into_iter().map(into_dump_statement).collect(),
                    Some(Repair::Spatial),
                );
            }
        }

        Outcome::Failed(error)
    }

    /// Re-parse a failed multi-row INSERT one tuple at a time
    fn decompose(&self, ctx: &mut ConversionContext, table: &str, split: SplitInsert<'_>) -> Outcome {
        let unqualified = table.rsplit('.').next().unwrap_or(table);
        let mut merged: Option<InsertRows> = None;
        let mut failed = 0;

        for tuple in &split.tuples {
            let single = format!("{} {};", split.prefix, tuple);
            let parsed = match self.dialect.parse_chunk(&single) {
                Ok(mut statements) => match statements.pop() {
                    Some(Statement::Insert(insert)) => InsertRows::from_insert(&insert)
                        .ok_or_else(|| "not a VALUES tuple".to_string()),
                    _ => Err("not a VALUES tuple".to_string()),
                },
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(rows) => match merged.as_mut() {
                    Some(m) => m.rows.extend(rows.rows),
                    None => merged = Some(rows),
                },
                Err(reason) => {
                    failed += 1;
                    if ctx.is_schema_mode() {
                        ctx.stats.add_rows(unqualified, 1);
                        ctx.stats.error_statement(RowSource::Insert.kind());
                    } else {
                        ctx.stats.bad_row(unqualified, tuple.to_string(), reason);
                    }
                }
            }
        }

        if ctx.is_schema_mode() {
            warn!(
                "INSERT into {} at line {} re-parsed per row: {} of {} row(s) dropped",
                table,
                self.start_line,
                failed,
                split.tuples.len()
            );
        }
        let statements = merged.map(DumpStatement::Rows).into_iter().collect();
        Outcome::Parsed(statements, Some(Repair::InsertSplit { failed }))
    }

    fn start_copy(&mut self, header: CopyHeader) {
        self.buf.clear();
        self.lines = 0;
        self.copy = Some(CopyBlock {
            header,
            counted: false,
        });
    }

    fn read_copy_rows(
        &mut self,
        ctx: &mut ConversionContext,
        reader: &mut DumpReader,
    ) -> Result<ParsedChunk> {
        let start_line = reader.line_number() + 1;
        let offset = reader.offset();
        let Some(mut block) = self.copy.take() else {
            return Ok(ParsedChunk {
                statements: Vec::new(),
                start_line,
                offset,
                repair: None,
            });
        };

        let table = match &block.header.schema {
            Some(schema) => format!("{}.{}", schema, block.header.table),
            None => block.header.table.clone(),
        };
        let columns = (!block.header.columns.is_empty()).then(|| block.header.columns.clone());
        let mut rows = InsertRows::new(table, columns, RowSource::Copy);
        rows.continuation = block.counted;

        let mut done = false;
        while rows.rows.len() < COPY_CHUNK_ROWS {
            let line = reader
                .read_line()
                .map_err(|e| ImportError::io(format!("reading {}", reader.describe()), e))?;
            match line {
                None => {
                    ctx.unexpected(format!(
                        "COPY into {} not terminated before end of input",
                        block.header.table
                    ));
                    done = true;
                    break;
                }
                Some(line) if is_terminator(&line) => {
                    done = true;
                    break;
                }
                Some(line) => rows.rows.push(parse_copy_line(&line)),
            }
        }

        block.counted = true;
        if !done {
            self.copy = Some(block);
        }
        Ok(ParsedChunk {
            statements: vec![DumpStatement::Rows(rows)],
            start_line,
            offset,
            repair: None,
        })
    }
}

fn into_dump_statement(stmt: Statement) -> DumpStatement {
    if let Statement::Insert(insert) = &stmt {
        if let Some(rows) = InsertRows::from_insert(insert) {
            return DumpStatement::Rows(rows);
        }
    }
    DumpStatement::Sql(stmt)
}

/// Counter key for a statement, e.g. `CreateStmt`
pub fn statement_kind(stmt: &Statement) -> String {
    match stmt {
        Statement::Insert(_) => "InsertStmt".to_string(),
        Statement::CreateTable(_) => "CreateStmt".to_string(),
        Statement::AlterTable { .. } => "AlterTableStmt".to_string(),
        Statement::CreateIndex(_) => "IndexStmt".to_string(),
        Statement::SetVariable { .. } => "VariableSetStmt".to_string(),
        Statement::Drop { .. } => "DropStmt".to_string(),
        other => {
            let debug = format!("{:?}", other);
            debug
                .split(|c: char| !c.is_alphanumeric())
                .next()
                .filter(|word| !word.is_empty())
                .unwrap_or("Unknown")
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;
    use crate::dialect::{MySqlDump, PostgresDump};
    use crate::reader::MemorySource;

    fn chunks(dialect: &dyn DumpDialect, ctx: &mut ConversionContext, sql: &str) -> Vec<ParsedChunk> {
        let mut reader = DumpReader::open(Box::new(MemorySource::new("test", sql))).unwrap();
        let mut parser = ChunkParser::new(dialect);
        let mut out = Vec::new();
        while let Some(chunk) = parser.next_chunk(ctx, &mut reader).unwrap() {
            out.push(chunk);
        }
        out
    }

    fn statements(chunks: &[ParsedChunk]) -> Vec<&DumpStatement> {
        chunks.iter().flat_map(|c| c.statements.iter()).collect()
    }

    #[test]
    fn test_multiline_statement_and_positions() {
        let mut ctx = ConversionContext::default();
        let sql = "-- header\n\nCREATE TABLE t (\n  id INT PRIMARY KEY\n);\nINSERT INTO t VALUES (1),(2);\n";
        let out = chunks(&MySqlDump, &mut ctx, sql);
        let stmts = statements(&out);
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[0], DumpStatement::Sql(Statement::CreateTable(_))));
        match stmts[1] {
            DumpStatement::Rows(rows) => assert_eq!(rows.rows.len(), 2),
            other => panic!("expected rows, got {:?}", other),
        }
        assert_eq!(out[0].start_line, 1);
        assert_eq!(out[1].start_line, 6);
    }

    #[test]
    fn test_only_real_decoding_errors_are_reported() {
        let mut ctx = ConversionContext::default();
        chunks(&MySqlDump, &mut ctx, "INSERT INTO t VALUES ('\u{FFFD}');\n");
        assert!(ctx.stats.unexpected.keys().all(|k| !k.contains("invalid UTF-8")));

        let mut ctx = ConversionContext::default();
        let mut bytes = b"INSERT INTO t VALUES ('".to_vec();
        bytes.extend_from_slice(b"\xff');\n");
        let mut reader = DumpReader::open(Box::new(MemorySource::new("test", bytes))).unwrap();
        let mut parser = ChunkParser::new(&MySqlDump);
        while parser.next_chunk(&mut ctx, &mut reader).unwrap().is_some() {}
        assert!(ctx.stats.unexpected.keys().any(|k| k.contains("invalid UTF-8")));
    }

    #[test]
    fn test_semicolon_in_string_does_not_end_statement() {
        let mut ctx = ConversionContext::default();
        let sql = "INSERT INTO t VALUES ('a;\nb');\n";
        let out = chunks(&MySqlDump, &mut ctx, sql);
        match statements(&out)[0] {
            DumpStatement::Rows(rows) => {
                assert_eq!(rows.rows[0][0], RawValue::Text("a;\nb".into()))
            }
            other => panic!("expected rows, got {:?}", other),
        }
        assert_eq!(ctx.stats.reparsed, 0);
    }

    #[test]
    fn test_delimiter_region_is_skipped() {
        let mut ctx = ConversionContext::default();
        let sql = "DELIMITER ;;\nCREATE TRIGGER trg BEFORE INSERT ON t FOR EACH ROW BEGIN\n  SET NEW.a = 1;\nEND ;;\nDELIMITER ;\nCREATE TABLE t (a INT);\n";
        let out = chunks(&MySqlDump, &mut ctx, sql);
        assert!(out.iter().any(|c| c.repair
            == Some(Repair::Delimiter {
                kind: "CreateTrigger".into()
            })));
        assert_eq!(statements(&out).len(), 1);
        assert_eq!(ctx.stats.statements["CreateTrigger"].skipped, 1);
    }

    #[test]
    fn test_versioned_comments_are_admin_comments() {
        let mut ctx = ConversionContext::default();
        let sql = "/*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;\n/*!40103 SET TIME_ZONE='+02:00' */;\n";
        let out = chunks(&MySqlDump, &mut ctx, sql);
        assert!(statements(&out).is_empty());
        assert!(out.iter().all(|c| c.repair == Some(Repair::AdminComment)));
        assert_eq!(ctx.timezone.local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_unparsed_tail_is_fatal() {
        let mut ctx = ConversionContext::default();
        let mut reader =
            DumpReader::open(Box::new(MemorySource::new("test", "CREATE TABLE t (\n  id INT\n"))).unwrap();
        let mut parser = ChunkParser::new(&MySqlDump);
        let err = parser.next_chunk(&mut ctx, &mut reader).unwrap_err();
        match err {
            ImportError::UnparsedTail { lines, line, offset } => {
                assert_eq!(lines, 2);
                assert_eq!(line, 1);
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_copy_block() {
        let mut ctx = ConversionContext::default();
        let sql = "--\n-- Data for Name: users; Type: TABLE DATA; Schema: public\n--\n\nCOPY public.users (id, name) FROM stdin;\n1\talice\n2\t\\N\n\\.\n\nSELECT 1;\n";
        let out = chunks(&PostgresDump, &mut ctx, sql);
        let rows: Vec<&InsertRows> = statements(&out)
            .into_iter()
            .filter_map(|s| match s {
                DumpStatement::Rows(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table, "public.users");
        assert_eq!(rows[0].source, RowSource::Copy);
        assert_eq!(rows[0].rows.len(), 2);
        assert_eq!(rows[0].rows[1][1], RawValue::Null);
    }

    #[test]
    fn test_postgres_boilerplate_is_skipped_or_parsed() {
        let mut ctx = ConversionContext::default();
        let sql = "\\restrict abc\nCREATE EXTENSION IF NOT EXISTS pgcrypto WITH SCHEMA public;\nCREATE FUNCTION f() RETURNS trigger\n    LANGUAGE plpgsql\n    AS $$\nBEGIN\n  RETURN NEW;\nEND;\n$$;\nCREATE TABLE public.t (id integer);\n";
        let out = chunks(&PostgresDump, &mut ctx, sql);
        let creates = statements(&out)
            .into_iter()
            .filter(|s| matches!(s, DumpStatement::Sql(Statement::CreateTable(_))))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn test_insert_decomposition_in_data_mode() {
        let mut ctx = ConversionContext::default();
        ctx.begin_pass(Mode::Data);
        let sql = "INSERT INTO t (a, b) VALUES (1,'x'),(2,'y' +),(3,'w');\n";
        let out = chunks(&MySqlDump, &mut ctx, sql);
        assert_eq!(out[0].repair, Some(Repair::InsertSplit { failed: 1 }));
        assert_eq!(ctx.stats.bad_rows["t"], 1);
        assert_eq!(ctx.stats.bad_row_samples()[0].values, "(2,'y' +)");
        match statements(&out)[0] {
            DumpStatement::Rows(rows) => assert_eq!(rows.rows.len(), 2),
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_kind() {
        let stmts = MySqlDump
            .parse_chunk("CREATE TABLE t (a INT); DROP TABLE t; SELECT 1;")
            .unwrap();
        assert_eq!(statement_kind(&stmts[0]), "CreateStmt");
        assert_eq!(statement_kind(&stmts[1]), "DropStmt");
        assert_eq!(statement_kind(&stmts[2]), "Query");
    }
}

//! Source dialect capability.
//!
//! Everything that differs between MySQL and PostgreSQL dumps sits behind
//! [`DumpDialect`]: which statement parser grammar to use, how declared types
//! map onto target types, how auto-generated columns are carried over, and
//! whether a chunk opens a `COPY` data block. One implementation is picked
//! per run with [`dialect_for`].

mod mysql;
mod postgres;

pub use mysql::MySqlDump;
pub(crate) use mysql::SPATIAL_TYPES;
pub use postgres::PostgresDump;

use crate::context::IssueKind;
use crate::parser::{CopyHeader, Lexical};
use crate::schema::{SourceColumn, SourceType};
use crate::target::TargetType;
use sqlparser::ast::Statement;
use sqlparser::parser::ParserError;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Source SQL dialect of a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    MySql,
    Postgres,
}

impl std::str::FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            _ => Err(format!(
                "Unknown dialect: {}. Valid options: mysql, postgres",
                s
            )),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::MySql => write!(f, "mysql"),
            SqlDialect::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectConfidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy)]
pub struct DialectDetection {
    pub dialect: SqlDialect,
    pub confidence: DialectConfidence,
}

const MYSQL_MARKERS: &[(&str, u32)] = &[
    ("-- MySQL dump", 10),
    ("-- MariaDB dump", 10),
    ("/*!40", 5),
    ("ENGINE=", 3),
    ("LOCK TABLES", 3),
    ("AUTO_INCREMENT", 2),
    ("`", 1),
];

const POSTGRES_MARKERS: &[(&str, u32)] = &[
    ("-- PostgreSQL database dump", 10),
    ("FROM stdin;", 5),
    ("pg_catalog", 4),
    ("SET search_path", 3),
    ("::regclass", 3),
    ("OWNER TO", 2),
    ("$$", 1),
];

/// Guess the dialect from the first bytes of a dump
pub fn detect_dialect(header: &[u8]) -> DialectDetection {
    let text = String::from_utf8_lossy(header);
    let score = |markers: &[(&str, u32)]| -> u32 {
        markers
            .iter()
            .filter(|(m, _)| text.contains(m))
            .map(|(_, w)| w)
            .sum()
    };
    let mysql = score(MYSQL_MARKERS);
    let postgres = score(POSTGRES_MARKERS);

    let (dialect, winner, loser) = if postgres > mysql {
        (SqlDialect::Postgres, postgres, mysql)
    } else {
        (SqlDialect::MySql, mysql, postgres)
    };
    let confidence = if winner >= 10 && loser < winner / 2 {
        DialectConfidence::High
    } else if winner > loser {
        DialectConfidence::Medium
    } else {
        DialectConfidence::Low
    };
    DialectDetection {
        dialect,
        confidence,
    }
}

/// Detect the dialect of a file, decompressing a sample when needed
pub fn detect_dialect_from_file(path: &Path) -> std::io::Result<DialectDetection> {
    let compression = crate::reader::Compression::from_path(path);
    let file = std::fs::File::open(path)?;
    let mut reader = compression.wrap_reader(Box::new(file))?;
    let mut header = vec![0u8; 8192];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    header.truncate(filled);
    Ok(detect_dialect(&header))
}

/// Target type for a source column plus the issues the mapping implies
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMapping {
    pub ty: TargetType,
    pub issues: Vec<IssueKind>,
}

impl TypeMapping {
    pub fn new(ty: TargetType) -> Self {
        Self {
            ty,
            issues: Vec::new(),
        }
    }

    pub fn with(mut self, issue: IssueKind) -> Self {
        self.issues.push(issue);
        self
    }
}

/// How a source column's generated values are reproduced in the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoGenStrategy {
    None,
    /// Draw values from a bit-reversed sequence with this name
    Sequence { name: String },
    /// Call a built-in generator function
    PreDefined(String),
}

pub trait DumpDialect: Send + Sync {
    fn name(&self) -> SqlDialect;

    /// Parse a chunk of dump text into statements
    fn parse_chunk(&self, sql: &str) -> Result<Vec<Statement>, ParserError>;

    /// Map a declared type onto a target type. Total: every input yields a type.
    fn map_type(&self, ty: &SourceType) -> TypeMapping;

    fn auto_gen_strategy(&self, table: &str, column: &SourceColumn) -> AutoGenStrategy;

    /// Recognize a chunk that opens a `COPY ... FROM stdin` data block
    fn copy_header(&self, _chunk: &str) -> Option<CopyHeader> {
        None
    }

    /// Quoting rules for raw-text scanning of chunks
    fn lexical(&self) -> Lexical;
}

pub fn dialect_for(dialect: SqlDialect) -> Box<dyn DumpDialect> {
    match dialect {
        SqlDialect::MySql => Box::new(MySqlDump),
        SqlDialect::Postgres => Box::new(PostgresDump),
    }
}

/// Sequence name for an auto-generated column that did not name one
pub(crate) fn default_sequence_name(table: &str, column: &str) -> String {
    format!("{}_{}_seq", table, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("MariaDB".parse::<SqlDialect>(), Ok(SqlDialect::MySql));
        assert_eq!("postgresql".parse::<SqlDialect>(), Ok(SqlDialect::Postgres));
        assert!("sqlite".parse::<SqlDialect>().is_err());
    }

    #[test]
    fn test_detect_mysql() {
        let header = b"-- MySQL dump 10.13\n/*!40101 SET NAMES utf8 */;\nCREATE TABLE `t` (id int) ENGINE=InnoDB;";
        let result = detect_dialect(header);
        assert_eq!(result.dialect, SqlDialect::MySql);
        assert_eq!(result.confidence, DialectConfidence::High);
    }

    #[test]
    fn test_detect_postgres() {
        let header = b"--\n-- PostgreSQL database dump\n--\nSET search_path = public;\nCOPY public.t (id) FROM stdin;\n";
        let result = detect_dialect(header);
        assert_eq!(result.dialect, SqlDialect::Postgres);
        assert_eq!(result.confidence, DialectConfidence::High);
    }

    #[test]
    fn test_detect_unknown_is_low_confidence() {
        let result = detect_dialect(b"CREATE TABLE t (id int);");
        assert_eq!(result.confidence, DialectConfidence::Low);
    }
}

//! PostgreSQL dumps (`pg_dump` plain format).

use super::mysql::numeric;
use super::{default_sequence_name, AutoGenStrategy, DumpDialect, SqlDialect, TypeMapping};
use crate::context::IssueKind;
use crate::parser::{parse_copy_header, CopyHeader, Lexical};
use crate::schema::{SourceAutoGen, SourceColumn, SourceType};
use crate::target::TargetType;
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser, ParserError};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDump;

impl PostgresDump {
    fn map_scalar(&self, ty: &SourceType) -> TypeMapping {
        use TargetType::*;
        let len = ty.mods.first().copied();
        let widened = |t: TargetType| TypeMapping::new(t).with(IssueKind::Widened);

        match ty.name.as_str() {
            "smallint" | "int2" | "integer" | "int" | "int4" => widened(Int64),
            "smallserial" | "serial2" | "serial" | "serial4" => widened(Int64),
            "bigint" | "int8" | "bigserial" | "serial8" => TypeMapping::new(Int64),
            "real" | "float4" => TypeMapping::new(Float32),
            "float" if len.is_some_and(|p| p <= 24) => TypeMapping::new(Float32),
            "double precision" | "float8" | "float" => TypeMapping::new(Float64),
            "numeric" | "decimal" => numeric(ty),
            "boolean" | "bool" => TypeMapping::new(Bool),
            "character varying" | "varchar" | "character" | "char" | "bpchar" => {
                TypeMapping::new(TargetType::string(len))
            }
            "text" | "citext" | "name" => TypeMapping::new(TargetType::string(None)),
            "bytea" => TypeMapping::new(TargetType::bytes(None)),
            "date" => TypeMapping::new(Date),
            "timestamp" | "timestamp without time zone" => {
                TypeMapping::new(Timestamp).with(IssueKind::Timestamp)
            }
            "timestamptz" | "timestamp with time zone" => TypeMapping::new(Timestamp),
            "time" | "time without time zone" | "time with time zone" | "timetz" | "interval" => {
                TypeMapping::new(TargetType::string(None)).with(IssueKind::Time)
            }
            "json" | "jsonb" => TypeMapping::new(Json),
            "uuid" => TypeMapping::new(TargetType::string(Some(36))),
            _ => TypeMapping::new(TargetType::string(None)).with(IssueKind::NoGoodType),
        }
    }
}

impl DumpDialect for PostgresDump {
    fn name(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn parse_chunk(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        Parser::parse_sql(&PostgreSqlDialect {}, sql)
    }

    fn map_type(&self, ty: &SourceType) -> TypeMapping {
        match ty.array_bounds.len() {
            0 => self.map_scalar(ty),
            1 => {
                let elem = self.map_scalar(ty);
                TypeMapping {
                    ty: TargetType::Array(Box::new(elem.ty)),
                    issues: elem.issues,
                }
            }
            _ => TypeMapping::new(TargetType::string(None))
                .with(IssueKind::ArrayTypeNotSupported),
        }
    }

    fn auto_gen_strategy(&self, table: &str, column: &SourceColumn) -> AutoGenStrategy {
        match &column.auto_gen {
            SourceAutoGen::None => AutoGenStrategy::None,
            SourceAutoGen::Sequence(name) => AutoGenStrategy::Sequence {
                name: name.rsplit('.').next().unwrap_or(name).to_string(),
            },
            SourceAutoGen::AutoIncrement | SourceAutoGen::Identity => AutoGenStrategy::Sequence {
                name: default_sequence_name(table, &column.name),
            },
            SourceAutoGen::Uuid => AutoGenStrategy::PreDefined("GENERATE_UUID".to_string()),
        }
    }

    fn copy_header(&self, chunk: &str) -> Option<CopyHeader> {
        parse_copy_header(chunk)
    }

    fn lexical(&self) -> Lexical {
        Lexical {
            backslash_escapes: false,
            dollar_quotes: true,
        }
    }
}

//! MySQL / MariaDB dumps (`mysqldump`, `mariadb-dump`).

use super::{default_sequence_name, AutoGenStrategy, DumpDialect, SqlDialect, TypeMapping};
use crate::context::IssueKind;
use crate::parser::Lexical;
use crate::schema::{SourceAutoGen, SourceColumn, SourceType};
use crate::target::TargetType;
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::{Parser, ParserError};

/// Largest NUMERIC precision/scale the target holds exactly
pub(crate) const NUMERIC_PRECISION: i64 = 38;
pub(crate) const NUMERIC_SCALE: i64 = 9;

pub(crate) const SPATIAL_TYPES: &[&str] = &[
    "geometry",
    "point",
    "linestring",
    "polygon",
    "multipoint",
    "multilinestring",
    "multipolygon",
    "geometrycollection",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDump;

pub(crate) fn numeric(ty: &SourceType) -> TypeMapping {
    let precision = ty.mods.first().copied().unwrap_or(0);
    let scale = ty.mods.get(1).copied().unwrap_or(0);
    let mapping = TypeMapping::new(TargetType::Numeric);
    if precision > NUMERIC_PRECISION || scale > NUMERIC_SCALE {
        mapping.with(IssueKind::Decimal)
    } else {
        mapping
    }
}

impl DumpDialect for MySqlDump {
    fn name(&self) -> SqlDialect {
        SqlDialect::MySql
    }

    fn parse_chunk(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        Parser::parse_sql(&MySqlDialect {}, sql)
    }

    fn map_type(&self, ty: &SourceType) -> TypeMapping {
        use TargetType::*;
        let len = ty.mods.first().copied();
        let widened = |t: TargetType| TypeMapping::new(t).with(IssueKind::Widened);

        match ty.name.as_str() {
            "bool" | "boolean" => TypeMapping::new(Bool),
            "tinyint" if len == Some(1) => TypeMapping::new(Bool),
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" => widened(Int64),
            "bigint" if ty.unsigned => TypeMapping::new(Int64).with(IssueKind::Unsigned),
            "bigint" => TypeMapping::new(Int64),
            "float" => TypeMapping::new(Float32),
            "double" | "double precision" | "real" => TypeMapping::new(Float64),
            "decimal" | "numeric" | "dec" | "fixed" => numeric(ty),
            "bit" => TypeMapping::new(TargetType::bytes(None)),
            "date" => TypeMapping::new(Date),
            "datetime" => TypeMapping::new(Timestamp).with(IssueKind::Datetime),
            "timestamp" => TypeMapping::new(Timestamp),
            "time" | "year" => TypeMapping::new(TargetType::string(None)).with(IssueKind::Time),
            "char" | "varchar" | "character" | "character varying" | "nchar" | "nvarchar"
            | "national char" | "national varchar" => TypeMapping::new(TargetType::string(len)),
            "tinytext" | "text" | "mediumtext" | "longtext" => {
                TypeMapping::new(TargetType::string(None))
            }
            "json" => TypeMapping::new(Json),
            "binary" | "varbinary" => TypeMapping::new(TargetType::bytes(len)),
            "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                TypeMapping::new(TargetType::bytes(None))
            }
            "enum" => TypeMapping::new(TargetType::string(None)),
            "set" => TypeMapping::new(Array(Box::new(TargetType::string(None)))),
            name if SPATIAL_TYPES.contains(&name) => {
                TypeMapping::new(TargetType::string(None)).with(IssueKind::Spatial)
            }
            _ => TypeMapping::new(TargetType::string(None)).with(IssueKind::NoGoodType),
        }
    }

    fn auto_gen_strategy(&self, table: &str, column: &SourceColumn) -> AutoGenStrategy {
        match &column.auto_gen {
            SourceAutoGen::None => AutoGenStrategy::None,
            SourceAutoGen::AutoIncrement | SourceAutoGen::Identity => AutoGenStrategy::Sequence {
                name: default_sequence_name(table, &column.name),
            },
            SourceAutoGen::Sequence(name) => AutoGenStrategy::Sequence { name: name.clone() },
            SourceAutoGen::Uuid => AutoGenStrategy::PreDefined("GENERATE_UUID".to_string()),
        }
    }

    fn lexical(&self) -> Lexical {
        Lexical {
            backslash_escapes: true,
            dollar_quotes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_type_text, ColumnId};
    use crate::target::Length;

    fn map(text: &str) -> TypeMapping {
        MySqlDump.map_type(&parse_type_text(text).0)
    }

    #[test]
    fn test_integer_widths_are_widened() {
        let m = map("INT(11)");
        assert_eq!(m.ty, TargetType::Int64);
        assert_eq!(m.issues, vec![IssueKind::Widened]);
        assert!(map("BIGINT").issues.is_empty());
        assert_eq!(map("BIGINT UNSIGNED").issues, vec![IssueKind::Unsigned]);
    }

    #[test]
    fn test_tinyint_one_is_bool() {
        assert_eq!(map("TINYINT(1)").ty, TargetType::Bool);
        assert_eq!(map("TINYINT(4)").ty, TargetType::Int64);
    }

    #[test]
    fn test_strings_and_bytes() {
        assert_eq!(map("VARCHAR(40)").ty, TargetType::String(Length::Fixed(40)));
        assert_eq!(map("LONGTEXT").ty, TargetType::String(Length::Max));
        assert_eq!(map("VARBINARY(16)").ty, TargetType::Bytes(Length::Fixed(16)));
        assert_eq!(
            map("SET('a', 'b')").ty,
            TargetType::Array(Box::new(TargetType::String(Length::Max)))
        );
    }

    #[test]
    fn test_lossy_mappings_record_issues() {
        assert_eq!(map("DATETIME(6)").issues, vec![IssueKind::Datetime]);
        assert_eq!(map("DECIMAL(65,30)").issues, vec![IssueKind::Decimal]);
        assert!(map("DECIMAL(10,2)").issues.is_empty());
        assert_eq!(map("POINT").issues, vec![IssueKind::Spatial]);
        assert_eq!(map("YEAR").issues, vec![IssueKind::Time]);
        assert_eq!(map("MYSTERY").issues, vec![IssueKind::NoGoodType]);
    }

    #[test]
    fn test_auto_increment_uses_sequence() {
        let mut col = SourceColumn::new(ColumnId(1), "id", SourceType::default());
        col.auto_gen = SourceAutoGen::AutoIncrement;
        assert_eq!(
            MySqlDump.auto_gen_strategy("users", &col),
            AutoGenStrategy::Sequence {
                name: "users_id_seq".into()
            }
        );
    }
}

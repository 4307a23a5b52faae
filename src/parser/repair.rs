//! Chunk repair heuristics.
//!
//! Dumps contain plenty the statement parser rejects: stored routine bodies
//! between `DELIMITER` directives, ownership and permission boilerplate,
//! spatial column types, and INSERTs with one bad literal among thousands of
//! good tuples. These helpers recognize such chunks from their text so the
//! adapter can skip or rewrite them.

use super::copy::strip_leading_comments;
use crate::dialect::SPATIAL_TYPES;
use chrono::FixedOffset;
use once_cell::sync::Lazy;
use regex::Regex;

/// What the adapter did to get a chunk through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repair {
    /// Chunk was only comments and produced nothing
    AdminComment,
    /// Stored routine between `DELIMITER` directives was skipped
    Delimiter { kind: String },
    /// Server-side object or dump boilerplate was skipped
    Unsupported { kind: String },
    /// Multi-row INSERT was re-parsed one tuple at a time
    InsertSplit { failed: usize },
    /// Spatial types were rewritten as text
    Spatial,
}

static DELIMITER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*DELIMITER\s+(\S+)\s*$").unwrap());

static ROUTINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(CREATE|DROP)\s+(?:OR\s+REPLACE\s+)?(?:DEFINER\s*=\s*\S+\s+)?(?:SQL\s+SECURITY\s+\w+\s+)?(PROCEDURE|FUNCTION|TRIGGER|EVENT)\b").unwrap()
});

static ROUTINE_IN_REGION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\b(CREATE|DROP)\b.*?\b(PROCEDURE|FUNCTION|TRIGGER|EVENT)\b").unwrap()
});

static BOILERPLATE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)^ALTER\s+\w+(?:\s+\w+)?\s+\S+\s+OWNER\s+TO\b", "AlterOwner"),
        (r"(?i)^CREATE\s+EXTENSION\b", "CreateExtension"),
        (r"(?i)^COMMENT\s+ON\b", "CommentOn"),
        (r"(?i)^GRANT\b", "Grant"),
        (r"(?i)^REVOKE\b", "Revoke"),
        (r"(?i)^ALTER\s+SEQUENCE\b", "AlterSequence"),
        (r"(?i)^CREATE\s+SEQUENCE\b", "CreateSequence"),
        (r"(?i)^CREATE\s+(?:OR\s+REPLACE\s+)?(?:MATERIALIZED\s+)?VIEW\b", "CreateView"),
        (r"(?i)^CREATE\s+SCHEMA\b", "CreateSchema"),
        (r"(?i)^CREATE\s+TYPE\b", "CreateType"),
        (r"(?i)^CREATE\s+(?:DOMAIN|AGGREGATE|OPERATOR|CAST|RULE|POLICY)\b", "CreateOther"),
        (r"(?i)^SELECT\s+pg_catalog\.", "SelectPgCatalog"),
        (r"(?i)^(?:UN)?LOCK\s+TABLES?\b", "LockTables"),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).unwrap(), kind))
    .collect()
});

static INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^(?:INSERT|REPLACE)\s+(?:(?:LOW_PRIORITY|DELAYED|HIGH_PRIORITY|IGNORE)\s+)*(?:INTO\s+)?((?:[`"]?[^\s`".(]+[`"]?\.)?[`"]?[^\s`"(]+[`"]?)"#).unwrap()
});

static DDL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:CREATE|ALTER)\s+TABLE\b").unwrap());

static SPATIAL_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    let names = SPATIAL_TYPES.join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", names)).unwrap()
});

static SPATIAL_KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSPATIAL\s+(KEY|INDEX)\b").unwrap());

static SRID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+SRID\s+\d+").unwrap());

static TIME_ZONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/\*!\d*\s*SET\s+TIME_ZONE\s*=\s*'([^']*)'\s*\*/").unwrap()
});

static OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-])(\d{1,2}):(\d{2})$").unwrap());

/// `DELIMITER` directive on a single line; returns the new delimiter
pub fn delimiter_directive(line: &str) -> Option<&str> {
    DELIMITER_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// psql meta-command line (`\connect db`, `\restrict key`)
pub fn is_meta_command(line: &str) -> bool {
    line.starts_with('\\')
}

/// Kind of the stored routine defined in a skipped `DELIMITER` region
pub fn routine_kind(region: &str) -> String {
    ROUTINE_IN_REGION_RE
        .captures(region)
        .map(|c| camel(&[&c[1], &c[2]]))
        .unwrap_or_else(|| "Routine".to_string())
}

/// Statement kind if the chunk is a server-side object or dump boilerplate
/// the import skips.
pub fn unsupported_object(chunk: &str) -> Option<String> {
    let stmt = strip_leading_comments(chunk);
    if let Some(c) = ROUTINE_RE.captures(stmt) {
        return Some(camel(&[&c[1], &c[2]]));
    }
    BOILERPLATE
        .iter()
        .find(|(re, _)| re.is_match(stmt))
        .map(|(_, kind)| kind.to_string())
}

/// Table name of an INSERT chunk, quotes removed
pub fn insert_table(chunk: &str) -> Option<String> {
    let stmt = strip_leading_comments(chunk);
    let caps = INSERT_RE.captures(stmt)?;
    Some(caps[1].replace(['`', '"'], ""))
}

/// Rewrite spatial types in a CREATE/ALTER TABLE chunk as `text`.
///
/// Returns `None` if the chunk is not DDL or has nothing to rewrite.
pub fn rewrite_spatial(chunk: &str) -> Option<String> {
    if !DDL_RE.is_match(strip_leading_comments(chunk)) {
        return None;
    }

    let bytes = chunk.as_bytes();
    let mut out = String::with_capacity(chunk.len());
    let mut last = 0;
    for m in SPATIAL_TYPE_RE.find_iter(chunk) {
        let quoted_before = m.start() > 0 && matches!(bytes[m.start() - 1], b'`' | b'"' | b'\'');
        let quoted_after = matches!(bytes.get(m.end()), Some(b'`' | b'"' | b'\''));
        if quoted_before || quoted_after {
            continue;
        }
        out.push_str(&chunk[last..m.start()]);
        out.push_str("text");
        last = m.end();
    }
    out.push_str(&chunk[last..]);

    let out = SPATIAL_KEYWORD_RE.replace_all(&out, "$1");
    let out = SRID_RE.replace_all(&out, "");
    if out == chunk {
        None
    } else {
        Some(out.into_owned())
    }
}

/// Offset set by a versioned `/*!40103 SET TIME_ZONE='+00:00' */` comment
pub fn session_time_zone(chunk: &str) -> Option<Result<FixedOffset, String>> {
    let caps = TIME_ZONE_RE.captures(chunk)?;
    Some(parse_time_zone(&caps[1]))
}

/// Parse `+hh:mm`, `-hh:mm`, `UTC` or `Z`
pub fn parse_time_zone(value: &str) -> Result<FixedOffset, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid offset".to_string());
    }
    let caps = OFFSET_RE
        .captures(value)
        .ok_or_else(|| format!("unsupported time zone '{}'", value))?;
    let hours: i32 = caps[2].parse().map_err(|_| format!("bad hours in '{}'", value))?;
    let minutes: i32 = caps[3].parse().map_err(|_| format!("bad minutes in '{}'", value))?;
    let secs = (hours * 3600 + minutes * 60) * if &caps[1] == "-" { -1 } else { 1 };
    FixedOffset::east_opt(secs).ok_or_else(|| format!("time zone '{}' out of range", value))
}

fn camel(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiter_directive() {
        assert_eq!(delimiter_directive("DELIMITER ;;\n"), Some(";;"));
        assert_eq!(delimiter_directive("delimiter $$"), Some("$$"));
        assert_eq!(delimiter_directive("SELECT 'DELIMITER ;;';"), None);
    }

    #[test]
    fn test_unsupported_objects() {
        assert_eq!(
            unsupported_object("CREATE DEFINER=`root`@`%` PROCEDURE p() BEGIN END;").as_deref(),
            Some("CreateProcedure")
        );
        assert_eq!(
            unsupported_object("-- x\nDROP TRIGGER IF EXISTS trg;").as_deref(),
            Some("DropTrigger")
        );
        assert_eq!(
            unsupported_object("ALTER TABLE public.users OWNER TO postgres;").as_deref(),
            Some("AlterOwner")
        );
        assert_eq!(
            unsupported_object("CREATE EXTENSION IF NOT EXISTS pgcrypto;").as_deref(),
            Some("CreateExtension")
        );
        assert_eq!(unsupported_object("CREATE TABLE t (id int);"), None);
    }

    #[test]
    fn test_routine_kind_through_versioned_comments() {
        let region = "/*!50003 CREATE*/ /*!50017 DEFINER=`root`@`localhost`*/ /*!50003 TRIGGER trg BEFORE INSERT ON t FOR EACH ROW SET NEW.a = 1 */;;\n";
        assert_eq!(routine_kind(region), "CreateTrigger");
        assert_eq!(routine_kind("BEGIN END"), "Routine");
    }

    #[test]
    fn test_insert_table() {
        assert_eq!(insert_table("INSERT INTO `users` VALUES (1);").as_deref(), Some("users"));
        assert_eq!(
            insert_table("INSERT IGNORE INTO `db`.`users` (id) VALUES (1);").as_deref(),
            Some("db.users")
        );
        assert_eq!(insert_table("CREATE TABLE t (id int);"), None);
    }

    #[test]
    fn test_rewrite_spatial() {
        let sql = "CREATE TABLE `places` (\n  `point` POINT NOT NULL SRID 4326,\n  `area` polygon,\n  SPATIAL KEY `idx` (`point`)\n);";
        let out = rewrite_spatial(sql).unwrap();
        assert_eq!(
            out,
            "CREATE TABLE `places` (\n  `point` text NOT NULL,\n  `area` text,\n  KEY `idx` (`point`)\n);"
        );
        assert!(rewrite_spatial("CREATE TABLE t (id int);").is_none());
        assert!(rewrite_spatial("INSERT INTO t VALUES (POINT(1,2));").is_none());
    }

    #[test]
    fn test_session_time_zone() {
        let chunk = "/*!40103 SET TIME_ZONE='+05:30' */;\n";
        let offset = session_time_zone(chunk).unwrap().unwrap();
        assert_eq!(offset.local_minus_utc(), 5 * 3600 + 30 * 60);
        assert!(session_time_zone("SET NAMES utf8;").is_none());
        assert_eq!(parse_time_zone("-08:00").unwrap().local_minus_utc(), -8 * 3600);
        assert!(parse_time_zone("Europe/Oslo").is_err());
    }
}

//! PostgreSQL `COPY ... FROM stdin` blocks.
//!
//! Handles:
//! - Header recognition (`COPY [ONLY] [schema.]table [(cols)] FROM stdin;`)
//! - Tab-separated value splitting
//! - NULL handling (`\N`)
//! - Escape sequence decoding (`\t`, `\n`, `\\`, octal, ...)

use super::values::RawValue;
use memchr::memchr_iter;
use once_cell::sync::Lazy;
use regex::Regex;

/// Line that ends a COPY data block
pub const COPY_TERMINATOR: &str = "\\.";

/// Result of parsing a COPY header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyHeader {
    /// Schema name (e.g., "public")
    pub schema: Option<String>,
    pub table: String,
    /// Column list (empty if not specified)
    pub columns: Vec<String>,
}

static RE_COPY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^\s*COPY\s+(?:ONLY\s+)?(?:"?(\w+)"?\.)?"?(\w+)"?\s*(?:\(([^)]*)\))?\s+FROM\s+stdin"#,
    )
    .unwrap()
});

/// Parse a COPY header to extract table and columns
pub fn parse_copy_header(stmt: &str) -> Option<CopyHeader> {
    let stmt = strip_leading_comments(stmt);
    let caps = RE_COPY.captures(stmt)?;

    let schema = caps.get(1).map(|m| m.as_str().to_string());
    let table = caps.get(2)?.as_str().to_string();
    let columns = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|c| c.trim().trim_matches('"').to_string())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(CopyHeader {
        schema,
        table,
        columns,
    })
}

/// Strip leading SQL comments from a string
pub(crate) fn strip_leading_comments(stmt: &str) -> &str {
    let mut rest = stmt.trim_start();
    loop {
        if rest.starts_with("--") {
            match rest.find('\n') {
                Some(pos) => rest = rest[pos + 1..].trim_start(),
                None => return "",
            }
        } else if rest.starts_with("/*") {
            match rest.find("*/") {
                Some(pos) => rest = rest[pos + 2..].trim_start(),
                None => return "",
            }
        } else {
            return rest;
        }
    }
}

/// True for the `\.` line that ends a data block
pub fn is_terminator(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']) == COPY_TERMINATOR
}

/// Split one data line into values
pub fn parse_copy_line(line: &str) -> Vec<RawValue> {
    let line = line.trim_end_matches(['\n', '\r']).as_bytes();
    let mut values = Vec::new();
    let mut start = 0;
    for tab in memchr_iter(b'\t', line) {
        values.push(parse_value(&line[start..tab]));
        start = tab + 1;
    }
    values.push(parse_value(&line[start..]));
    values
}

fn parse_value(value: &[u8]) -> RawValue {
    if value == b"\\N" {
        return RawValue::Null;
    }
    RawValue::Text(decode_escapes(value))
}

/// Decode PostgreSQL COPY escape sequences
fn decode_escapes(value: &[u8]) -> String {
    if !value.contains(&b'\\') {
        return String::from_utf8_lossy(value).into_owned();
    }

    let mut out = Vec::with_capacity(value.len());
    let mut i = 0;
    while i < value.len() {
        if value[i] != b'\\' || i + 1 >= value.len() {
            out.push(value[i]);
            i += 1;
            continue;
        }
        let next = value[i + 1];
        let decoded = match next {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'b' => 0x08,
            b'f' => 0x0C,
            b'v' => 0x0B,
            b'\\' => b'\\',
            b'0'..=b'7' => {
                let mut n: u32 = 0;
                let mut consumed = 0;
                while consumed < 3 && i + 1 + consumed < value.len() {
                    let d = value[i + 1 + consumed];
                    if !(b'0'..=b'7').contains(&d) {
                        break;
                    }
                    n = n * 8 + u32::from(d - b'0');
                    consumed += 1;
                }
                out.push((n & 0xFF) as u8);
                i += 1 + consumed;
                continue;
            }
            // Unknown escape: the character stands for itself
            other => other,
        };
        out.push(decoded);
        i += 2;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_copy_header_simple() {
        let parsed = parse_copy_header("COPY users (id, name, email) FROM stdin;").unwrap();
        assert_eq!(parsed.table, "users");
        assert_eq!(parsed.columns, vec!["id", "name", "email"]);
        assert!(parsed.schema.is_none());
    }

    #[test]
    fn test_parse_copy_header_quoted_with_schema() {
        let parsed = parse_copy_header(r#"COPY "public"."my_table" ("id", "name") FROM stdin;"#).unwrap();
        assert_eq!(parsed.schema.as_deref(), Some("public"));
        assert_eq!(parsed.table, "my_table");
        assert_eq!(parsed.columns, vec!["id", "name"]);
    }

    #[test]
    fn test_parse_copy_header_after_comments() {
        let parsed = parse_copy_header("--\n-- Data for table\n--\nCOPY users (id) FROM stdin;").unwrap();
        assert_eq!(parsed.table, "users");
    }

    #[test]
    fn test_not_a_copy_header() {
        assert!(parse_copy_header("COPY users TO '/tmp/x.csv';").is_none());
        assert!(parse_copy_header("INSERT INTO users VALUES (1);").is_none());
    }

    #[test]
    fn test_nulls_and_escapes() {
        let values = parse_copy_line("1\t\\N\thello\\tworld\\n\tcaf\\303\\251\n");
        assert_eq!(
            values,
            vec![
                RawValue::Text("1".into()),
                RawValue::Null,
                RawValue::Text("hello\tworld\n".into()),
                RawValue::Text("café".into()),
            ]
        );
    }

    #[test]
    fn test_empty_trailing_field() {
        let values = parse_copy_line("a\t\n");
        assert_eq!(values, vec![RawValue::Text("a".into()), RawValue::Text(String::new())]);
    }

    #[test]
    fn test_terminator() {
        assert!(is_terminator("\\.\n"));
        assert!(is_terminator("\\.\r\n"));
        assert!(!is_terminator("\\.x\n"));
    }
}

//! Quote-aware scanning of raw statement text.
//!
//! Used where the statement parser cannot help: deciding whether a chunk
//! holds a complete statement, and splitting a multi-row INSERT that failed
//! to parse into its individual value tuples.

/// Lexical rules that differ between dialects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lexical {
    /// `\'` escapes a quote inside a string (MySQL)
    pub backslash_escapes: bool,
    /// `$tag$ ... $tag$` quoting (PostgreSQL)
    pub dollar_quotes: bool,
}

/// Iterates over the bytes of a statement that are SQL syntax, skipping
/// string literals, quoted identifiers and comments.
pub struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    lex: Lexical,
    open: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str, lex: Lexical) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
            lex,
            open: false,
        }
    }

    /// True once the scan ran off the end inside a quote or block comment
    pub fn unterminated(&self) -> bool {
        self.open
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_quoted(&mut self, quote: u8) {
        self.pos += 1;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b == b'\\' && self.lex.backslash_escapes && quote != b'`' {
                self.pos += 2;
                continue;
            }
            self.pos += 1;
            if b == quote {
                // Doubled quote stands for itself
                if self.peek(0) == Some(quote) {
                    self.pos += 1;
                    continue;
                }
                return;
            }
        }
        self.open = true;
    }

    fn skip_line(&mut self) {
        match memchr::memchr(b'\n', &self.bytes[self.pos..]) {
            Some(n) => self.pos += n + 1,
            None => self.pos = self.bytes.len(),
        }
    }

    fn skip_block_comment(&mut self) {
        let rest = &self.bytes[self.pos + 2..];
        match memchr::memmem::find(rest, b"*/") {
            Some(n) => self.pos += 2 + n + 2,
            None => {
                self.pos = self.bytes.len();
                self.open = true;
            }
        }
    }

    /// Skip a dollar-quoted body if one starts here; false if `$` is not a tag
    fn skip_dollar_quoted(&mut self) -> bool {
        let rest = &self.bytes[self.pos + 1..];
        let Some(len) = rest
            .iter()
            .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
        else {
            return false;
        };
        if rest[len] != b'$' || rest.first().is_some_and(u8::is_ascii_digit) {
            return false;
        }
        let tag_end = self.pos + 1 + len + 1;
        let tag = &self.bytes[self.pos..tag_end];
        match memchr::memmem::find(&self.bytes[tag_end..], tag) {
            Some(n) => self.pos = tag_end + n + tag.len(),
            None => {
                self.pos = self.bytes.len();
                self.open = true;
            }
        }
        true
    }
}

impl Iterator for Scanner<'_> {
    type Item = (usize, u8);

    fn next(&mut self) -> Option<(usize, u8)> {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            match b {
                b'\'' | b'"' | b'`' => self.skip_quoted(b),
                b'-' if self.peek(1) == Some(b'-') => self.skip_line(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment(),
                b'$' if self.lex.dollar_quotes && self.skip_dollar_quoted() => {}
                _ => {
                    self.pos += 1;
                    return Some((self.pos - 1, b));
                }
            }
        }
        None
    }
}

/// True if the chunk ends with a `;` that is outside quotes and comments
pub fn is_complete(text: &str, lex: Lexical) -> bool {
    let mut scanner = Scanner::new(text, lex);
    let last = scanner
        .by_ref()
        .filter(|(_, b)| !b.is_ascii_whitespace())
        .last();
    !scanner.unterminated() && matches!(last, Some((_, b';')))
}

/// True if the chunk has no syntax besides comments and terminators
pub fn is_comment_only(text: &str, lex: Lexical) -> bool {
    let mut scanner = Scanner::new(text, lex);
    let only = scanner
        .by_ref()
        .all(|(_, b)| b.is_ascii_whitespace() || b == b';');
    only && !scanner.unterminated()
}

/// A multi-row INSERT split at its value tuples
#[derive(Debug, PartialEq, Eq)]
pub struct SplitInsert<'a> {
    /// Everything up to and including `VALUES`
    pub prefix: &'a str,
    /// Each `( ... )` tuple, parentheses included
    pub tuples: Vec<&'a str>,
}

/// Split `INSERT INTO t (...) VALUES (...), (...);` into its tuples.
///
/// Returns `None` when there is no top-level `VALUES` keyword.
pub fn split_insert(stmt: &str, lex: Lexical) -> Option<SplitInsert<'_>> {
    let values_end = find_values_keyword(stmt, lex)?;
    let body = &stmt[values_end..];

    let mut tuples = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, b) in Scanner::new(body, lex) {
        match b {
            b'(' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    tuples.push(&body[start..=i]);
                }
            }
            b';' if depth == 0 => break,
            _ => {}
        }
    }

    Some(SplitInsert {
        prefix: stmt[..values_end].trim(),
        tuples,
    })
}

/// Byte offset just past the first top-level `VALUES` keyword
fn find_values_keyword(stmt: &str, lex: Lexical) -> Option<usize> {
    let bytes = stmt.as_bytes();
    let mut depth = 0usize;
    for (i, b) in Scanner::new(stmt, lex) {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'v' | b'V' if depth == 0 => {
                let end = i + 6;
                let word_start = i == 0 || !is_ident_byte(bytes[i - 1]);
                let word_end = bytes.get(end).map_or(true, |b| !is_ident_byte(*b));
                if end <= bytes.len()
                    && word_start
                    && word_end
                    && bytes[i..end].eq_ignore_ascii_case(b"VALUES")
                {
                    return Some(end);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    const MYSQL: Lexical = Lexical {
        backslash_escapes: true,
        dollar_quotes: false,
    };
    const PG: Lexical = Lexical {
        backslash_escapes: false,
        dollar_quotes: true,
    };

    #[test]
    fn test_split_respects_quotes() {
        let sql = "INSERT INTO t (a, b) VALUES (1,'x, (y)'),(2,'it\\'s'), (3, 'z');";
        let split = split_insert(sql, MYSQL).unwrap();
        assert_eq!(split.prefix, "INSERT INTO t (a, b) VALUES");
        assert_eq!(split.tuples, vec!["(1,'x, (y)')", "(2,'it\\'s')", "(3, 'z')"]);
    }

    #[test]
    fn test_split_nested_parens() {
        let sql = "INSERT INTO t VALUES (1, POINT(1, 2)), (2, NULL);";
        let split = split_insert(sql, MYSQL).unwrap();
        assert_eq!(split.tuples, vec!["(1, POINT(1, 2))", "(2, NULL)"]);
    }

    #[test]
    fn test_values_inside_identifier_is_not_keyword() {
        let sql = "INSERT INTO `values_log` (`values`) VALUES (1);";
        let split = split_insert(sql, MYSQL).unwrap();
        assert_eq!(split.prefix, "INSERT INTO `values_log` (`values`) VALUES");
        assert_eq!(split.tuples, vec!["(1)"]);
    }

    #[test]
    fn test_no_values_keyword() {
        assert!(split_insert("INSERT INTO t SELECT * FROM u;", MYSQL).is_none());
    }

    #[test]
    fn test_is_complete() {
        assert!(is_complete("CREATE TABLE t (id int);\n", MYSQL));
        assert!(is_complete("SELECT 1; -- trailing comment\n", MYSQL));
        assert!(!is_complete("INSERT INTO t VALUES ('a;\n", MYSQL));
        assert!(!is_complete("CREATE TABLE t (\n", MYSQL));
    }

    #[test]
    fn test_backslash_is_literal_in_postgres() {
        assert!(is_complete("INSERT INTO t VALUES ('C:\\');\n", PG));
        assert!(!is_complete("INSERT INTO t VALUES ('C:\\');\n", MYSQL));
    }

    #[test]
    fn test_dollar_quoted_body() {
        let open = "CREATE FUNCTION f() RETURNS int AS $body$\nBEGIN\n  RETURN 1;\n";
        assert!(!is_complete(open, PG));
        let closed = format!("{}END;\n$body$ LANGUAGE plpgsql;\n", open);
        assert!(is_complete(&closed, PG));
    }

    #[test]
    fn test_comment_only() {
        assert!(is_comment_only("/*!40101 SET NAMES utf8 */;\n", MYSQL));
        assert!(is_comment_only("-- Don't edit\n", MYSQL));
        assert!(!is_comment_only("SET NAMES utf8;\n", MYSQL));
        assert!(!is_comment_only("/* still open;\n", MYSQL));
    }
}

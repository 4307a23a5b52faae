//! Sub-parser for declared column type text.
//!
//! The statement parser gives us the type as text (`VARCHAR(40)`,
//! `DECIMAL(10,2) UNSIGNED`, `ENUM('a','b')`, `INTEGER[]`); this splits it
//! into a base name, numeric modifiers and array bounds.

use super::SourceType;

/// Parse declared type text. Returns the type plus any problems found while
/// reading modifiers; problems are not fatal.
pub fn parse_type_text(text: &str) -> (SourceType, Vec<String>) {
    let mut problems = Vec::new();
    let mut s = text.trim().to_lowercase();

    // Trailing array dimensions: `int[]`, `text[3][]`
    let mut array_bounds = Vec::new();
    while s.ends_with(']') {
        let Some(open) = s.rfind('[') else { break };
        let inner = s[open + 1..s.len() - 1].trim();
        let bound = if inner.is_empty() {
            -1
        } else {
            inner.parse::<i64>().unwrap_or_else(|_| {
                problems.push(format!("unable to parse array bound '{}' in type '{}'", inner, text));
                -1
            })
        };
        array_bounds.insert(0, bound);
        s.truncate(open);
        s = s.trim_end().to_string();
    }

    let (head, inner, tail) = match split_parens(&s) {
        Some((open, close)) => (&s[..open], Some(&s[open + 1..close]), &s[close + 1..]),
        None => (s.as_str(), None, ""),
    };

    let mut unsigned = false;
    let words: Vec<&str> = head
        .split_whitespace()
        .chain(tail.split_whitespace())
        .filter(|w| match *w {
            "unsigned" => {
                unsigned = true;
                false
            }
            "signed" | "zerofill" => false,
            _ => true,
        })
        .collect();

    // `char(10) binary` is a collation hint, not a type of its own
    let words: Vec<&str> = if words.len() > 1 && words.last() == Some(&"binary") {
        words[..words.len() - 1].to_vec()
    } else {
        words
    };
    let name = words.join(" ");

    let mut mods = Vec::new();
    if let Some(inner) = inner {
        if name == "set" || name == "enum" {
            let members = split_members(inner);
            if name == "set" {
                array_bounds = vec![members.len() as i64];
            }
        } else {
            for part in inner.split(',') {
                let part = part.trim();
                match part.parse::<i64>() {
                    Ok(n) => mods.push(n),
                    Err(_) => {
                        problems.push(format!("unable to parse type modifier '{}' in type '{}'", part, text));
                    }
                }
            }
        }
    }

    (
        SourceType {
            name,
            mods,
            array_bounds,
            unsigned,
        },
        problems,
    )
}

/// Byte positions of the first top-level parenthesized group.
fn split_parens(s: &str) -> Option<(usize, usize)> {
    let open = s.find('(')?;
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, ch) in s[open..].char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Some((open, open + i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `'a','b,c'` into its quoted members.
pub fn split_members(inner: &str) -> Vec<String> {
    let mut members = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = inner.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if in_quote && chars.peek() == Some(&'\'') => {
                current.push('\'');
                chars.next();
            }
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                members.push(std::mem::take(&mut current));
            }
            c if in_quote => current.push(c),
            _ => {}
        }
    }
    if !current.is_empty() || !members.is_empty() {
        members.push(current);
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_modified_types() {
        let (t, p) = parse_type_text("VARCHAR(40)");
        assert!(p.is_empty());
        assert_eq!(t.name, "varchar");
        assert_eq!(t.mods, vec![40]);

        let (t, _) = parse_type_text("DECIMAL(10,2) UNSIGNED");
        assert_eq!(t.name, "decimal");
        assert_eq!(t.mods, vec![10, 2]);
        assert!(t.unsigned);

        let (t, _) = parse_type_text("TIMESTAMP(6) WITHOUT TIME ZONE");
        assert_eq!(t.name, "timestamp without time zone");
        assert_eq!(t.mods, vec![6]);
    }

    #[test]
    fn test_enum_and_set_members_are_not_lengths() {
        let (t, p) = parse_type_text("ENUM('a', 'b,c')");
        assert!(p.is_empty());
        assert_eq!(t.name, "enum");
        assert!(t.mods.is_empty());

        let (t, _) = parse_type_text("SET('x','y','z')");
        assert_eq!(t.name, "set");
        assert_eq!(t.array_bounds, vec![3]);
    }

    #[test]
    fn test_arrays() {
        let (t, _) = parse_type_text("INTEGER[]");
        assert_eq!(t.name, "integer");
        assert_eq!(t.array_bounds, vec![-1]);

        let (t, _) = parse_type_text("text[3][]");
        assert_eq!(t.array_bounds, vec![3, -1]);
    }

    #[test]
    fn test_binary_suffix_and_bad_modifier() {
        let (t, _) = parse_type_text("char(10) binary");
        assert_eq!(t.name, "char");

        let (t, p) = parse_type_text("varchar(max)");
        assert_eq!(t.name, "varchar");
        assert!(t.mods.is_empty());
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_split_members_handles_escaped_quotes() {
        assert_eq!(split_members("'it''s','b'"), vec!["it's", "b"]);
    }
}

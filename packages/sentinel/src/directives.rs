//! # Directive Processor
//!
//! The encoding side of the directive processor: how one body line is
//! interpreted (`@others`, `@all`, section references, doc parts, raw blocks,
//! pragmas, plain code), how section names resolve against ancestor scopes,
//! and how indentation is added and removed.
//!
//! The decoding side lives in the reader's scanner, which runs the same
//! rules backwards over sentinel lines.

use crate::grammar::DocKind;
use crate::options::SectionPolicy;

/// Directives written as `@@` pragma sentinels. Any other `@word` line is
/// plain code.
pub const KNOWN_DIRECTIVES: &[&str] = &[
    "beautify",
    "c",
    "code",
    "color",
    "comment",
    "encoding",
    "end_raw",
    "first",
    "ignore",
    "killbeautify",
    "killcolor",
    "language",
    "last",
    "lineending",
    "nocolor",
    "nocolor-node",
    "nosearch",
    "nowrap",
    "pagewidth",
    "path",
    "raw",
    "tabs",
    "tabwidth",
    "unit",
    "wrap",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLine<'a> {
    Plain,
    Others {
        indent: &'a str,
    },
    All {
        indent: &'a str,
    },
    /// `<<name>>` preceded only by whitespace; `after` is the rest of the line
    SectionRef {
        indent: &'a str,
        name: &'a str,
        after: &'a str,
    },
    DocStart {
        kind: DocKind,
        follow: &'a str,
    },
    /// `@c` or `@code`
    CodeStart {
        name: &'a str,
        value: &'a str,
    },
    RawStart {
        value: &'a str,
    },
    RawEnd {
        value: &'a str,
    },
    Directive {
        name: &'a str,
        value: &'a str,
    },
}

pub fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

/// Interpret one body line
pub fn classify_body_line(line: &str) -> BodyLine<'_> {
    let indent = leading_whitespace(line);
    let rest = &line[indent.len()..];

    if rest == "@others" {
        return BodyLine::Others { indent };
    }
    if rest == "@all" {
        return BodyLine::All { indent };
    }
    if let Some(inner) = rest.strip_prefix("<<") {
        if let Some(end) = inner.find(">>") {
            if end > 0 {
                return BodyLine::SectionRef {
                    indent,
                    name: &inner[..end],
                    after: &inner[end + 2..],
                };
            }
        }
    }
    if !indent.is_empty() {
        return BodyLine::Plain;
    }

    let Some(after_at) = line.strip_prefix('@') else {
        return BodyLine::Plain;
    };
    if after_at.is_empty() || after_at.starts_with([' ', '\t']) {
        return BodyLine::DocStart {
            kind: DocKind::At,
            follow: after_at,
        };
    }

    let word_len = after_at
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(after_at.len());
    let (name, value) = after_at.split_at(word_len);
    if !(value.is_empty() || value.starts_with(char::is_whitespace)) {
        return BodyLine::Plain;
    }

    match name {
        "doc" => BodyLine::DocStart {
            kind: DocKind::Doc,
            follow: value,
        },
        "c" | "code" => BodyLine::CodeStart { name, value },
        "raw" => BodyLine::RawStart { value },
        "end_raw" => BodyLine::RawEnd { value },
        _ if KNOWN_DIRECTIVES.contains(&name) => BodyLine::Directive { name, value },
        _ => BodyLine::Plain,
    }
}

/// Does a headline define the section `name`? Both `<<name>>` and a bare
/// `name` headline qualify; surrounding whitespace is ignored.
pub fn section_matches(headline: &str, name: &str) -> bool {
    let headline = headline.trim();
    let name = name.trim();
    if headline == name {
        return true;
    }
    headline
        .strip_prefix("<<")
        .and_then(|h| h.strip_suffix(">>"))
        .is_some_and(|inner| inner.trim() == name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved(T),
    Ambiguous(Vec<T>),
    Dangling,
}

/// Resolve a section name against candidate scopes, nearest scope first.
///
/// The policy picks the first scope (from the near or the far end) that has
/// any candidate; within it exactly one distinct candidate must match.
pub fn resolve_section<T: Clone + PartialEq>(
    name: &str,
    scopes: &[Vec<(T, &str)>],
    policy: SectionPolicy,
) -> Resolution<T> {
    let candidates = |scope: &Vec<(T, &str)>| {
        let mut found: Vec<T> = Vec::new();
        for (item, headline) in scope {
            if section_matches(headline, name) && !found.contains(item) {
                found.push(item.clone());
            }
        }
        found
    };

    let mut ordered: Vec<&Vec<(T, &str)>> = scopes.iter().collect();
    if policy == SectionPolicy::Outermost {
        ordered.reverse();
    }
    for scope in ordered {
        let mut found = candidates(scope);
        match found.len() {
            0 => continue,
            1 => return Resolution::Resolved(found.remove(0)),
            _ => return Resolution::Ambiguous(found),
        }
    }
    Resolution::Dangling
}

/// Prefix a content line with indentation. Empty lines stay empty.
pub fn indent_line(indent: &str, line: &str) -> String {
    if line.is_empty() {
        String::new()
    } else {
        format!("{}{}", indent, line)
    }
}

/// Remove `indent` from the start of `line`.
///
/// Lines that do not carry the exact prefix (hand edits, mixed tabs and
/// spaces) lose up to the same number of columns of leading whitespace.
pub fn strip_indent(line: &str, indent: &str, tab_columns: usize) -> String {
    if indent.is_empty() {
        return line.to_string();
    }
    if let Some(rest) = line.strip_prefix(indent) {
        return rest.to_string();
    }

    let width = columns(indent, tab_columns);
    let mut col = 0;
    let mut cut = 0;
    for (i, c) in line.char_indices() {
        if col >= width {
            break;
        }
        let next = match c {
            ' ' => col + 1,
            '\t' => (col / tab_columns + 1) * tab_columns,
            _ => break,
        };
        if next > width {
            break;
        }
        col = next;
        cut = i + c.len_utf8();
    }
    line[cut..].to_string()
}

/// Display width of leading whitespace
pub fn columns(whitespace: &str, tab_columns: usize) -> usize {
    whitespace.chars().fold(0, |col, c| match c {
        '\t' => (col / tab_columns + 1) * tab_columns,
        _ => col + 1,
    })
}

//! Python syntax authority for the repair loop.
//!
//! A structural line scanner classifies the common failure shapes
//! deterministically (indent discipline, missing colons, broken strings,
//! annotation-like fragments); anything it cannot see goes to a real
//! tree-sitter parse. The scanner runs first so every classified category
//! maps to a stable line number.

use regex::Regex;
use std::cell::RefCell;
use std::sync::OnceLock;
use tree_sitter::Parser;

use super::repair::{ErrorCategory, ParseError, SyntaxCheck};
use crate::util::indent_width;

#[derive(Debug, Default)]
pub struct PythonSyntax;

impl SyntaxCheck for PythonSyntax {
    fn check(&self, source: &str) -> Option<ParseError> {
        if let Some(error) = diagnose(source) {
            return Some(error);
        }
        tree_sitter_check(source)
    }
}

/// A stray `"key": value,` fragment at statement level, usually a leaked
/// piece of a JSON payload or dict literal.
fn dict_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')\s*:"#).expect("valid regex")
    })
}

fn is_header_keyword(stripped: &str) -> bool {
    let word: String = stripped
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let word = if word == "async" {
        stripped["async".len()..]
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect()
    } else {
        word
    };
    matches!(
        word.as_str(),
        "def" | "class" | "if" | "elif" | "else" | "for" | "while" | "with" | "try" | "except"
            | "finally"
    )
}

/// String/bracket state carried across physical lines.
#[derive(Debug, Default, Clone, Copy)]
struct ScanState {
    /// Inside a triple-quoted string of this quote char.
    triple: Option<char>,
    /// Inside a one-line string continued with a trailing backslash.
    carry: Option<char>,
    /// Open bracket depth outside strings.
    depth: i32,
}

#[derive(Debug)]
struct LineScan {
    state: ScanState,
    /// Line ended inside a one-line string with no trailing backslash.
    unterminated: bool,
    /// A `:` appeared at bracket depth zero outside any string.
    top_level_colon: bool,
    /// Last code character outside strings was `:`.
    ends_with_colon: bool,
    /// Line ended with `\` outside any string.
    trailing_backslash: bool,
}

fn scan_line(line: &str, mut st: ScanState) -> LineScan {
    let chars: Vec<char> = line.chars().collect();
    let mut open: Option<char> = st.carry.take();
    let mut trailing_backslash = false;
    let mut string_backslash = false;
    let mut top_level_colon = false;
    let mut last_code: Option<char> = None;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = st.triple {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                st.triple = None;
                last_code = Some(q);
                i += 3;
                continue;
            }
            i += 1;
            continue;
        }

        if let Some(q) = open {
            if c == '\\' {
                if i == chars.len() - 1 {
                    string_backslash = true;
                }
                i += 2;
                continue;
            }
            if c == q {
                open = None;
                last_code = Some(q);
            }
            i += 1;
            continue;
        }

        match c {
            '#' => break,
            '"' | '\'' => {
                if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                    st.triple = Some(c);
                    i += 3;
                    continue;
                }
                open = Some(c);
                last_code = Some(c);
                i += 1;
                continue;
            }
            '(' | '[' | '{' => st.depth += 1,
            ')' | ']' | '}' => st.depth = (st.depth - 1).max(0),
            ':' => {
                if st.depth == 0 {
                    top_level_colon = true;
                }
            }
            '\\' => {
                if i == chars.len() - 1 {
                    trailing_backslash = true;
                }
            }
            _ => {}
        }
        if !c.is_whitespace() {
            last_code = Some(c);
        }
        i += 1;
    }

    let unterminated = open.is_some() && !string_backslash;
    st.carry = if string_backslash { open } else { None };

    LineScan {
        state: st,
        unterminated,
        top_level_colon,
        ends_with_colon: last_code == Some(':'),
        trailing_backslash,
    }
}

/// One logical statement, possibly spanning several physical lines via
/// brackets, backslashes or triple-quoted strings.
#[derive(Debug)]
struct Logical {
    first_line: usize,
    header: bool,
    any_colon: bool,
    last_line: usize,
    ends_with_colon: bool,
}

fn diagnose(source: &str) -> Option<ParseError> {
    let mut st = ScanState::default();
    let mut stack: Vec<usize> = vec![0];
    // Header line awaiting a deeper-indented body: (report line, header indent).
    let mut pending_header: Option<(usize, usize)> = None;
    let mut current: Option<Logical> = None;
    let mut triple_open_line: Option<usize> = None;
    let mut last_lineno = 0;

    for (idx, line) in source.split('\n').enumerate() {
        let lineno = idx + 1;
        let in_string_at_start = st.triple.is_some() || st.carry.is_some();

        if !in_string_at_start {
            let stripped = line.trim();
            if stripped.is_empty() || stripped.starts_with('#') {
                continue;
            }
        }

        last_lineno = lineno;
        let depth_at_start = st.depth;
        let triple_before = st.triple.is_some();
        let scan = scan_line(line, st);
        st = scan.state;

        if !triple_before && st.triple.is_some() {
            triple_open_line = Some(lineno);
        }
        if st.triple.is_none() {
            triple_open_line = None;
        }

        if !in_string_at_start && depth_at_start == 0 && current.is_none() {
            let w = indent_width(line);
            let stripped = line.trim();

            if let Some((header_line, header_w)) = pending_header {
                if w > header_w {
                    stack.push(w);
                    pending_header = None;
                } else {
                    return Some(ParseError::new(
                        header_line,
                        ErrorCategory::MissingIndentedBlock,
                        "expected an indented block",
                    ));
                }
            } else {
                let top = stack.last().copied().unwrap_or(0);
                if w > top {
                    return Some(ParseError::new(
                        lineno,
                        ErrorCategory::UnexpectedIndent,
                        "unexpected indent",
                    ));
                }
                if w < top {
                    while stack.len() > 1 && stack.last().copied().unwrap_or(0) > w {
                        stack.pop();
                    }
                    if stack.last().copied().unwrap_or(0) != w {
                        return Some(ParseError::new(
                            lineno,
                            ErrorCategory::UnexpectedUnindent,
                            "unindent does not match any outer indentation level",
                        ));
                    }
                }
            }

            if dict_entry_re().is_match(stripped) {
                return Some(ParseError::new(
                    lineno,
                    ErrorCategory::InvalidSyntax,
                    "mapping entry outside any literal",
                ));
            }

            current = Some(Logical {
                first_line: lineno,
                header: is_header_keyword(stripped),
                any_colon: false,
                last_line: lineno,
                ends_with_colon: false,
            });
        }

        if let Some(log) = current.as_mut() {
            log.any_colon |= scan.top_level_colon;
            log.last_line = lineno;
            log.ends_with_colon = scan.ends_with_colon;
        }

        if !in_string_at_start && scan.unterminated {
            return Some(ParseError::new(
                lineno,
                ErrorCategory::UnterminatedString,
                "unterminated string literal",
            ));
        }

        let logical_ends = st.triple.is_none()
            && st.carry.is_none()
            && st.depth == 0
            && !scan.trailing_backslash;
        if logical_ends {
            if let Some(log) = current.take() {
                if log.header && !log.any_colon {
                    return Some(ParseError::new(
                        log.last_line,
                        ErrorCategory::MissingColon,
                        "expected ':' after compound statement header",
                    ));
                }
                if log.ends_with_colon {
                    pending_header = Some((log.last_line, indent_width(
                        source.split('\n').nth(log.first_line - 1).unwrap_or(""),
                    )));
                }
            }
        }
    }

    if let Some(open_line) = triple_open_line {
        return Some(ParseError::new(
            open_line,
            ErrorCategory::UnterminatedString,
            "unterminated triple-quoted string",
        ));
    }
    if st.carry.is_some() {
        return Some(ParseError::new(
            last_lineno,
            ErrorCategory::UnterminatedString,
            "unterminated string literal",
        ));
    }
    if let Some(log) = current {
        // EOF inside an open bracket; the balancing repair closes it on the
        // line that opened it, like an unterminated string.
        return Some(ParseError::new(
            log.first_line,
            ErrorCategory::UnterminatedString,
            "'(' was never closed",
        ));
    }
    if let Some((header_line, _)) = pending_header {
        return Some(ParseError::new(
            header_line,
            ErrorCategory::MissingIndentedBlock,
            "expected an indented block",
        ));
    }

    None
}

thread_local! {
    static PY_PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
}

fn with_parser<R>(f: impl FnOnce(&mut Parser) -> R) -> Option<R> {
    PY_PARSER.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            let mut parser = Parser::new();
            parser
                .set_language(&tree_sitter_python::LANGUAGE.into())
                .ok()?;
            *slot = Some(parser);
        }
        slot.as_mut().map(f)
    })
}

fn tree_sitter_check(source: &str) -> Option<ParseError> {
    with_parser(|parser| {
        let tree = parser.parse(source, None)?;
        let root = tree.root_node();
        if !root.has_error() {
            return None;
        }
        let point = find_error(root).unwrap_or_else(|| root.start_position());
        Some(ParseError::new(
            point.row + 1,
            ErrorCategory::InvalidSyntax,
            "invalid syntax",
        ))
    })
    .flatten()
}

fn find_error(node: tree_sitter::Node) -> Option<tree_sitter::Point> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position());
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(point) = find_error(child) {
            return Some(point);
        }
    }
    Some(node.start_position())
}

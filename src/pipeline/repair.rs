//! Bounded-retry syntax repair: parse, classify the failure, apply a
//! targeted line-level fix, re-parse. At most eight parse attempts; an
//! attempt that cannot be classified or changes nothing halts the loop and
//! the text is returned as-is.

use crate::util::{dedent, leading_indent};

/// Coarse classification of a parse failure, used to select a repair.
/// Produced by a [`SyntaxCheck`] implementation instead of by matching
/// parser message substrings, so the matcher can be swapped per grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    MissingIndentedBlock,
    UnexpectedUnindent,
    UnexpectedIndent,
    MissingColon,
    UnterminatedString,
    InvalidSyntax,
    Other,
}

/// A categorized parse failure at a 1-based line.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: usize,
    pub category: ErrorCategory,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            line,
            category,
            message: message.into(),
        }
    }
}

/// Syntax authority for the target grammar. `None` means the text parses.
pub trait SyntaxCheck {
    fn check(&self, source: &str) -> Option<ParseError>;
}

/// One planned, immutable change to the line buffer. Edits are computed
/// from a classification, then applied in a separate step; the buffer is
/// never mutated while it is being inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEdit {
    /// Insert `text` after 1-based line `after`.
    InsertAfter { after: usize, text: String },
    /// Replace 1-based line `line` with `text`.
    Replace { line: usize, text: String },
    /// Delete 1-based line `line`.
    Delete { line: usize },
    /// Strip the uniform common leading indentation from the whole buffer.
    DedentAll,
}

pub const MAX_REPAIR_ATTEMPTS: usize = 8;

#[derive(Debug)]
pub struct RepairOutcome {
    pub code: String,
    /// True when at least one classified fix was applied.
    pub syntax_fixed: bool,
    /// Parse attempts spent, including the final successful one.
    pub attempts: usize,
}

/// Run the bounded repair loop over `code` with the given checker.
pub fn repair_syntax(code: &str, checker: &dyn SyntaxCheck) -> RepairOutcome {
    let mut current = code.to_string();
    let mut syntax_fixed = false;
    let mut attempts = 0;

    for attempt in 1..=MAX_REPAIR_ATTEMPTS {
        attempts = attempt;
        let error = match checker.check(&current) {
            None => {
                return RepairOutcome {
                    code: current,
                    syntax_fixed,
                    attempts,
                }
            }
            Some(error) => error,
        };

        let Some(edits) = plan_edits(&current, &error) else {
            tracing::debug!(
                line = error.line,
                message = %error.message,
                "unclassified parse error, halting repair"
            );
            break;
        };

        let next = apply_edits(&current, &edits);
        if next == current {
            break;
        }

        tracing::debug!(
            attempt,
            line = error.line,
            category = ?error.category,
            "applied syntax repair"
        );
        current = next;
        syntax_fixed = true;
    }

    RepairOutcome {
        code: current,
        syntax_fixed,
        attempts,
    }
}

/// Map a classified error to the edits that address it. `None` when the
/// category has no known fix.
fn plan_edits(source: &str, error: &ParseError) -> Option<Vec<LineEdit>> {
    let lines: Vec<&str> = source.split('\n').collect();
    if error.line == 0 || error.line > lines.len() {
        return None;
    }
    let idx = error.line - 1;
    let line = lines[idx];

    let edits = match error.category {
        ErrorCategory::MissingIndentedBlock => vec![LineEdit::InsertAfter {
            after: error.line,
            text: format!("{}    pass", leading_indent(line)),
        }],
        ErrorCategory::UnexpectedUnindent => {
            let target = reindent_target(&lines, idx);
            vec![LineEdit::Replace {
                line: error.line,
                text: format!("{}{}", target, line.trim_start()),
            }]
        }
        ErrorCategory::UnexpectedIndent => vec![LineEdit::DedentAll],
        ErrorCategory::MissingColon => {
            let trimmed = line.trim_end();
            if trimmed.ends_with(':') {
                return None;
            }
            vec![LineEdit::Replace {
                line: error.line,
                text: format!("{}:", trimmed),
            }]
        }
        ErrorCategory::UnterminatedString => {
            let mut fixed = line.trim_end().to_string();
            if fixed.matches('"').count() % 2 == 1 {
                fixed.push('"');
            } else if fixed.matches('\'').count() % 2 == 1 {
                fixed.push('\'');
            }
            if fixed.matches('(').count() > fixed.matches(')').count() {
                fixed.push(')');
            }
            vec![LineEdit::Replace {
                line: error.line,
                text: fixed,
            }]
        }
        ErrorCategory::InvalidSyntax => vec![LineEdit::Delete { line: error.line }],
        ErrorCategory::Other => return None,
    };

    Some(edits)
}

/// Indentation an unexpectedly dedented line should move to: the body level
/// of the nearest enclosing header above it. A decorator directly under a
/// class header re-indents to the class body level.
fn reindent_target(lines: &[&str], idx: usize) -> String {
    let mut context_indent = String::new();
    let mut class_indent: Option<String> = None;

    for ctx in (0..idx).rev() {
        let ctx_line = lines[ctx];
        let stripped = ctx_line.trim();
        if stripped.is_empty() {
            continue;
        }

        context_indent = leading_indent(ctx_line).to_string();
        if ctx_line.trim_end().ends_with(':') {
            context_indent.push_str("    ");
        }
        if stripped.starts_with("class ") {
            class_indent = Some(leading_indent(ctx_line).to_string());
        }
        break;
    }

    if lines[idx].trim_start().starts_with('@') {
        if let Some(class_indent) = class_indent {
            return format!("{}    ", class_indent);
        }
    }

    context_indent
}

fn apply_edits(source: &str, edits: &[LineEdit]) -> String {
    let mut lines: Vec<String> = source.split('\n').map(|l| l.to_string()).collect();

    for edit in edits {
        match edit {
            LineEdit::InsertAfter { after, text } => {
                let at = (*after).min(lines.len());
                lines.insert(at, text.clone());
            }
            LineEdit::Replace { line, text } => {
                if let Some(slot) = lines.get_mut(line - 1) {
                    *slot = text.clone();
                }
            }
            LineEdit::Delete { line } => {
                if *line >= 1 && *line <= lines.len() {
                    lines.remove(line - 1);
                }
            }
            LineEdit::DedentAll => {
                return dedent(&lines.join("\n"));
            }
        }
    }

    lines.join("\n")
}

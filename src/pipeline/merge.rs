//! Single-pass line state machine that tracks open-string parity across line
//! boundaries and closes or merges lines the model broke mid-literal.
//!
//! Invariants: escaped quotes never toggle state, comment and blank lines
//! never touch state, and at most one quote kind is open at a line boundary.

/// Open-literal state carried from one line to the next.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeState {
    pub in_double: bool,
    pub in_single: bool,
}

impl MergeState {
    fn open(&self) -> bool {
        self.in_double || self.in_single
    }

    fn open_quote(&self) -> char {
        if self.in_double {
            '"'
        } else {
            '\''
        }
    }

    fn close(&mut self) {
        self.in_double = false;
        self.in_single = false;
    }
}

/// Scan one line, toggling quote flags. A quote of one kind is inert while
/// the other kind is open.
fn scan_line(line: &str, mut state: MergeState) -> MergeState {
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if !state.in_single => state.in_double = !state.in_double,
            '\'' if !state.in_double => state.in_single = !state.in_single,
            _ => {}
        }
    }
    state
}

/// A trailing broken-quote artifact this short carries no real content and
/// is dropped instead of closed.
const MIN_MEANINGFUL_TAIL: usize = 8;

/// Keywords that open a new top-level statement; a continuation line starting
/// with one of these is never merged into the previous broken literal.
const STATEMENT_STARTERS: &[&str] = &[
    "def ", "class ", "if ", "for ", "while ", "return ", "assert ", "@", "import ", "from ",
];

fn starts_new_statement(stripped: &str) -> bool {
    STATEMENT_STARTERS.iter().any(|kw| stripped.starts_with(kw))
}

fn unbalanced_parens(line: &str) -> bool {
    line.matches('(').count() > line.matches(')').count()
}

/// Close or merge every line left open mid-literal. Output has a well-defined
/// closed state at each line boundary.
pub fn merge_broken_literals(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut fixed: Vec<String> = Vec::with_capacity(lines.len());
    let mut state = MergeState::default();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();

        if stripped.is_empty() || stripped.starts_with('#') {
            fixed.push(line.to_string());
            i += 1;
            continue;
        }

        state = scan_line(line, state);

        if !state.open() || line.trim_end().ends_with('\\') {
            fixed.push(line.to_string());
            i += 1;
            continue;
        }

        let quote = state.open_quote();

        if i == lines.len() - 1 {
            // Terminal line: drop a stray artifact, otherwise force-close.
            let has_tail_content = stripped
                .rfind(quote)
                .map(|q| !stripped[q + quote.len_utf8()..].trim().is_empty())
                .unwrap_or(false);
            if stripped.chars().count() < MIN_MEANINGFUL_TAIL && !has_tail_content {
                i += 1;
                continue;
            }

            let mut closed = line.trim_end().to_string();
            if !closed.ends_with(quote) {
                closed.push(quote);
            }
            if unbalanced_parens(&closed) {
                closed.push(')');
            }
            state.close();
            fixed.push(closed);
            i += 1;
            continue;
        }

        let next_stripped = lines[i + 1].trim();
        let should_merge = !next_stripped.is_empty() && !starts_new_statement(next_stripped);

        if should_merge {
            let mut merged = line.trim_end().to_string();
            if let Some(body) = next_stripped.strip_suffix(')') {
                // The continuation closed a call; re-close quote inside it.
                let body = body
                    .strip_suffix(['"', '\''])
                    .unwrap_or(body);
                merged.push(' ');
                merged.push_str(body);
                merged.push(quote);
                merged.push(')');
            } else {
                merged.push(' ');
                merged.push_str(next_stripped);
                merged.push(quote);
            }
            state.close();
            fixed.push(merged);
            i += 2;
        } else {
            let mut closed = line.trim_end().to_string();
            if !closed.ends_with(quote) {
                closed.push(quote);
            }
            state.close();
            fixed.push(closed);
            i += 1;
        }
    }

    while fixed.last().is_some_and(|l| l.trim().is_empty()) {
        fixed.pop();
    }
    while fixed.first().is_some_and(|l| l.trim().is_empty()) {
        fixed.remove(0);
    }

    fixed.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{merge_broken_literals, scan_line, MergeState};

    #[test]
    fn closes_unterminated_double_quote() {
        assert_eq!(merge_broken_literals(r#"print("hello"#), r#"print("hello")"#);
    }

    #[test]
    fn closes_unterminated_single_quote() {
        assert_eq!(merge_broken_literals("print('hello"), "print('hello')");
    }

    #[test]
    fn merges_line_broken_inside_string() {
        assert_eq!(
            merge_broken_literals("print(\"hello\nworld\")"),
            "print(\"hello world\")"
        );
    }

    #[test]
    fn force_closes_before_new_statement() {
        let raw = "x = \"broken\ndef f():\n    pass";
        assert_eq!(merge_broken_literals(raw), "x = \"broken\"\ndef f():\n    pass");
    }

    #[test]
    fn drops_short_trailing_artifact() {
        assert_eq!(merge_broken_literals("print(\"hello\")\n\""), "print(\"hello\")");
    }

    #[test]
    fn drops_trailing_broken_call() {
        let raw = "def test_ok():\n    assert True\nprint(\"";
        assert_eq!(merge_broken_literals(raw), "def test_ok():\n    assert True");
    }

    #[test]
    fn closes_long_trailing_title() {
        let raw = "allure.title(\"A very long test name that the model truncated";
        let fixed = merge_broken_literals(raw);
        assert!(fixed.ends_with("\")"));
        assert_eq!(fixed.matches('"').count() % 2, 0);
    }

    #[test]
    fn respects_escaped_quotes() {
        let raw = "print(\"hello \\\"world\")";
        assert_eq!(merge_broken_literals(raw), raw);
    }

    #[test]
    fn comments_and_blanks_pass_through() {
        let raw = "# a \"broken comment\nprint('x')";
        assert_eq!(merge_broken_literals(raw), raw);
    }

    #[test]
    fn untouched_when_already_clean() {
        let raw = "a = 1\nb = 2\nprint(a+b)";
        assert_eq!(merge_broken_literals(raw), raw);
    }

    #[test]
    fn state_never_opens_both_kinds() {
        let state = scan_line("x = \"it's fine\" + 'say \"hi\"'", MergeState::default());
        assert!(!state.in_double && !state.in_single);

        let open_double = scan_line("x = \"it's broken", MergeState::default());
        assert!(open_double.in_double && !open_double.in_single);
    }
}

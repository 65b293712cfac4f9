pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Leading whitespace of a line, as-is (tabs preserved).
pub fn leading_indent(line: &str) -> &str {
    let end = line
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(line.len());
    &line[..end]
}

/// Indentation width in columns, counting a tab as one step.
pub fn indent_width(line: &str) -> usize {
    leading_indent(line).chars().count()
}

/// Strip the longest common leading indentation shared by all non-blank lines.
pub fn dedent(text: &str) -> String {
    let mut common: Option<&str> = None;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = leading_indent(line);
        common = Some(match common {
            None => indent,
            Some(prev) => {
                let shared = prev
                    .bytes()
                    .zip(indent.bytes())
                    .take_while(|(a, b)| a == b)
                    .count();
                &prev[..shared]
            }
        });
    }

    let prefix = common.unwrap_or("");
    if prefix.is_empty() {
        return text.to_string();
    }

    text.lines()
        .map(|line| line.strip_prefix(prefix).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::{dedent, indent_width, leading_indent, truncate};

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        assert_eq!(truncate("こんにちは", 3), "こんに");
        assert_eq!(truncate("こんにちは", 0), "");
    }

    #[test]
    fn test_leading_indent() {
        assert_eq!(leading_indent("    pass"), "    ");
        assert_eq!(leading_indent("pass"), "");
        assert_eq!(indent_width("\t\tx"), 2);
    }

    #[test]
    fn test_dedent_uniform_prefix() {
        let text = "    def f():\n        pass";
        assert_eq!(dedent(text), "def f():\n    pass");
    }

    #[test]
    fn test_dedent_noop_when_flush_left() {
        let text = "def f():\n    pass";
        assert_eq!(dedent(text), text);
    }

    #[test]
    fn test_dedent_ignores_blank_lines() {
        let text = "    a = 1\n\n    b = 2";
        assert_eq!(dedent(text), "a = 1\n\nb = 2");
    }
}

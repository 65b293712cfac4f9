//! Structural block model for generated test bodies.
//!
//! A test case narrates itself through `with allure_step("Arrange|Act|Assert: …")`
//! blocks. The reorderer canonicalizes each test to Arrange → Act → Assert,
//! synthesizing a no-op placeholder for any missing section. Tests without
//! any recognized marker are left untouched.

use crate::util::leading_indent;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// The three narrative sections, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Arrange,
    Act,
    Assert,
}

impl BlockKind {
    const CANONICAL: [BlockKind; 3] = [BlockKind::Arrange, BlockKind::Act, BlockKind::Assert];

    fn keyword(self) -> &'static str {
        match self {
            BlockKind::Arrange => "Arrange",
            BlockKind::Act => "Act",
            BlockKind::Assert => "Assert",
        }
    }

    fn placeholder_caption(self, title: Option<&str>) -> String {
        match self {
            BlockKind::Arrange => {
                format!("Arrange: set up for \\\"{}\\\"", title.unwrap_or("the test"))
            }
            BlockKind::Act => format!("Act: {}", title.unwrap_or("run the main step")),
            BlockKind::Assert => format!("Assert: {}", title.unwrap_or("check the result")),
        }
    }
}

fn marker_res() -> &'static [(BlockKind, Regex); 3] {
    static RES: OnceLock<[(BlockKind, Regex); 3]> = OnceLock::new();
    RES.get_or_init(|| {
        let build = |kw: &str| {
            Regex::new(&format!(r#"(?i)allure_step\(\s*["']\s*{}"#, kw)).expect("valid regex")
        };
        [
            (BlockKind::Arrange, build("Arrange")),
            (BlockKind::Act, build("Act")),
            (BlockKind::Assert, build("Assert")),
        ]
    })
}

fn marker_kind(line: &str) -> Option<BlockKind> {
    marker_res()
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(kind, _)| *kind)
}

fn step_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)with\s+allure_step").expect("valid regex"))
}

fn test_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*def\s+test_").expect("valid regex"))
}

fn class_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*class\s+").expect("valid regex"))
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"@allure\.title\(\s*["'](.+?)["']\s*\)"#).expect("valid regex"))
}

/// Canonicalize the Arrange/Act/Assert section order inside every test case.
pub fn enforce_aaa_order(code: &str) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    let mut result: Vec<String> = Vec::with_capacity(lines.len());
    let mut current_title: Option<String> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(caps) = title_re().captures(line) {
            current_title = Some(caps[1].to_string());
        }

        if test_def_re().is_match(line) {
            let mut j = i + 1;
            while j < lines.len()
                && !test_def_re().is_match(lines[j])
                && !class_def_re().is_match(lines[j])
            {
                j += 1;
            }

            result.push(line.to_string());
            result.extend(reorder_test_body(
                line,
                &lines[i + 1..j],
                current_title.as_deref(),
            ));
            i = j;
            continue;
        }

        result.push(line.to_string());
        i += 1;
    }

    result.join("\n")
}

/// Capture a marker's contiguous block starting at `start`: the marker line
/// plus following lines until a dedent, a blank, or a same-indent marker.
fn capture_block(body: &[&str], start: usize) -> (Vec<String>, usize) {
    let indent = leading_indent(body[start]);
    let mut end = start;
    while end + 1 < body.len() {
        let next = body[end + 1];
        let next_indent = leading_indent(next);
        if next_indent.len() < indent.len() || next.trim().is_empty() {
            break;
        }
        if next_indent == indent && step_marker_re().is_match(next) {
            break;
        }
        end += 1;
    }
    let block = body[start..=end].iter().map(|l| l.to_string()).collect();
    (block, end)
}

fn reorder_test_body(def_line: &str, body: &[&str], title: Option<&str>) -> Vec<String> {
    let mut blocks: HashMap<BlockKind, Vec<String>> = HashMap::new();
    let mut positions: HashMap<BlockKind, usize> = HashMap::new();
    let mut captured: Vec<(usize, usize)> = Vec::new();

    let mut k = 0;
    while k < body.len() {
        if let Some(kind) = marker_kind(body[k]) {
            let (block, end) = capture_block(body, k);
            captured.push((k, end));
            // First occurrence wins; later duplicates are removed as noise.
            blocks.entry(kind).or_insert(block);
            positions.entry(kind).or_insert(k);
            k = end + 1;
            continue;
        }
        k += 1;
    }

    if blocks.is_empty() {
        return body.iter().map(|l| l.to_string()).collect();
    }

    let block_indent = blocks
        .values()
        .filter_map(|b| b.first())
        .map(|first| leading_indent(first).to_string())
        .next()
        .unwrap_or_else(|| format!("{}    ", leading_indent(def_line)));

    for kind in BlockKind::CANONICAL {
        blocks.entry(kind).or_insert_with(|| {
            vec![
                format!(
                    "{}with allure_step(\"{}\"):",
                    block_indent,
                    kind.placeholder_caption(title)
                ),
                format!("{}    pass", block_indent),
            ]
        });
    }

    let first_idx = positions.values().copied().min().unwrap_or(0);
    let mut rebuilt: Vec<String> = Vec::with_capacity(body.len());
    for (idx, body_line) in body.iter().enumerate() {
        if idx == first_idx {
            for kind in BlockKind::CANONICAL {
                rebuilt.extend(blocks[&kind].iter().cloned());
            }
            continue;
        }
        if captured.iter().any(|&(start, end)| start <= idx && idx <= end) {
            continue;
        }
        rebuilt.push(body_line.to_string());
    }

    rebuilt
}

/// Detect-only strict order check: every test with recognized markers must
/// narrate Arrange, then Act, then Assert.
pub fn aaa_order_is_ok(code: &str) -> bool {
    let mut current: Vec<BlockKind> = Vec::new();
    for line in code.lines() {
        if test_def_re().is_match(line) {
            if !current.is_empty() && !sequence_is_valid(&current) {
                return false;
            }
            current.clear();
            continue;
        }
        if let Some(kind) = marker_kind(line) {
            current.push(kind);
        }
    }
    current.is_empty() || sequence_is_valid(&current)
}

fn sequence_is_valid(steps: &[BlockKind]) -> bool {
    let index_of = |kind| steps.iter().position(|&s| s == kind);
    match (
        index_of(BlockKind::Arrange),
        index_of(BlockKind::Act),
        index_of(BlockKind::Assert),
    ) {
        (Some(a), Some(b), Some(c)) => a < b && b < c,
        _ => false,
    }
}

fn owner_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"@allure\.label\(\s*["']owner["']"#).expect("valid regex"))
}

/// Insert `@allure.label("owner", "qa_team")` after every `@allure.manual`
/// that is not already followed by an owner label.
pub fn ensure_owner_label(code: &str) -> String {
    let mut lines: Vec<String> = code.split('\n').map(|l| l.to_string()).collect();

    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim().starts_with("@allure.manual") {
            let mut j = i + 1;
            while j < lines.len() && lines[j].trim().is_empty() {
                j += 1;
            }

            let has_owner = lines.get(j).is_some_and(|l| owner_label_re().is_match(l));
            if !has_owner {
                let indent = leading_indent(&lines[i]).to_string();
                lines.insert(i + 1, format!("{}@allure.label(\"owner\", \"qa_team\")", indent));
                i += 1; // skip the inserted line
            }
        }
        i += 1;
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{aaa_order_is_ok, enforce_aaa_order, ensure_owner_label};

    fn step_lines(code: &str) -> Vec<String> {
        code.lines()
            .filter(|l| l.contains("allure_step"))
            .map(|l| l.trim().to_string())
            .collect()
    }

    #[test]
    fn reorders_out_of_order_sections() {
        let code = "\
def test_x():
    with allure_step(\"Assert: check result\"):
        assert r == 1
    with allure_step(\"Arrange: set up\"):
        r = 1
    with allure_step(\"Act: run\"):
        pass";
        let fixed = enforce_aaa_order(code);
        let steps = step_lines(&fixed);
        assert!(steps[0].contains("Arrange"));
        assert!(steps[1].contains("Act"));
        assert!(steps[2].contains("Assert"));
        assert!(aaa_order_is_ok(&fixed));
    }

    #[test]
    fn synthesizes_missing_act_section() {
        let code = "\
@allure.title(\"Adds a product\")
def test_add():
    with allure_step(\"Arrange: open catalog\"):
        pass
    with allure_step(\"Assert: product added\"):
        pass";
        let fixed = enforce_aaa_order(code);
        let steps = step_lines(&fixed);
        assert_eq!(steps.len(), 3);
        assert!(steps[1].contains("Act: Adds a product"));
        assert!(fixed.contains("        pass"));
    }

    #[test]
    fn leaves_tests_without_markers_untouched() {
        let code = "def test_plain():\n    assert 1 + 1 == 2";
        assert_eq!(enforce_aaa_order(code), code);
    }

    #[test]
    fn keeps_non_step_body_lines() {
        let code = "\
def test_x():
    value = compute()
    with allure_step(\"Arrange: set up\"):
        pass
    with allure_step(\"Act: run\"):
        pass
    with allure_step(\"Assert: check\"):
        pass";
        let fixed = enforce_aaa_order(code);
        assert!(fixed.contains("value = compute()"));
        assert_eq!(step_lines(&fixed).len(), 3);
    }

    #[test]
    fn reorders_each_test_independently() {
        let code = "\
def test_a():
    with allure_step(\"Act: run\"):
        pass
    with allure_step(\"Arrange: set up\"):
        pass
    with allure_step(\"Assert: check\"):
        pass

def test_b():
    with allure_step(\"Arrange: set up\"):
        pass
    with allure_step(\"Act: run\"):
        pass
    with allure_step(\"Assert: check\"):
        pass";
        assert!(!aaa_order_is_ok(code));
        assert!(aaa_order_is_ok(&enforce_aaa_order(code)));
    }

    #[test]
    fn order_check_accepts_markerless_tests() {
        assert!(aaa_order_is_ok("def test_x():\n    assert True"));
    }

    #[test]
    fn order_check_requires_all_three() {
        let code = "\
def test_x():
    with allure_step(\"Arrange: set up\"):
        pass
    with allure_step(\"Assert: check\"):
        pass";
        assert!(!aaa_order_is_ok(code));
    }

    #[test]
    fn owner_label_added_after_manual() {
        let code = "@allure.manual\n@allure.feature('x')\ndef test_x():\n    pass";
        let fixed = ensure_owner_label(code);
        assert!(fixed.contains("@allure.label(\"owner\", \"qa_team\")"));
        assert_eq!(fixed.matches("owner").count(), 1);
    }

    #[test]
    fn owner_label_preserved_when_present() {
        let code = "@allure.manual\n@allure.label(\"owner\", \"qa_team\")\ndef test_x():\n    pass";
        assert_eq!(ensure_owner_label(code).matches("qa_team").count(), 1);
    }

    #[test]
    fn owner_label_added_per_manual_class() {
        let code = "\
@allure.manual
class First:
    def test_a(self): pass

@allure.manual
class Second:
    def test_b(self): pass";
        let fixed = ensure_owner_label(code);
        let owner_lines: Vec<&str> = fixed.lines().filter(|l| l.contains("owner")).collect();
        assert_eq!(owner_lines.len(), 2);
        assert!(owner_lines.iter().all(|l| l.contains("\"qa_team\"")));
    }
}

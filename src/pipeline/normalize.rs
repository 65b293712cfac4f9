//! Strips model chatter from raw completions: markdown fences, boilerplate
//! commentary lines, and stray plan headings. First stage of the pipeline;
//! must be idempotent on already-clean code.

use regex::Regex;
use std::sync::OnceLock;

fn fence_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^```\w*[ \t]*\r?\n?").expect("valid regex"))
}

fn fence_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*```[ \t]*$").expect("valid regex"))
}

/// Commentary prefixes the model likes to wrap code in. Matched at line
/// start, case-insensitively, both bare and behind a `#`.
const CHATTER_PREFIXES: &[&str] = &[
    r"here is\b",
    r"here are\b",
    r"here's\b",
    r"below is\b",
    r"the result\b",
    r"generated (code|tests)\b",
    r"analysis\b",
    r"optimization\b",
    r"optimized (test )?(suite|set)\b",
    r"### ",
    r"done\.?$",
];

fn chatter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = CHATTER_PREFIXES.join("|");
        Regex::new(&format!(r"(?im)^(#\s*)?({})[^\n]*\n?", alternation)).expect("valid regex")
    })
}

fn plan_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(#\s*)?test[- ]?plan\b").expect("valid regex"))
}

/// Remove fences, chatter and plan headings from a raw completion.
pub fn normalize(raw: &str) -> String {
    let mut code = raw.trim().to_string();

    code = fence_open_re().replace_all(&code, "").into_owned();
    code = fence_close_re().replace_all(&code, "").into_owned();
    code = chatter_re().replace_all(&code, "").into_owned();

    // The plan heading is dropped either way; following content survives
    // untouched, a following fence remnant is already gone by this point.
    let filtered: Vec<&str> = code
        .split('\n')
        .filter(|line| !plan_heading_re().is_match(line.trim()))
        .collect();

    let code = filtered.join("\n");
    code.trim_matches(|c| c == '\n' || c == ' ' || c == '\t')
        .to_string()
}

//! Sanitization pipeline for raw model completions: strip chatter, close
//! broken literals, canonicalize narrative blocks, repair syntax, validate.
//!
//! Each stage consumes the previous stage's buffer wholesale; nothing here
//! holds state between invocations.

pub mod blocks;
pub mod merge;
pub mod normalize;
pub mod python;
pub mod repair;

use crate::validate::{
    validate, Category, ValidationResult, AAA_ISSUE_PREFIX, MISSING_ELEMENTS_PREFIX,
};
use python::PythonSyntax;
use regex::Regex;
use std::sync::OnceLock;

pub const MANUAL_API_MIN_TESTS: usize = 29;
pub const MANUAL_UI_MIN_TESTS: usize = 28;

#[derive(Debug)]
pub struct PipelineResult {
    pub code: String,
    pub validation: ValidationResult,
    /// The repair loop had to change the text to make it parse.
    pub syntax_fixed: bool,
}

/// Run the full pipeline over a raw completion for the given category.
pub fn run(raw: &str, category: Category) -> PipelineResult {
    let mut code = normalize::normalize(raw);
    code = merge::merge_broken_literals(&code);

    if category == Category::UnitCi {
        code = split_ci_appendix(&code);
    }

    if category.is_manual() {
        code = blocks::ensure_owner_label(&code);
        if category == Category::ManualApi {
            code = blocks::enforce_aaa_order(&code);
        }
    }

    // Narrative output is prose, not Python; repairing it would only
    // delete lines.
    let syntax_fixed = if category.is_narrative() {
        false
    } else {
        let outcome = repair::repair_syntax(&code, &PythonSyntax);
        let fixed = outcome.syntax_fixed;
        code = outcome.code;
        fixed
    };

    let mut validation = validate(&code, category, &PythonSyntax);
    apply_overrides(&mut validation, &code, category, syntax_fixed);
    apply_prechecks(&mut validation, &code, category);

    tracing::info!(
        category = category.as_str(),
        valid = validation.valid,
        score = validation.score,
        issues = validation.issues.len(),
        syntax_fixed,
        "pipeline finished"
    );

    PipelineResult {
        code,
        validation,
        syntax_fixed,
    }
}

/// A unit-test completion may carry a CI config appendix after a
/// `.gitlab-ci.yml:` heading; keep it, but commented out so the file still
/// parses as Python.
fn split_ci_appendix(code: &str) -> String {
    let Some((python_part, yaml_part)) = code.split_once(".gitlab-ci.yml:") else {
        return code.to_string();
    };

    let python_part = python_part.trim_end();
    let yaml_part = yaml_part.trim_matches('\n');
    if yaml_part.is_empty() {
        return python_part.to_string();
    }

    let commented: Vec<String> = yaml_part
        .split('\n')
        .map(|line| format!("# {}", line).trim_end().to_string())
        .collect();
    format!("{}\n\n# .gitlab-ci.yml\n{}", python_part, commented.join("\n"))
}

/// Narrow conditions under which a failed validation is a known false
/// positive and is replaced with a synthetic pass.
fn apply_overrides(
    validation: &mut ValidationResult,
    code: &str,
    category: Category,
    syntax_fixed: bool,
) {
    if validation.valid || !category.is_manual() {
        return;
    }

    let aaa_issue = validation
        .issues
        .iter()
        .any(|issue| issue.starts_with(AAA_ISSUE_PREFIX));

    if category == Category::ManualApi && aaa_issue {
        // The reorderer already normalized block order for this category.
        *validation = ValidationResult::passing("AAA order was normalized automatically");
        return;
    }

    if category == Category::ManualUi && aaa_issue && blocks::aaa_order_is_ok(code) {
        *validation = ValidationResult::passing("AAA order verified per test, accepted");
        return;
    }

    let only_missing_elements = validation.issues.len() == 1
        && validation.issues[0].starts_with(MISSING_ELEMENTS_PREFIX);
    if syntax_fixed && only_missing_elements {
        *validation =
            ValidationResult::passing("strict manual checks waived after automatic syntax repair");
    }
}

fn test_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"def\s+(test_\w+)\s*\(").expect("valid regex"))
}

pub fn count_tests(code: &str) -> usize {
    test_name_re().captures_iter(code).count()
}

/// Volume floor for generated manual suites; a shortfall demotes the result
/// even when every other check passed.
fn apply_prechecks(validation: &mut ValidationResult, code: &str, category: Category) {
    let minimum = match category {
        Category::ManualApi => MANUAL_API_MIN_TESTS,
        Category::ManualUi => MANUAL_UI_MIN_TESTS,
        _ => return,
    };

    let found = count_tests(code);
    if found >= minimum {
        return;
    }

    validation.issues.push(format!(
        "Found only {} tests (minimum {})",
        found, minimum
    ));
    validation.valid = false;
    validation.message = "precheck found problems".to_string();
    validation.score = validation.score.saturating_sub(10).max(40);
}

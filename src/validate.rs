//! Heuristic acceptance checks for generated test code: annotation
//! presence, owner/priority shapes and narrative step ordering for manual
//! suites, lighter recommendations for automated ones. Recommendations are
//! prefixed with "Consider" and never fail validation on their own.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::pipeline::repair::SyntaxCheck;

/// Requested test category, parsed leniently from the request string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Category {
    ManualUi,
    ManualApi,
    AutoUi,
    AutoApi,
    TestPlan,
    Optimize,
    UnitCi,
    #[default]
    Custom,
}

impl Category {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual_ui" => Self::ManualUi,
            "manual_api" => Self::ManualApi,
            "auto_ui" => Self::AutoUi,
            "auto_api" => Self::AutoApi,
            "test_plan" | "plan" => Self::TestPlan,
            "optimize" | "optimization" => Self::Optimize,
            "unit_ci" => Self::UnitCi,
            _ => Self::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualUi => "manual_ui",
            Self::ManualApi => "manual_api",
            Self::AutoUi => "auto_ui",
            Self::AutoApi => "auto_api",
            Self::TestPlan => "test_plan",
            Self::Optimize => "optimize",
            Self::UnitCi => "unit_ci",
            Self::Custom => "custom",
        }
    }

    /// Narrative output, not Python; validation is skipped entirely.
    pub fn is_narrative(&self) -> bool {
        matches!(self, Self::TestPlan | Self::Optimize)
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::ManualUi | Self::ManualApi)
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Self::AutoUi | Self::AutoApi)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<String>,
    pub message: String,
    pub score: u8,
}

impl ValidationResult {
    pub fn passing(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
            message: message.into(),
            score: 100,
        }
    }
}

/// Stable prefixes matched by the acceptance overrides in the pipeline.
pub const MISSING_ELEMENTS_PREFIX: &str = "Missing required elements";
pub const AAA_ISSUE_PREFIX: &str = "Strict AAA order violated";
/// Prefix marking an issue as a recommendation rather than a failure.
const ADVISORY_PREFIX: &str = "Consider";

const ALLOWED_PRIORITIES: &[&str] = &["HIGH", "MEDIUM", "LOW", "P1", "P2", "P3", "P4", "P5"];

fn manual_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@allure\s*\.\s*manual").expect("valid regex"))
}

fn step_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"with\s+allure_step\s*\(").expect("valid regex"))
}

fn step_caption_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)with\s+allure_step\s*\(\s*["'](.+?)["']\s*\)"#).expect("valid regex")
    })
}

fn suite_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@allure\.suite\s*\(").expect("valid regex"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"@allure\.link\s*\(\s*['"]https?://"#).expect("valid regex"))
}

fn priority_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@allure\.label\(\s*['"]priority['"]\s*,\s*['"](.+?)['"]\s*\)"#)
            .expect("valid regex")
    })
}

fn owner_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@allure\.label\(\s*['"]owner['"]\s*,\s*['"](.+?)['"]\s*\)"#)
            .expect("valid regex")
    })
}

/// Accepted owner shapes: email, a `qa_*` team tag, or "Firstname Lastname".
fn owner_shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9.-]+$|^qa_[a-z]+$|^[A-Z][a-z]+ [A-Z][a-z]+$")
            .expect("valid regex")
    })
}

fn setup_keywords_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"arrange|set\s?up|prepare|open|navigate|go to|init|login|given")
            .expect("valid regex")
    })
}

fn action_keywords_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bact\b|click|press|select|create|call|send|execute|submit|\brun\b|perform|when")
            .expect("valid regex")
    })
}

fn verify_keywords_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"assert|verify|check|validate|expect|ensure|confirm|then").expect("valid regex")
    })
}

/// Narrative phase of a step caption, or `None` when the caption matches no
/// keyword family (such steps are ignored for ordering).
fn classify_caption(caption: &str) -> Option<u8> {
    let lower = caption.to_lowercase();
    if setup_keywords_re().is_match(&lower) {
        Some(1)
    } else if action_keywords_re().is_match(&lower) {
        Some(2)
    } else if verify_keywords_re().is_match(&lower) {
        Some(3)
    } else {
        None
    }
}

pub fn step_captions(code: &str) -> Vec<String> {
    step_caption_re()
        .captures_iter(code)
        .map(|c| c[1].to_string())
        .collect()
}

/// Strict monotonic check: setup steps may not follow action or verification
/// steps, and all three phases must be present.
fn aaa_sequence_ok(phases: &[u8]) -> bool {
    let (mut seen_setup, mut seen_action, mut seen_verify) = (false, false, false);

    for phase in phases {
        match phase {
            1 => {
                if seen_action || seen_verify {
                    return false;
                }
                seen_setup = true;
            }
            2 => {
                if !seen_setup || seen_verify {
                    return false;
                }
                seen_action = true;
            }
            3 => {
                if !seen_action {
                    return false;
                }
                seen_verify = true;
            }
            _ => {}
        }
    }

    seen_setup && seen_action && seen_verify
}

/// Validate generated code against the requested category's conventions.
pub fn validate(code: &str, category: Category, checker: &dyn SyntaxCheck) -> ValidationResult {
    if category.is_narrative() {
        return ValidationResult::passing("validation skipped for narrative output");
    }

    let mut issues: Vec<String> = Vec::new();

    if let Some(error) = checker.check(code) {
        issues.push(format!(
            "Python syntax error: {} (line {})",
            error.message, error.line
        ));
        return ValidationResult {
            valid: false,
            issues,
            message: "syntax check failed".to_string(),
            score: 0,
        };
    }

    if category.is_manual() {
        let mut missing: Vec<&str> = Vec::new();
        if !manual_marker_re().is_match(code) {
            missing.push("@allure.manual");
        }
        if !step_marker_re().is_match(code) {
            missing.push("with allure_step(...)");
        }
        if !missing.is_empty() {
            issues.push(format!("{}: {}", MISSING_ELEMENTS_PREFIX, missing.join(", ")));
        }

        let phases: Vec<u8> = step_captions(code)
            .iter()
            .filter_map(|caption| classify_caption(caption))
            .collect();
        if !aaa_sequence_ok(&phases) {
            issues.push(format!(
                "{}: steps must run Arrange, then Act, then Assert",
                AAA_ISSUE_PREFIX
            ));
        }

        if !suite_re().is_match(code) {
            issues.push("Missing required @allure.suite(...)".to_string());
        }
        if !link_re().is_match(code) {
            issues.push(format!(
                "{} adding @allure.link('https://...') to tie the test to its requirement",
                ADVISORY_PREFIX
            ));
        }

        match priority_re().captures(code) {
            None => issues.push(format!(
                "Missing @allure.label('priority', ...); allowed values: {}",
                ALLOWED_PRIORITIES.join(", ")
            )),
            Some(captures) => {
                let value = captures[1].to_uppercase();
                if !ALLOWED_PRIORITIES.contains(&value.as_str()) {
                    issues.push(format!(
                        "Invalid priority '{}'; allowed values: {}",
                        value,
                        ALLOWED_PRIORITIES.join(", ")
                    ));
                }
            }
        }

        match owner_re().captures(code) {
            None => issues.push("Missing required @allure.label('owner', ...)".to_string()),
            Some(captures) => {
                if !owner_shape_re().is_match(&captures[1]) {
                    issues.push(
                        "Invalid owner format; allowed: email, 'qa_team', 'Firstname Lastname'"
                            .to_string(),
                    );
                }
            }
        }
    } else if category.is_auto() {
        if !code.contains("@allure.feature") {
            issues.push(format!("{} using @allure.feature(...)", ADVISORY_PREFIX));
        }
        if !code.contains("@allure.title") {
            issues.push(format!("{} using @allure.title(...)", ADVISORY_PREFIX));
        }
    }

    let valid = issues.iter().all(|issue| issue.starts_with(ADVISORY_PREFIX));
    let score = if issues.is_empty() {
        100
    } else {
        100u8.saturating_sub(10 * issues.len().min(6) as u8).max(40)
    };
    let message = if issues.is_empty() {
        "validation passed".to_string()
    } else {
        format!("found {} issue(s)", issues.len())
    };

    ValidationResult {
        valid,
        issues,
        message,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::python::PythonSyntax;

    fn run(code: &str, category: Category) -> ValidationResult {
        validate(code, category, &PythonSyntax::default())
    }

    const VALID_MANUAL: &str = concat!(
        "import allure\n",
        "\n",
        "@allure.manual\n",
        "@allure.suite(\"Checkout\")\n",
        "@allure.link(\"https://tracker.example.com/QA-101\")\n",
        "@allure.label(\"priority\", \"HIGH\")\n",
        "@allure.label(\"owner\", \"qa_team\")\n",
        "@allure.title(\"Adds a product to the cart\")\n",
        "def test_add_product():\n",
        "    with allure_step(\"Arrange: open the catalog\"):\n",
        "        pass\n",
        "    with allure_step(\"Act: click add to cart\"):\n",
        "        pass\n",
        "    with allure_step(\"Assert: verify the cart total\"):\n",
        "        pass\n",
    );

    #[test]
    fn accepts_fully_annotated_manual_test() {
        let result = run(VALID_MANUAL, Category::ManualUi);
        assert!(result.valid, "issues: {:?}", result.issues);
        assert_eq!(result.score, 100);
    }

    #[test]
    fn syntax_error_scores_zero() {
        let result = run("def broken(\n    pass", Category::ManualUi);
        assert!(!result.valid);
        assert_eq!(result.score, 0);
        assert!(result.issues[0].contains("syntax error"));
    }

    #[test]
    fn narrative_categories_skip_validation() {
        let result = run("1. Smoke plan\n2. Regression", Category::TestPlan);
        assert!(result.valid);
        assert_eq!(result.score, 100);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn missing_manual_marker_is_reported() {
        let code = VALID_MANUAL.replace("@allure.manual\n", "");
        let result = run(&code, Category::ManualApi);
        assert!(!result.valid);
        assert!(result
            .issues
            .iter()
            .any(|i| i.starts_with(MISSING_ELEMENTS_PREFIX) && i.contains("@allure.manual")));
    }

    #[test]
    fn reversed_steps_violate_strict_order() {
        let code = VALID_MANUAL
            .replace("Arrange: open the catalog", "Assert: verify the cart total")
            .replace(
                "Assert: verify the cart total\"):\n        pass\n",
                "Arrange: open the catalog\"):\n        pass\n",
            );
        let result = run(&code, Category::ManualUi);
        assert!(result
            .issues
            .iter()
            .any(|i| i.starts_with(AAA_ISSUE_PREFIX)));
    }

    #[test]
    fn unrecognized_captions_are_ignored_for_ordering() {
        let code = VALID_MANUAL.replace(
            "    with allure_step(\"Arrange: open the catalog\"):\n        pass\n",
            concat!(
                "    with allure_step(\"Arrange: open the catalog\"):\n        pass\n",
                "    with allure_step(\"miscellaneous step\"):\n        pass\n",
            ),
        );
        let result = run(&code, Category::ManualUi);
        assert!(result.valid, "issues: {:?}", result.issues);
    }

    #[test]
    fn missing_link_is_advisory_only() {
        let code = VALID_MANUAL.replace("@allure.link(\"https://tracker.example.com/QA-101\")\n", "");
        let result = run(&code, Category::ManualUi);
        assert!(result.valid);
        assert_eq!(result.score, 90);
        assert!(result.issues[0].starts_with("Consider"));
    }

    #[test]
    fn rejects_unknown_priority() {
        let code = VALID_MANUAL.replace("\"HIGH\"", "\"URGENT\"");
        let result = run(&code, Category::ManualUi);
        assert!(!result.valid);
        assert!(result.issues.iter().any(|i| i.contains("Invalid priority 'URGENT'")));
    }

    #[test]
    fn owner_shapes() {
        for owner in ["qa_team", "dev@example.com", "Jane Doe"] {
            let code = VALID_MANUAL.replace("qa_team", owner);
            let result = run(&code, Category::ManualUi);
            assert!(result.valid, "owner {:?}: {:?}", owner, result.issues);
        }
        let code = VALID_MANUAL.replace("qa_team", "somebody");
        let result = run(&code, Category::ManualUi);
        assert!(result.issues.iter().any(|i| i.contains("Invalid owner format")));
    }

    #[test]
    fn auto_categories_only_get_recommendations() {
        let result = run("def test_x():\n    assert True", Category::AutoApi);
        assert!(result.valid);
        assert_eq!(result.issues.len(), 2);
        assert_eq!(result.score, 80);
    }

    #[test]
    fn unit_ci_only_checks_syntax() {
        let result = run("def test_x():\n    assert True", Category::UnitCi);
        assert!(result.valid);
        assert_eq!(result.score, 100);
    }

    #[test]
    fn score_floor_is_forty() {
        let result = run("x = 1", Category::ManualUi);
        assert!(!result.valid);
        assert!(result.score >= 40);
    }
}

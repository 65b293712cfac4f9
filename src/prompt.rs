//! Prompt assembly: per-category templates loaded through a bounded
//! read-through cache, a fixed QA role preamble, and placeholder
//! substitution for previous code and defect history.

use anyhow::Context;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::validate::Category;

pub const QA_PREAMBLE: &str = "You are a senior QA automation engineer. Stay in the role of an \
assistant for generating test documentation and automated tests. Do not step outside QA tasks. \
Strictly follow the AAA structure where applicable.";

const AAA_GUARD: &str = "\n\nIn EVERY test keep the strict step order: Arrange -> Act -> Assert. \
No reordering.";

pub const MAX_PROMPT_CHARS: usize = 8000;
const CACHE_CAPACITY: usize = 10;
const DEFAULT_DEFECTS_SUMMARY: &str = "No historical bugs provided";

/// Read-through template cache keyed by category name. Entries are never
/// invalidated; the size is bounded so an arbitrary entry is evicted when
/// the cap is reached.
pub struct PromptStore {
    dir: PathBuf,
    cache: HashMap<String, String>,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    /// Template text for a category, from cache or `<category>.txt` on disk.
    pub fn template(&mut self, category: Category) -> anyhow::Result<String> {
        let key = category.as_str().to_string();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let path = self.dir.join(format!("{}.txt", key));
        let content = fs::read_to_string(&path).with_context(|| {
            let available: Vec<String> = fs::read_dir(&self.dir)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .filter(|name| name.ends_with(".txt"))
                        .collect()
                })
                .unwrap_or_default();
            format!(
                "Template '{}' not found at {}. Available: {:?}",
                key,
                path.display(),
                available
            )
        })?;
        let content = content.trim().to_string();

        if self.cache.len() >= CACHE_CAPACITY {
            if let Some(evict) = self.cache.keys().next().cloned() {
                self.cache.remove(&evict);
            }
        }
        self.cache.insert(key, content.clone());
        Ok(content)
    }
}

#[derive(Debug, Default)]
pub struct PromptRequest<'a> {
    pub category: Category,
    pub custom_prompt: Option<&'a str>,
    pub previous_code: Option<&'a str>,
    pub defects_summary: Option<&'a str>,
}

/// Output token budget per category.
pub fn max_tokens_for(category: Category) -> u32 {
    match category {
        Category::ManualUi | Category::ManualApi => 8700,
        Category::UnitCi => 2500,
        _ => 4000,
    }
}

/// Assemble the final prompt for a generation request.
pub fn build_prompt(store: &mut PromptStore, req: &PromptRequest) -> anyhow::Result<String> {
    let custom = req
        .custom_prompt
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let previous_code = req.previous_code.map(str::trim).filter(|s| !s.is_empty());

    let mut prompt = match req.category {
        Category::Custom => {
            let custom = custom
                .ok_or_else(|| anyhow::anyhow!("a custom prompt is required and must be non-empty"))?;
            format!("{}\n\n{}", QA_PREAMBLE, custom)
        }
        category => {
            if matches!(category, Category::TestPlan | Category::Optimize) && previous_code.is_none()
            {
                anyhow::bail!("'{}' requires previous code to analyze", category.as_str());
            }
            match custom {
                Some(custom) => format!("{}\n\n{}{}", QA_PREAMBLE, custom, AAA_GUARD),
                None => store.template(category)?,
            }
        }
    };

    if prompt.chars().count() > MAX_PROMPT_CHARS {
        anyhow::bail!("prompt is too long (max {} characters)", MAX_PROMPT_CHARS);
    }

    if req.category == Category::UnitCi {
        let snippet = previous_code.unwrap_or("def endpoint(): pass");
        prompt = prompt.replace("{code_snippet}", snippet);
    }
    if let Some(code) = previous_code {
        prompt = prompt.replace("{previous_code}", code);
    }

    let defects = req
        .defects_summary
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_DEFECTS_SUMMARY);
    prompt = prompt.replace("{historical_bugs}", defects);
    prompt = prompt.replace("{defects_summary}", defects);

    if matches!(req.category, Category::AutoApi | Category::Optimize) {
        if let Some(code) = previous_code {
            let endpoints = extract_api_calls(code);
            if !endpoints.is_empty() {
                prompt.push_str(&format!(
                    "\nEndpoints referenced in the code: {} — make sure every one is covered.",
                    endpoints.join(", ")
                ));
            }
        }
    }

    Ok(prompt)
}

fn api_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"requests\.(?:get|post|put|delete)\(\s*f?["']([^"']+)["']"#)
            .expect("valid regex")
    })
}

/// Endpoints called through `requests.<verb>(...)` in previous code; f-string
/// arguments are truncated at the first interpolation.
pub fn extract_api_calls(code: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for captures in api_call_re().captures_iter(code) {
        let raw = &captures[1];
        let endpoint = raw.split('{').next().unwrap_or(raw).to_string();
        if !(endpoint.starts_with('/') || endpoint.starts_with("http")) {
            continue;
        }
        if !seen.contains(&endpoint) {
            seen.push(endpoint);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_with(templates: &[(&str, &str)]) -> (tempfile::TempDir, PromptStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, content) in templates {
            fs::write(dir.path().join(format!("{}.txt", name)), content).expect("write template");
        }
        let store = PromptStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn reads_template_through_cache() {
        let (dir, mut store) = store_with(&[("manual_ui", "generate manual ui tests")]);
        assert_eq!(
            store.template(Category::ManualUi).unwrap(),
            "generate manual ui tests"
        );

        // Cached: a later change on disk is not observed.
        fs::write(dir.path().join("manual_ui.txt"), "changed").unwrap();
        assert_eq!(
            store.template(Category::ManualUi).unwrap(),
            "generate manual ui tests"
        );
    }

    #[test]
    fn cache_stays_bounded_at_capacity() {
        let (_dir, mut store) = store_with(&[("manual_ui", "generate manual ui tests")]);
        for i in 0..CACHE_CAPACITY {
            store.cache.insert(format!("stale_{}", i), "x".to_string());
        }

        store.template(Category::ManualUi).unwrap();
        assert!(store.cache.len() <= CACHE_CAPACITY);
        assert_eq!(
            store.cache.get("manual_ui").map(String::as_str),
            Some("generate manual ui tests")
        );
    }

    #[test]
    fn missing_template_lists_available() {
        let (_dir, mut store) = store_with(&[("auto_ui", "x")]);
        let err = store.template(Category::ManualApi).unwrap_err();
        assert!(format!("{:#}", err).contains("manual_api"));
    }

    #[test]
    fn custom_prompt_gets_preamble() {
        let (_dir, mut store) = store_with(&[]);
        let req = PromptRequest {
            category: Category::Custom,
            custom_prompt: Some("write three smoke tests"),
            ..Default::default()
        };
        let prompt = build_prompt(&mut store, &req).unwrap();
        assert!(prompt.starts_with(QA_PREAMBLE));
        assert!(prompt.ends_with("write three smoke tests"));
    }

    #[test]
    fn custom_prompt_required_for_custom_category() {
        let (_dir, mut store) = store_with(&[]);
        let req = PromptRequest {
            category: Category::Custom,
            ..Default::default()
        };
        assert!(build_prompt(&mut store, &req).is_err());
    }

    #[test]
    fn custom_override_on_typed_category_adds_order_guard() {
        let (_dir, mut store) = store_with(&[]);
        let req = PromptRequest {
            category: Category::ManualUi,
            custom_prompt: Some("cover the login page"),
            ..Default::default()
        };
        let prompt = build_prompt(&mut store, &req).unwrap();
        assert!(prompt.contains("Arrange -> Act -> Assert"));
    }

    #[test]
    fn overlong_prompt_is_rejected() {
        let (_dir, mut store) = store_with(&[]);
        let long = "x".repeat(MAX_PROMPT_CHARS + 1);
        let req = PromptRequest {
            category: Category::Custom,
            custom_prompt: Some(&long),
            ..Default::default()
        };
        assert!(build_prompt(&mut store, &req).is_err());
    }

    #[test]
    fn narrative_categories_require_previous_code() {
        let (_dir, mut store) = store_with(&[("optimize", "optimize {previous_code}")]);
        let req = PromptRequest {
            category: Category::Optimize,
            ..Default::default()
        };
        assert!(build_prompt(&mut store, &req).is_err());

        let req = PromptRequest {
            category: Category::Optimize,
            previous_code: Some("def test_a():\n    pass"),
            ..Default::default()
        };
        let prompt = build_prompt(&mut store, &req).unwrap();
        assert!(prompt.contains("def test_a()"));
    }

    #[test]
    fn unit_ci_snippet_placeholder() {
        let (_dir, mut store) = store_with(&[("unit_ci", "write unit tests for:\n{code_snippet}")]);
        let req = PromptRequest {
            category: Category::UnitCi,
            ..Default::default()
        };
        let prompt = build_prompt(&mut store, &req).unwrap();
        assert!(prompt.contains("def endpoint(): pass"));
    }

    #[test]
    fn defects_placeholder_defaults() {
        let (_dir, mut store) = store_with(&[("manual_ui", "bugs so far: {historical_bugs}")]);
        let req = PromptRequest {
            category: Category::ManualUi,
            ..Default::default()
        };
        let prompt = build_prompt(&mut store, &req).unwrap();
        assert!(prompt.contains("No historical bugs provided"));
    }

    #[test]
    fn test_extract_api_calls() {
        let code = concat!(
            "import requests\n",
            "def test_a():\n",
            "    requests.get(\"/users\")\n",
            "    requests.post(f\"/users/{user_id}/orders\")\n",
            "    requests.get(\"/users\")\n",
            "    requests.get(local_path)\n",
        );
        assert_eq!(extract_api_calls(code), vec!["/users", "/users/"]);
    }

    #[test]
    fn test_max_tokens_per_category() {
        assert_eq!(max_tokens_for(Category::ManualUi), 8700);
        assert_eq!(max_tokens_for(Category::ManualApi), 8700);
        assert_eq!(max_tokens_for(Category::UnitCi), 2500);
        assert_eq!(max_tokens_for(Category::Custom), 4000);
        assert_eq!(max_tokens_for(Category::TestPlan), 4000);
    }
}

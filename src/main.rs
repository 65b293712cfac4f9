use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use testforge::config::Config;
use testforge::gitlab::{summarize_defects, GitLabClient};
use testforge::llm::{Message, ModelClient};
use testforge::pipeline;
use testforge::prompt::{build_prompt, max_tokens_for, PromptRequest, PromptStore};
use testforge::logging;
use testforge::validate::Category;

#[derive(Parser, Debug)]
#[command(
    name = "testforge",
    about = "Sanitize, repair and validate model-generated pytest/Allure suites",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sanitization pipeline over raw model output
    Sanitize {
        /// Test category (manual_ui, manual_api, auto_ui, auto_api,
        /// test_plan, optimize, unit_ci, custom)
        #[arg(short = 't', long = "type", default_value = "custom")]
        category: String,

        /// Input file with the raw completion (stdin when omitted)
        file: Option<PathBuf>,
    },

    /// Call the model with a category prompt, then run the pipeline
    Generate {
        #[arg(short = 't', long = "type")]
        category: String,

        /// Free-form prompt overriding the category template
        #[arg(long)]
        custom_prompt: Option<String>,

        /// File with previously generated code (required for test_plan/optimize)
        #[arg(long)]
        previous_code: Option<PathBuf>,

        /// GitLab project (ID or namespace/project) for defect history
        #[arg(long)]
        repo: Option<String>,

        /// Directory with prompt templates (falls back to config, then ./prompts)
        #[arg(long)]
        prompts_dir: Option<PathBuf>,
    },

    /// Print the stored prompt template for a category
    Prompt {
        #[arg(short = 't', long = "type")]
        category: String,

        #[arg(long)]
        prompts_dir: Option<PathBuf>,
    },

    /// Commit a generated file to a GitLab repository
    Commit {
        /// GitLab project ID or namespace/project path
        #[arg(long)]
        repo: String,

        #[arg(long, default_value = "main")]
        branch: String,

        /// Target path inside the repository
        #[arg(long)]
        path: String,

        #[arg(long, default_value = "Add generated tests")]
        message: String,

        /// Local file to commit
        file: PathBuf,
    },

    /// Show stored settings, or update them when flags are given
    Config {
        /// Store the model API key
        #[arg(long)]
        api_key: Option<String>,

        /// Store the model identifier
        #[arg(long)]
        model: Option<String>,

        /// Store the model API base URL
        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        gitlab_url: Option<String>,

        #[arg(long)]
        gitlab_token: Option<String>,

        /// Store the prompt template directory
        #[arg(long)]
        prompts_dir: Option<PathBuf>,
    },

    /// Fetch historical defect issues from a GitLab repository
    Defects {
        #[arg(long)]
        repo: String,

        /// Comma-separated label filter
        #[arg(long, default_value = "bug")]
        labels: String,

        #[arg(long, default_value = "all")]
        state: String,

        #[arg(long, default_value_t = 10)]
        max_issues: usize,
    },
}

fn prompts_dir(arg: Option<PathBuf>, config: &Config) -> PathBuf {
    arg.or_else(|| config.prompts_dir.clone())
        .unwrap_or_else(|| PathBuf::from("prompts"))
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => std::io::read_to_string(std::io::stdin()).context("failed to read stdin"),
    }
}

fn print_pipeline_result(category: Category, raw: &str, result: &pipeline::PipelineResult) {
    let body = serde_json::json!({
        "type": category.as_str(),
        "code": result.code,
        "validation": result.validation,
        "syntax_fixed": result.syntax_fixed,
        "raw_length": raw.chars().count(),
        "clean_length": result.code.chars().count(),
    });
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Command::Sanitize { category, file } => {
            let category = Category::parse(&category);
            let raw = read_input(file.as_ref())?;
            let result = pipeline::run(&raw, category);
            print_pipeline_result(category, &raw, &result);
        }

        Command::Generate {
            category,
            custom_prompt,
            previous_code,
            repo,
            prompts_dir: dir,
        } => {
            let category = Category::parse(&category);
            let previous = previous_code
                .map(|path| {
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))
                })
                .transpose()?;

            let defects_summary = match (&repo, category) {
                (Some(repo), Category::Optimize) => {
                    let client = GitLabClient::from_config(&config)?;
                    match client.fetch_defects(repo, &["bug".to_string()], "all", 10).await {
                        Ok(defects) if !defects.is_empty() => Some(summarize_defects(&defects)),
                        Ok(_) => None,
                        Err(err) => {
                            tracing::warn!(%err, "defect fetch failed, continuing without history");
                            None
                        }
                    }
                }
                _ => None,
            };

            let mut store = PromptStore::new(prompts_dir(dir, &config));
            let request = PromptRequest {
                category,
                custom_prompt: custom_prompt.as_deref(),
                previous_code: previous.as_deref(),
                defects_summary: defects_summary.as_deref(),
            };
            let prompt_text = build_prompt(&mut store, &request)?;

            let client = ModelClient::from_config(&config)?;
            let raw = client
                .complete(&[Message::user(prompt_text)], 0.0, max_tokens_for(category))
                .await?;

            let result = pipeline::run(&raw, category);
            print_pipeline_result(category, &raw, &result);
        }

        Command::Prompt {
            category,
            prompts_dir: dir,
        } => {
            let category = Category::parse(&category);
            if category == Category::Custom {
                anyhow::bail!("custom prompts have no stored template");
            }
            let mut store = PromptStore::new(prompts_dir(dir, &config));
            let template = store.template(category)?;
            let body = serde_json::json!({
                "type": category.as_str(),
                "prompt": template,
            });
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }

        Command::Commit {
            repo,
            branch,
            path,
            message,
            file,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let client = GitLabClient::from_config(&config)?;
            let outcome = client
                .commit_file(&repo, &branch, &path, &content, &message)
                .await?;
            let body = serde_json::json!({
                "success": true,
                "message": outcome.message,
                "created": outcome.created,
                "commit_sha": outcome.commit_sha,
            });
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }

        Command::Config {
            api_key,
            model,
            base_url,
            gitlab_url,
            gitlab_token,
            prompts_dir: dir,
        } => {
            let mut config = config;
            let changed = [
                api_key.is_some(),
                model.is_some(),
                base_url.is_some(),
                gitlab_url.is_some(),
                gitlab_token.is_some(),
                dir.is_some(),
            ]
            .iter()
            .any(|&set| set);

            if let Some(v) = api_key {
                config.api_key = Some(v);
            }
            if let Some(v) = model {
                config.model = Some(v);
            }
            if let Some(v) = base_url {
                config.base_url = Some(v);
            }
            if let Some(v) = gitlab_url {
                config.gitlab_url = Some(v);
            }
            if let Some(v) = gitlab_token {
                config.gitlab_token = Some(v);
            }
            if let Some(v) = dir {
                config.prompts_dir = Some(v);
            }

            if changed {
                config.save()?;
            }

            // Secrets are reported by presence only.
            let body = serde_json::json!({
                "location": Config::config_location(),
                "saved": changed,
                "api_key_set": config.api_key.is_some(),
                "model": config.model,
                "base_url": config.base_url,
                "gitlab_url": config.gitlab_url,
                "gitlab_token_set": config.gitlab_token.is_some(),
                "prompts_dir": config.prompts_dir,
            });
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }

        Command::Defects {
            repo,
            labels,
            state,
            max_issues,
        } => {
            let labels: Vec<String> = labels
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            let client = GitLabClient::from_config(&config)?;
            let defects = client.fetch_defects(&repo, &labels, &state, max_issues).await?;
            let summary = if defects.is_empty() {
                format!(
                    "No defects found with labels={:?} and state={}",
                    labels, state
                )
            } else {
                summarize_defects(&defects)
            };
            let body = serde_json::json!({
                "defects": defects,
                "count": defects.len(),
                "summary": summary,
            });
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
    }

    Ok(())
}

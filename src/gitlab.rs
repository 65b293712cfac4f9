//! GitLab REST client: commits generated test files into a repository and
//! fetches historical defect issues for the optimize prompt.

use crate::config::Config;
use crate::util::truncate;
use serde::{Deserialize, Serialize};

pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug)]
pub struct CommitOutcome {
    /// False when an existing file was updated instead.
    pub created: bool,
    pub commit_sha: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Defect {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub state: String,
    pub created_at: String,
    /// Fetched without the label filter because the filtered query was empty.
    pub fallback: bool,
}

#[derive(Deserialize)]
struct IssueResponse {
    iid: u64,
    title: String,
    description: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    state: String,
    created_at: String,
}

#[derive(Deserialize)]
struct ProjectResponse {
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct CommitResponse {
    id: String,
}

impl GitLabClient {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let base_url = config.gitlab_url().filter(|u| !u.trim().is_empty());
        let token = config.gitlab_token().filter(|t| !t.trim().is_empty());
        let (base_url, token) = match (base_url, token) {
            (Some(url), Some(token)) => (url, token),
            _ => anyhow::bail!(
                "GitLab is not configured. Set GITLAB_URL and GITLAB_TOKEN (env or {}).",
                Config::config_location()
            ),
        };

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn default_branch(&self, project: &str) -> anyhow::Result<String> {
        let url = self.api(&format!("projects/{}", encode_component(project)));
        let response = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("{}", project_error_message(project, status, &text));
        }

        let parsed: ProjectResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Failed to parse project response: {}", e))?;
        parsed
            .default_branch
            .ok_or_else(|| anyhow::anyhow!("project '{}' has no default branch", project))
    }

    async fn branch_exists(&self, project: &str, branch: &str) -> anyhow::Result<bool> {
        let url = self.api(&format!(
            "projects/{}/repository/branches/{}",
            encode_component(project),
            encode_component(branch)
        ));
        let response = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?;
        match response.status().as_u16() {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            _ => {
                let status = response.status();
                let text = response.text().await?;
                anyhow::bail!("Branch lookup failed ({}): {}", status, truncate(&text, 200))
            }
        }
    }

    async fn create_branch(&self, project: &str, branch: &str, from: &str) -> anyhow::Result<()> {
        let url = self.api(&format!(
            "projects/{}/repository/branches",
            encode_component(project)
        ));
        let response = self
            .http
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .query(&[("branch", branch), ("ref", from)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            anyhow::bail!(
                "Could not create branch '{}': {} {}",
                branch,
                status,
                truncate(&text, 200)
            );
        }
        tracing::info!(branch, from, "created branch");
        Ok(())
    }

    async fn file_exists(&self, project: &str, file_path: &str, branch: &str) -> anyhow::Result<bool> {
        let url = self.api(&format!(
            "projects/{}/repository/files/{}",
            encode_component(project),
            encode_component(file_path)
        ));
        let response = self
            .http
            .head(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .query(&[("ref", branch)])
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn latest_commit(&self, project: &str, branch: &str) -> Option<String> {
        let url = self.api(&format!(
            "projects/{}/repository/commits",
            encode_component(project)
        ));
        let response = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .query(&[("ref_name", branch), ("per_page", "1")])
            .send()
            .await
            .ok()?;
        let commits: Vec<CommitResponse> = response.json().await.ok()?;
        commits.into_iter().next().map(|c| c.id)
    }

    /// Create or update `file_path` on `branch`, creating the branch from the
    /// project's default branch when it does not exist yet.
    pub async fn commit_file(
        &self,
        project: &str,
        branch: &str,
        file_path: &str,
        content: &str,
        commit_message: &str,
    ) -> anyhow::Result<CommitOutcome> {
        if !self.branch_exists(project, branch).await? {
            let default = self.default_branch(project).await?;
            self.create_branch(project, branch, &default).await?;
        }

        let exists = self.file_exists(project, file_path, branch).await?;
        let url = self.api(&format!(
            "projects/{}/repository/files/{}",
            encode_component(project),
            encode_component(file_path)
        ));

        let body = serde_json::json!({
            "branch": branch,
            "content": content,
            "commit_message": commit_message,
        });

        let request = if exists {
            self.http.put(&url)
        } else {
            self.http.post(&url)
        };
        let response = request
            .header("PRIVATE-TOKEN", &self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            anyhow::bail!(
                "Could not {} file '{}': {} {}",
                if exists { "update" } else { "create" },
                file_path,
                status,
                truncate(&text, 200)
            );
        }

        let commit_sha = self.latest_commit(project, branch).await;
        tracing::info!(file_path, branch, ?commit_sha, created = !exists, "committed file");

        Ok(CommitOutcome {
            created: !exists,
            commit_sha,
            message: format!(
                "File {} {} on branch {}",
                file_path,
                if exists { "updated" } else { "created" },
                branch
            ),
        })
    }

    /// Fetch defect issues, newest first. When the label filter yields
    /// nothing, retries once without it and marks the results as fallback.
    pub async fn fetch_defects(
        &self,
        project: &str,
        labels: &[String],
        state: &str,
        max_issues: usize,
    ) -> anyhow::Result<Vec<Defect>> {
        let issues = self
            .list_issues(project, Some(labels), state, max_issues)
            .await?;
        if !issues.is_empty() || labels.is_empty() {
            return Ok(issues.into_iter().map(|i| to_defect(i, false)).collect());
        }

        let fallback = self.list_issues(project, None, state, max_issues).await?;
        if !fallback.is_empty() {
            tracing::info!(project, count = fallback.len(), "fetched defects without label filter");
        }
        Ok(fallback.into_iter().map(|i| to_defect(i, true)).collect())
    }

    async fn list_issues(
        &self,
        project: &str,
        labels: Option<&[String]>,
        state: &str,
        max_issues: usize,
    ) -> anyhow::Result<Vec<IssueResponse>> {
        let url = self.api(&format!("projects/{}/issues", encode_component(project)));
        let per_page = if max_issues == 0 { 20 } else { max_issues }.to_string();

        let mut query: Vec<(&str, String)> = vec![
            ("order_by", "created_at".to_string()),
            ("sort", "desc".to_string()),
            ("per_page", per_page),
        ];
        if state != "all" {
            query.push(("state", state.to_string()));
        }
        if let Some(labels) = labels {
            if !labels.is_empty() {
                query.push(("labels", labels.join(",")));
            }
        }

        let response = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("{}", project_error_message(project, status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Failed to parse issues response: {}", e))
    }
}

fn to_defect(issue: IssueResponse, fallback: bool) -> Defect {
    Defect {
        id: issue.iid,
        title: issue.title,
        description: issue.description.unwrap_or_default(),
        labels: issue.labels,
        state: issue.state,
        created_at: issue.created_at,
        fallback,
    }
}

/// One line per defect, the shape injected into the optimize prompt.
pub fn summarize_defects(defects: &[Defect]) -> String {
    defects
        .iter()
        .map(|d| {
            format!(
                "Issue #{}: {} ({}, labels: {})",
                d.id,
                d.title,
                d.state,
                d.labels.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn project_error_message(project: &str, status: reqwest::StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 => "GitLab authentication failed. Check GITLAB_TOKEN.".to_string(),
        403 => format!(
            "No access to project '{}'. The token needs 'api' and 'write_repository' scopes.",
            project
        ),
        404 => format!(
            "Project '{}' not found. Check the ID or 'namespace/project' path and token access.",
            project
        ),
        _ => format!(
            "GitLab request for '{}' failed ({}): {}",
            project,
            status,
            truncate(body, 200)
        ),
    }
}

/// Percent-encode a path component the way the GitLab API expects
/// (project paths and file paths go into the URL as single components).
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("group/project"), "group%2Fproject");
        assert_eq!(encode_component("tests/manual_ui_tests.py"), "tests%2Fmanual_ui_tests.py");
        assert_eq!(encode_component("42"), "42");
        assert_eq!(encode_component("a b"), "a%20b");
    }

    #[test]
    fn test_summarize_defects() {
        let defects = vec![
            Defect {
                id: 7,
                title: "Cart total off by one".to_string(),
                description: String::new(),
                labels: vec!["bug".to_string(), "cart".to_string()],
                state: "opened".to_string(),
                created_at: "2026-01-10T00:00:00Z".to_string(),
                fallback: false,
            },
            Defect {
                id: 9,
                title: "Login flaky".to_string(),
                description: String::new(),
                labels: vec!["bug".to_string()],
                state: "closed".to_string(),
                created_at: "2026-02-01T00:00:00Z".to_string(),
                fallback: false,
            },
        ];
        let summary = summarize_defects(&defects);
        assert!(summary.contains("Issue #7: Cart total off by one (opened, labels: bug, cart)"));
        assert!(summary.lines().count() == 2);
    }

    #[test]
    fn test_project_error_message_shapes() {
        let msg = project_error_message("ns/proj", reqwest::StatusCode::NOT_FOUND, "");
        assert!(msg.contains("not found"));
        let msg = project_error_message("ns/proj", reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(msg.contains("GITLAB_TOKEN"));
    }
}

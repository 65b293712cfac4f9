//! Configuration for testforge
//!
//! Stores settings in ~/.config/testforge/config.json; environment
//! variables take precedence over the file.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// API key for the model endpoint.
    pub api_key: Option<String>,
    /// Model identifier; falls back to the built-in default.
    pub model: Option<String>,
    /// Override for the model API base URL.
    pub base_url: Option<String>,
    pub gitlab_url: Option<String>,
    pub gitlab_token: Option<String>,
    /// Directory holding prompt templates, one `<category>.txt` per category.
    pub prompts_dir: Option<PathBuf>,
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("testforge"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Persist to disk. The config directory is created with owner-only
    /// permissions; the file is replaced via a temp file and rename.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir().context("could not determine config directory")?;
        fs::create_dir_all(&dir).context("failed to create config directory")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&dir, fs::Permissions::from_mode(0o700));
        }

        let content = serde_json::to_string_pretty(self)?;
        write_config(&dir.join("config.json"), &content).context("failed to write config")
    }

    /// Model API key: environment first, then config file.
    pub fn model_api_key(&self) -> Option<String> {
        for var in ["TESTFORGE_API_KEY", "CLOUD_RU_API_KEY", "API_KEY", "OPENAI_API_KEY"] {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    return Some(key);
                }
            }
        }
        self.api_key.clone()
    }

    pub fn model_name(&self) -> Option<String> {
        std::env::var("CLOUD_RU_MODEL").ok().or_else(|| self.model.clone())
    }

    pub fn model_base_url(&self) -> Option<String> {
        std::env::var("TESTFORGE_BASE_URL").ok().or_else(|| self.base_url.clone())
    }

    pub fn gitlab_url(&self) -> Option<String> {
        std::env::var("GITLAB_URL").ok().or_else(|| self.gitlab_url.clone())
    }

    pub fn gitlab_token(&self) -> Option<String> {
        std::env::var("GITLAB_TOKEN").ok().or_else(|| self.gitlab_token.clone())
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/testforge/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config(path: &std::path::Path, content: &str) -> anyhow::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let tmp = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn write_config(path: &std::path::Path, content: &str) -> anyhow::Result<()> {
    Ok(fs::write(path, content)?)
}

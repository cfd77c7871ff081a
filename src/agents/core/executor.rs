//! Function execution for model-requested calls

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agents::config::VaultConfig;
use crate::agents::domain::{AiFunction, FunctionCall, ToolDefinition};

/// Executes function calls requested by the model.
///
/// An `Err` is not fatal to the round: its message is handed back to the
/// model as the function's result.
#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    /// Functions advertised to the provider
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one call
    async fn execute(&self, call: &FunctionCall, cancel: &CancellationToken) -> Result<Value, String>;
}

/// Advertises nothing and rejects every call
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFunctions;

#[async_trait]
impl FunctionExecutor for NoFunctions {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn execute(&self, call: &FunctionCall, _cancel: &CancellationToken) -> Result<Value, String> {
        Err(format!("Unknown function: {}", call.name))
    }
}

/// Answers the vault functions from a local directory of notes
pub struct VaultExecutor {
    root: PathBuf,
    max_results: usize,
}

impl VaultExecutor {
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            root: PathBuf::from(&config.path),
            max_results: config.max_results,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a vault-relative path, refusing anything that leaves the root
    fn resolve(&self, relative: &str) -> Result<PathBuf, String> {
        let relative = Path::new(relative.trim_start_matches("./"));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(format!("Path is outside the vault: {}", relative.display()));
        }
        Ok(self.root.join(relative))
    }

    /// Every visible file under the root as a `/`-separated relative path
    async fn walk(&self, cancel: &CancellationToken) -> Result<Vec<String>, String> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            if cancel.is_cancelled() {
                return Err("Cancelled".to_string());
            }
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| format!("Failed to read {}: {}", dir.display(), e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| format!("Failed to read {}: {}", dir.display(), e))?
            {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                match entry.file_type().await {
                    Ok(kind) if kind.is_dir() => pending.push(path),
                    Ok(kind) if kind.is_file() => {
                        if let Some(relative) = self.relative_name(&path) {
                            files.push(relative);
                        }
                    }
                    _ => {}
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn relative_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    async fn list_files(&self, call: &FunctionCall, cancel: &CancellationToken) -> Result<Value, String> {
        let folder = optional_arg(call, "folder").map(|f| f.trim_matches('/').to_string());
        let files: Vec<String> = self
            .walk(cancel)
            .await?
            .into_iter()
            .filter(|f| match &folder {
                Some(folder) if !folder.is_empty() => f.starts_with(&format!("{}/", folder)),
                _ => true,
            })
            .collect();

        let total = files.len();
        let files: Vec<_> = files.into_iter().take(self.max_results).collect();
        Ok(json!({ "files": files, "total": total }))
    }

    async fn search_files(&self, call: &FunctionCall, cancel: &CancellationToken) -> Result<Value, String> {
        let terms = search_terms(call)?;

        let mut matches = Vec::new();
        for file in self.walk(cancel).await? {
            if matches.len() >= self.max_results {
                break;
            }
            if cancel.is_cancelled() {
                return Err("Cancelled".to_string());
            }
            let name = file.to_lowercase();
            if terms.iter().any(|term| name.contains(term.as_str())) {
                matches.push(json!({ "path": file }));
                continue;
            }
            // Binary files fail to decode and are skipped
            if let Ok(content) = fs::read_to_string(self.root.join(&file)).await {
                let hit = content.lines().find(|line| {
                    let line = line.to_lowercase();
                    terms.iter().any(|term| line.contains(term.as_str()))
                });
                if let Some(line) = hit {
                    matches.push(json!({ "path": file, "snippet": line.trim() }));
                }
            }
        }

        Ok(json!({ "matches": matches }))
    }

    async fn read_file(&self, call: &FunctionCall) -> Result<Value, String> {
        let relative = required_arg(call, "path")?;
        let path = self.resolve(relative)?;
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| format!("Failed to read {}: {}", relative, e))?;
        Ok(json!({ "path": relative, "content": content }))
    }
}

#[async_trait]
impl FunctionExecutor for VaultExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                AiFunction::SearchVaultFiles.as_str(),
                "Search the user's notes by file name and content",
                json!({
                    "type": "object",
                    "properties": {
                        "search_terms": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Case-insensitive terms; a file matches if any term appears in its name or content"
                        },
                        "user_message": {
                            "type": "string",
                            "description": "Short message shown to the user explaining the search"
                        }
                    },
                    "required": ["search_terms"]
                }),
            ),
            ToolDefinition::new(
                AiFunction::ListVaultFiles.as_str(),
                "List files in the user's notes, optionally within one folder",
                json!({
                    "type": "object",
                    "properties": {
                        "folder": { "type": "string", "description": "Folder relative to the vault root" }
                    }
                }),
            ),
            ToolDefinition::new(
                AiFunction::ReadFile.as_str(),
                "Read the full content of one note",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Path relative to the vault root" }
                    },
                    "required": ["path"]
                }),
            ),
        ]
    }

    async fn execute(&self, call: &FunctionCall, cancel: &CancellationToken) -> Result<Value, String> {
        debug!("Executing {} ({})", call.name, call.call_id);
        match &call.name {
            AiFunction::SearchVaultFiles => self.search_files(call, cancel).await,
            AiFunction::ListVaultFiles => self.list_files(call, cancel).await,
            AiFunction::ReadFile => self.read_file(call).await,
            AiFunction::Unknown(name) => Err(format!("Unknown function: {}", name)),
        }
    }
}

fn optional_arg<'a>(call: &'a FunctionCall, key: &str) -> Option<&'a str> {
    call.arguments.get(key).and_then(Value::as_str)
}

fn required_arg<'a>(call: &'a FunctionCall, key: &str) -> Result<&'a str, String> {
    optional_arg(call, key).ok_or_else(|| format!("Missing required argument: {}", key))
}

/// Lowercased, non-blank `search_terms`
fn search_terms(call: &FunctionCall) -> Result<Vec<String>, String> {
    let terms = call
        .arguments
        .get("search_terms")
        .and_then(Value::as_array)
        .ok_or_else(|| "Missing required argument: search_terms".to_string())?;
    let terms: Vec<String> = terms
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect();
    if terms.is_empty() {
        return Err("No search terms given".to_string());
    }
    Ok(terms)
}

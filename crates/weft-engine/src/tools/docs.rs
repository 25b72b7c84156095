use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use weft_core::tools::{Tool, ToolContext, ToolError, ToolResult};

const DEFAULT_MAX_RESULTS: usize = 8;
const SNIPPETS_PER_FILE: usize = 3;
const SNIPPET_MAX_CHARS: usize = 200;

/// Case-insensitive substring search over markdown files under a configured
/// docs root. Results are ranked by match count, with line-level snippets.
pub struct DocumentSearchTool {
    root: Option<PathBuf>,
}

impl DocumentSearchTool {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for DocumentSearchTool {
    fn name(&self) -> &str {
        "document_search"
    }

    fn description(&self) -> &str {
        "Search the project's markdown documentation for a phrase and return matching files with snippets"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Phrase to look for (case-insensitive)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Cap on returned files (default 8)"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("query is required".into()))?
            .to_string();
        if query.trim().is_empty() {
            return Ok(ToolResult::error("query must not be empty"));
        }
        let max_results = args["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let Some(root) = self.root.clone() else {
            return Ok(ToolResult::error("docs root not configured"));
        };

        let results =
            tokio::task::spawn_blocking(move || search_docs(&root, &query, max_results))
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("search task failed: {e}")))?;

        debug!(hits = results.len(), "document search finished");
        Ok(ToolResult::ok(json!({ "results": results })))
    }
}

fn search_docs(root: &Path, query: &str, max_results: usize) -> Vec<serde_json::Value> {
    let needle = query.to_lowercase();
    let pattern = root.join("**/*.md").to_string_lossy().into_owned();

    let Ok(entries) = glob::glob(&pattern) else {
        return Vec::new();
    };

    let mut hits: Vec<(usize, serde_json::Value)> = Vec::new();
    for path in entries.flatten() {
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };

        let mut matches = 0usize;
        let mut snippets = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.to_lowercase().contains(&needle) {
                matches += 1;
                if snippets.len() < SNIPPETS_PER_FILE {
                    snippets.push(json!({
                        "line": idx + 1,
                        "text": clip(line.trim()),
                    }));
                }
            }
        }

        if matches > 0 {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .display()
                .to_string();
            hits.push((
                matches,
                json!({"path": rel, "matches": matches, "snippets": snippets}),
            ));
        }
    }

    // Stable sort: ties keep filesystem walk order.
    hits.sort_by(|a, b| b.0.cmp(&a.0));
    hits.into_iter()
        .take(max_results)
        .map(|(_, value)| value)
        .collect()
}

fn clip(line: &str) -> String {
    if line.chars().count() <= SNIPPET_MAX_CHARS {
        line.to_string()
    } else {
        let mut clipped: String = line.chars().take(SNIPPET_MAX_CHARS).collect();
        clipped.push_str("...");
        clipped
    }
}

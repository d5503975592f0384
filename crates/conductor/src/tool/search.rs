//! Grounding search: the `google_search` tool and its pluggable backend.
//!
//! The engine only depends on the [`SearchBackend`] contract; the shipped
//! implementation talks to Exa AI over HTTPS.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Error;
use crate::llm::types::ToolDefinition;
use crate::tool::{Tool, ToolName, ToolOutput};

const DEFAULT_NUM_RESULTS: u64 = 8;
const MAX_NUM_RESULTS: u64 = 20;

/// One search hit handed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Trait for search backends.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility, matching the `Tool`
/// trait pattern.
pub trait SearchBackend: Send + Sync {
    fn search(
        &self,
        query: &str,
        num_results: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SearchHit>, Error>> + Send + '_>>;
}

/// Exa AI search backend. Requires the `EXA_API_KEY` environment variable.
pub struct ExaSearchBackend {
    client: reqwest::Client,
}

impl ExaSearchBackend {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

impl Default for ExaSearchBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchBackend for ExaSearchBackend {
    fn search(
        &self,
        query: &str,
        num_results: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SearchHit>, Error>> + Send + '_>> {
        let query = query.to_string();
        Box::pin(async move {
            let api_key = std::env::var("EXA_API_KEY").map_err(|_| {
                Error::Tool("EXA_API_KEY environment variable not set".into())
            })?;

            let body = json!({
                "query": query,
                "numResults": num_results,
                "contents": { "text": true }
            });

            let response = self
                .client
                .post("https://api.exa.ai/search")
                .header("x-api-key", &api_key)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_body = response.text().await.unwrap_or_default();
                return Err(Error::Tool(format!(
                    "search API error (HTTP {}): {error_body}",
                    status.as_u16()
                )));
            }

            let data: serde_json::Value = response.json().await?;
            let hits = data
                .get("results")
                .and_then(|v| v.as_array())
                .map(|results| {
                    results
                        .iter()
                        .map(|r| SearchHit {
                            title: r
                                .get("title")
                                .and_then(|v| v.as_str())
                                .unwrap_or("Untitled")
                                .to_string(),
                            url: r.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                            snippet: r
                                .get("text")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .chars()
                                .take(500)
                                .collect(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(hits)
        })
    }
}

/// The grounding tool exposed to the model.
pub struct GoogleSearchTool {
    backend: Arc<dyn SearchBackend>,
}

impl GoogleSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

impl Tool for GoogleSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolName::GoogleSearch.as_str().into(),
            description: "Search the web for current information. Returns titles, URLs, \
                          and text snippets to ground your answer in."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "num_results": {
                        "type": "integer",
                        "description": "Number of results to return (default: 8)"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, Error>> + Send + '_>> {
        Box::pin(async move {
            let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
                return Ok(ToolOutput::error("query is required"));
            };
            let num_results = input
                .get("num_results")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_NUM_RESULTS)
                .min(MAX_NUM_RESULTS);

            match self.backend.search(query, num_results).await {
                Ok(hits) => Ok(ToolOutput::success(format_hits(query, &hits))),
                Err(e) => Ok(ToolOutput::error(format!("search failed: {e}"))),
            }
        })
    }
}

fn format_hits(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No search results found.".into();
    }

    let mut output = format!("Search results for \"{query}\":\n\n");
    for (i, hit) in hits.iter().enumerate() {
        output.push_str(&format!(
            "{}. **{}**\n   {}\n   {}\n\n",
            i + 1,
            hit.title,
            hit.url,
            hit.snippet.trim()
        ));
    }
    output
}

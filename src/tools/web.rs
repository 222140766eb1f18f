//! Web search and fetch.
//!
//! Every fetch appends a record to the fetch evidence log at completion,
//! including the error-page heuristics the provenance checker reads.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::evidence::{FetchEntry, FetchLog};
use crate::tools::{Tool, ToolArgs, ToolResult};

const FETCH_MAX_CONTENT: usize = 100_000;
const DISPLAY_LIMIT: usize = 16_000;

pub struct WebTool {
    client:      reqwest::Client,
    working_dir: PathBuf,
    fetch_log:   FetchLog,
}

impl WebTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            client: reqwest::Client::builder()
                .user_agent("taskforge/0.1")
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            fetch_log: FetchLog::new(working_dir.join("_logs")),
            working_dir,
        }
    }

    async fn fetch(&self, url: &str, save_to: Option<&str>) -> ToolResult {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                let entry = FetchEntry {
                    url:              url.to_string(),
                    final_url:        url.to_string(),
                    status_code:      0,
                    content_type:     String::new(),
                    content_length:   0,
                    success:          false,
                    is_html:          false,
                    is_error_page:    false,
                    error_indicators: Vec::new(),
                    error:            Some(e.to_string()),
                    timestamp:        Utc::now(),
                };
                let _ = self.fetch_log.append(&entry);
                return ToolResult::fail(format!("Fetch failed: {}", e));
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = response.text().await.unwrap_or_default();
        let truncated: String = body.chars().take(FETCH_MAX_CONTENT).collect();

        let entry = FetchEntry {
            url:              url.to_string(),
            final_url:        final_url.clone(),
            status_code:      status,
            content_type:     content_type.clone(),
            content_length:   body.len() as u64,
            success:          (200..400).contains(&status),
            is_html:          false,
            is_error_page:    false,
            error_indicators: Vec::new(),
            error:            None,
            timestamp:        Utc::now(),
        }
        .classify(&truncated.chars().take(2000).collect::<String>());
        if let Err(e) = self.fetch_log.append(&entry) {
            tracing::warn!(error = %e, "failed to append fetch log entry");
        }

        if status >= 400 {
            return ToolResult::fail(format!("HTTP {} for {}", status, url));
        }

        if let Some(save_path) = save_to {
            let resolved = if Path::new(save_path).is_absolute() {
                PathBuf::from(save_path)
            } else {
                self.working_dir.join(save_path)
            };
            if let Some(parent) = resolved.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::write(&resolved, &body) {
                return ToolResult::fail(format!("Fetched but failed to save: {}", e));
            }
            return ToolResult::ok(format!(
                "Fetched {} bytes from {} (status {}), saved to {}",
                body.len(),
                url,
                status,
                resolved.display()
            ));
        }

        let display: String = truncated.chars().take(DISPLAY_LIMIT).collect();
        ToolResult::ok(json!({
            "url": final_url,
            "status": status,
            "content_type": content_type,
            "content": display,
        }))
    }

    /// HTML-scrape search via DuckDuckGo. Good enough for agent research;
    /// not a ranking API.
    async fn search(&self, query: &str) -> ToolResult {
        let url = format!("https://html.duckduckgo.com/html/?q={}", urlencode(query));
        let body = match self.client.get(&url).send().await {
            Ok(r) => r.text().await.unwrap_or_default(),
            Err(e) => return ToolResult::fail(format!("Search failed: {}", e)),
        };

        let link_re = Regex::new(r#"<a[^>]+class="result__a"[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("static pattern");
        let tag_re = Regex::new(r"<[^>]+>").expect("static pattern");

        let mut results = Vec::new();
        for cap in link_re.captures_iter(&body).take(8) {
            let href = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            let title = tag_re.replace_all(cap.get(2).map(|m| m.as_str()).unwrap_or_default(), "");
            results.push(format!("- {} ({})", title.trim(), href));
        }

        if results.is_empty() {
            ToolResult::ok(format!("No results for '{}'", query))
        } else {
            ToolResult::ok(results.join("\n"))
        }
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            b' ' => "+".to_string(),
            other => format!("%{:02X}", other),
        })
        .collect()
}

#[async_trait]
impl Tool for WebTool {
    fn name(&self) -> &str {
        "web"
    }

    fn description(&self) -> &str {
        "Search the web or fetch a URL. Commands: search(query), \
         fetch(url, save_to?). Fetched pages are logged for verification."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["search", "fetch"],
                    "description": "search = web search, fetch = download a URL"
                },
                "query": { "type": "string", "description": "Search query (search)" },
                "url": { "type": "string", "description": "URL to fetch (fetch)" },
                "save_to": {
                    "type": "string",
                    "description": "Optional path to save the fetched body to"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        let command = args.get("command").and_then(|v| v.as_str()).unwrap_or_default();
        match command {
            "search" => {
                let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
                    return ToolResult::fail("search requires 'query'");
                };
                self.search(query).await
            }
            "fetch" => {
                let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
                    return ToolResult::fail("fetch requires 'url'");
                };
                let save_to = args.get("save_to").and_then(|v| v.as_str());
                self.fetch(url, save_to).await
            }
            other => ToolResult::fail(format!("Unknown command: '{}'", other)),
        }
    }
}

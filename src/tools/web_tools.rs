// src/tools/web_tools.rs
// Untrusted-content tools: page fetch and web search. Results may be
// attacker-controlled, so executing either flips the turn into isolated
// mode (see the agent loop's tool grouping).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{arg_i64_opt, arg_str, ToolCtx, ToolHandler, ToolRegistry};

/// Cap on text returned to the model from a fetched page.
const MAX_PAGE_CHARS: usize = 6000;

const SEARCH_API_URL: &str = "https://api.search.brave.com/res/v1/web/search";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "browse",
        "Fetch a web page and return its text content.",
        json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        }),
        false,
        Arc::new(Browse),
    );

    registry.register(
        "web_search",
        "Search the web and return result titles, URLs and snippets.",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "count": {"type": "integer", "description": "Max results, default 5"}
            },
            "required": ["query"]
        }),
        false,
        Arc::new(WebSearch),
    );
}

fn http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .user_agent("valet/0.4")
        .build()
        .map_err(|e| e.to_string())
}

struct Browse;

#[async_trait]
impl ToolHandler for Browse {
    async fn handle(&self, _ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let raw_url = arg_str(&args, "url")?;
        let parsed = url::Url::parse(raw_url).map_err(|e| format!("invalid url: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("unsupported url scheme: {}", parsed.scheme()));
        }

        let response = http_client()?
            .get(parsed)
            .send()
            .await
            .map_err(|e| format!("fetch failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("fetch failed: HTTP {status}"));
        }

        let body = response.text().await.map_err(|e| e.to_string())?;
        let text = strip_html(&body);
        let truncated: String = text.chars().take(MAX_PAGE_CHARS).collect();
        if truncated.trim().is_empty() {
            return Ok(format!("{raw_url} returned no readable text."));
        }
        Ok(truncated)
    }
}

/// ASCII-case-insensitive prefix check on raw bytes.
fn starts_with_ignore_case(haystack: &[u8], needle: &str) -> bool {
    haystack.len() >= needle.len()
        && haystack[..needle.len()].eq_ignore_ascii_case(needle.as_bytes())
}

/// Crude tag stripper: drops script/style bodies, then all tags, then
/// collapses whitespace. Enough for the model to read an article.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let bytes = html.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end_tag) = skip_until {
            if starts_with_ignore_case(&bytes[i..], end_tag) {
                i += end_tag.len();
                skip_until = None;
                in_tag = false;
            } else {
                i += 1;
            }
            continue;
        }
        match bytes[i] {
            b'<' => {
                if starts_with_ignore_case(&bytes[i..], "<script") {
                    skip_until = Some("</script>");
                } else if starts_with_ignore_case(&bytes[i..], "<style") {
                    skip_until = Some("</style>");
                } else {
                    in_tag = true;
                }
                i += 1;
            }
            b'>' if in_tag => {
                in_tag = false;
                text.push(' ');
                i += 1;
            }
            _ if in_tag => i += 1,
            _ => {
                let ch_len = utf8_len(bytes[i]);
                if let Some(slice) = html.get(i..i + ch_len) {
                    text.push_str(slice);
                }
                i += ch_len;
            }
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        b if b >= 0xC0 => 2,
        _ => 1,
    }
}

struct WebSearch;

#[async_trait]
impl ToolHandler for WebSearch {
    async fn handle(&self, ctx: &ToolCtx, args: Value) -> Result<String, String> {
        let query = arg_str(&args, "query")?;
        let count = arg_i64_opt(&args, "count").unwrap_or(5).clamp(1, 10);

        let Some(key) = ctx.services.web_search_key.as_deref() else {
            return Err("web search not configured: set BRAVE_API_KEY".into());
        };

        let response = http_client()?
            .get(SEARCH_API_URL)
            .query(&[("q", query), ("count", &count.to_string())])
            .header("X-Subscription-Token", key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| format!("search failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("search failed: HTTP {status}"));
        }

        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        let results = body
            .pointer("/web/results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if results.is_empty() {
            return Ok(format!("No results for '{query}'."));
        }

        let mut out = String::new();
        for result in results.iter().take(count as usize) {
            let title = result.get("title").and_then(Value::as_str).unwrap_or("?");
            let url = result.get("url").and_then(Value::as_str).unwrap_or("?");
            let snippet = result
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("");
            out.push_str(&format!("- {title}\n  {url}\n  {snippet}\n"));
        }
        Ok(out.trim_end().to_string())
    }
}

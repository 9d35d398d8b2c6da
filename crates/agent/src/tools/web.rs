//! Web tools: info_search_web and info_search_api

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use super::{ToolResult, ToolTrait};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";
const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const DUCKDUCKGO_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web search: Brave when a key is configured, DuckDuckGo HTML otherwise
pub struct WebSearchTool {
    api_key: String,
    max_results: u32,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, max_results: u32) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("BRAVE_API_KEY").ok())
            .unwrap_or_default();
        Self {
            api_key,
            max_results: max_results.max(1),
            client: reqwest::Client::new(),
        }
    }

    async fn brave(&self, query: &str, count: u32) -> Result<Vec<SearchHit>, reqwest::Error> {
        let data: Value = self
            .client
            .get(BRAVE_ENDPOINT)
            .query(&[("q", query), ("count", count.to_string().as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let hits = data["web"]["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| SearchHit {
                        title: item["title"].as_str().unwrap_or_default().to_string(),
                        url: item["url"].as_str().unwrap_or_default().to_string(),
                        snippet: item["description"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    async fn duckduckgo(&self, query: &str) -> Result<Vec<SearchHit>, reqwest::Error> {
        let html = self
            .client
            .get(DUCKDUCKGO_ENDPOINT)
            .query(&[("q", query)])
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_duckduckgo(&html))
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    count: Option<u32>,
}

#[async_trait]
impl ToolTrait for WebSearchTool {
    fn name(&self) -> &str {
        "info_search_web"
    }
    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs and snippets."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "count": { "type": "integer", "description": "Number of results (1-10)", "minimum": 1, "maximum": 10 }
            },
            "required": ["query"]
        })
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let args: SearchArgs = serde_json::from_value(args)?;
        let count = args.count.unwrap_or(self.max_results).clamp(1, 10);
        debug!("◆ SEARCHING: {}", args.query);

        let hits = if self.api_key.is_empty() {
            self.duckduckgo(&args.query).await?
        } else {
            self.brave(&args.query, count).await?
        };
        Ok(Value::String(format_hits(&args.query, &hits, count as usize)))
    }
}

/// Extract result links from a DuckDuckGo HTML results page
pub fn parse_duckduckgo(html: &str) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let (Ok(result), Ok(link), Ok(snippet)) = (
        Selector::parse(".result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for node in document.select(&result) {
        let Some(anchor) = node.select(&link).next() else {
            continue;
        };
        let title = collapse_whitespace(&anchor.text().collect::<String>());
        let url = anchor.value().attr("href").unwrap_or_default().to_string();
        if title.is_empty() || url.is_empty() {
            continue;
        }
        let snippet = node
            .select(&snippet)
            .next()
            .map(|s| collapse_whitespace(&s.text().collect::<String>()))
            .unwrap_or_default();
        hits.push(SearchHit {
            title,
            url,
            snippet,
        });
    }
    hits
}

fn format_hits(query: &str, hits: &[SearchHit], count: usize) -> String {
    if hits.is_empty() {
        return format!("No results for: {}", query);
    }
    let mut lines = vec![format!("Results for: {}", query)];
    for (i, hit) in hits.iter().take(count).enumerate() {
        lines.push(format!("{}. {}", i + 1, hit.title));
        lines.push(format!("   {}", hit.url));
        if !hit.snippet.is_empty() {
            lines.push(format!("   {}", hit.snippet));
        }
    }
    lines.join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// GET a JSON API and return its body
pub struct SearchApiTool {
    max_chars: usize,
    client: reqwest::Client,
}

impl SearchApiTool {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SearchApiTool {
    fn default() -> Self {
        Self::new(20000)
    }
}

#[derive(Deserialize)]
struct ApiArgs {
    url: String,
    #[serde(default)]
    params: Map<String, Value>,
}

#[async_trait]
impl ToolTrait for SearchApiTool {
    fn name(&self) -> &str {
        "info_search_api"
    }
    fn description(&self) -> &str {
        "Query an HTTP API with GET parameters and return the response."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Endpoint URL" },
                "params": { "type": "object", "description": "Query parameters" }
            },
            "required": ["url"]
        })
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let args: ApiArgs = serde_json::from_value(args)?;
        if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
            return Err(format!("unsupported url: {}", args.url).into());
        }
        let query: Vec<(String, String)> = args
            .params
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect();
        debug!("◆ QUERYING API: {}", args.url);

        let response = self
            .client
            .get(&args.url)
            .query(&query)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;
        let is_json = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let body = response.text().await?;

        if is_json {
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                return Ok(value);
            }
        }
        Ok(Value::String(limit_chars(&strip_tags(&body), self.max_chars)))
    }
}

fn strip_tags(html: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<script[\s\S]*?</script>|<style[\s\S]*?</style>").expect("valid regex")
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"));

    let text = blocks.replace_all(html, "");
    let text = tags.replace_all(&text, "");
    decode_html_entities(&text).trim().to_string()
}

fn decode_html_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn limit_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

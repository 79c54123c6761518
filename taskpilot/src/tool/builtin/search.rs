//! Web search tool backed by DuckDuckGo's HTML endpoint.
//!
//! Responses are scraped with a small tag scanner: result anchors and
//! snippet elements are located by their class markers, inner text is
//! flattened, entities are decoded, and redirect links are unwrapped to
//! the destination URL. Searches are rate limited.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::debug;

use crate::tool::{
    ParameterKind, ParameterSchema, Tool, ToolCapability, ToolCategory, ToolContext, ToolMetadata,
    ToolResult,
};

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Class marker on result title anchors.
const LINK_MARKER: &str = "result__a";
/// Class marker on snippet elements.
const SNIPPET_MARKER: &str = "result__snippet";

/// Hard cap on results regardless of the caller's request.
const MAX_RESULTS_CAP: usize = 20;

/// A single search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub link: String,
    /// Snippet text.
    pub description: String,
}

/// Search the web and return a numbered result list.
#[derive(Debug)]
pub struct WebSearchTool {
    client: reqwest::Client,
    max_results: usize,
    rate_limit: Duration,
    last_search: tokio::sync::Mutex<Option<Instant>>,
}

impl WebSearchTool {
    /// Create the tool with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            max_results: 5,
            rate_limit: Duration::from_secs(1),
            last_search: tokio::sync::Mutex::new(None),
        }
    }

    /// Set the default number of results returned.
    #[must_use]
    pub const fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Set the minimum delay between searches.
    #[must_use]
    pub const fn with_rate_limit(mut self, delay: Duration) -> Self {
        self.rate_limit = delay;
        self
    }

    /// Sleep until the rate-limit window since the last search has passed.
    async fn throttle(&self) {
        let mut last = self.last_search.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit {
                tokio::time::sleep(self.rate_limit - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, String> {
        self.throttle().await;

        let url = format!("{SEARCH_ENDPOINT}?q={}", urlencoding::encode(query));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Web search failed: {e}"))?;
        let html = response
            .text()
            .await
            .map_err(|e| format!("Web search failed reading response: {e}"))?;

        Ok(scrape_results(&html, max_results))
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "web_search",
            "Search the internet and return titles, links, and snippets.",
            ToolCategory::Research,
        )
        .with_parameters(
            ParameterSchema::new()
                .required("query", ParameterKind::String, "Search query")
                .optional(
                    "max_results",
                    ParameterKind::Integer,
                    "Maximum results to return (1-20)",
                ),
        )
        .with_capabilities(vec![ToolCapability::Network])
    }

    async fn execute(&self, _context: &ToolContext, arguments: &Value) -> ToolResult {
        let Some(query) = arguments.get("query").and_then(Value::as_str) else {
            return ToolResult::err("Missing 'query' argument");
        };
        let max_results = arguments
            .get("max_results")
            .and_then(Value::as_u64)
            .map_or(self.max_results, |n| n as usize)
            .clamp(1, MAX_RESULTS_CAP);

        match self.search(query, max_results).await {
            Ok(results) => {
                debug!(query, count = results.len(), "web search completed");
                ToolResult::ok(render_results(&results))
                    .with_metadata("result_count", json!(results.len()))
                    .with_metadata("query", json!(query))
            }
            Err(message) => ToolResult::err(message),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Extract up to `max` results from the search result page.
///
/// Each result is a title anchor carrying the [`LINK_MARKER`] class; its
/// snippet is the next [`SNIPPET_MARKER`] element before the following
/// title anchor. Sponsored redirects through `y.js` are skipped.
fn scrape_results(html: &str, max: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();
    let mut cursor = 0;

    while results.len() < max {
        let Some(anchor) = next_marked_element(html, cursor, "a", LINK_MARKER) else {
            break;
        };
        let next_anchor_start =
            next_marked_element(html, anchor.end, "a", LINK_MARKER).map(|a| a.start);

        let description = next_marked_element(html, anchor.end, "a", SNIPPET_MARKER)
            .filter(|snippet| next_anchor_start.is_none_or(|bound| snippet.start < bound))
            .map(|snippet| snippet.text)
            .unwrap_or_default();

        cursor = anchor.end;

        let Some(href) = anchor.href else { continue };
        if href.contains("y.js") {
            continue;
        }
        let link = unwrap_redirect(&href);
        if anchor.text.is_empty() || link.is_empty() {
            continue;
        }

        results.push(SearchResult {
            title: anchor.text,
            link,
            description,
        });
    }

    results
}

/// An element located by the scanner: flattened text, optional href, and
/// the byte offsets of the match.
struct ScannedElement {
    text: String,
    href: Option<String>,
    start: usize,
    end: usize,
}

/// Find the next `<tag ...>` whose attribute list contains `marker`,
/// scanning forward from `from`. Returns the element with nested tags
/// stripped from its body.
fn next_marked_element(html: &str, from: usize, tag: &str, marker: &str) -> Option<ScannedElement> {
    let opening = format!("<{tag}");
    let closing = format!("</{tag}>");
    let mut at = from;

    while at < html.len() {
        let start = html[at..].find(&opening)? + at;
        let head_end = html[start..].find('>')? + start;
        let head = &html[start..head_end];

        if !head.contains(marker) {
            at = head_end + 1;
            continue;
        }

        let body_start = head_end + 1;
        let body_end = html[body_start..].find(&closing)? + body_start;
        return Some(ScannedElement {
            text: flatten_text(&html[body_start..body_end]),
            href: attribute_value(head, "href"),
            start,
            end: body_end + closing.len(),
        });
    }
    None
}

/// Pull a double-quoted attribute value out of a tag head.
fn attribute_value(head: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let value_start = head.find(&needle)? + needle.len();
    let value_end = head[value_start..].find('"')? + value_start;
    Some(head[value_start..value_end].to_owned())
}

/// Flatten an element body to text: drop nested tags, collapse whitespace,
/// decode the common entities.
fn flatten_text(body: &str) -> String {
    let mut text = String::with_capacity(body.len());
    let mut in_tag = false;
    for c in body.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    decode_entities(&collapsed)
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Unwrap a result redirect (`...?uddg=<encoded destination>`) to the
/// destination URL; other hrefs pass through, protocol-relative ones get
/// an https scheme.
fn unwrap_redirect(href: &str) -> String {
    if let Some(param_start) = href.find("uddg=") {
        let encoded = &href[param_start + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{rest}");
    }
    href.to_owned()
}

/// Render results as a numbered plain-text list.
fn render_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_owned();
    }
    let mut out = String::new();
    for (index, result) in results.iter().enumerate() {
        out.push_str(&format!("{}. {}\n   {}\n", index + 1, result.title, result.link));
        if !result.description.is_empty() {
            out.push_str(&format!("   {}\n", result.description));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <div class="result results_links_deep">
          <h2 class="result__title">
            <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fdocs&amp;rut=abc">Example <b>Docs</b></a>
          </h2>
          <a class="result__snippet" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fdocs">Reference &amp; guides for the example project.</a>
        </div>
        <div class="result">
          <h2 class="result__title">
            <a rel="nofollow" class="result__a" href="https://other.org/page">Other page</a>
          </h2>
        </div>
    "#;

    #[test]
    fn scrapes_titles_links_and_snippets() {
        let results = scrape_results(SAMPLE, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Example Docs");
        assert_eq!(results[0].link, "https://example.com/docs");
        assert_eq!(
            results[0].description,
            "Reference & guides for the example project."
        );
        assert_eq!(results[1].title, "Other page");
        assert_eq!(results[1].link, "https://other.org/page");
        assert_eq!(results[1].description, "");
    }

    #[test]
    fn respects_max_results() {
        let results = scrape_results(SAMPLE, 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn skips_sponsored_redirects() {
        let html = r#"<a class="result__a" href="https://duckduckgo.com/y.js?ad_id=1">Sponsored</a>"#;
        assert!(scrape_results(html, 5).is_empty());
    }

    #[test]
    fn unwraps_redirects_and_schemes() {
        assert_eq!(
            unwrap_redirect("//duckduckgo.com/l/?uddg=https%3A%2F%2Frust-lang.org%2F&rut=x"),
            "https://rust-lang.org/"
        );
        assert_eq!(unwrap_redirect("//cdn.example.net/a"), "https://cdn.example.net/a");
        assert_eq!(unwrap_redirect("https://plain.example"), "https://plain.example");
    }

    #[test]
    fn flattens_nested_markup() {
        assert_eq!(
            flatten_text("  Deeply <b>nested <i>tags</i></b>\n   and &quot;entities&quot; "),
            "Deeply nested tags and \"entities\""
        );
    }

    #[test]
    fn renders_numbered_list() {
        let results = vec![SearchResult {
            title: "T".into(),
            link: "https://t.example".into(),
            description: "d".into(),
        }];
        let rendered = render_results(&results);
        assert!(rendered.starts_with("1. T\n   https://t.example\n   d\n"));
        assert_eq!(render_results(&[]), "No results found.");
    }
}

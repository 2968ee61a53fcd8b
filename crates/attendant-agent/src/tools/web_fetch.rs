//! Tool: web_fetch — fetch a URL and return its text body, guarded by the
//! SSRF allow/deny checks in [`crate::ssrf`].

use async_trait::async_trait;

use super::{Tool, ToolResult};

/// Truncate to avoid flooding the context window with a large page body.
const MAX_OUTPUT_CHARS: usize = 20_000;
const FETCH_TIMEOUT_SECS: u64 = 20;

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a public HTTP(S) URL and return its text content. Refuses \
         loopback, private-network, link-local, and cloud-metadata addresses."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The HTTP(S) URL to fetch."
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let url = match input.get("url").and_then(|v| v.as_str()) {
            Some(u) => u,
            None => return ToolResult::error("missing required parameter: url"),
        };

        if let Err(reason) = crate::ssrf::check_url(url) {
            return ToolResult::error(format!("refusing to fetch '{url}': {reason}"));
        }

        let client = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
        {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to build http client: {e}")),
        };

        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("request to '{url}' failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            return ToolResult::error(format!("'{url}' returned HTTP {status}"));
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("failed to read response body: {e}")),
        };

        let body = if body.len() > MAX_OUTPUT_CHARS {
            format!(
                "{}\n\n[output truncated at {} characters]",
                &body[..MAX_OUTPUT_CHARS],
                MAX_OUTPUT_CHARS,
            )
        } else {
            body
        };

        ToolResult::success(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_loopback_url() {
        let tool = WebFetchTool;
        let result = tool
            .execute(serde_json::json!({"url": "http://127.0.0.1/secret"}))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("refusing to fetch"));
    }

    #[tokio::test]
    async fn refuses_missing_url() {
        let tool = WebFetchTool;
        let result = tool.execute(serde_json::json!({})).await;
        assert!(result.is_error);
    }
}

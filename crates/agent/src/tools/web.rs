//! Web retrieval

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use super::filesystem::truncate_output;
use super::{parse_args, FieldSpec, Tier, ToolDescriptor, ToolError, ToolOutput, ToolTrait, ValueKind};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; warden/0.1)";

/// HTTP GET with HTML reduced to readable text
pub struct WebFetchTool {
    client: reqwest::Client,
    max_chars: usize,
    descriptor: ToolDescriptor,
}

impl WebFetchTool {
    pub fn new(max_chars: usize) -> Self {
        let descriptor = ToolDescriptor::new(
            "web_fetch",
            "Fetch a URL and return its readable text content.",
            Tier::Atomic,
        )
        .field(FieldSpec::required("url", ValueKind::String, "http(s) URL to fetch"))
        .field(FieldSpec::optional("max_chars", ValueKind::Integer, "Maximum characters to return"));
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            max_chars,
            descriptor,
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new(50_000)
    }
}

#[derive(Deserialize)]
struct WebFetchArgs {
    url: String,
    max_chars: Option<usize>,
}

#[async_trait]
impl ToolTrait for WebFetchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: Map<String, Value>) -> ToolOutput {
        let args: WebFetchArgs = parse_args(args)?;
        if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
            return Err(ToolError::InvalidArguments(format!(
                "unsupported url scheme: {}",
                args.url
            )));
        }
        let max_chars = args.max_chars.unwrap_or(self.max_chars).min(self.max_chars);
        debug!("Fetching URL: {}", args.url);

        let response = self.client.get(&args.url).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "{} returned {}",
                args.url,
                status.as_u16()
            )));
        }

        let text = if content_type.contains("html") {
            html2text::from_read(body.as_bytes(), 100)
        } else {
            body
        };
        let truncated = text.chars().count() > max_chars;

        Ok(json!({
            "url": args.url,
            "final_url": final_url,
            "status": status.as_u16(),
            "truncated": truncated,
            "text": truncate_output(&text, max_chars),
        })
        .to_string())
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::client::AuthClient;
use crate::error::ClientError;

const CHAT_PATH: &str = "/api/claude/chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

/// Coach chat backed by the server's LLM proxy.
#[derive(Clone)]
pub struct CoachApi {
    client: AuthClient,
}

impl CoachApi {
    pub fn new(client: AuthClient) -> Self {
        Self { client }
    }

    /// Send the conversation so far and return the coach's reply text.
    /// `context` carries module state the coach should see.
    pub async fn chat(&self, messages: &[ChatMessage], context: Option<Value>) -> Result<String, ClientError> {
        info!(messages = messages.len(), "sending coach chat request");
        let mut body = json!({ "messages": messages });
        if let Some(context) = context {
            body["context"] = context;
        }
        let response = self.client.post_json(CHAT_PATH, body).await?;
        extract_reply(&response)
            .ok_or_else(|| ClientError::Transport("coach response carried no text".into()))
    }
}

// Either {"response": "..."}, {"message": "..."} or Anthropic-style content blocks.
fn extract_reply(body: &Value) -> Option<String> {
    if let Some(text) = body
        .get("response")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
    {
        return Some(text.to_string());
    }
    let blocks: Vec<ContentBlock> = serde_json::from_value(body.get("content")?.clone()).ok()?;
    let text = blocks
        .into_iter()
        .filter(|b| b.content_type == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    (!text.is_empty()).then_some(text)
}

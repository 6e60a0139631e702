//! Batch request lines in the provider's JSONL input format.

use std::path::Path;

use sdglens_core::Result;
use serde::{Deserialize, Serialize};

pub const CHAT_COMPLETIONS_URL: &str = "/v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One line of a batch input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: RequestBody,
}

impl BatchRequest {
    /// A single-turn chat completion request.
    pub fn chat(
        custom_id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            custom_id: custom_id.into(),
            method: "POST".into(),
            url: CHAT_COMPLETIONS_URL.into(),
            body: RequestBody {
                model: model.into(),
                messages: vec![ChatMessage {
                    role: "user".into(),
                    content: content.into(),
                }],
                max_tokens,
            },
        }
    }

    /// The serialized line including its trailing newline.
    pub fn to_jsonl_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Content of the last user message.
    pub fn user_content(&self) -> Option<&str> {
        self.body
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

pub fn encode_jsonl(requests: &[BatchRequest]) -> Result<String> {
    let mut out = String::new();
    for r in requests {
        out.push_str(&r.to_jsonl_line()?);
    }
    Ok(out)
}

/// Parse a batch input file back into requests, skipping blank lines.
pub fn read_jsonl(path: &Path) -> Result<Vec<BatchRequest>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let r = BatchRequest::chat("sdg1~basf~2020~2", "gpt-5-nano", "classify me", None);
        let line = r.to_jsonl_line().unwrap();
        assert!(line.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(v["custom_id"], "sdg1~basf~2020~2");
        assert_eq!(v["method"], "POST");
        assert_eq!(v["url"], "/v1/chat/completions");
        assert_eq!(v["body"]["model"], "gpt-5-nano");
        assert_eq!(v["body"]["messages"][0]["role"], "user");
        assert_eq!(v["body"]["messages"][0]["content"], "classify me");
        assert!(v["body"].get("max_tokens").is_none());

        let capped = BatchRequest::chat("x", "m", "c", Some(50));
        let v: serde_json::Value = serde_json::to_value(&capped).unwrap();
        assert_eq!(v["body"]["max_tokens"], 50);
    }

    #[test]
    fn test_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        let reqs = vec![
            BatchRequest::chat("a", "m", "first", None),
            BatchRequest::chat("b", "m", "zweiter Satz – ü", Some(50)),
        ];
        std::fs::write(&path, encode_jsonl(&reqs).unwrap()).unwrap();
        assert_eq!(read_jsonl(&path).unwrap(), reqs);
        assert_eq!(reqs[1].user_content(), Some("zweiter Satz – ü"));
    }
}

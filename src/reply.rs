//! Reply decoding for the two endpoint dialects.
//!
//! API1 replies carry content under `choices[].message.content`; API2
//! replies carry it under `output[].content[]` entries whose type is
//! `output_text`. The dispatcher only cares about the decoded content
//! blocks; everything else in the payload is ignored.

use crate::config::InterfaceType;
use crate::error::{Error, Result};
use serde::Deserialize;

// ── API1: chat completions ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Api1Reply {
    #[serde(default)]
    choices: Vec<Api1Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Api1Choice {
    message: Api1Message,
}

#[derive(Debug, Deserialize)]
struct Api1Message {
    #[serde(default)]
    content: String,
}

// ── API2: responses ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Api2Reply {
    #[serde(default)]
    output: Vec<Api2Output>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Api2Output {
    #[serde(default)]
    content: Vec<Api2Content>,
}

#[derive(Debug, Deserialize)]
struct Api2Content {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Decoded reply: just the ordered content blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    blocks: Vec<String>,
}

impl Reply {
    /// Number of content blocks the reply carried.
    #[must_use]
    pub fn has_content(&self) -> usize {
        self.blocks.len()
    }

    /// Text of the block at `index`, if present.
    #[must_use]
    pub fn content(&self, index: usize) -> Option<&str> {
        self.blocks.get(index).map(String::as_str)
    }

    pub fn blocks(&self) -> &[String] {
        &self.blocks
    }
}

/// Decode a raw response body in the given dialect.
pub fn decode(interface_type: InterfaceType, body: &str) -> Result<Reply> {
    match interface_type {
        InterfaceType::Api1 => {
            let reply: Api1Reply = serde_json::from_str(body)?;
            if let Some(error) = reply.error {
                return Err(Error::reply("API1", error.message));
            }
            Ok(Reply {
                blocks: reply
                    .choices
                    .into_iter()
                    .map(|choice| choice.message.content)
                    .collect(),
            })
        }
        InterfaceType::Api2 => {
            let reply: Api2Reply = serde_json::from_str(body)?;
            if let Some(error) = reply.error {
                return Err(Error::reply("API2", error.message));
            }
            Ok(Reply {
                blocks: reply
                    .output
                    .into_iter()
                    .filter_map(|output| {
                        output
                            .content
                            .into_iter()
                            .find(|c| c.kind == "output_text" && !c.text.is_empty())
                            .map(|c| c.text)
                    })
                    .collect(),
            })
        }
    }
}

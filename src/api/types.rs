//! Outbound message types for the `message/send` API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Outbound message formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundKind {
    Text,
    Markdown,
    Textcard,
}

impl OutboundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundKind::Text => "text",
            OutboundKind::Markdown => "markdown",
            OutboundKind::Textcard => "textcard",
        }
    }
}

/// A message to push to members, departments or tags.
///
/// This is also the JSON body accepted by `POST /send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to_user: Option<String>,
    pub to_party: Option<String>,
    pub to_tag: Option<String>,
    #[serde(alias = "kind")]
    pub msg_type: OutboundKind,
    pub content: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl SendRequest {
    fn direct(kind: OutboundKind, to_user: &str, content: impl Into<String>) -> Self {
        Self {
            to_user: Some(to_user.to_string()),
            to_party: None,
            to_tag: None,
            msg_type: kind,
            content: content.into(),
            title: None,
            description: None,
            url: None,
        }
    }

    pub fn text(to_user: &str, content: impl Into<String>) -> Self {
        Self::direct(OutboundKind::Text, to_user, content)
    }

    pub fn markdown(to_user: &str, content: impl Into<String>) -> Self {
        Self::direct(OutboundKind::Markdown, to_user, content)
    }

    /// JSON body for `cgi-bin/message/send`.
    ///
    /// With no explicit user the message goes to `@all`.
    pub fn payload(&self, agent_id: Option<i64>) -> Value {
        let to_user = self
            .to_user
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or("@all");

        let mut body = json!({
            "touser": to_user,
            "msgtype": self.msg_type.as_str(),
            "agentid": agent_id,
        });

        if let Some(party) = &self.to_party {
            body["toparty"] = json!(party);
        }
        if let Some(tag) = &self.to_tag {
            body["totag"] = json!(tag);
        }

        match self.msg_type {
            OutboundKind::Text => body["text"] = json!({ "content": self.content }),
            OutboundKind::Markdown => body["markdown"] = json!({ "content": self.content }),
            OutboundKind::Textcard => {
                body["textcard"] = json!({
                    "title": non_empty(&self.title).unwrap_or("通知"),
                    "description": non_empty(&self.description).unwrap_or(&self.content),
                    "url": non_empty(&self.url).unwrap_or(""),
                    "btntxt": "详情",
                })
            }
        }

        body
    }
}

/// Empty strings from `/send` bodies count as absent.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Platform response to `message/send`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendReceipt {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
    /// Remaining fields such as `invaliduser` or `msgid`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

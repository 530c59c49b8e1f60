//! Decrypted inbound callback messages.

use std::collections::HashMap;

use serde::Deserialize;

/// A decrypted callback message.
///
/// Field names follow the platform's XML element names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundMessage {
    /// Corp ID the message was addressed to.
    #[serde(default)]
    pub to_user_name: String,
    /// Member user id of the sender.
    #[serde(default)]
    pub from_user_name: String,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub msg_type: String,
    pub content: Option<String>,
    pub msg_id: Option<String>,
    #[serde(rename = "AgentID")]
    pub agent_id: Option<String>,
    pub pic_url: Option<String>,
    pub media_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub event: Option<String>,
    pub event_key: Option<String>,
}

/// Message types the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    Text,
    Link,
    Event,
    Other,
}

impl InboundMessage {
    /// Build from the leaf elements of a parsed `<xml>` document.
    pub fn from_fields(fields: HashMap<String, String>) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(fields)?;
        serde_json::from_value(value)
    }

    pub fn kind(&self) -> MsgKind {
        match self.msg_type.as_str() {
            "text" => MsgKind::Text,
            "link" => MsgKind::Link,
            "event" => MsgKind::Event,
            _ => MsgKind::Other,
        }
    }

    /// Creation time in seconds since the epoch.
    pub fn created_at(&self) -> Option<i64> {
        self.create_time.as_deref().and_then(|t| t.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_xml;

    #[test]
    fn text_message_from_xml() {
        let xml = "<xml><ToUserName><![CDATA[ww1234]]></ToUserName>\
                   <FromUserName><![CDATA[zhangsan]]></FromUserName>\
                   <CreateTime>1348831860</CreateTime>\
                   <MsgType><![CDATA[text]]></MsgType>\
                   <Content><![CDATA[@AI hello]]></Content>\
                   <MsgId>1234567890123456</MsgId>\
                   <AgentID>1000002</AgentID></xml>";
        let msg = InboundMessage::from_fields(parse_xml(xml).unwrap()).unwrap();

        assert_eq!(msg.kind(), MsgKind::Text);
        assert_eq!(msg.to_user_name, "ww1234");
        assert_eq!(msg.from_user_name, "zhangsan");
        assert_eq!(msg.created_at(), Some(1348831860));
        assert_eq!(msg.content.as_deref(), Some("@AI hello"));
        assert_eq!(msg.agent_id.as_deref(), Some("1000002"));
    }

    #[test]
    fn event_message_from_xml() {
        let xml = "<xml><FromUserName>lisi</FromUserName><MsgType>event</MsgType>\
                   <Event>click</Event><EventKey>help</EventKey></xml>";
        let msg = InboundMessage::from_fields(parse_xml(xml).unwrap()).unwrap();

        assert_eq!(msg.kind(), MsgKind::Event);
        assert_eq!(msg.event.as_deref(), Some("click"));
        assert_eq!(msg.event_key.as_deref(), Some("help"));
    }

    #[test]
    fn unknown_types_and_missing_fields() {
        let msg = InboundMessage::from_fields(HashMap::from([(
            "MsgType".to_string(),
            "image".to_string(),
        )]))
        .unwrap();
        assert_eq!(msg.kind(), MsgKind::Other);
        assert_eq!(msg.from_user_name, "");
        assert_eq!(msg.created_at(), None);
    }
}

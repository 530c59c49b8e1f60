//! Inbound dispatcher: reacts to decrypted callback messages.
//!
//! The platform wants its HTTP acknowledgment within five seconds, so the
//! callback handler hands each message to [`Dispatcher::spawn`] and returns
//! immediately. Everything here (acknowledgments, the AI call, the final
//! reply) runs in that detached task and reaches the user through the
//! outbound send API. Failures are logged and, where possible, turned into an
//! apology to the user; nothing is retried.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{MessageSender, SendRequest};
use crate::config::DEFAULT_SYSTEM_PROMPT;
use crate::error::{ApiError, Error, LlmError};
use crate::llm::{ChatMessage, LlmProvider};
use crate::message::{InboundMessage, MsgKind};

/// Text prefixes that route a message to the AI, checked in order.
pub const TRIGGER_PREFIXES: &[&str] = &[
    "@AI",
    "@ai",
    "@助手",
    "@DeepDive",
    "@deepdive",
    "/ai",
    "/分析",
    "/总结",
    "/翻译",
];

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("valid URL regex"));

const HELP_MESSAGE: &str = "DeepDive AI 助手使用指南

使用方法：
- @AI + 问题：AI 将回答你的问题
- @AI + 链接：AI 将分析链接内容
- /分析 + 内容：分析指定内容
- /总结 + 内容：总结指定内容
- /翻译 + 内容：翻译指定内容

示例：
@AI 什么是人工智能？
@AI https://example.com/article
/分析 这篇文章的主要观点是什么？

直接发送链接也会自动触发分析。";

const PROCESSING_MESSAGE: &str = "正在分析中，请稍候...";
const AI_FAILED_MESSAGE: &str = "抱歉，AI 分析过程中出现错误，请稍后再试。";
const LINK_FAILED_MESSAGE: &str = "抱歉，链接分析过程中出现错误，请稍后再试。";
const LINK_UNRECOGNIZED_MESSAGE: &str = "未能识别链接内容，请重新发送。";
const LINK_INSTRUCTION: &str = "请分析这篇文章的内容，给出主要观点、关键信息和总结：";

/// A text message that asked for the AI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub prefix: &'static str,
    /// Content after the prefix, trimmed.
    pub query: String,
    /// First URL found in the query.
    pub url: Option<String>,
}

/// Classify text content. `None` means no trigger prefix matched.
pub fn parse_trigger(content: &str) -> Option<Trigger> {
    let content = content.trim();
    let prefix = TRIGGER_PREFIXES
        .iter()
        .copied()
        .find(|p| content.starts_with(p))?;

    let query = content[prefix.len()..].trim().to_string();
    let url = URL_PATTERN.find(&query).map(|m| m.as_str().to_string());

    Some(Trigger { prefix, query, url })
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub system_prompt: String,
    /// Send AI results as markdown rather than text.
    pub reply_markdown: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            reply_markdown: false,
        }
    }
}

/// Routes decrypted messages to their reaction.
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    llm: Arc<dyn LlmProvider>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        llm: Arc<dyn LlmProvider>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            sender,
            llm,
            config,
        }
    }

    /// Handle `message` on a detached task.
    ///
    /// Callers must not await the handle before acknowledging the callback.
    pub fn spawn(self: &Arc<Self>, message: InboundMessage) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.handle_message(&message).await {
                error!(
                    from = %message.from_user_name,
                    msg_type = %message.msg_type,
                    error = %e,
                    "Error processing message"
                );
            }
        })
    }

    /// React to one message. Runs to completion; there is no cancellation.
    pub async fn handle_message(&self, message: &InboundMessage) -> Result<(), Error> {
        info!(
            msg_type = %message.msg_type,
            from = %message.from_user_name,
            "Processing message"
        );

        match message.kind() {
            MsgKind::Text => self.handle_text(message).await,
            MsgKind::Link => self.handle_link(message).await,
            MsgKind::Event => self.handle_event(message).await,
            MsgKind::Other => {
                info!(msg_type = %message.msg_type, "Unsupported message type");
                let reply = format!(
                    "抱歉，暂时不支持 {} 类型的消息。\n\n支持的消息类型：\n\
                     - 文本消息（@AI 开头触发分析）\n\
                     - 链接消息（自动分析网页内容）",
                    message.msg_type
                );
                self.send_text(&message.from_user_name, reply).await
            }
        }
    }

    async fn handle_text(&self, message: &InboundMessage) -> Result<(), Error> {
        let from = message.from_user_name.as_str();
        let content = message.content.as_deref().unwrap_or_default().trim();

        debug!(
            from,
            preview = %content.chars().take(50).collect::<String>(),
            "Text message"
        );

        let Some(trigger) = parse_trigger(content) else {
            return self.send_text(from, HELP_MESSAGE).await;
        };

        if trigger.query.is_empty() {
            return self.send_text(from, HELP_MESSAGE).await;
        }

        self.send_text(from, PROCESSING_MESSAGE).await?;

        match self.analyze(&trigger.query, trigger.url.as_deref()).await {
            Ok(answer) => self.send_reply(from, answer).await,
            Err(e) => {
                error!(from, error = %e, "AI analysis failed");
                self.send_text(from, AI_FAILED_MESSAGE).await
            }
        }
    }

    async fn handle_link(&self, message: &InboundMessage) -> Result<(), Error> {
        let from = message.from_user_name.as_str();
        let title = message.title.as_deref().unwrap_or_default();

        let Some(url) = message.url.as_deref().filter(|u| !u.is_empty()) else {
            return self.send_text(from, LINK_UNRECOGNIZED_MESSAGE).await;
        };

        info!(from, url, "Link message");

        let label = if title.is_empty() { url } else { title };
        self.send_text(from, format!("正在分析: {label}\n请稍候..."))
            .await?;

        let instruction = format!("{LINK_INSTRUCTION}{title}");
        match self.analyze(&instruction, Some(url)).await {
            Ok(answer) => self.send_reply(from, answer).await,
            Err(e) => {
                error!(from, url, error = %e, "Link analysis failed");
                self.send_text(from, LINK_FAILED_MESSAGE).await
            }
        }
    }

    async fn handle_event(&self, message: &InboundMessage) -> Result<(), Error> {
        let from = message.from_user_name.as_str();
        let event = message.event.as_deref().unwrap_or_default();

        info!(from, event, "Event");

        match event {
            "subscribe" | "enter_agent" => {
                let welcome = format!("欢迎使用 DeepDive AI 助手！\n\n{HELP_MESSAGE}");
                self.send_text(from, welcome).await
            }
            "click" => {
                let key = message.event_key.as_deref().unwrap_or_default();
                match key {
                    "help" => self.send_text(from, HELP_MESSAGE).await,
                    _ => {
                        info!(from, key, "Unknown menu event key");
                        Ok(())
                    }
                }
            }
            _ => {
                info!(from, event, "Unhandled event");
                Ok(())
            }
        }
    }

    async fn analyze(&self, query: &str, url: Option<&str>) -> Result<String, LlmError> {
        let user_content = match url {
            Some(url) => format!("{query}\n\n链接: {url}"),
            None => query.to_string(),
        };

        debug!(model = self.llm.model_name(), "Calling AI backend");
        self.llm
            .complete(&self.config.system_prompt, &[ChatMessage::user(user_content)])
            .await
    }

    async fn send_reply(&self, to_user: &str, content: String) -> Result<(), Error> {
        let request = if self.config.reply_markdown {
            SendRequest::markdown(to_user, content)
        } else {
            SendRequest::text(to_user, content)
        };
        self.deliver(request).await
    }

    async fn send_text(&self, to_user: &str, content: impl Into<String>) -> Result<(), Error> {
        self.deliver(SendRequest::text(to_user, content)).await
    }

    async fn deliver(&self, request: SendRequest) -> Result<(), Error> {
        let to_user = request.to_user.clone().unwrap_or_default();
        self.sender.send(request).await.map(|_| ()).map_err(|e: ApiError| {
            warn!(to_user = %to_user, error = %e, "Outbound send failed");
            Error::from(e)
        })
    }
}

//! Configuration types.

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Default base URL of the WeCom server API.
pub const DEFAULT_API_BASE: &str = "https://qyapi.weixin.qq.com";

/// System prompt used for every AI analysis request.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是 DeepDive AI 助手，一个智能知识分析助手。
你的任务是帮助用户分析内容、回答问题、提取关键信息。

回复要求：
1. 使用简洁清晰的中文回复
2. 如果是分析网页内容，请提取关键观点和总结
3. 如果是问答，请给出准确、有帮助的回答
4. 适当使用 Markdown 格式使内容更易读
5. 回复长度适中，不要太冗长";

/// Gateway configuration, loaded once at startup.
///
/// Every WeCom field may be empty: the gateway still starts, `/health` reports
/// `not_configured`, and the crypto and credential paths refuse to run.
#[derive(Debug)]
pub struct GatewayConfig {
    /// Corp ID (the receiver id embedded in every encrypted payload).
    pub corp_id: String,
    /// Callback verification token.
    pub token: String,
    /// 43-character EncodingAESKey.
    pub encoding_aes_key: SecretString,
    /// Agent (application) id used when sending messages.
    pub agent_id: String,
    /// Application secret used to obtain access tokens.
    pub secret: SecretString,
    /// Base URL of the platform API.
    pub api_base: String,
    /// Reject payloads whose trailing corp id differs from ours.
    pub strict_receiver_check: bool,
    /// Send AI results as markdown instead of plain text.
    pub reply_markdown: bool,
    /// HTTP listen port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            corp_id: String::new(),
            token: String::new(),
            encoding_aes_key: SecretString::from(String::new()),
            agent_id: String::new(),
            secret: SecretString::from(String::new()),
            api_base: DEFAULT_API_BASE.to_string(),
            strict_receiver_check: false,
            reply_markdown: false,
            port: 8080,
        }
    }
}

impl GatewayConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).unwrap_or_default().trim().to_string();

        let port = match std::env::var("GATEWAY_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "GATEWAY_PORT".to_string(),
                message: format!("'{raw}' is not a valid port"),
            })?,
            Err(_) => 8080,
        };

        let api_base = std::env::var("WECOM_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        Ok(Self {
            corp_id: env("WECOM_CORP_ID"),
            token: env("WECOM_TOKEN"),
            encoding_aes_key: SecretString::from(env("WECOM_ENCODING_AES_KEY")),
            agent_id: env("WECOM_AGENT_ID"),
            secret: SecretString::from(env("WECOM_SECRET")),
            api_base,
            strict_receiver_check: env_flag("WECOM_STRICT_RECEIVER_CHECK"),
            reply_markdown: env_flag("WECOM_REPLY_MARKDOWN"),
            port,
        })
    }

    /// Corp ID, token and EncodingAESKey are all present.
    pub fn is_configured(&self) -> bool {
        !self.corp_id.is_empty()
            && !self.token.is_empty()
            && !self.encoding_aes_key.expose_secret().is_empty()
    }

    /// Corp ID with everything after the first four characters hidden.
    pub fn masked_corp_id(&self) -> Option<String> {
        if !self.is_configured() {
            return None;
        }
        Some(mask_corp_id(&self.corp_id))
    }
}

/// First four characters of a corp id followed by `****`.
pub fn mask_corp_id(corp_id: &str) -> String {
    let prefix: String = corp_id.chars().take(4).collect();
    format!("{prefix}****")
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
